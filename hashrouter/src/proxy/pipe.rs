//! Bidirectional message forwarding between a miner and its pool.
//!
//! The two directions are independent halves sharing a pair of swappable
//! endpoints. Endpoints are re-fetched through accessors on every
//! iteration, so swapping the destination redirects subsequent traffic
//! without restarting a half. A submit is written to whichever destination
//! is bound at the moment it is read from the miner.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stratum_v1::{Message, StratumError, StratumResult};

use super::dest::DestConn;
use super::source::SourceConn;

/// Per-direction message interceptor. May rewrite the message or drop it
/// by returning `None`; receives the endpoints bound at interception time.
pub type Interceptor = Box<
    dyn Fn(Message, &Arc<SourceConn>, &Arc<DestConn>) -> StratumResult<Option<Message>>
        + Send
        + Sync,
>;

/// A no-op interceptor.
pub fn passthrough() -> Interceptor {
    Box::new(|msg, _source, _dest| Ok(Some(msg)))
}

/// Forwarder between one miner and one (swappable) pool.
pub struct Pipe {
    source: Mutex<Arc<SourceConn>>,
    dest: Mutex<Arc<DestConn>>,
    source_interceptor: Interceptor,
    dest_interceptor: Interceptor,
}

impl Pipe {
    pub fn new(
        source: Arc<SourceConn>,
        dest: Arc<DestConn>,
        source_interceptor: Interceptor,
        dest_interceptor: Interceptor,
    ) -> Arc<Self> {
        Arc::new(Self {
            source: Mutex::new(source),
            dest: Mutex::new(dest),
            source_interceptor,
            dest_interceptor,
        })
    }

    pub fn source(&self) -> Arc<SourceConn> {
        Arc::clone(&self.source.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn dest(&self) -> Arc<DestConn> {
        Arc::clone(&self.dest.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Swap the destination. Quiesce the dest→source half first if the
    /// replay burst must stay contiguous.
    pub fn set_dest(&self, dest: Arc<DestConn>) {
        debug!(dest = %dest.url().user_host(), "Pipe destination swapped");
        *self.dest.lock().unwrap_or_else(|e| e.into_inner()) = dest;
    }

    /// Forward miner messages to the bound destination until cancelled or
    /// a connection fails.
    pub async fn source_to_dest(&self, ct: &CancellationToken) -> StratumResult<()> {
        loop {
            let source = self.source();
            let msg = match source.read(ct).await {
                Ok(msg) => msg,
                Err(StratumError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };

            // Bind the destination after the read so a submit goes to
            // the dest active at the instant it was read
            let dest = self.dest();
            let msg = (self.source_interceptor)(msg, &source, &dest)?;
            let Some(msg) = msg else { continue };

            match dest.write(ct, &msg).await {
                Ok(()) => {}
                Err(StratumError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Forward pool messages to the miner until cancelled or a
    /// connection fails.
    pub async fn dest_to_source(&self, ct: &CancellationToken) -> StratumResult<()> {
        loop {
            let dest = self.dest();
            let msg = match dest.read(ct).await {
                Ok(Some(msg)) => msg,
                // Consumed by a result handler
                Ok(None) => continue,
                Err(StratumError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };

            let source = self.source();
            let msg = (self.dest_interceptor)(msg, &source, &dest)?;
            let Some(msg) = msg else { continue };

            match source.write(ct, &msg).await {
                Ok(()) => {}
                Err(StratumError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Spawn the miner→pool half under its own cancellation token.
    pub fn spawn_source_to_dest(self: &Arc<Self>, parent: &CancellationToken) -> PipeHalf {
        let token = parent.child_token();
        let pipe = Arc::clone(self);
        let ct = token.clone();
        PipeHalf {
            token,
            handle: tokio::spawn(async move { pipe.source_to_dest(&ct).await }),
        }
    }

    /// Spawn the pool→miner half under its own cancellation token.
    pub fn spawn_dest_to_source(self: &Arc<Self>, parent: &CancellationToken) -> PipeHalf {
        let token = parent.child_token();
        let pipe = Arc::clone(self);
        let ct = token.clone();
        PipeHalf {
            token,
            handle: tokio::spawn(async move { pipe.dest_to_source(&ct).await }),
        }
    }

    /// Run both halves; when either finishes, stop the other and return
    /// the first half's result.
    pub async fn run(self: &Arc<Self>, ct: &CancellationToken) -> StratumResult<()> {
        let mut s2d = self.spawn_source_to_dest(ct);
        let mut d2s = self.spawn_dest_to_source(ct);

        let first = tokio::select! {
            res = s2d.join() => {
                d2s.stop().await.ok();
                res
            }
            res = d2s.join() => {
                s2d.stop().await.ok();
                res
            }
        };
        first
    }
}

/// A running pipe half: its cancellation token and task handle.
pub struct PipeHalf {
    token: CancellationToken,
    handle: JoinHandle<StratumResult<()>>,
}

impl PipeHalf {
    /// Wait for the half to finish on its own.
    pub async fn join(&mut self) -> StratumResult<()> {
        match (&mut self.handle).await {
            Ok(res) => res,
            Err(e) => Err(StratumError::Protocol(format!("pipe task panicked: {}", e))),
        }
    }

    /// Cancel the half and wait for it to wind down.
    pub async fn stop(mut self) -> StratumResult<()> {
        self.token.cancel();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::test_support::{mock_dest_conn, mock_source_conn};
    use crate::stratum_v1::{ResultMsg, SetDifficulty, Submit};

    fn submit(id: u64, job: &str) -> Message {
        Message::Submit(Submit {
            id,
            worker_name: "w".into(),
            job_id: job.into(),
            extranonce2: "0000".into(),
            ntime: "5a5a5a5a".into(),
            nonce: "00000001".into(),
            version_bits: None,
        })
    }

    #[tokio::test]
    async fn forwards_in_both_directions() {
        let (source, mut miner) = mock_source_conn("m1");
        let (dest, mut pool) = mock_dest_conn("d1");
        let pipe = Pipe::new(source, dest, passthrough(), passthrough());

        let ct = CancellationToken::new();
        let s2d = pipe.spawn_source_to_dest(&ct);
        let d2s = pipe.spawn_dest_to_source(&ct);

        miner.send(submit(1, "j1"));
        assert_eq!(pool.recv().await.method_name(), "mining.submit");

        pool.send(Message::SetDifficulty(SetDifficulty::new(32.0)));
        assert_eq!(miner.recv().await.method_name(), "mining.set_difficulty");

        s2d.stop().await.unwrap();
        d2s.stop().await.unwrap();
    }

    #[tokio::test]
    async fn interceptor_can_drop_messages() {
        let (source, mut miner) = mock_source_conn("m1");
        let (dest, mut pool) = mock_dest_conn("d1");

        // Drop every submit, forward the rest
        let drop_submits: Interceptor = Box::new(|msg, _s, _d| {
            Ok(match msg {
                Message::Submit(_) => None,
                other => Some(other),
            })
        });
        let pipe = Pipe::new(source, dest, drop_submits, passthrough());

        let ct = CancellationToken::new();
        let s2d = pipe.spawn_source_to_dest(&ct);

        miner.send(submit(1, "j1"));
        miner.send(Message::Result(ResultMsg::ok(1)));

        // Only the non-submit made it through
        assert_eq!(pool.recv().await.method_name(), "result");

        s2d.stop().await.unwrap();
    }

    #[tokio::test]
    async fn submits_route_to_dest_bound_at_read_time() {
        let (source, mut miner) = mock_source_conn("m1");
        let (dest_a, mut pool_a) = mock_dest_conn("da");
        let (dest_b, mut pool_b) = mock_dest_conn("db");

        let pipe = Pipe::new(source, dest_a, passthrough(), passthrough());
        let ct = CancellationToken::new();
        let s2d = pipe.spawn_source_to_dest(&ct);

        miner.send(submit(1, "j1"));
        assert_eq!(pool_a.recv().await.method_name(), "mining.submit");

        pipe.set_dest(dest_b);

        miner.send(submit(2, "j2"));
        let got = pool_b.recv().await;
        match got {
            Message::Submit(s) => assert_eq!(s.id, 2),
            other => panic!("unexpected {:?}", other),
        }
        // Nothing further reached the old pool
        assert!(pool_a.rx.try_recv().is_err());

        s2d.stop().await.unwrap();
    }

    #[tokio::test]
    async fn run_returns_first_error_and_stops_other_half() {
        let (source, miner) = mock_source_conn("m1");
        let (dest, _pool) = mock_dest_conn("d1");
        let pipe = Pipe::new(source, dest, passthrough(), passthrough());

        let ct = CancellationToken::new();
        // Simulate the miner disconnecting
        drop(miner);

        let res = pipe.run(&ct).await;
        assert!(matches!(res, Err(StratumError::Closed)));
    }
}

//! The connection proxy: miner-side and pool-side Stratum state, the
//! message pipe, destination hot-swap, and per-miner scheduling.

pub mod change_dest;
pub mod dest;
pub mod job_cache;
pub mod pipe;
pub mod scheduler;
pub mod source;

pub use change_dest::HandlerChangeDest;
pub use dest::{DestConn, RESPONSE_TIMEOUT};
pub use pipe::{Pipe, PipeHalf};
pub use scheduler::{
    DestItem, DestItemInfo, Miner, MinerScheduler, MinerState, OnSubmit, SchedulerConfig,
};
pub use source::SourceConn;

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::allocator::Allocator;
use crate::hashrate::GlobalHashrate;
use crate::stratum_v1::{Connection, StratumError};
use crate::types::InvalidPoolUrl;

/// Proxy-level errors.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Transport-level failure
    #[error("stratum: {0}")]
    Stratum(#[from] StratumError),

    /// Destination rejected our credentials
    #[error("destination rejected authorization: {0}")]
    NotAuthorized(String),

    /// Destination handshake failed (e.g. version mask mismatch)
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Connecting a new destination failed
    #[error("connecting destination failed: {0}")]
    ConnectDest(#[source] Box<ProxyError>),

    /// Swapping destinations failed mid-replay
    #[error("changing destination failed: {0}")]
    ChangeDest(String),

    /// Miner produced no shares within the share timeout
    #[error("miner idle past share timeout")]
    IdleTimeout,

    /// Malformed destination URL
    #[error(transparent)]
    InvalidUrl(#[from] InvalidPoolUrl),
}

/// Accept miners and run a scheduler per connection.
///
/// Each accepted connection is registered with the allocator for the
/// lifetime of its scheduler task and removed when the task ends, so the
/// registry holds exactly one entry per live source connection.
pub async fn serve(
    listener: TcpListener,
    allocator: Arc<Allocator>,
    global: Arc<GlobalHashrate>,
    config: SchedulerConfig,
    ct: CancellationToken,
) -> anyhow::Result<()> {
    let tracker = TaskTracker::new();
    info!(addr = %listener.local_addr()?, "Proxy listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = ct.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        debug!(peer = %peer, "Miner connected");
        stream.set_nodelay(true).ok();

        let source = Arc::new(SourceConn::new(Connection::new(stream)));
        let miner = Miner::new(Arc::clone(&source), Arc::clone(&global), config.vetting_shares);
        allocator.register_miner(Arc::clone(&miner));

        let scheduler = MinerScheduler::new(Arc::clone(&miner), config.clone());
        let allocator = Arc::clone(&allocator);
        let parent_ct = ct.clone();
        tracker.spawn(async move {
            // The miner's own token is what the scheduler watches; tie it
            // to proxy shutdown
            let cancel_guard = {
                let miner = Arc::clone(&miner);
                tokio::spawn(async move {
                    parent_ct.cancelled().await;
                    miner.disconnect();
                })
            };

            match scheduler.run().await {
                Ok(()) => info!(miner = %miner.id(), "Miner disconnected"),
                Err(e) => warn!(miner = %miner.id(), error = %e, "Miner ended with error"),
            }
            cancel_guard.abort();
            allocator.remove_miner(miner.id());
        });
    }

    tracker.close();
    tracker.wait().await;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::stratum_v1::{JsonRpcMessage, Message, MessageRead, MessageWrite};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    /// Minimal mock pool: answers subscribe/authorize/submit, pushes one
    /// difficulty and one job after subscribe.
    async fn run_mock_pool(listener: TcpListener, submits: tokio::sync::mpsc::UnboundedSender<Message>) {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let submits = submits.clone();
            tokio::spawn(async move {
                let (mut reader, mut writer) = Connection::new(stream).split();
                loop {
                    let msg = match reader.read_message().await {
                        Ok(m) => m,
                        Err(_) => return,
                    };
                    match msg {
                        Message::Subscribe(s) => {
                            let res = Message::Result(crate::stratum_v1::ResultMsg {
                                id: s.id,
                                result: Some(json!([[], "08000002", 4])),
                                error: None,
                            });
                            writer.write_message(&res).await.ok();
                            writer
                                .write_message(&Message::SetDifficulty(
                                    crate::stratum_v1::SetDifficulty::new(1.0),
                                ))
                                .await
                                .ok();
                            let notify: JsonRpcMessage = serde_json::from_value(json!({
                                "id": null,
                                "method": "mining.notify",
                                "params": ["j1", "ph", "cb1", "cb2", [], "20000000", "1d00ffff", "5a5a5a5a", true]
                            }))
                            .unwrap();
                            writer
                                .write_message(&Message::from_envelope(notify).unwrap())
                                .await
                                .ok();
                        }
                        Message::Authorize(a) => {
                            writer
                                .write_message(&Message::Result(crate::stratum_v1::ResultMsg::ok(
                                    a.id,
                                )))
                                .await
                                .ok();
                        }
                        Message::Submit(s) => {
                            let id = s.id;
                            submits.send(Message::Submit(s)).ok();
                            writer
                                .write_message(&Message::Result(crate::stratum_v1::ResultMsg::ok(
                                    id,
                                )))
                                .await
                                .ok();
                        }
                        _ => {}
                    }
                }
            });
        }
    }

    /// S1 pass-through: miner handshake and submit flow through the proxy
    /// to the pool, and the pool's notify and submit result flow back.
    #[tokio::test]
    async fn proxy_pass_through() {
        // Mock pool
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pool_addr = pool_listener.local_addr().unwrap();
        let (submit_tx, mut submit_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(run_mock_pool(pool_listener, submit_tx));

        // Proxy
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let allocator = Arc::new(Allocator::new());
        let global = Arc::new(GlobalHashrate::new());
        let config = SchedulerConfig {
            default_pool: crate::types::PoolUrl::parse(&format!("u:p@{}", pool_addr)).unwrap(),
            vetting_shares: 2,
            share_timeout: Duration::from_secs(600),
            not_propagate_worker_name: false,
        };
        let ct = CancellationToken::new();
        tokio::spawn(serve(
            proxy_listener,
            Arc::clone(&allocator),
            global,
            config,
            ct.clone(),
        ));

        // Mock miner
        let stream = TcpStream::connect(proxy_addr).await.unwrap();
        let (mut reader, mut writer) = Connection::new(stream).split();

        let subscribe: JsonRpcMessage = serde_json::from_value(json!({
            "id": 1, "method": "mining.subscribe", "params": ["test-miner/1.0"]
        }))
        .unwrap();
        writer
            .write_message(&Message::from_envelope(subscribe).unwrap())
            .await
            .unwrap();

        let authorize: JsonRpcMessage = serde_json::from_value(json!({
            "id": 2, "method": "mining.authorize", "params": ["u", "p"]
        }))
        .unwrap();
        writer
            .write_message(&Message::from_envelope(authorize).unwrap())
            .await
            .unwrap();

        // Collect until we have: subscribe result, authorize result,
        // difficulty, and the notify for job j1
        let mut got_notify = false;
        let mut results = Vec::new();
        let deadline = Duration::from_secs(10);
        while !(got_notify && results.len() >= 2) {
            let msg = timeout(deadline, reader.read_message())
                .await
                .expect("timed out waiting for pool messages")
                .unwrap();
            match msg {
                Message::Notify(n) => {
                    assert_eq!(n.job_id, "j1");
                    got_notify = true;
                }
                Message::Result(r) => results.push(r),
                _ => {}
            }
        }

        // Submit a share for j1
        let submit: JsonRpcMessage = serde_json::from_value(json!({
            "id": 3, "method": "mining.submit",
            "params": ["u", "j1", "00000000", "5a5a5a5a", "00000001"]
        }))
        .unwrap();
        writer
            .write_message(&Message::from_envelope(submit).unwrap())
            .await
            .unwrap();

        // Pool received exactly that submit
        let forwarded = timeout(deadline, submit_rx.recv())
            .await
            .expect("timed out waiting for submit")
            .unwrap();
        match forwarded {
            Message::Submit(s) => assert_eq!(s.job_id, "j1"),
            other => panic!("unexpected {:?}", other),
        }

        // Miner received the acceptance correlated to its submit id
        let res = loop {
            let msg = timeout(deadline, reader.read_message()).await.unwrap().unwrap();
            if let Message::Result(r) = msg {
                if r.id == 3 {
                    break r;
                }
            }
        };
        assert_eq!(res.result, Some(Value::Bool(true)));

        // The miner is registered and credited
        let miners = allocator.miners();
        assert_eq!(miners.len(), 1);
        assert_eq!(miners[0].accepted_shares(), 1);
        assert_eq!(miners[0].worker_name(), "u");

        ct.cancel();
    }

    /// The registry holds exactly one entry per live connection and
    /// drops it on disconnect.
    #[tokio::test]
    async fn registry_entry_removed_on_disconnect() {
        let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pool_addr = pool_listener.local_addr().unwrap();
        let (submit_tx, _submit_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(run_mock_pool(pool_listener, submit_tx));

        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let allocator = Arc::new(Allocator::new());
        let config = SchedulerConfig {
            default_pool: crate::types::PoolUrl::parse(&format!("u:p@{}", pool_addr)).unwrap(),
            vetting_shares: 2,
            share_timeout: Duration::from_secs(600),
            not_propagate_worker_name: false,
        };
        let ct = CancellationToken::new();
        tokio::spawn(serve(
            proxy_listener,
            Arc::clone(&allocator),
            Arc::new(GlobalHashrate::new()),
            config,
            ct.clone(),
        ));

        let stream = TcpStream::connect(proxy_addr).await.unwrap();
        // Wait for registration
        timeout(Duration::from_secs(5), async {
            while allocator.miners().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        drop(stream);
        timeout(Duration::from_secs(5), async {
            while !allocator.miners().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        ct.cancel();
    }
}

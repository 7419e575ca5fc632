//! Destination hot-swap.
//!
//! Connects and handshakes a new pool in the background while the miner
//! keeps working against the old one, then swaps the pipe's destination
//! and replays session state to the miner (version mask, extranonce,
//! difficulty, and a clean-jobs job) so it continues without ever seeing
//! a reconnect. A failed handshake leaves the old destination bound.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stratum_v1::{
    Authorize, Configure, Message, Notify, SetDifficulty, SetExtranonce, SetVersionMask,
    StratumError, Subscribe,
};
use crate::types::PoolUrl;

use super::dest::DestConn;
use super::pipe::Pipe;
use super::source::SourceConn;
use super::ProxyError;

/// User agent announced in upstream subscribes.
const USER_AGENT: &str = "hashrouter";
const USER_AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Orchestrates destination changes for one miner.
pub struct HandlerChangeDest {
    source: Arc<SourceConn>,
    pipe: Arc<Pipe>,
}

impl HandlerChangeDest {
    pub fn new(source: Arc<SourceConn>, pipe: Arc<Pipe>) -> Self {
        Self { source, pipe }
    }

    /// Dial and fully handshake a new destination.
    ///
    /// The returned connection is handshook but unbound; callers quiesce
    /// the pipe's dest→source half, [`swap_and_replay`](Self::swap_and_replay),
    /// and restart it. On failure the dialled socket is dropped and the
    /// old destination stays bound.
    pub async fn connect_new_dest(
        &self,
        ct: &CancellationToken,
        url: &PoolUrl,
    ) -> Result<Arc<DestConn>, ProxyError> {
        let new_dest = DestConn::connect(url)
            .await
            .map_err(|e| ProxyError::ConnectDest(Box::new(e.into())))?;
        self.handshake_new_dest(ct, Arc::clone(&new_dest)).await?;
        Ok(new_dest)
    }

    /// Run the pool handshake over an already-dialled destination.
    ///
    /// Auto-read runs for the duration of the handshake: it decodes the
    /// responses the handshake correlates on, and it starts filling the
    /// job cache that the replay will need.
    pub(crate) async fn handshake_new_dest(
        &self,
        ct: &CancellationToken,
        new_dest: Arc<DestConn>,
    ) -> Result<(), ProxyError> {
        let auto_ct = ct.child_token();
        let mut auto_task = tokio::spawn(Arc::clone(&new_dest).auto_read(auto_ct.clone()));
        debug!(dest = %new_dest.url().user_host(), "Auto-read started for handshake");

        let handshake = self.dest_handshake(ct, &new_dest);
        tokio::pin!(handshake);

        let result = tokio::select! {
            res = &mut auto_task => {
                // Reading failed before the handshake finished
                let err = match res {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => StratumError::Closed,
                    Err(e) => StratumError::Protocol(format!("auto-read task panicked: {}", e)),
                };
                return Err(ProxyError::ConnectDest(Box::new(err.into())));
            }
            res = &mut handshake => res,
        };

        // Handshake done (either way): stop the temporary reader
        auto_ct.cancel();
        let _ = auto_task.await;

        result.map_err(|e| ProxyError::ConnectDest(Box::new(e)))?;
        debug!(dest = %new_dest.url().user_host(), "New destination handshook");
        Ok(())
    }

    /// The configure/subscribe/authorize sequence against the new pool.
    async fn dest_handshake(
        &self,
        ct: &CancellationToken,
        new_dest: &Arc<DestConn>,
    ) -> Result<(), ProxyError> {
        let url = new_dest.url().clone();

        // 1. mining.configure: the miner already negotiated a mask on its
        // previous destination, so ask the new pool for exactly that mask
        let mask = self.source.negotiated_version_rolling_mask();
        if !mask.is_empty() {
            let (_, min_bit_count) = self.source.requested_version_rolling();
            let id = new_dest.next_msg_id();
            let msg = Message::Configure(Configure::version_rolling(id, &mask, min_bit_count));
            let res = new_dest.write_await_res(ct, &msg, id).await?;
            if res.is_error() {
                return Err(ProxyError::Handshake(format!(
                    "pool rejected configure: {}",
                    res.error_message()
                )));
            }
            let pool_mask = res.parse_configure_result()?.unwrap_or_default();
            if pool_mask != mask {
                // No renegotiation: the miner's mask is fixed for the
                // session, so a pool that insists on a different one is
                // unusable as a swap target
                return Err(ProxyError::Handshake(format!(
                    "pool returned different version rolling mask: {:?} (miner has {:?})",
                    pool_mask, mask
                )));
            }
            new_dest.set_version_rolling_mask(&pool_mask);
            debug!(dest = %url.user_host(), mask = %pool_mask, "Configure accepted");
        }

        // 2. mining.subscribe
        let id = new_dest.next_msg_id();
        let msg = Message::Subscribe(Subscribe::new(id, USER_AGENT, USER_AGENT_VERSION));
        let res = new_dest.write_await_res(ct, &msg, id).await?;
        if res.is_error() {
            return Err(ProxyError::Handshake(format!(
                "pool rejected subscribe: {}",
                res.error_message()
            )));
        }
        let (extranonce1, extranonce2_size) = res.parse_subscribe_result()?;
        new_dest.set_extranonce(&extranonce1, extranonce2_size);
        debug!(dest = %url.user_host(), extranonce1 = %extranonce1, "Subscribed");

        // 3. mining.authorize with the destination URL's userinfo
        let id = new_dest.next_msg_id();
        let msg = Message::Authorize(Authorize::new(id, url.username(), url.password()));
        let res = new_dest.write_await_res(ct, &msg, id).await?;
        if res.is_error() || !res.is_true_result() {
            return Err(ProxyError::NotAuthorized(res.error_message()));
        }
        new_dest.set_authorized_user(url.username());
        debug!(dest = %url.user_host(), "Authorized");

        Ok(())
    }

    /// Bind the new destination and replay session state to the miner.
    ///
    /// The caller must have quiesced the pipe's dest→source half: the
    /// replay burst has to reach the miner contiguously, before any
    /// other message from the new destination.
    pub async fn swap_and_replay(
        &self,
        ct: &CancellationToken,
        new_dest: Arc<DestConn>,
    ) -> Result<(), ProxyError> {
        self.pipe.set_dest(Arc::clone(&new_dest));

        // 1. set_version_mask, only when version rolling is on
        let mask = new_dest.version_rolling_mask();
        if !mask.is_empty() {
            self.source
                .write(ct, &Message::SetVersionMask(SetVersionMask::new(&mask)))
                .await
                .map_err(|e| ProxyError::ChangeDest(format!("set_version_mask: {}", e)))?;
        }

        // The replay snapshot is the most recent cached job. A job cached
        // before the subscribe result was recorded carries empty state;
        // fall back to the destination's current values
        let job = new_dest
            .latest_job()
            .ok_or_else(|| ProxyError::ChangeDest("no job available from new dest".into()))?;
        let (extranonce1, extranonce2_size) = if job.extranonce1.is_empty() {
            new_dest.extranonce()
        } else {
            (job.extranonce1.clone(), job.extranonce2_size)
        };
        let difficulty = if job.difficulty > 0.0 {
            job.difficulty
        } else {
            new_dest.difficulty()
        };

        // 2. set_extranonce, and remember it as the miner's current one
        self.source
            .write(
                ct,
                &Message::SetExtranonce(SetExtranonce::new(&extranonce1, extranonce2_size)),
            )
            .await
            .map_err(|e| ProxyError::ChangeDest(format!("set_extranonce: {}", e)))?;
        self.source.set_extranonce(&extranonce1, extranonce2_size);

        // 3. set_difficulty
        self.source
            .write(ct, &Message::SetDifficulty(SetDifficulty::new(difficulty)))
            .await
            .map_err(|e| ProxyError::ChangeDest(format!("set_difficulty: {}", e)))?;

        // 4. the job itself, clean-jobs so stale work is abandoned
        let notify: Notify = job.notify.with_clean_jobs(true);
        self.source
            .write(ct, &Message::Notify(notify))
            .await
            .map_err(|e| ProxyError::ChangeDest(format!("notify: {}", e)))?;

        debug!(dest = %new_dest.url().user_host(), "State replayed to miner");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::pipe::passthrough;
    use crate::proxy::test_support::{mock_dest_conn, mock_source_conn};
    use crate::stratum_v1::{JsonRpcMessage, ResultMsg};
    use serde_json::json;

    fn notify_msg(job_id: &str) -> Message {
        let env: JsonRpcMessage = serde_json::from_value(json!({
            "id": null,
            "method": "mining.notify",
            "params": [job_id, "ph", "cb1", "cb2", [], "20000000", "1d00ffff", "5a5a5a5a", false]
        }))
        .unwrap();
        Message::from_envelope(env).unwrap()
    }

    /// Scripted pool peer: answers configure/subscribe/authorize and
    /// pushes difficulty + one job after subscribe.
    fn run_pool_peer(
        mut handle: crate::stratum_v1::connection::MockHandle,
        authorize_ok: bool,
        mask: &str,
    ) {
        let mask = mask.to_string();
        tokio::spawn(async move {
            loop {
                let msg = match handle.rx.recv().await {
                    Some(m) => m,
                    None => return,
                };
                match msg {
                    Message::Configure(c) => {
                        handle.send(Message::Result(ResultMsg {
                            id: c.id,
                            result: Some(json!({
                                "version-rolling": true,
                                "version-rolling.mask": mask,
                            })),
                            error: None,
                        }));
                    }
                    Message::Subscribe(s) => {
                        handle.send(Message::Result(ResultMsg {
                            id: s.id,
                            result: Some(json!([[], "0b0b0b0b", 4])),
                            error: None,
                        }));
                        handle.send(Message::SetDifficulty(SetDifficulty::new(2048.0)));
                        handle.send(notify_msg("swap-job"));
                    }
                    Message::Authorize(a) => {
                        if authorize_ok {
                            handle.send(Message::Result(ResultMsg::ok(a.id)));
                        } else {
                            handle.send(Message::Result(ResultMsg {
                                id: a.id,
                                result: None,
                                error: Some(json!([24, "unauthorized", null])),
                            }));
                        }
                    }
                    _ => {}
                }
            }
        });
    }

    #[tokio::test]
    async fn handshake_then_replay_burst_order() {
        let (source, mut miner) = mock_source_conn("m1");
        source.set_requested_version_rolling("1fffe000", 2);
        source.set_negotiated_version_rolling_mask("1fffe000");

        let (old_dest, _old_pool) = mock_dest_conn("old");
        let pipe = Pipe::new(Arc::clone(&source), Arc::clone(&old_dest), passthrough(), passthrough());
        let handler = HandlerChangeDest::new(Arc::clone(&source), Arc::clone(&pipe));

        let (new_dest, pool_handle) = mock_dest_conn("new");
        run_pool_peer(pool_handle, true, "1fffe000");

        let ct = CancellationToken::new();
        handler
            .handshake_new_dest(&ct, Arc::clone(&new_dest))
            .await
            .unwrap();

        assert_eq!(new_dest.extranonce(), ("0b0b0b0b".to_string(), 4));
        assert_eq!(new_dest.version_rolling_mask(), "1fffe000");
        assert!(new_dest.latest_job().is_some());

        handler
            .swap_and_replay(&ct, Arc::clone(&new_dest))
            .await
            .unwrap();

        // The miner sees exactly the replay burst, in order
        match miner.recv().await {
            Message::SetVersionMask(m) => assert_eq!(m.mask, "1fffe000"),
            other => panic!("expected set_version_mask first, got {:?}", other),
        }
        match miner.recv().await {
            Message::SetExtranonce(e) => {
                assert_eq!(e.extranonce1, "0b0b0b0b");
                assert_eq!(e.extranonce2_size, 4);
            }
            other => panic!("expected set_extranonce second, got {:?}", other),
        }
        match miner.recv().await {
            Message::SetDifficulty(d) => assert_eq!(d.difficulty, 2048.0),
            other => panic!("expected set_difficulty third, got {:?}", other),
        }
        match miner.recv().await {
            Message::Notify(n) => {
                assert_eq!(n.job_id, "swap-job");
                assert!(n.clean_jobs);
            }
            other => panic!("expected notify last, got {:?}", other),
        }
        assert!(miner.rx.try_recv().is_err());

        // Miner-side extranonce state followed the swap
        assert_eq!(source.extranonce(), ("0b0b0b0b".to_string(), 4));
        // And the pipe now points at the new destination
        assert_eq!(pipe.dest().id(), "dest-new");
    }

    #[tokio::test]
    async fn replay_skips_version_mask_when_rolling_off() {
        let (source, mut miner) = mock_source_conn("m1");
        let (old_dest, _old_pool) = mock_dest_conn("old");
        let pipe = Pipe::new(Arc::clone(&source), old_dest, passthrough(), passthrough());
        let handler = HandlerChangeDest::new(Arc::clone(&source), pipe);

        let (new_dest, pool_handle) = mock_dest_conn("new");
        run_pool_peer(pool_handle, true, "");

        let ct = CancellationToken::new();
        handler
            .handshake_new_dest(&ct, Arc::clone(&new_dest))
            .await
            .unwrap();
        handler
            .swap_and_replay(&ct, Arc::clone(&new_dest))
            .await
            .unwrap();

        // First message is set_extranonce: no mask was negotiated
        assert_eq!(miner.recv().await.method_name(), "mining.set_extranonce");
    }

    #[tokio::test]
    async fn authorize_failure_is_connect_dest_wrapping_not_authorized() {
        let (source, _miner) = mock_source_conn("m1");
        let (old_dest, _old_pool) = mock_dest_conn("old");
        let pipe = Pipe::new(Arc::clone(&source), Arc::clone(&old_dest), passthrough(), passthrough());
        let handler = HandlerChangeDest::new(Arc::clone(&source), Arc::clone(&pipe));

        let (new_dest, pool_handle) = mock_dest_conn("new");
        run_pool_peer(pool_handle, false, "");

        let ct = CancellationToken::new();
        let err = handler
            .handshake_new_dest(&ct, Arc::clone(&new_dest))
            .await
            .unwrap_err();

        match err {
            ProxyError::ConnectDest(inner) => {
                assert!(matches!(*inner, ProxyError::NotAuthorized(_)))
            }
            other => panic!("expected ConnectDest, got {:?}", other),
        }

        // Old destination is still the bound one
        assert_eq!(pipe.dest().id(), "dest-old");
    }

    #[tokio::test]
    async fn mask_mismatch_is_handshake_error() {
        let (source, _miner) = mock_source_conn("m1");
        source.set_requested_version_rolling("1fffe000", 2);
        source.set_negotiated_version_rolling_mask("1fffe000");

        let (old_dest, _old_pool) = mock_dest_conn("old");
        let pipe = Pipe::new(Arc::clone(&source), old_dest, passthrough(), passthrough());
        let handler = HandlerChangeDest::new(Arc::clone(&source), pipe);

        let (new_dest, pool_handle) = mock_dest_conn("new");
        // Pool grants a narrower mask than the miner negotiated
        run_pool_peer(pool_handle, true, "00ffe000");

        let ct = CancellationToken::new();
        let err = handler
            .handshake_new_dest(&ct, Arc::clone(&new_dest))
            .await
            .unwrap_err();
        match err {
            ProxyError::ConnectDest(inner) => {
                assert!(matches!(*inner, ProxyError::Handshake(_)))
            }
            other => panic!("expected ConnectDest(Handshake), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn replay_without_cached_job_fails() {
        let (source, _miner) = mock_source_conn("m1");
        let (old_dest, _old_pool) = mock_dest_conn("old");
        let pipe = Pipe::new(Arc::clone(&source), old_dest, passthrough(), passthrough());
        let handler = HandlerChangeDest::new(Arc::clone(&source), pipe);

        let (new_dest, _pool_handle) = mock_dest_conn("new");
        let ct = CancellationToken::new();
        let err = handler
            .swap_and_replay(&ct, new_dest)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::ChangeDest(_)));
    }
}

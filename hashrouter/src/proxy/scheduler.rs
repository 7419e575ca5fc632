//! Per-miner scheduling: destination assignments and vetting.
//!
//! Every connected miner gets one [`MinerScheduler`] task. It owns the
//! miner's pipe, forwards the miner's own handshake to the default pool,
//! counts accepted shares for vetting and hashrate measurement, and works
//! through a queue of [`DestItem`] assignments pushed by contract
//! watchers, rotating destinations with the hot-swap handler. When the
//! queue is empty the miner falls back to the default pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hashrate::{Counter, GlobalHashrate};
use crate::stratum_v1::{Message, StratumError};
use crate::types::PoolUrl;

use super::change_dest::HandlerChangeDest;
use super::dest::DestConn;
use super::pipe::{Interceptor, Pipe, PipeHalf};
use super::source::SourceConn;
use super::ProxyError;

/// Delay before re-dialing after a destination failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Observer fired once per accepted share: `(difficulty, miner_id)`.
pub type OnSubmit = Arc<dyn Fn(f64, &str) + Send + Sync>;

/// Miner lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    /// TCP accepted, Stratum handshake not finished
    Connecting,
    /// Mining on the default pool until enough shares prove the miner
    Vetting,
    /// Vetted and available for allocation
    Ready,
    /// Some, but not all, of the current cycle is assigned
    PartialBusy,
    /// Fully assigned
    Busy,
    /// Gone; terminal
    Disconnected,
}

impl MinerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MinerState::Connecting => "connecting",
            MinerState::Vetting => "vetting",
            MinerState::Ready => "ready",
            MinerState::PartialBusy => "partial-busy",
            MinerState::Busy => "busy",
            MinerState::Disconnected => "disconnected",
        }
    }
}

/// A destination assignment in a miner's queue.
pub struct DestItem {
    pub dest: PoolUrl,
    /// Fraction of a cycle this item occupies, 1.0 for a full assignment
    pub fraction: f64,
    /// Wall-clock time to spend on this destination
    pub duration: Duration,
    /// Owning contract id; used for release
    pub tag: String,
    pub on_submit: OnSubmit,
}

impl std::fmt::Debug for DestItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestItem")
            .field("dest", &self.dest.user_host())
            .field("fraction", &self.fraction)
            .field("duration", &self.duration)
            .field("tag", &self.tag)
            .finish()
    }
}

/// Queue entry description for the status surface.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestItemInfo {
    pub dest: String,
    pub fraction: f64,
    pub duration_secs: u64,
    pub contract_id: String,
}

/// Limits and knobs for miner scheduling.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub default_pool: PoolUrl,
    /// Accepted shares on the default pool before a miner is `ready`
    pub vetting_shares: u64,
    /// Idle miners are disconnected after this long without a share
    pub share_timeout: Duration,
    /// Replace the miner's worker name with the destination's username
    pub not_propagate_worker_name: bool,
}

struct ActiveItem {
    dest: PoolUrl,
    tag: String,
    fraction: f64,
    on_submit: OnSubmit,
    /// Set when the owning contract released this item mid-slice
    cancelled: Arc<AtomicBool>,
}

/// Registry entry for one connected miner.
///
/// Shared between the scheduler task (single writer of the connection),
/// the allocator (queue writer), and the status surface (reader).
pub struct Miner {
    id: String,
    source: Arc<SourceConn>,
    global: Arc<GlobalHashrate>,
    vetting_shares: u64,

    state: Mutex<MinerState>,
    queue: Mutex<VecDeque<DestItem>>,
    active: Mutex<Option<ActiveItem>>,
    counter: Mutex<Counter>,
    accepted_shares: AtomicU64,
    last_share_at: Mutex<Instant>,
    current_dest: Mutex<Option<PoolUrl>>,
    current_difficulty: Mutex<f64>,
    last_error: Mutex<Option<String>>,
    connected_at: SystemTime,
    connected_instant: Instant,

    /// Wakes the scheduler when the queue or an active item changes
    queue_changed: Notify,
    /// Cancelling this disconnects the miner
    cancel: CancellationToken,

    /// Measured-hashrate override for deterministic tests
    #[cfg(test)]
    test_hashrate_ghs: Mutex<Option<f64>>,
}

impl Miner {
    pub fn new(
        source: Arc<SourceConn>,
        global: Arc<GlobalHashrate>,
        vetting_shares: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: source.id().to_string(),
            source,
            global,
            vetting_shares,
            state: Mutex::new(MinerState::Connecting),
            queue: Mutex::new(VecDeque::new()),
            active: Mutex::new(None),
            counter: Mutex::new(Counter::new()),
            accepted_shares: AtomicU64::new(0),
            last_share_at: Mutex::new(Instant::now()),
            current_dest: Mutex::new(None),
            current_difficulty: Mutex::new(0.0),
            last_error: Mutex::new(None),
            connected_at: SystemTime::now(),
            connected_instant: Instant::now(),
            queue_changed: Notify::new(),
            cancel: CancellationToken::new(),
            #[cfg(test)]
            test_hashrate_ghs: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn worker_name(&self) -> String {
        self.source.worker_name()
    }

    pub fn state(&self) -> MinerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_state(&self, state: MinerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Short-window hashrate estimate used for allocation decisions.
    pub fn hashrate_ghs(&self) -> f64 {
        #[cfg(test)]
        if let Some(ghs) = *self.test_hashrate_ghs.lock().unwrap_or_else(|e| e.into_inner()) {
            return ghs;
        }
        self.counter.lock().unwrap_or_else(|e| e.into_inner()).current_ghs()
    }

    #[cfg(test)]
    pub(crate) fn set_test_hashrate_ghs(&self, ghs: f64) {
        *self.test_hashrate_ghs.lock().unwrap_or_else(|e| e.into_inner()) = Some(ghs);
    }

    /// Pop and activate the next queued assignment, standing in for the
    /// scheduler loop in tests without a live connection.
    #[cfg(test)]
    pub(crate) fn activate_next_for_test(&self) -> bool {
        match self.take_next_item() {
            Some(item) => {
                self.set_current_dest(&item.dest);
                self.set_active(&item);
                true
            }
            None => false,
        }
    }

    /// All windowed estimates, for the status surface.
    pub fn hashrate_avg_ghs_all(&self) -> Vec<(String, f64)> {
        self.counter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .hashrate_avg_ghs_all()
    }

    pub fn accepted_shares(&self) -> u64 {
        self.accepted_shares.load(Ordering::Relaxed)
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn uptime(&self) -> Duration {
        self.connected_instant.elapsed()
    }

    pub fn current_dest(&self) -> Option<PoolUrl> {
        self.current_dest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn current_difficulty(&self) -> f64 {
        *self.current_difficulty.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_last_error(&self, err: &str) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
    }

    /// Queue a destination assignment. The allocator is responsible for
    /// state transitions that accompany this.
    pub fn add_dest_item(&self, item: DestItem) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(item);
        self.queue_changed.notify_one();
    }

    /// Sum of queued and active slice fractions for the current cycle.
    pub fn assigned_fraction(&self) -> f64 {
        let queued: f64 = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|i| i.fraction)
            .sum();
        let active = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|a| a.fraction)
            .unwrap_or(0.0);
        queued + active
    }

    /// Drop every assignment, releasing the miner back to the fallback
    /// pool at the next scheduling point.
    pub fn reset_tasks(&self) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
        if let Some(active) = self.active.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            active.cancelled.store(true, Ordering::Relaxed);
        }
        self.queue_changed.notify_one();
    }

    /// Drop queued assignments owned by one contract, leaving an active
    /// slice to finish on its own.
    pub fn remove_queued_by_tag(&self, tag: &str) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|i| i.tag != tag);
        self.queue_changed.notify_one();
    }

    /// Drop assignments owned by one contract.
    pub fn remove_tasks_by_tag(&self, tag: &str) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|i| i.tag != tag);
        if let Some(active) = self.active.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            if active.tag == tag {
                active.cancelled.store(true, Ordering::Relaxed);
            }
        }
        self.queue_changed.notify_one();
    }

    /// Whether any queued or active assignment carries the tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        if self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|i| i.tag == tag)
        {
            return true;
        }
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|a| a.tag == tag)
    }

    /// Queue snapshot for the status surface.
    pub fn queued_items(&self) -> Vec<DestItemInfo> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|i| DestItemInfo {
                dest: i.dest.user_host(),
                fraction: i.fraction,
                duration_secs: i.duration.as_secs(),
                contract_id: i.tag.clone(),
            })
            .collect()
    }

    /// Force the miner's connection closed.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Credit one accepted share: hashrate EMA, vetting progress, the
    /// active assignment's observer, and the global per-destination
    /// counter. Fires exactly once per accepted share.
    pub(crate) fn on_accepted_share(&self, difficulty: f64) {
        self.counter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .on_submit(difficulty);
        *self.last_share_at.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        *self.current_difficulty.lock().unwrap_or_else(|e| e.into_inner()) = difficulty;
        let shares = self.accepted_shares.fetch_add(1, Ordering::Relaxed) + 1;

        if self.state() == MinerState::Vetting && shares >= self.vetting_shares {
            info!(miner = %self.id, shares, "Miner vetted");
            self.set_state(MinerState::Ready);
        }

        if let Some(active) = self.active.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            (active.on_submit)(difficulty, &self.id);
        }

        if let Some(dest) = self.current_dest() {
            self.global.on_submit(&dest.to_string(), difficulty);
        }
    }

    fn last_share_at(&self) -> Instant {
        *self.last_share_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_next_item(&self) -> Option<DestItem> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    fn set_active(&self, item: &DestItem) -> Arc<AtomicBool> {
        let cancelled = Arc::new(AtomicBool::new(false));
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(ActiveItem {
            dest: item.dest.clone(),
            tag: item.tag.clone(),
            fraction: item.fraction,
            on_submit: Arc::clone(&item.on_submit),
            cancelled: Arc::clone(&cancelled),
        });
        cancelled
    }

    fn clear_active(&self) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn active_dest(&self) -> Option<PoolUrl> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|a| a.dest.clone())
    }

    fn set_current_dest(&self, dest: &PoolUrl) {
        *self.current_dest.lock().unwrap_or_else(|e| e.into_inner()) = Some(dest.clone());
    }
}

/// The source-side interceptor: handshake observation, worker-name
/// rewriting, and submit accounting.
///
/// Holds the miner weakly; the pipe outlives scheduling teardown by a
/// moment and must not keep the registry entry alive.
fn source_interceptor(miner: Weak<Miner>, not_propagate_worker_name: bool) -> Interceptor {
    Box::new(move |msg, source, dest| {
        let Some(miner) = miner.upgrade() else {
            return Ok(Some(msg));
        };
        match msg {
            Message::Configure(cfg) => {
                // Remember what the miner asked for; learn the
                // negotiated mask from the pool's answer
                if let Some(mask) = cfg.version_rolling_mask() {
                    source.set_requested_version_rolling(mask, cfg.min_bit_count().unwrap_or(0));
                    let src = Arc::clone(source);
                    dest.register_result_handler(
                        cfg.id,
                        Box::new(move |res| {
                            if let Ok(Some(mask)) = res.parse_configure_result() {
                                src.set_negotiated_version_rolling_mask(&mask);
                            }
                            Some(Message::Result(res))
                        }),
                    );
                }
                Ok(Some(Message::Configure(cfg)))
            }
            Message::Subscribe(sub) => {
                // The subscribe result carries the extranonce both sides
                // must agree on
                let src = Arc::clone(source);
                let dst = Arc::clone(dest);
                dest.register_result_handler(
                    sub.id,
                    Box::new(move |res| {
                        if let Ok((en1, size)) = res.parse_subscribe_result() {
                            dst.set_extranonce(&en1, size);
                            src.set_extranonce(&en1, size);
                        }
                        Some(Message::Result(res))
                    }),
                );
                Ok(Some(Message::Subscribe(sub)))
            }
            Message::Authorize(mut auth) => {
                source.set_worker_name(&auth.username);
                if miner.state() == MinerState::Connecting {
                    miner.set_state(MinerState::Vetting);
                }
                if not_propagate_worker_name && !dest.url().username().is_empty() {
                    auth.username = dest.url().username().to_string();
                    auth.password = dest.url().password().to_string();
                }
                let authorized_name = auth.username.clone();
                let dst = Arc::clone(dest);
                dest.register_result_handler(
                    auth.id,
                    Box::new(move |res| {
                        if res.is_true_result() {
                            dst.set_authorized_user(&authorized_name);
                        }
                        Some(Message::Result(res))
                    }),
                );
                Ok(Some(Message::Authorize(auth)))
            }
            Message::Submit(mut sub) => {
                // Credit at the difficulty in effect when the share was
                // read
                let difficulty = dest.difficulty();
                let weak = Arc::downgrade(&miner);
                let job_id = sub.job_id.clone();
                dest.register_result_handler(
                    sub.id,
                    Box::new(move |res| {
                        if res.is_true_result() {
                            if let Some(m) = weak.upgrade() {
                                m.on_accepted_share(difficulty);
                            }
                        } else if let Some(m) = weak.upgrade() {
                            debug!(miner = %m.id(), job = %job_id, reason = %res.error_message(),
                                "Share rejected");
                        }
                        Some(Message::Result(res))
                    }),
                );
                // Submits must carry the name this destination authorized
                let authorized = dest.authorized_user();
                if !authorized.is_empty() {
                    sub.worker_name = authorized;
                }
                Ok(Some(Message::Submit(sub)))
            }
            other => Ok(Some(other)),
        }
    })
}

/// Drives one miner: pipe lifecycle, vetting, assignment rotation.
pub struct MinerScheduler {
    miner: Arc<Miner>,
    config: SchedulerConfig,
}

impl MinerScheduler {
    pub fn new(miner: Arc<Miner>, config: SchedulerConfig) -> Self {
        Self { miner, config }
    }

    /// Run until the miner disconnects or is cancelled.
    pub async fn run(self) -> Result<(), ProxyError> {
        let miner = Arc::clone(&self.miner);
        let ct = miner.cancel_token();
        let res = self.run_inner(&ct).await;
        miner.set_state(MinerState::Disconnected);
        if let Err(e) = &res {
            miner.set_last_error(&e.to_string());
        }
        res
    }

    async fn run_inner(&self, ct: &CancellationToken) -> Result<(), ProxyError> {
        let miner = &self.miner;
        let source = Arc::clone(&miner.source);

        // Initial destination: the default pool; the miner's own
        // handshake flows through the pipe
        let dest = DestConn::connect(&self.config.default_pool)
            .await
            .map_err(|e| ProxyError::ConnectDest(Box::new(e.into())))?;
        miner.set_current_dest(&self.config.default_pool);

        let pipe = Pipe::new(
            Arc::clone(&source),
            dest,
            source_interceptor(
                Arc::downgrade(miner),
                self.config.not_propagate_worker_name,
            ),
            super::pipe::passthrough(),
        );
        let handler = HandlerChangeDest::new(Arc::clone(&source), Arc::clone(&pipe));

        let mut s2d = pipe.spawn_source_to_dest(ct);
        let mut d2s = pipe.spawn_dest_to_source(ct);

        // Deadline of the active slice, if any
        let mut slice_deadline: Option<Instant> = None;
        let mut active_cancelled: Option<Arc<AtomicBool>> = None;

        loop {
            // Catch assignments that arrived while this loop was busy
            // elsewhere; a lost queue wakeup is then harmless
            if miner.active_dest().is_none() && !self.queue_is_empty() {
                d2s = self
                    .rotate(ct, &handler, &pipe, Some(d2s), &mut slice_deadline, &mut active_cancelled)
                    .await?;
            }

            let idle_deadline = miner.last_share_at() + self.config.share_timeout;

            enum Event {
                Shutdown,
                MinerGone(Result<(), StratumError>),
                DestGone(Result<(), StratumError>),
                QueueChanged,
                SliceExpired,
                IdleCheck,
            }

            let event = tokio::select! {
                _ = ct.cancelled() => Event::Shutdown,
                res = s2d.join() => Event::MinerGone(res),
                res = d2s.join() => Event::DestGone(res),
                _ = miner.queue_changed.notified() => Event::QueueChanged,
                _ = async {
                    match slice_deadline {
                        Some(d) => tokio::time::sleep_until(d.into()).await,
                        None => std::future::pending().await,
                    }
                } => Event::SliceExpired,
                _ = tokio::time::sleep_until(idle_deadline.into()) => Event::IdleCheck,
            };

            match event {
                Event::Shutdown => {
                    s2d.stop().await.ok();
                    d2s.stop().await.ok();
                    return Ok(());
                }
                Event::MinerGone(res) => {
                    debug!(miner = %miner.id(), "Miner connection ended");
                    d2s.stop().await.ok();
                    return match res {
                        Ok(()) | Err(StratumError::Closed) => Ok(()),
                        Err(e) => Err(e.into()),
                    };
                }
                Event::DestGone(res) => {
                    if let Err(e) = &res {
                        warn!(miner = %miner.id(), error = %e, "Destination connection lost");
                    }
                    // The failed assignment is not retried; move on
                    miner.clear_active();
                    slice_deadline = None;
                    active_cancelled = None;

                    tokio::time::sleep(RECONNECT_DELAY).await;
                    d2s = self
                        .rotate(ct, &handler, &pipe, None, &mut slice_deadline, &mut active_cancelled)
                        .await?;
                }
                Event::QueueChanged => {
                    let active_is_cancelled = active_cancelled
                        .as_ref()
                        .is_some_and(|c| c.load(Ordering::Relaxed));
                    let idle_with_work = miner.active_dest().is_none()
                        && !self.queue_is_empty();
                    if active_is_cancelled || idle_with_work {
                        d2s = self
                            .rotate(ct, &handler, &pipe, Some(d2s), &mut slice_deadline, &mut active_cancelled)
                            .await?;
                    }
                }
                Event::SliceExpired => {
                    d2s = self
                        .rotate(ct, &handler, &pipe, Some(d2s), &mut slice_deadline, &mut active_cancelled)
                        .await?;
                }
                Event::IdleCheck => {
                    // Re-check against the live value: shares may have
                    // arrived since the deadline was computed
                    if miner.last_share_at() + self.config.share_timeout <= Instant::now() {
                        warn!(miner = %miner.id(), "No shares within share timeout, disconnecting");
                        s2d.stop().await.ok();
                        d2s.stop().await.ok();
                        return Err(ProxyError::IdleTimeout);
                    }
                }
            }
        }
    }

    fn queue_is_empty(&self) -> bool {
        self.miner
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Move to the next assignment, or fall back to the default pool.
    ///
    /// `d2s` is the running dest→source half when there is one; the new
    /// destination is connected and handshook before the old half is
    /// quiesced, so a failed handshake leaves the miner undisturbed. On
    /// a dead destination (`d2s = None`) there is nothing to preserve.
    async fn rotate(
        &self,
        ct: &CancellationToken,
        handler: &HandlerChangeDest,
        pipe: &Arc<Pipe>,
        d2s: Option<PipeHalf>,
        slice_deadline: &mut Option<Instant>,
        active_cancelled: &mut Option<Arc<AtomicBool>>,
    ) -> Result<PipeHalf, ProxyError> {
        let miner = &self.miner;
        miner.clear_active();
        *slice_deadline = None;
        *active_cancelled = None;

        // Work through the queue until an assignment's destination
        // handshakes, then fall back to the default pool
        let mut d2s = d2s;
        loop {
            let item = miner.take_next_item();
            let (url, item) = match item {
                Some(item) => (item.dest.clone(), Some(item)),
                None => (self.config.default_pool.clone(), None),
            };

            // Already there: refresh bookkeeping only
            let current = pipe.dest();
            if current.url() == &url && d2s.is_some() {
                return self.finish_rotation(pipe, item, slice_deadline, active_cancelled, d2s.unwrap());
            }

            match handler.connect_new_dest(ct, &url).await {
                Ok(new_dest) => {
                    // Quiesce the pool→miner direction for the swap so
                    // the replay burst is contiguous
                    if let Some(half) = d2s.take() {
                        half.stop().await.ok();
                    }
                    handler.swap_and_replay(ct, Arc::clone(&new_dest)).await?;
                    let new_half = pipe.spawn_dest_to_source(ct);
                    return self.finish_rotation(pipe, item, slice_deadline, active_cancelled, new_half);
                }
                Err(e) => {
                    warn!(miner = %miner.id(), dest = %url.user_host(), error = %e,
                        "Failed to connect assignment destination, skipping");
                    miner.set_last_error(&e.to_string());
                    if item.is_none() {
                        // Even the default pool is unreachable
                        match d2s.take() {
                            Some(half) => {
                                // Old destination still lives; stay on it
                                return Ok(half);
                            }
                            None => {
                                tokio::time::sleep(RECONNECT_DELAY).await;
                                continue;
                            }
                        }
                    }
                    // Try the next queued item
                }
            }
        }
    }

    fn finish_rotation(
        &self,
        pipe: &Arc<Pipe>,
        item: Option<DestItem>,
        slice_deadline: &mut Option<Instant>,
        active_cancelled: &mut Option<Arc<AtomicBool>>,
        d2s: PipeHalf,
    ) -> Result<PipeHalf, ProxyError> {
        let miner = &self.miner;
        match item {
            Some(item) => {
                info!(miner = %miner.id(), dest = %item.dest.user_host(),
                    fraction = item.fraction, duration_secs = item.duration.as_secs(),
                    contract = %item.tag, "Assignment activated");
                *slice_deadline = Some(Instant::now() + item.duration);
                *active_cancelled = Some(miner.set_active(&item));
                miner.set_current_dest(&item.dest);
                miner.set_state(if item.fraction >= 1.0 {
                    MinerState::Busy
                } else {
                    MinerState::PartialBusy
                });
            }
            None => {
                debug!(miner = %miner.id(), "Queue empty, on default pool");
                let fallback = pipe.dest().url().clone();
                miner.set_current_dest(&fallback);
                if miner.state() == MinerState::Busy || miner.state() == MinerState::PartialBusy {
                    miner.set_state(MinerState::Ready);
                }
            }
        }
        Ok(d2s)
    }
}

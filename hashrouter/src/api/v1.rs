//! API v1 endpoints: miner and contract snapshots.

use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::contract::ContractSnapshot;
use crate::proxy::{DestItemInfo, MinerState};
use crate::types::HashRate;

use super::server::SharedState;

/// Routes mounted at the server root.
pub(crate) fn root_routes() -> Router<SharedState> {
    Router::new().route("/healthz", get(health))
}

/// Build the v1 API routes.
pub(crate) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/miners", get(miners))
        .route("/contracts", get(contracts))
        .route("/workers", get(workers))
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}

/// Aggregate miner listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinersResponse {
    pub total_hashrate_ghs: f64,
    pub used_hashrate_ghs: f64,
    pub available_hashrate_ghs: f64,

    pub total_miners: usize,
    pub vetting_miners: usize,
    pub free_miners: usize,
    pub partial_busy_miners: usize,
    pub busy_miners: usize,

    pub miners: Vec<MinerInfo>,
}

/// One miner's status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerInfo {
    pub id: String,
    pub worker_name: String,
    pub status: String,
    /// Window name → GHS
    pub hashrate_avg_ghs: BTreeMap<String, f64>,
    /// Human-readable short form of the freshest estimate
    pub hashrate: String,
    pub current_destination: Option<String>,
    pub current_difficulty: f64,
    pub connected_at_unix: u64,
    pub uptime_secs: u64,
    pub accepted_shares: u64,
    pub last_error: Option<String>,
    pub destinations: Vec<DestItemInfo>,
}

async fn miners(State(state): State<SharedState>) -> Json<MinersResponse> {
    let (total, used, available) = state.allocator.hashrate_totals_ghs();

    let mut infos = Vec::new();
    let mut vetting = 0;
    let mut free = 0;
    let mut partial_busy = 0;
    let mut busy = 0;
    for miner in state.allocator.miners() {
        match miner.state() {
            MinerState::Connecting | MinerState::Vetting => vetting += 1,
            MinerState::Ready => free += 1,
            MinerState::PartialBusy => partial_busy += 1,
            MinerState::Busy => busy += 1,
            MinerState::Disconnected => {}
        }
        let ghs = miner.hashrate_ghs();
        infos.push(MinerInfo {
            id: miner.id().to_string(),
            worker_name: miner.worker_name(),
            status: miner.state().as_str().to_string(),
            hashrate_avg_ghs: miner.hashrate_avg_ghs_all().into_iter().collect(),
            hashrate: HashRate::from_ghs(ghs).to_string(),
            current_destination: miner.current_dest().map(|d| d.user_host()),
            current_difficulty: miner.current_difficulty(),
            connected_at_unix: miner
                .connected_at()
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            uptime_secs: miner.uptime().as_secs(),
            accepted_shares: miner.accepted_shares(),
            last_error: miner.last_error(),
            destinations: miner.queued_items(),
        });
    }
    infos.sort_by(|a, b| a.id.cmp(&b.id));

    Json(MinersResponse {
        total_hashrate_ghs: total,
        used_hashrate_ghs: used,
        available_hashrate_ghs: available,
        total_miners: infos.len(),
        vetting_miners: vetting,
        free_miners: free,
        partial_busy_miners: partial_busy,
        busy_miners: busy,
        miners: infos,
    })
}

/// Contract listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractsResponse {
    pub contracts: Vec<ContractInfo>,
}

/// One contract's status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub id: String,
    pub role: String,
    pub stage: String,
    pub buyer_addr: String,
    pub seller_addr: String,
    pub target_ghs: f64,
    /// Window name → GHS
    pub actual_ghs: BTreeMap<String, f64>,
    pub dest: Option<String>,
    pub started_at_unix: Option<u64>,
    pub duration_secs: u64,
    pub elapsed_secs: u64,
    pub price: f64,
    pub version: u32,
    pub miners: Vec<String>,
}

impl From<ContractSnapshot> for ContractInfo {
    fn from(snap: ContractSnapshot) -> Self {
        Self {
            id: snap.id,
            role: snap.role.as_str().to_string(),
            stage: snap.stage.as_str().to_string(),
            buyer_addr: snap.buyer_addr,
            seller_addr: snap.seller_addr,
            target_ghs: snap.target_ghs,
            actual_ghs: snap.actual_ghs.into_iter().collect(),
            dest: snap.dest,
            started_at_unix: snap.started_at_unix,
            duration_secs: snap.duration_secs,
            elapsed_secs: snap.elapsed_secs,
            price: snap.price,
            version: snap.version,
            miners: snap.miners,
        }
    }
}

async fn contracts(State(state): State<SharedState>) -> Json<ContractsResponse> {
    let mut contracts: Vec<ContractInfo> = state
        .contracts
        .as_ref()
        .map(|m| m.snapshots().into_iter().map(ContractInfo::from).collect())
        .unwrap_or_default();
    contracts.sort_by(|a, b| a.id.cmp(&b.id));
    Json(ContractsResponse { contracts })
}

/// Per-destination submit counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkersResponse {
    pub workers: Vec<WorkerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub worker_name: String,
    /// Window name → GHS
    pub hashrate_ghs: BTreeMap<String, f64>,
}

async fn workers(State(state): State<SharedState>) -> Json<WorkersResponse> {
    let mut workers: Vec<WorkerInfo> = state
        .global
        .snapshot()
        .into_iter()
        .map(|(name, windows)| WorkerInfo {
            worker_name: name,
            hashrate_ghs: windows.into_iter().collect(),
        })
        .collect();
    workers.sort_by(|a, b| a.worker_name.cmp(&b.worker_name));
    Json(WorkersResponse { workers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::api::server::build_router;
    use crate::hashrate::GlobalHashrate;
    use crate::proxy::test_support::mock_source_conn;
    use crate::proxy::Miner;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn spawn_api(allocator: Arc<Allocator>, global: Arc<GlobalHashrate>) -> String {
        let app = build_router(allocator, global, None);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn healthz_responds() {
        let base = spawn_api(Arc::new(Allocator::new()), Arc::new(GlobalHashrate::new())).await;
        let body = reqwest::get(format!("{}/healthz", base))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn miners_listing_shape() {
        let allocator = Arc::new(Allocator::new());
        let (source, _h) = mock_source_conn("api");
        source.set_worker_name("worker.7");
        let miner = Miner::new(source, Arc::new(GlobalHashrate::new()), 1);
        miner.set_state(crate::proxy::MinerState::Ready);
        allocator.register_miner(miner);

        let base = spawn_api(Arc::clone(&allocator), Arc::new(GlobalHashrate::new())).await;
        let response: MinersResponse = reqwest::get(format!("{}/api/v1/miners", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(response.total_miners, 1);
        assert_eq!(response.free_miners, 1);
        assert_eq!(response.miners[0].worker_name, "worker.7");
        assert_eq!(response.miners[0].status, "ready");
        assert!(response.miners[0].hashrate_avg_ghs.contains_key("mean"));
    }

    #[tokio::test]
    async fn contracts_empty_without_manager() {
        let base = spawn_api(Arc::new(Allocator::new()), Arc::new(GlobalHashrate::new())).await;
        let response: ContractsResponse = reqwest::get(format!("{}/api/v1/contracts", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(response.contracts.is_empty());
    }

    #[tokio::test]
    async fn workers_reflect_global_counters() {
        let global = Arc::new(GlobalHashrate::new());
        global.on_submit("stratum+tcp://a@pool:3333", 100.0);

        let base = spawn_api(Arc::new(Allocator::new()), Arc::clone(&global)).await;
        let response: WorkersResponse = reqwest::get(format!("{}/api/v1/workers", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response.workers.len(), 1);
        assert_eq!(response.workers[0].worker_name, "stratum+tcp://a@pool:3333");
    }
}

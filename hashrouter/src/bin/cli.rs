//! Command-line interface for the hashrouter daemon.
//!
//! Queries the daemon's HTTP API for status.

use std::env;

use anyhow::Result;

use hashrouter::api_client;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: hashrouter-cli <command> [args]");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  status          Summary of miners and contracts");
        eprintln!("  miners          Full miner listing");
        eprintln!("  contracts       Full contract listing");
        eprintln!("  api <endpoint>  Raw API call (e.g. \"api api/v1/workers\")");
        eprintln!();
        eprintln!("Environment:");
        eprintln!("  HASHROUTER_API_URL    API base URL (default: http://127.0.0.1:3001)");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "status" => cmd_status().await?,
        "miners" => cmd_miners().await?,
        "contracts" => cmd_contracts().await?,
        "api" => {
            let endpoint = args.get(2).map_or("", String::as_str);
            cmd_api(endpoint).await?;
        }
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring HASHROUTER_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("HASHROUTER_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

async fn cmd_status() -> Result<()> {
    let client = make_client();
    let miners = client.get_miners().await?;
    let contracts = client.get_contracts().await?;

    println!(
        "miners: {} total ({} vetting, {} free, {} partial, {} busy)",
        miners.total_miners,
        miners.vetting_miners,
        miners.free_miners,
        miners.partial_busy_miners,
        miners.busy_miners,
    );
    println!(
        "hashrate: {:.1} GH/s total, {:.1} GH/s used, {:.1} GH/s available",
        miners.total_hashrate_ghs, miners.used_hashrate_ghs, miners.available_hashrate_ghs,
    );
    println!("contracts: {}", contracts.contracts.len());
    for c in &contracts.contracts {
        println!(
            "  {} {} {} target {:.1} GH/s",
            c.id, c.role, c.stage, c.target_ghs
        );
    }
    Ok(())
}

async fn cmd_miners() -> Result<()> {
    let client = make_client();
    let miners = client.get_miners().await?;
    for m in &miners.miners {
        println!(
            "{}  {}  {}  {}  dest={}  diff={}  shares={}",
            m.id,
            m.worker_name,
            m.status,
            m.hashrate,
            m.current_destination.as_deref().unwrap_or("-"),
            m.current_difficulty,
            m.accepted_shares,
        );
    }
    Ok(())
}

async fn cmd_contracts() -> Result<()> {
    let client = make_client();
    let contracts = client.get_contracts().await?;
    for c in &contracts.contracts {
        println!(
            "{}  {}  {}  target={:.1}GH/s  dest={}  elapsed={}s/{}s",
            c.id,
            c.role,
            c.stage,
            c.target_ghs,
            c.dest.as_deref().unwrap_or("-"),
            c.elapsed_secs,
            c.duration_secs,
        );
    }
    Ok(())
}

/// Make a raw API call and pretty-print the JSON response.
async fn cmd_api(endpoint: &str) -> Result<()> {
    let client = make_client();
    let body = client.get_raw(endpoint).await?;

    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", body),
    }
    Ok(())
}

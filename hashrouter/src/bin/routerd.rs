//! Main entry point for the hashrouter daemon.

use std::env;
use std::path::PathBuf;

use hashrouter::{config::Config, daemon::Daemon, tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    tracing::init(&config.log);

    let daemon = Daemon::new(config);
    daemon.run().await
}

/// Configuration file path: first argument, or HASHROUTER_CONFIG, or
/// defaults when neither is given.
fn load_config() -> anyhow::Result<Config> {
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("HASHROUTER_CONFIG").ok())
        .map(PathBuf::from);

    match path {
        Some(path) => Config::load_from(&path),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

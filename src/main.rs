mod admin;
mod config;
mod crypto;
mod dispatcher;
mod identity;
mod node;
mod nostr;
mod relay;
mod store;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rustls::crypto::ring::default_provider;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::BridgeConfig;
use crate::identity::{load_or_generate_identity, WalletContext};
use crate::node::rpc::ClnRpcClient;
use crate::node::NodeAdapter;
use crate::store::{ConnectionStore, NodeDatastore};

/// Seconds since the Unix epoch. The core never awaits around this value so
/// a plain `SystemTime` read is sufficient; no monotonic clock needed.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after 1970")
        .as_secs() as i64
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    default_provider().install_default().expect("failed to install rustls crypto provider");

    let config = BridgeConfig::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_filter.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting cln-nwc-bridge");
    tracing::info!(relay = %config.relay_url, socket = %config.cln_socket_path, "configuration loaded");

    let node: Arc<dyn NodeAdapter> = node::rpc::shared(config.cln_socket_path.clone());
    let identity = load_or_generate_identity(node.as_ref()).await?;
    tracing::info!(pubkey = %identity.pubkey_hex, "wallet identity ready");

    let store: Arc<dyn ConnectionStore> = Arc::new(NodeDatastore::new(node.clone()));
    let ctx = Arc::new(WalletContext::new(identity, node, store));

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("nwc-create") => return run_nwc_create(&ctx, &config, args).await,
        Some("nwc-list") => return run_nwc_list(&ctx, &config).await,
        Some("nwc-revoke") => return run_nwc_revoke(&ctx, args).await,
        Some(other) => anyhow::bail!("unknown command: {other}"),
        None => {}
    }

    let running = Arc::new(AtomicBool::new(true));
    relay::run(ctx, &config.relay_url, running).await;
    Ok(())
}

async fn run_nwc_create(ctx: &WalletContext, config: &BridgeConfig, mut args: impl Iterator<Item = String>) -> anyhow::Result<()> {
    let mut budget_msat = None;
    let mut expiry_unix = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--budget-msat" => budget_msat = args.next().and_then(|v| v.parse().ok()),
            "--expiry-unix" => expiry_unix = args.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
    let result = admin::nwc_create(ctx, &config.relay_url, budget_msat, expiry_unix).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_nwc_list(ctx: &WalletContext, config: &BridgeConfig) -> anyhow::Result<()> {
    let connections = admin::nwc_list(ctx, &config.relay_url).await?;
    println!("{}", serde_json::to_string_pretty(&connections)?);
    Ok(())
}

async fn run_nwc_revoke(ctx: &WalletContext, mut args: impl Iterator<Item = String>) -> anyhow::Result<()> {
    let pubkey = args.next().ok_or_else(|| anyhow::anyhow!("nwc-revoke requires a pubkey argument"))?;
    let result = admin::nwc_revoke(ctx, &pubkey).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

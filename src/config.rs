use std::env;

#[derive(Clone)]
pub struct BridgeConfig {
    pub relay_url: String,
    pub cln_socket_path: String,
    pub log_filter: String,
}

impl BridgeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            relay_url: env::var("NWC_RELAY_URL").unwrap_or_else(|_| "wss://relay.getalby.com/v1".to_string()),
            cln_socket_path: env::var("CLN_RPC_SOCKET").unwrap_or_else(|_| "lightning-rpc".to_string()),
            log_filter: env::var("RUST_LOG").unwrap_or_else(|_| "cln_nwc_bridge=info".to_string()),
        })
    }
}

//! Admin commands exposed through the plugin host: `nwc-create`,
//! `nwc-list`, `nwc-revoke`. Thin wrappers over the connection store.

use serde::Serialize;
use serde_json::{json, Value};

use crate::crypto;
use crate::identity::WalletContext;
use crate::nostr::NwcUri;
use crate::store::{Connection, StoreError};

#[derive(Debug, Serialize)]
pub struct CreateResult {
    pub url: String,
    pub pubkey: String,
}

#[derive(Debug, Serialize)]
pub struct ListedConnection {
    pub url: String,
    pub pubkey: String,
    pub expiry_unix: Option<i64>,
    pub remaining_budget_msat: Option<u64>,
}

pub async fn nwc_create(
    ctx: &WalletContext,
    relay_url: &str,
    budget_msat: Option<u64>,
    expiry_unix: Option<i64>,
) -> Result<CreateResult, StoreError> {
    let secret_key = crypto::generate_secret_key();
    let secret_hex = hex::encode(secret_key.secret_bytes());
    let connection = Connection::new(secret_hex.clone(), budget_msat, expiry_unix);
    let pubkey = connection.client_pubkey();

    ctx.store.create(&connection).await?;

    let url = NwcUri::construct(&ctx.identity.pubkey_hex, relay_url, &secret_hex);
    Ok(CreateResult { url, pubkey })
}

pub async fn nwc_list(ctx: &WalletContext, relay_url: &str) -> Result<Vec<ListedConnection>, StoreError> {
    let connections = ctx.store.find_all().await?;
    Ok(connections
        .into_iter()
        .map(|c| {
            let pubkey = c.client_pubkey();
            let url = NwcUri::construct(&ctx.identity.pubkey_hex, relay_url, &c.secret);
            ListedConnection { url, pubkey, expiry_unix: c.expiry_unix, remaining_budget_msat: c.remaining_budget() }
        })
        .collect())
}

pub async fn nwc_revoke(ctx: &WalletContext, pubkey: &str) -> Value {
    match ctx.store.delete(pubkey).await {
        Ok(()) => json!(true),
        Err(StoreError::NotFound) => json!({"error": "no connection for this pubkey"}),
        Err(e) => json!({"error": e.to_string()}),
    }
}

//! The wallet's own Nostr keypair and the shared context threaded through
//! the dispatcher and relay client.

use std::sync::Arc;

use secp256k1::SecretKey;
use thiserror::Error;

use crate::crypto;
use crate::node::{NodeAdapter, NodeError};
use crate::store::ConnectionStore;

const IDENTITY_KEY: &[&str] = &["nwc", "key", "v0"];

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("node error while loading identity: {0}")]
    Node(#[from] NodeError),
    #[error("stored identity key is not valid hex/secp256k1: {0}")]
    Crypto(#[from] crypto::CryptoError),
}

/// The wallet's Nostr keypair. Generated once via the node's own
/// `makesecret` and persisted in its datastore; never rotated.
pub struct WalletIdentity {
    pub secret_key: SecretKey,
    pub pubkey_hex: String,
}

impl WalletIdentity {
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let pubkey_hex = crypto::xonly_pubkey_hex(&secret_key);
        Self { secret_key, pubkey_hex }
    }
}

/// Load the wallet's persisted identity key, generating and persisting one
/// the first time the bridge runs against a given node.
pub async fn load_or_generate_identity(node: &dyn NodeAdapter) -> Result<WalletIdentity, IdentityError> {
    let key: Vec<String> = IDENTITY_KEY.iter().map(|s| s.to_string()).collect();
    let existing = node.listdatastore(&key).await?;
    if let Some((_, hex_secret)) = existing.into_iter().next() {
        let secret_key = crypto::secret_key_from_hex(&hex_secret)?;
        return Ok(WalletIdentity::from_secret_key(secret_key));
    }

    // `makesecret` derives deterministically from the node's HSM seed given
    // an arbitrary hex input; any fixed, bridge-specific string works as a
    // domain separator.
    let derived_hex = node.makesecret(&hex::encode(b"cln-nwc-bridge/identity")).await?;
    let secret_key = crypto::secret_key_from_hex(&derived_hex)?;

    node.datastore(&key, &derived_hex, crate::node::DatastoreMode::CreateOrReplace).await?;
    Ok(WalletIdentity::from_secret_key(secret_key))
}

/// Everything the dispatcher and relay client share: the wallet's own
/// keypair, the node adapter, and the connection store.
pub struct WalletContext {
    pub identity: WalletIdentity,
    pub node: Arc<dyn NodeAdapter>,
    pub store: Arc<dyn ConnectionStore>,
}

impl WalletContext {
    pub fn new(identity: WalletIdentity, node: Arc<dyn NodeAdapter>, store: Arc<dyn ConnectionStore>) -> Self {
        Self { identity, node, store }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::FakeNode;

    #[tokio::test]
    async fn generates_identity_once_then_reuses_it() {
        let node = FakeNode::default();
        let first = load_or_generate_identity(&node).await.unwrap();
        let second = load_or_generate_identity(&node).await.unwrap();
        assert_eq!(first.pubkey_hex, second.pubkey_hex);
    }
}

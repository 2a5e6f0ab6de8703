//! The narrow trait the NIP-47 dispatcher depends on for talking to the
//! Lightning node, plus the JSON-RPC-over-unix-socket implementation
//! ([`rpc::ClnRpcClient`]) that backs it in production.

pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// A structured RPC error the node returned (e.g. "could not find a
    /// route"). `kind` is a coarse classification used only for logging;
    /// the dispatcher always maps this to `ErrorCode::Internal`.
    #[error("{kind}: {message}")]
    Rpc { kind: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub alias: String,
    pub color: String,
    pub pubkey: String,
    pub network: String,
    pub block_height: u32,
}

#[derive(Debug, Clone)]
pub struct DecodedInvoice {
    pub amount_msat: u64,
    pub payment_hash: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct PayResult {
    pub payment_preimage: Option<String>,
    pub amount_sent_msat: u64,
}

#[derive(Debug, Clone)]
pub struct InvoiceResult {
    pub bolt11: String,
    pub expires_at: i64,
    pub payment_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceRecord {
    pub bolt11: Option<String>,
    pub description: Option<String>,
    pub payment_preimage: Option<String>,
    pub payment_hash: String,
    pub amount_msat: Option<u64>,
    pub expires_at: Option<i64>,
    pub paid_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PeerChannel {
    pub spendable_msat: u64,
}

pub enum InvoiceSelector<'a> {
    PaymentHash(&'a str),
    Invstring(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreMode {
    CreateOrReplace,
    MustCreate,
    MustReplace,
}

impl DatastoreMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::CreateOrReplace => "create-or-replace",
            Self::MustCreate => "must-create",
            Self::MustReplace => "must-replace",
        }
    }
}

/// A typed wrapper over the subset of the node's RPC surface the bridge
/// needs. Implementations talk to the actual Lightning node; test code
/// provides an in-memory fake (see `store::tests`).
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    async fn get_info(&self) -> Result<NodeInfo, NodeError>;
    async fn decodepay(&self, bolt11: &str) -> Result<DecodedInvoice, NodeError>;
    async fn pay(&self, bolt11: &str, amount_msat: Option<u64>) -> Result<PayResult, NodeError>;
    async fn keysend(&self, destination: &str, amount_msat: u64) -> Result<PayResult, NodeError>;
    async fn invoice(
        &self,
        amount_msat: u64,
        label: &str,
        description: &str,
        expiry: Option<u32>,
    ) -> Result<InvoiceResult, NodeError>;
    async fn listinvoices(&self, selector: InvoiceSelector<'_>) -> Result<Vec<InvoiceRecord>, NodeError>;
    async fn listpeerchannels(&self) -> Result<Vec<PeerChannel>, NodeError>;
    async fn listdatastore(&self, key: &[String]) -> Result<Vec<(Vec<String>, String)>, NodeError>;
    async fn datastore(&self, key: &[String], value: &str, mode: DatastoreMode) -> Result<(), NodeError>;
    async fn deldatastore(&self, key: &[String]) -> Result<(), NodeError>;
    async fn makesecret(&self, hex_input: &str) -> Result<String, NodeError>;
}

#[cfg(test)]
pub mod tests {
    use std::collections::BTreeMap;

    use tokio::sync::Mutex;

    use super::*;

    /// An in-memory stand-in for the node, used by the connection store and
    /// dispatcher tests. `datastore`/`listdatastore`/`deldatastore` behave
    /// like CLN's real ones; the payment methods return canned results.
    #[derive(Default)]
    pub struct FakeNode {
        kv: Mutex<BTreeMap<Vec<String>, String>>,
    }

    #[async_trait]
    impl NodeAdapter for FakeNode {
        async fn get_info(&self) -> Result<NodeInfo, NodeError> {
            Ok(NodeInfo {
                alias: "fakenode".into(),
                color: "000000".into(),
                pubkey: "02".to_string() + &"ab".repeat(32),
                network: "regtest".into(),
                block_height: 1,
            })
        }

        async fn decodepay(&self, _bolt11: &str) -> Result<DecodedInvoice, NodeError> {
            Ok(DecodedInvoice { amount_msat: 1_000, payment_hash: "aa".repeat(32), expires_at: 0 })
        }

        async fn pay(&self, _bolt11: &str, amount_msat: Option<u64>) -> Result<PayResult, NodeError> {
            Ok(PayResult { payment_preimage: Some("bb".repeat(32)), amount_sent_msat: amount_msat.unwrap_or(1_000) })
        }

        async fn keysend(&self, _destination: &str, amount_msat: u64) -> Result<PayResult, NodeError> {
            Ok(PayResult { payment_preimage: Some("cc".repeat(32)), amount_sent_msat: amount_msat })
        }

        async fn invoice(
            &self,
            _amount_msat: u64,
            _label: &str,
            _description: &str,
            _expiry: Option<u32>,
        ) -> Result<InvoiceResult, NodeError> {
            Ok(InvoiceResult { bolt11: "lnbcrt1...".into(), expires_at: 0, payment_hash: "dd".repeat(32) })
        }

        async fn listinvoices(&self, _selector: InvoiceSelector<'_>) -> Result<Vec<InvoiceRecord>, NodeError> {
            Ok(Vec::new())
        }

        async fn listpeerchannels(&self) -> Result<Vec<PeerChannel>, NodeError> {
            Ok(Vec::new())
        }

        async fn listdatastore(&self, key: &[String]) -> Result<Vec<(Vec<String>, String)>, NodeError> {
            let kv = self.kv.lock().await;
            Ok(kv
                .iter()
                .filter(|(k, _)| k.starts_with(key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        async fn datastore(&self, key: &[String], value: &str, mode: DatastoreMode) -> Result<(), NodeError> {
            let mut kv = self.kv.lock().await;
            let exists = kv.contains_key(key);
            match mode {
                DatastoreMode::MustCreate if exists => {
                    return Err(NodeError::Rpc { kind: "datastore".into(), message: "key exists".into() })
                }
                DatastoreMode::MustReplace if !exists => {
                    return Err(NodeError::Rpc { kind: "datastore".into(), message: "key does not exist".into() })
                }
                _ => {}
            }
            kv.insert(key.to_vec(), value.to_string());
            Ok(())
        }

        async fn deldatastore(&self, key: &[String]) -> Result<(), NodeError> {
            let mut kv = self.kv.lock().await;
            match kv.remove(key) {
                Some(_) => Ok(()),
                None => Err(NodeError::Rpc { kind: "deldatastore".into(), message: "key does not exist".into() }),
            }
        }

        async fn makesecret(&self, hex_input: &str) -> Result<String, NodeError> {
            Ok(crate::crypto::sha256_hex(hex_input.as_bytes()))
        }
    }
}

//! The connection store: a registry of issued NWC URIs backed by the
//! node's own key/value datastore, keyed by `["nwc","uri",client_pubkey]`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::{DatastoreMode, NodeAdapter, NodeError};

const BASE_KEY: &[&str] = &["nwc", "uri"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a connection for this pubkey already exists")]
    Conflict,
    #[error("no connection found for this pubkey")]
    NotFound,
    #[error("datastore error: {0}")]
    Node(#[from] NodeError),
    #[error("corrupt connection record: {0}")]
    Serde(#[from] serde_json::Error),
}

/// An issued NWC URI authorization and its accounting state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub secret: String,
    pub budget_msat: Option<u64>,
    pub expiry_unix: Option<i64>,
    pub spent_msat: u64,
}

impl Connection {
    pub fn new(secret: String, budget_msat: Option<u64>, expiry_unix: Option<i64>) -> Self {
        Self { secret, budget_msat, expiry_unix, spent_msat: 0 }
    }

    pub fn client_pubkey(&self) -> String {
        let sk = crate::crypto::secret_key_from_hex(&self.secret).expect("secret was validated at creation");
        crate::crypto::xonly_pubkey_hex(&sk)
    }

    pub fn remaining_budget(&self) -> Option<u64> {
        self.budget_msat.map(|b| b.saturating_sub(self.spent_msat))
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expiry_unix.is_some_and(|exp| now_unix > exp)
    }
}

fn datastore_key(client_pubkey: &str) -> Vec<String> {
    BASE_KEY.iter().map(|s| s.to_string()).chain(std::iter::once(client_pubkey.to_string())).collect()
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn create(&self, connection: &Connection) -> Result<(), StoreError>;
    async fn find(&self, client_pubkey: &str) -> Result<Option<Connection>, StoreError>;
    async fn find_all(&self) -> Result<Vec<Connection>, StoreError>;
    /// Compare-and-replace: fails with `StoreError::NotFound` if the record
    /// was deleted (revoked) concurrently.
    async fn update_spent(&self, client_pubkey: &str, new_spent_msat: u64) -> Result<(), StoreError>;
    async fn delete(&self, client_pubkey: &str) -> Result<(), StoreError>;
}

/// The production store: every operation is a `listdatastore`/`datastore`/
/// `deldatastore` call against the node.
pub struct NodeDatastore {
    node: Arc<dyn NodeAdapter>,
}

impl NodeDatastore {
    pub fn new(node: Arc<dyn NodeAdapter>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl ConnectionStore for NodeDatastore {
    async fn create(&self, connection: &Connection) -> Result<(), StoreError> {
        let key = datastore_key(&connection.client_pubkey());
        let value = serde_json::to_string(connection)?;
        match self.node.datastore(&key, &value, DatastoreMode::MustCreate).await {
            Ok(()) => Ok(()),
            Err(NodeError::Rpc { .. }) => Err(StoreError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, client_pubkey: &str) -> Result<Option<Connection>, StoreError> {
        let key = datastore_key(client_pubkey);
        let mut records = self.node.listdatastore(&key).await?;
        match records.pop() {
            Some((_, raw)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn find_all(&self) -> Result<Vec<Connection>, StoreError> {
        let prefix: Vec<String> = BASE_KEY.iter().map(|s| s.to_string()).collect();
        let records = self.node.listdatastore(&prefix).await?;
        records
            .into_iter()
            .map(|(_, raw)| serde_json::from_str(&raw).map_err(StoreError::from))
            .collect()
    }

    async fn update_spent(&self, client_pubkey: &str, new_spent_msat: u64) -> Result<(), StoreError> {
        let mut connection = self.find(client_pubkey).await?.ok_or(StoreError::NotFound)?;
        connection.spent_msat = new_spent_msat;
        let key = datastore_key(client_pubkey);
        let value = serde_json::to_string(&connection)?;
        match self.node.datastore(&key, &value, DatastoreMode::MustReplace).await {
            Ok(()) => Ok(()),
            Err(NodeError::Rpc { .. }) => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, client_pubkey: &str) -> Result<(), StoreError> {
        let key = datastore_key(client_pubkey);
        match self.node.deldatastore(&key).await {
            Ok(()) => Ok(()),
            Err(NodeError::Rpc { .. }) => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

//! A thin JSON-RPC client over the Core Lightning `lightning-rpc`
//! unix-domain socket, in the shape of a conventional JSON-RPC transport
//! (request id bookkeeping, one error enum, a generic `call`) but
//! targeting a unix socket instead of HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use super::{
    DatastoreMode, DecodedInvoice, InvoiceRecord, InvoiceResult, InvoiceSelector, NodeAdapter, NodeError, NodeInfo,
    PayResult, PeerChannel,
};

/// Connects lazily-reconnecting requests to `lightning-rpc`. CLN processes
/// one request at a time per connection, so calls are serialized behind a
/// mutex rather than pipelined.
pub struct ClnRpcClient {
    socket_path: String,
    conn: Mutex<Option<UnixStream>>,
    next_id: AtomicU64,
}

impl ClnRpcClient {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R, NodeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut request_bytes = serde_json::to_vec(&request).map_err(|e| NodeError::Transport(e.to_string()))?;
        request_bytes.push(b'\n');

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| NodeError::Transport(format!("connect {}: {e}", self.socket_path)))?;
            *guard = Some(stream);
        }
        let stream = guard.as_mut().expect("just connected");

        stream
            .write_all(&request_bytes)
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;

        let response = read_one_json_value(stream).await.map_err(|e| {
            // Drop the connection so the next call reconnects cleanly.
            *guard = None;
            e
        })?;

        if let Some(err) = response.get("error").filter(|v| !v.is_null()) {
            return Err(NodeError::Rpc {
                kind: method.to_string(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown RPC error")
                    .to_string(),
            });
        }
        let result = response
            .get("result")
            .ok_or_else(|| NodeError::UnexpectedShape(format!("missing `result` for {method}")))?;
        serde_json::from_value(result.clone()).map_err(|e| NodeError::UnexpectedShape(e.to_string()))
    }
}

/// Read bytes until a single complete JSON value has been parsed. CLN's
/// RPC socket is not length-prefixed; responses are whole JSON objects
/// written back-to-back.
async fn read_one_json_value(stream: &mut UnixStream) -> Result<Value, NodeError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match serde_json::Deserializer::from_slice(&buf).into_iter::<Value>().next() {
            Some(Ok(value)) => return Ok(value),
            _ => {
                let n = stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| NodeError::Transport(e.to_string()))?;
                if n == 0 {
                    return Err(NodeError::Transport("connection closed mid-response".into()));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

#[async_trait]
impl NodeAdapter for ClnRpcClient {
    async fn get_info(&self) -> Result<NodeInfo, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            alias: String,
            color: String,
            id: String,
            network: String,
            blockheight: u32,
        }
        let raw: Raw = self.call("getinfo", json!({})).await?;
        Ok(NodeInfo {
            alias: raw.alias,
            color: raw.color,
            pubkey: raw.id,
            network: raw.network,
            block_height: raw.blockheight,
        })
    }

    async fn decodepay(&self, bolt11: &str) -> Result<DecodedInvoice, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            #[serde(default)]
            amount_msat: u64,
            payment_hash: String,
            expiry: i64,
            #[serde(default)]
            created_at: i64,
        }
        let raw: Raw = self.call("decodepay", json!({"bolt11": bolt11})).await?;
        Ok(DecodedInvoice {
            amount_msat: raw.amount_msat,
            payment_hash: raw.payment_hash,
            expires_at: raw.created_at + raw.expiry,
        })
    }

    async fn pay(&self, bolt11: &str, amount_msat: Option<u64>) -> Result<PayResult, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            payment_preimage: Option<String>,
            amount_sent_msat: u64,
        }
        let raw: Raw = self.call("pay", json!({"bolt11": bolt11, "amount_msat": amount_msat})).await?;
        Ok(PayResult {
            payment_preimage: raw.payment_preimage,
            amount_sent_msat: raw.amount_sent_msat,
        })
    }

    async fn keysend(&self, destination: &str, amount_msat: u64) -> Result<PayResult, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            payment_preimage: Option<String>,
            amount_sent_msat: u64,
        }
        let raw: Raw = self
            .call("keysend", json!({"destination": destination, "amount_msat": amount_msat}))
            .await?;
        Ok(PayResult {
            payment_preimage: raw.payment_preimage,
            amount_sent_msat: raw.amount_sent_msat,
        })
    }

    async fn invoice(
        &self,
        amount_msat: u64,
        label: &str,
        description: &str,
        expiry: Option<u32>,
    ) -> Result<InvoiceResult, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            bolt11: String,
            expires_at: i64,
            payment_hash: String,
        }
        let raw: Raw = self
            .call(
                "invoice",
                json!({
                    "amount_msat": amount_msat,
                    "label": label,
                    "description": description,
                    "expiry": expiry,
                }),
            )
            .await?;
        Ok(InvoiceResult {
            bolt11: raw.bolt11,
            expires_at: raw.expires_at,
            payment_hash: raw.payment_hash,
        })
    }

    async fn listinvoices(&self, selector: InvoiceSelector<'_>) -> Result<Vec<InvoiceRecord>, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            bolt11: Option<String>,
            description: Option<String>,
            payment_preimage: Option<String>,
            payment_hash: String,
            amount_msat: Option<u64>,
            expires_at: Option<i64>,
            paid_at: Option<i64>,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            invoices: Vec<Raw>,
        }
        let params = match selector {
            InvoiceSelector::PaymentHash(h) => json!({"payment_hash": h}),
            InvoiceSelector::Invstring(s) => json!({"invstring": s}),
        };
        let resp: Resp = self.call("listinvoices", params).await?;
        Ok(resp
            .invoices
            .into_iter()
            .map(|r| InvoiceRecord {
                bolt11: r.bolt11,
                description: r.description,
                payment_preimage: r.payment_preimage,
                payment_hash: r.payment_hash,
                amount_msat: r.amount_msat,
                expires_at: r.expires_at,
                paid_at: r.paid_at,
            })
            .collect())
    }

    async fn listpeerchannels(&self) -> Result<Vec<PeerChannel>, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            #[serde(default)]
            spendable_msat: u64,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            channels: Vec<Raw>,
        }
        let resp: Resp = self.call("listpeerchannels", json!({})).await?;
        Ok(resp
            .channels
            .into_iter()
            .map(|r| PeerChannel { spendable_msat: r.spendable_msat })
            .collect())
    }

    async fn listdatastore(&self, key: &[String]) -> Result<Vec<(Vec<String>, String)>, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            key: Vec<String>,
            string: Option<String>,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            datastore: Vec<Raw>,
        }
        let resp: Resp = self.call("listdatastore", json!({"key": key})).await?;
        Ok(resp
            .datastore
            .into_iter()
            .filter_map(|r| r.string.map(|s| (r.key, s)))
            .collect())
    }

    async fn datastore(&self, key: &[String], value: &str, mode: DatastoreMode) -> Result<(), NodeError> {
        let _: Value = self
            .call("datastore", json!({"key": key, "string": value, "mode": mode.as_str()}))
            .await?;
        Ok(())
    }

    async fn deldatastore(&self, key: &[String]) -> Result<(), NodeError> {
        let _: Value = self.call("deldatastore", json!({"key": key})).await?;
        Ok(())
    }

    async fn makesecret(&self, hex_input: &str) -> Result<String, NodeError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            secret: String,
        }
        let raw: Raw = self.call("makesecret", json!({"hex": hex_input})).await?;
        Ok(raw.secret)
    }
}

pub fn shared(socket_path: impl Into<String>) -> Arc<ClnRpcClient> {
    Arc::new(ClnRpcClient::new(socket_path))
}

//! The NIP-47 request pipeline: decrypt, decode, authorize, validate,
//! dispatch to the node, and build the response envelope. Pure with respect
//! to the network: the relay client is the only side-effectful caller.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::identity::WalletContext;
use crate::node::InvoiceSelector;
use crate::nostr::nip04;
use crate::store::StoreError;

/// Every method this implementation can actually execute. Anything else
/// falls through to `NOT_IMPLEMENTED` before it reaches a handler.
pub const SUPPORTED_METHODS: &[&str] =
    &["pay_invoice", "pay_keysend", "make_invoice", "lookup_invoice", "get_balance", "get_info"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    NotImplemented,
    InsufficientBalance,
    Restricted,
    Unauthorized,
    QuotaExceeded,
    Internal,
    Other,
    NotFound,
}

#[derive(Debug, Serialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
}

/// The plaintext NIP-47 response envelope, ready to be JSON-serialized and
/// NIP-04 encrypted.
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    pub result_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseEnvelope {
    fn ok(result_type: impl Into<String>, result: Value) -> Self {
        Self { result_type: result_type.into(), result: Some(result), error: None }
    }

    fn err(result_type: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self { result_type: result_type.into(), result: None, error: Some(ResponseError { code, message: message.into() }) }
    }
}

#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    method: String,
    #[serde(default)]
    params: Value,
}

/// Run the full pipeline for one inbound kind-23194 event's already-decoded
/// fields. `client_pubkey` is the request event's `pubkey`; `ciphertext` its
/// `content`.
pub async fn handle_request(ctx: &WalletContext, client_pubkey: &str, ciphertext: &str, now_unix: i64) -> ResponseEnvelope {
    let plaintext = match decrypt_request(ctx, client_pubkey, ciphertext) {
        Ok(p) => p,
        Err(message) => return ResponseEnvelope::err("unknown", ErrorCode::Other, message),
    };

    let request: RequestEnvelope = match serde_json::from_str(&plaintext) {
        Ok(r) => r,
        Err(e) => return ResponseEnvelope::err("unknown", ErrorCode::Other, format!("invalid request JSON: {e}")),
    };
    let method = request.method.clone();

    let connection = match ctx.store.find(client_pubkey).await {
        Ok(Some(c)) => c,
        Ok(None) => return ResponseEnvelope::err(method, ErrorCode::Unauthorized, "no connection for this pubkey"),
        Err(e) => return ResponseEnvelope::err(method, ErrorCode::Internal, e.to_string()),
    };

    if connection.is_expired(now_unix) {
        return ResponseEnvelope::err(method, ErrorCode::Unauthorized, "expired");
    }

    if !SUPPORTED_METHODS.contains(&method.as_str()) {
        return ResponseEnvelope::err(&method, ErrorCode::NotImplemented, format!("unsupported method: {method}"));
    }

    match method.as_str() {
        "pay_invoice" => pay_invoice(ctx, client_pubkey, &request.params, now_unix).await,
        "pay_keysend" => pay_keysend(ctx, client_pubkey, &request.params, now_unix).await,
        "make_invoice" => make_invoice(ctx, &request.params).await,
        "lookup_invoice" => lookup_invoice(ctx, &request.params).await,
        "get_balance" => get_balance(ctx).await,
        "get_info" => get_info(ctx).await,
        _ => unreachable!("checked against SUPPORTED_METHODS above"),
    }
}

fn decrypt_request(ctx: &WalletContext, client_pubkey: &str, ciphertext: &str) -> Result<String, String> {
    let xonly = secp256k1::XOnlyPublicKey::from_slice(&hex::decode(client_pubkey).map_err(|e| e.to_string())?)
        .map_err(|e| e.to_string())?;
    nip04::decrypt(&ctx.identity.secret_key, &xonly, ciphertext).map_err(|e| e.to_string())
}

fn require_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, ResponseEnvelope> {
    params
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ResponseEnvelope::err("unknown", ErrorCode::Other, format!("missing parameter: {field}")))
}

fn require_u64(params: &Value, field: &str) -> Result<u64, ResponseEnvelope> {
    params
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| ResponseEnvelope::err("unknown", ErrorCode::Other, format!("missing parameter: {field}")))
}

async fn pay_invoice(ctx: &WalletContext, client_pubkey: &str, params: &Value, _now_unix: i64) -> ResponseEnvelope {
    const METHOD: &str = "pay_invoice";

    let invoice = match require_str(params, "invoice") {
        Ok(v) => v,
        Err(mut e) => {
            e.result_type = METHOD.to_string();
            return e;
        }
    };
    let explicit_amount = params.get("amount").and_then(Value::as_u64).filter(|a| *a != 0);

    let decoded = match ctx.node.decodepay(invoice).await {
        Ok(d) => d,
        Err(e) => return ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    };

    if explicit_amount.is_some() && decoded.amount_msat != 0 {
        return ResponseEnvelope::err(METHOD, ErrorCode::Other, "invoice already specifies an amount");
    }
    let effective = explicit_amount.unwrap_or(decoded.amount_msat);

    let connection = match ctx.store.find(client_pubkey).await {
        Ok(Some(c)) => c,
        Ok(None) => return ResponseEnvelope::err(METHOD, ErrorCode::Unauthorized, "no connection for this pubkey"),
        Err(e) => return ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    };
    if let Some(remaining) = connection.remaining_budget() {
        if remaining < effective {
            return ResponseEnvelope::err(METHOD, ErrorCode::QuotaExceeded, "payment would exceed remaining budget");
        }
    }

    let pay_amount = if decoded.amount_msat == 0 { Some(effective) } else { None };
    let result = match ctx.node.pay(invoice, pay_amount).await {
        Ok(r) => r,
        Err(e) => return ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    };

    let Some(preimage) = result.payment_preimage.clone() else {
        return ResponseEnvelope::err(METHOD, ErrorCode::Internal, "payment returned no preimage");
    };

    record_spend(ctx, client_pubkey, connection.spent_msat + result.amount_sent_msat).await;
    ResponseEnvelope::ok(METHOD, json!({"preimage": preimage}))
}

async fn pay_keysend(ctx: &WalletContext, client_pubkey: &str, params: &Value, _now_unix: i64) -> ResponseEnvelope {
    const METHOD: &str = "pay_keysend";

    if params.get("preimage").is_some() || params.get("tlv_records").is_some() {
        return ResponseEnvelope::err(METHOD, ErrorCode::NotImplemented, "custom preimage/tlv_records are not supported");
    }

    let amount = match require_u64(params, "amount") {
        Ok(v) => v,
        Err(mut e) => {
            e.result_type = METHOD.to_string();
            return e;
        }
    };
    let pubkey = match require_str(params, "pubkey") {
        Ok(v) => v,
        Err(mut e) => {
            e.result_type = METHOD.to_string();
            return e;
        }
    };

    let connection = match ctx.store.find(client_pubkey).await {
        Ok(Some(c)) => c,
        Ok(None) => return ResponseEnvelope::err(METHOD, ErrorCode::Unauthorized, "no connection for this pubkey"),
        Err(e) => return ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    };
    if let Some(remaining) = connection.remaining_budget() {
        if remaining < amount {
            return ResponseEnvelope::err(METHOD, ErrorCode::QuotaExceeded, "payment would exceed remaining budget");
        }
    }

    let result = match ctx.node.keysend(pubkey, amount).await {
        Ok(r) => r,
        Err(e) => return ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    };
    let Some(preimage) = result.payment_preimage.clone() else {
        return ResponseEnvelope::err(METHOD, ErrorCode::Internal, "payment returned no preimage");
    };

    record_spend(ctx, client_pubkey, connection.spent_msat + result.amount_sent_msat).await;
    ResponseEnvelope::ok(METHOD, json!({"preimage": preimage}))
}

/// `spent_msat` only advances on a result with a confirmed preimage; a CAS
/// failure here means the connection was revoked mid-payment and is logged,
/// not surfaced to the client (the payment already went through).
async fn record_spend(ctx: &WalletContext, client_pubkey: &str, new_spent_msat: u64) {
    match ctx.store.update_spent(client_pubkey, new_spent_msat).await {
        Ok(()) => {}
        Err(StoreError::NotFound) => {
            tracing::error!(client_pubkey, "spend accounting lost: connection revoked after payment succeeded")
        }
        Err(e) => tracing::error!(client_pubkey, error = %e, "failed to persist spend accounting"),
    }
}

async fn make_invoice(ctx: &WalletContext, params: &Value) -> ResponseEnvelope {
    const METHOD: &str = "make_invoice";

    let amount = match require_u64(params, "amount") {
        Ok(v) => v,
        Err(mut e) => {
            e.result_type = METHOD.to_string();
            return e;
        }
    };
    let description = params.get("description").and_then(Value::as_str).unwrap_or("").to_string();
    let expiry = params.get("expiry").and_then(Value::as_u64).map(|e| e as u32);
    let label = format!("nwc-{}", uuid::Uuid::new_v4());

    let result = match ctx.node.invoice(amount, &label, &description, expiry).await {
        Ok(r) => r,
        Err(e) => return ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    };

    ResponseEnvelope::ok(
        METHOD,
        json!({
            "type": "incoming",
            "invoice": result.bolt11,
            "description": description,
            "amount": amount,
            "payment_hash": result.payment_hash,
            "expires_at": result.expires_at,
            "created_at": result.expires_at - i64::from(expiry.unwrap_or(86_400)),
        }),
    )
}

async fn lookup_invoice(ctx: &WalletContext, params: &Value) -> ResponseEnvelope {
    const METHOD: &str = "lookup_invoice";

    let payment_hash = params.get("payment_hash").and_then(Value::as_str).filter(|s| !s.is_empty());
    let invoice = params.get("invoice").and_then(Value::as_str).filter(|s| !s.is_empty());

    let selector = match (payment_hash, invoice) {
        (Some(_), Some(_)) => {
            return ResponseEnvelope::err(METHOD, ErrorCode::Other, "specify only one of payment_hash or invoice")
        }
        (Some(h), None) => InvoiceSelector::PaymentHash(h),
        (None, Some(i)) => InvoiceSelector::Invstring(i),
        (None, None) => return ResponseEnvelope::err(METHOD, ErrorCode::Other, "missing parameter: payment_hash or invoice"),
    };

    let records = match ctx.node.listinvoices(selector).await {
        Ok(r) => r,
        Err(e) => return ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    };
    let Some(record) = records.into_iter().next() else {
        return ResponseEnvelope::err(METHOD, ErrorCode::NotFound, "no matching invoice");
    };

    ResponseEnvelope::ok(
        METHOD,
        json!({
            "type": "incoming",
            "invoice": record.bolt11,
            "description": record.description,
            "preimage": record.payment_preimage,
            "payment_hash": record.payment_hash,
            "amount": record.amount_msat,
            "expires_at": record.expires_at,
            "paid_at": record.paid_at,
        }),
    )
}

async fn get_balance(ctx: &WalletContext) -> ResponseEnvelope {
    const METHOD: &str = "get_balance";
    match ctx.node.listpeerchannels().await {
        Ok(channels) => {
            let total: u64 = channels.iter().map(|c| c.spendable_msat).sum();
            ResponseEnvelope::ok(METHOD, json!({"balance": total}))
        }
        Err(e) => ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    }
}

async fn get_info(ctx: &WalletContext) -> ResponseEnvelope {
    const METHOD: &str = "get_info";
    match ctx.node.get_info().await {
        Ok(info) => ResponseEnvelope::ok(
            METHOD,
            json!({
                "alias": info.alias,
                "color": info.color,
                "pubkey": info.pubkey,
                "network": info.network,
                "block_height": info.block_height,
                "methods": SUPPORTED_METHODS,
            }),
        ),
        Err(e) => ResponseEnvelope::err(METHOD, ErrorCode::Internal, e.to_string()),
    }
}

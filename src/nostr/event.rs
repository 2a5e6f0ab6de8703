//! Nostr (NIP-01) event structure: canonical serialization, id hashing,
//! and BIP-340 signing.

use secp256k1::{schnorr, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::crypto;

#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),
    #[error("invalid hex in event field: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("malformed signature: {0}")]
    Signature(#[from] secp256k1::Error),
    #[error("event id does not match its contents")]
    IdMismatch,
    #[error("event signature does not verify")]
    BadSignature,
}

/// A Nostr event. `id` and `sig` are absent on a freshly-built, unsigned
/// event and populated by [`Event::sign`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl Event {
    pub fn unsigned(pubkey: String, created_at: i64, kind: u32, tags: Vec<Vec<String>>, content: String) -> Self {
        Self {
            id: String::new(),
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: String::new(),
        }
    }

    /// `from_json` accepts the wire shape as-is. It does not verify id or
    /// signature: the relay is trusted to deliver what it signed for. Use
    /// [`Event::verify`] explicitly where that matters (tests).
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// The NIP-01 canonical serialization used to compute the event id:
    /// `[0, pubkey, created_at, kind, tags, content]`, compact separators,
    /// UTF-8 passthrough.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let arr = json!([0, self.pubkey, self.created_at, self.kind, self.tags, self.content]);
        serde_json::to_vec(&arr).expect("event fields are already valid JSON")
    }

    pub fn compute_id(&self) -> String {
        crypto::sha256_hex(&self.canonical_bytes())
    }

    /// Compute the id and Schnorr-sign it, populating both fields.
    pub fn sign(&mut self, secret_key: &SecretKey) {
        let id_hex = self.compute_id();
        let mut id_bytes = [0u8; 32];
        id_bytes.copy_from_slice(&hex::decode(&id_hex).expect("sha256 hex is well-formed"));
        let sig = crypto::sign_schnorr(secret_key, &id_bytes);
        self.id = id_hex;
        self.sig = sig.to_string();
    }

    /// Recompute the id and verify the signature against `pubkey`. Not
    /// called on the hot path (see module docs); required for tests and
    /// any caller that wants to authenticate a relay-delivered event.
    pub fn verify(&self) -> Result<(), EventError> {
        let expected_id = self.compute_id();
        if expected_id != self.id {
            return Err(EventError::IdMismatch);
        }
        let pubkey_bytes = hex::decode(&self.pubkey)?;
        let xonly = XOnlyPublicKey::from_slice(&pubkey_bytes)?;
        let sig = schnorr::Signature::from_slice(&hex::decode(&self.sig)?)?;
        let mut id_bytes = [0u8; 32];
        id_bytes.copy_from_slice(&hex::decode(&self.id)?);
        if crypto::verify_schnorr(&xonly, &id_bytes, &sig) {
            Ok(())
        } else {
            Err(EventError::BadSignature)
        }
    }

    /// Emit the full seven-field wire object.
    pub fn event_data(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Event always serializes")
    }

    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1).map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_secret_key, xonly_pubkey_hex};

    #[test]
    fn sign_then_verify_round_trips() {
        let sk = generate_secret_key();
        let pubkey = xonly_pubkey_hex(&sk);
        let mut event = Event::unsigned(pubkey, 1_700_000_000, 23194, vec![], "hello".into());
        event.sign(&sk);
        event.verify().expect("freshly signed event must verify");
    }

    #[test]
    fn mutating_content_invalidates_id() {
        let sk = generate_secret_key();
        let pubkey = xonly_pubkey_hex(&sk);
        let mut event = Event::unsigned(pubkey, 1_700_000_000, 23194, vec![], "hello".into());
        event.sign(&sk);
        event.content = "goodbye".into();
        assert!(event.verify().is_err());
    }

    #[test]
    fn mutating_tags_invalidates_id() {
        let sk = generate_secret_key();
        let pubkey = xonly_pubkey_hex(&sk);
        let mut event = Event::unsigned(pubkey, 1_700_000_000, 23194, vec![], "hello".into());
        event.sign(&sk);
        event.tags.push(vec!["p".into(), "aa".into()]);
        assert!(event.verify().is_err());
    }

    #[test]
    fn mutating_kind_or_created_at_invalidates_id() {
        let sk = generate_secret_key();
        let pubkey = xonly_pubkey_hex(&sk);
        let mut event = Event::unsigned(pubkey, 1_700_000_000, 23194, vec![], "hello".into());
        event.sign(&sk);

        let mut by_kind = event.clone();
        by_kind.kind = 1;
        assert!(by_kind.verify().is_err());

        let mut by_time = event.clone();
        by_time.created_at += 1;
        assert!(by_time.verify().is_err());
    }

    #[test]
    fn from_json_does_not_verify() {
        let value = json!({
            "id": "0".repeat(64),
            "pubkey": "1".repeat(64),
            "created_at": 0,
            "kind": 1,
            "tags": [],
            "content": "",
            "sig": "0".repeat(128),
        });
        let event = Event::from_json(&value).unwrap();
        assert!(event.verify().is_err());
    }
}

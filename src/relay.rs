//! Websocket relay client: connect, announce, subscribe, and run the
//! receive loop that feeds inbound requests to the dispatcher and publishes
//! its responses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use crate::dispatcher::{self, SUPPORTED_METHODS};
use crate::identity::WalletContext;
use crate::nostr::Event;

const REQUEST_KIND: u32 = 23194;
const RESPONSE_KIND: u32 = 23195;
const INFO_KIND: u32 = 13194;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Runs the relay connection for the lifetime of the process: connect,
/// announce (once), subscribe, process events, and reconnect with a fixed
/// backoff on any transport error or close. Only returns if `running` is
/// cleared between reconnects.
pub async fn run(ctx: Arc<WalletContext>, relay_url: &str, running: Arc<AtomicBool>) {
    let announced = AtomicBool::new(false);

    while running.load(Ordering::Relaxed) {
        match run_once(&ctx, relay_url, &announced).await {
            Ok(()) => tracing::info!("relay connection closed cleanly"),
            Err(e) => tracing::warn!(error = %e, "relay connection error"),
        }
        if !running.load(Ordering::Relaxed) {
            break;
        }
        tracing::info!(delay_secs = RECONNECT_DELAY.as_secs(), "reconnecting to relay");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn run_once(ctx: &WalletContext, relay_url: &str, announced: &AtomicBool) -> Result<(), String> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(relay_url).await.map_err(|e| e.to_string())?;
    let (mut write, mut read) = ws_stream.split();
    tracing::info!(relay = relay_url, "connected to relay");

    if !announced.swap(true, Ordering::Relaxed) {
        let info_event = build_info_event(ctx);
        publish(&mut write, &info_event).await;
    }

    let subscription_id = uuid::Uuid::new_v4().simple().to_string();
    let filter = json!({"kinds": [REQUEST_KIND], "#p": [ctx.identity.pubkey_hex]});
    let req = json!(["REQ", subscription_id, filter]);
    write.send(Message::Text(req.to_string())).await.map_err(|e| e.to_string())?;
    tracing::info!(subscription_id, "subscribed for requests");

    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| e.to_string())?;
        let Message::Text(text) = msg else { continue };
        let frame: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "malformed relay frame");
                continue;
            }
        };
        let Some(label) = frame.get(0).and_then(Value::as_str) else { continue };

        match label {
            "EVENT" => {
                if let Some(event_json) = frame.get(2) {
                    if let Ok(event) = Event::from_json(event_json) {
                        if let Some(response) = handle_event(ctx, &event).await {
                            publish(&mut write, &response).await;
                        }
                    }
                }
            }
            "OK" | "CLOSED" | "NOTICE" | "EOSE" => {
                tracing::debug!(label, frame = %frame, "relay control frame");
            }
            other => tracing::debug!(label = other, "unrecognized relay frame"),
        }
    }

    Ok(())
}

async fn handle_event(ctx: &WalletContext, event: &Event) -> Option<Event> {
    if event.kind != REQUEST_KIND {
        return None;
    }
    let now = crate::now_unix();
    let response_envelope = dispatcher::handle_request(ctx, &event.pubkey, &event.content, now).await;

    let client_xonly = secp256k1::XOnlyPublicKey::from_slice(&hex::decode(&event.pubkey).ok()?).ok()?;
    let content = serde_json::to_string(&response_envelope).ok()?;
    let encrypted = crate::nostr::nip04::encrypt(&ctx.identity.secret_key, &client_xonly, &content);

    let tags = vec![vec!["p".to_string(), event.pubkey.clone()], vec!["e".to_string(), event.id.clone()]];
    let mut response = Event::unsigned(ctx.identity.pubkey_hex.clone(), now, RESPONSE_KIND, tags, encrypted);
    response.sign(&ctx.identity.secret_key);
    Some(response)
}

fn build_info_event(ctx: &WalletContext) -> Event {
    let content = SUPPORTED_METHODS.join(" ");
    let mut event = Event::unsigned(ctx.identity.pubkey_hex.clone(), crate::now_unix(), INFO_KIND, Vec::new(), content);
    event.sign(&ctx.identity.secret_key);
    event
}

async fn publish<S>(write: &mut futures_util::stream::SplitSink<S, Message>, event: &Event)
where
    S: futures_util::Sink<Message> + Unpin,
    <S as futures_util::Sink<Message>>::Error: std::fmt::Display,
{
    let frame = json!(["EVENT", event.event_data()]);
    if let Err(e) = write.send(Message::Text(frame.to_string())).await {
        tracing::warn!(error = %e, "failed to publish event");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crypto;
    use crate::identity::WalletIdentity;
    use crate::node::tests::FakeNode;
    use crate::node::NodeAdapter;
    use crate::store::{Connection, ConnectionStore, NodeDatastore};

    fn test_context() -> WalletContext {
        let node: Arc<dyn NodeAdapter> = Arc::new(FakeNode::default());
        let store: Arc<dyn ConnectionStore> = Arc::new(NodeDatastore::new(node.clone()));
        let identity = WalletIdentity::from_secret_key(crypto::generate_secret_key());
        WalletContext::new(identity, node, store)
    }

    #[test]
    fn info_event_is_kind_13194_with_supported_methods_as_content() {
        let ctx = test_context();
        let event = build_info_event(&ctx);
        assert_eq!(event.kind, INFO_KIND);
        assert_eq!(event.content, SUPPORTED_METHODS.join(" "));
        assert!(event.verify().is_ok());
    }

    #[tokio::test]
    async fn handle_event_produces_a_tagged_signed_response() {
        let ctx = test_context();
        let client_sk = crypto::generate_secret_key();
        let client_pubkey = crypto::xonly_pubkey_hex(&client_sk);
        let connection = Connection::new(hex::encode(client_sk.secret_bytes()), None, None);
        ctx.store.create(&connection).await.unwrap();

        let wallet_xonly = secp256k1::XOnlyPublicKey::from_slice(&hex::decode(&ctx.identity.pubkey_hex).unwrap()).unwrap();
        let ciphertext =
            crate::nostr::nip04::encrypt(&client_sk, &wallet_xonly, r#"{"method":"get_info","params":{}}"#);
        let mut request = Event::unsigned(client_pubkey.clone(), crate::now_unix(), REQUEST_KIND, Vec::new(), ciphertext);
        request.sign(&client_sk);

        let response = handle_event(&ctx, &request).await.expect("a request event produces a response");
        assert_eq!(response.kind, RESPONSE_KIND);
        assert!(response.verify().is_ok());
        assert_eq!(response.tag_values("p"), vec![client_pubkey.as_str()]);
        assert_eq!(response.tag_values("e"), vec![request.id.as_str()]);
    }

    #[tokio::test]
    async fn handle_event_ignores_non_request_kinds() {
        let ctx = test_context();
        let mut other = Event::unsigned("aa".repeat(32), crate::now_unix(), INFO_KIND, Vec::new(), String::new());
        other.sign(&crypto::generate_secret_key());
        assert!(handle_event(&ctx, &other).await.is_none());
    }
}

//! `nostr+walletconnect://` URI parsing and construction.

use thiserror::Error;

const SCHEME: &str = "nostr+walletconnect://";

#[derive(Debug, Error)]
pub enum UriError {
    #[error("URI does not start with `nostr+walletconnect://`")]
    WrongScheme,
    #[error("URI is missing query parameters")]
    MissingQuery,
    #[error("wallet pubkey is not lowercase hex")]
    BadPubkey,
    #[error("URI is missing the `relay` parameter")]
    MissingRelay,
    #[error("URI is missing the `secret` parameter")]
    MissingSecret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NwcUri {
    pub wallet_pubkey: String,
    pub relay: String,
    pub secret: String,
}

impl NwcUri {
    pub fn construct(wallet_pubkey: &str, relay: &str, secret: &str) -> String {
        format!(
            "{SCHEME}{}?relay={}&secret={}",
            wallet_pubkey.to_lowercase(),
            urlencoding::encode(relay),
            secret.to_lowercase(),
        )
    }

    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let rest = uri.strip_prefix(SCHEME).ok_or(UriError::WrongScheme)?;
        let mut parts = rest.splitn(2, '?');
        let wallet_pubkey = parts.next().unwrap_or("").to_lowercase();
        let query = parts.next().ok_or(UriError::MissingQuery)?;

        if wallet_pubkey.len() != 64 || !wallet_pubkey.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(UriError::BadPubkey);
        }

        let mut relay = None;
        let mut secret = None;
        for param in query.split('&') {
            let mut kv = param.splitn(2, '=');
            let key = kv.next().unwrap_or("");
            let value = kv.next().unwrap_or("");
            match key {
                "relay" => relay = Some(urlencoding::decode(value).map_err(|_| UriError::MissingRelay)?.into_owned()),
                "secret" => secret = Some(value.to_lowercase()),
                _ => {}
            }
        }

        Ok(NwcUri {
            wallet_pubkey,
            relay: relay.ok_or(UriError::MissingRelay)?,
            secret: secret.ok_or(UriError::MissingSecret)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_then_parse_round_trips() {
        let pubkey = "a".repeat(64);
        let secret = "b".repeat(64);
        let relay = "wss://relay.example.com/v1";

        let uri = NwcUri::construct(&pubkey, relay, &secret);
        let parsed = NwcUri::parse(&uri).unwrap();

        assert_eq!(parsed.wallet_pubkey, pubkey);
        assert_eq!(parsed.secret, secret);
        assert_eq!(parsed.relay, relay);
    }

    #[test]
    fn rejects_wrong_scheme() {
        let err = NwcUri::parse("http://not-nwc").unwrap_err();
        assert!(matches!(err, UriError::WrongScheme));
    }

    #[test]
    fn rejects_missing_secret() {
        let pubkey = "a".repeat(64);
        let uri = format!("nostr+walletconnect://{pubkey}?relay=wss%3A%2F%2Fr");
        assert!(matches!(NwcUri::parse(&uri), Err(UriError::MissingSecret)));
    }

    #[test]
    fn ignores_unknown_query_params() {
        let pubkey = "a".repeat(64);
        let secret = "b".repeat(64);
        let uri = format!("nostr+walletconnect://{pubkey}?relay=wss%3A%2F%2Fr&secret={secret}&lud16=foo%40bar.com");
        let parsed = NwcUri::parse(&uri).unwrap();
        assert_eq!(parsed.secret, secret);
    }

    proptest::proptest! {
        #[test]
        fn round_trips_for_hex_pubkey_and_secret(
            pubkey_byte in 0u8..=255,
            secret_byte in 0u8..=255,
            relay_host in "[a-z]{3,12}",
        ) {
            let pubkey = hex::encode([pubkey_byte; 32]);
            let secret = hex::encode([secret_byte; 32]);
            let relay = format!("wss://{relay_host}.example.com");

            let uri = NwcUri::construct(&pubkey, &relay, &secret);
            let parsed = NwcUri::parse(&uri).unwrap();

            proptest::prop_assert_eq!(parsed.wallet_pubkey, pubkey);
            proptest::prop_assert_eq!(parsed.secret, secret);
            proptest::prop_assert_eq!(parsed.relay, relay);
        }
    }
}

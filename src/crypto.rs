//! secp256k1 key handling, BIP-340 Schnorr signing, and NIP-04's
//! ECDH + AES-256-CBC payload cipher.
//!
//! The ECDH variant here is NIP-04's, not a general-purpose KDF: the raw
//! x-coordinate of the shared point is used directly as the AES-256 key,
//! with no hashing step. Do not reuse `shared_secret` for NIP-44.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use secp256k1::ecdh;
use secp256k1::schnorr;
use secp256k1::{Keypair, Message, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key: {0}")]
    InvalidKey(#[from] secp256k1::Error),
    #[error("NIP-04 payload is missing the `?iv=` delimiter")]
    MalformedPayload,
    #[error("NIP-04 payload is not valid base64: {0}")]
    BadBase64(#[from] base64::DecodeError),
    #[error("ciphertext length is not a multiple of the AES block size")]
    BadLength,
    #[error("PKCS#7 padding is invalid")]
    BadPadding,
    #[error("decrypted payload is not valid UTF-8")]
    BadUtf8(#[from] std::string::FromUtf8Error),
}

/// The x-only (BIP-340) public key for a 32-byte secret key, as lowercase hex.
pub fn xonly_pubkey_hex(secret_key: &SecretKey) -> String {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let (xonly, _parity) = XOnlyPublicKey::from_keypair(&keypair);
    hex::encode(xonly.serialize())
}

/// Parse a 32-byte hex secret key.
pub fn secret_key_from_hex(hex_str: &str) -> Result<SecretKey, CryptoError> {
    Ok(SecretKey::from_slice(&hex::decode(hex_str).map_err(|_| {
        CryptoError::InvalidKey(secp256k1::Error::InvalidSecretKey)
    })?)?)
}

/// Generate a fresh random 32-byte secret key.
pub fn generate_secret_key() -> SecretKey {
    let secp = Secp256k1::signing_only();
    let (sk, _pk) = secp.generate_keypair(&mut rand::thread_rng());
    sk
}

/// NIP-04's ECDH: interpret `peer_xonly` as a compressed point with an
/// assumed-even leading byte, multiply by `local_secret`, and return the
/// raw 32-byte x-coordinate (unhashed) as the AES-256 key.
pub fn shared_secret(local_secret: &SecretKey, peer_xonly: &XOnlyPublicKey) -> [u8; 32] {
    let peer_point = PublicKey::from_x_only_public_key(*peer_xonly, secp256k1::Parity::Even);
    let xy = ecdh::shared_secret_point(&peer_point, local_secret);
    let mut x = [0u8; 32];
    x.copy_from_slice(&xy[..32]);
    x
}

/// AES-256-CBC encrypt with PKCS#7 padding and a fresh random IV.
/// Returns `(ciphertext, iv)`.
pub fn aes_encrypt(key: &[u8; 32], plaintext: &[u8]) -> (Vec<u8>, [u8; 16]) {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut buf = vec![0u8; plaintext.len() + 16];
    buf[..plaintext.len()].copy_from_slice(plaintext);
    let ct_len = Aes256CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
        .expect("buffer sized for one block of padding")
        .len();
    buf.truncate(ct_len);
    (buf, iv)
}

/// AES-256-CBC decrypt with PKCS#7 unpadding.
pub fn aes_decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CryptoError::BadLength);
    }
    let mut buf = ciphertext.to_vec();
    let plaintext = Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| CryptoError::BadPadding)?;
    Ok(plaintext.to_vec())
}

/// BIP-340 Schnorr-sign a 32-byte message hash with nil aux-rand.
pub fn sign_schnorr(secret_key: &SecretKey, message_hash: &[u8; 32]) -> schnorr::Signature {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let msg = Message::from_digest(*message_hash);
    secp.sign_schnorr_with_aux_rand(&msg, &keypair, &[0u8; 32])
}

/// Verify a BIP-340 Schnorr signature over a 32-byte message hash.
pub fn verify_schnorr(
    pubkey: &XOnlyPublicKey,
    message_hash: &[u8; 32],
    sig: &schnorr::Signature,
) -> bool {
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest(*message_hash);
    secp.verify_schnorr(sig, &msg, pubkey).is_ok()
}

/// sha256 of arbitrary bytes, used for the Nostr event id.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_is_symmetric() {
        let a = generate_secret_key();
        let b = generate_secret_key();
        let secp = Secp256k1::signing_only();
        let a_xonly = XOnlyPublicKey::from_keypair(&Keypair::from_secret_key(&secp, &a)).0;
        let b_xonly = XOnlyPublicKey::from_keypair(&Keypair::from_secret_key(&secp, &b)).0;

        let from_a = shared_secret(&a, &b_xonly);
        let from_b = shared_secret(&b, &a_xonly);
        assert_eq!(from_a, from_b);
    }

    #[test]
    fn aes_round_trip() {
        let key = [7u8; 32];
        let (ct, iv) = aes_encrypt(&key, b"hello nwc");
        let pt = aes_decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(pt, b"hello nwc");
    }

    #[test]
    fn aes_bad_length_is_rejected() {
        let key = [7u8; 32];
        let iv = [0u8; 16];
        assert!(matches!(aes_decrypt(&key, &iv, &[1, 2, 3]), Err(CryptoError::BadLength)));
    }

    #[test]
    fn schnorr_round_trip() {
        let sk = generate_secret_key();
        let secp = Secp256k1::signing_only();
        let xonly = XOnlyPublicKey::from_keypair(&Keypair::from_secret_key(&secp, &sk)).0;
        let msg = [3u8; 32];
        let sig = sign_schnorr(&sk, &msg);
        assert!(verify_schnorr(&xonly, &msg, &sig));

        let mut tampered = msg;
        tampered[0] ^= 1;
        assert!(!verify_schnorr(&xonly, &tampered, &sig));
    }
}

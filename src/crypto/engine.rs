use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::ProxyError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;

/// OAuth `state` values older than this are rejected on callback.
pub const STATE_MAX_AGE_SECS: i64 = 600;

fn new_hmac(key: &[u8]) -> Result<HmacSha256, ProxyError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| ProxyError::Crypto(format!("HMAC init failed: {e}")))
}

fn decode_key(name: &str, b64: &str) -> Result<Vec<u8>, ProxyError> {
    let key = STANDARD
        .decode(b64)
        .map_err(|e| ProxyError::Crypto(format!("Invalid {name} base64: {e}")))?;

    if key.len() != 32 {
        return Err(ProxyError::Crypto(format!(
            "{name} must be 32 bytes, got {}",
            key.len()
        )));
    }

    Ok(key)
}

/// Seals tokens at rest (AES-256-GCM) and signs the OAuth `state` parameter (HMAC-SHA256).
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    hmac_key: Vec<u8>,
}

impl CryptoEngine {
    /// Create a new CryptoEngine from base64-encoded 32-byte keys.
    pub fn new(master_key_b64: &str, hmac_secret_b64: &str) -> Result<Self, ProxyError> {
        let master_key = decode_key("MASTER_KEY", master_key_b64)?;
        let hmac_key = decode_key("HMAC_SECRET", hmac_secret_b64)?;

        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| ProxyError::Crypto(format!("Failed to init AES cipher: {e}")))?;

        Ok(Self { cipher, hmac_key })
    }

    /// Seal a token. Returns base64(nonce || ciphertext).
    pub fn seal(&self, plaintext: &str) -> Result<String, ProxyError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| ProxyError::Crypto(format!("Encryption failed: {e}")))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(&sealed))
    }

    /// Open a value produced by [`CryptoEngine::seal`].
    pub fn open(&self, sealed_b64: &str) -> Result<String, ProxyError> {
        let sealed = STANDARD
            .decode(sealed_b64)
            .map_err(|e| ProxyError::Crypto(format!("Invalid base64: {e}")))?;

        if sealed.len() < NONCE_LEN {
            return Err(ProxyError::Crypto("Ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| ProxyError::Crypto(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| ProxyError::Crypto(format!("Invalid UTF-8 after decrypt: {e}")))
    }

    /// Mint a signed `state` for the authorize redirect.
    ///
    /// Payload is `<random>:<issued_at>`, encoded as base64url(hmac || payload).
    pub fn issue_state(&self, issued_at: i64) -> Result<String, ProxyError> {
        let mut random = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random);
        let payload = format!("{}:{issued_at}", URL_SAFE_NO_PAD.encode(random));

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());

        Ok(URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Check a `state` echoed back by the upstream: signature first, then age.
    pub fn verify_state(&self, signed: &str, now: i64) -> Result<(), ProxyError> {
        let combined = URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| ProxyError::InvalidState)?;

        if combined.len() < MAC_LEN {
            return Err(ProxyError::InvalidState);
        }

        let (signature, payload) = combined.split_at(MAC_LEN);

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| ProxyError::InvalidState)?;

        let payload = std::str::from_utf8(payload).map_err(|_| ProxyError::InvalidState)?;
        let issued_at: i64 = payload
            .rsplit_once(':')
            .and_then(|(_, ts)| ts.parse().ok())
            .ok_or(ProxyError::InvalidState)?;

        if now - issued_at > STATE_MAX_AGE_SECS || issued_at > now {
            return Err(ProxyError::InvalidState);
        }

        Ok(())
    }
}

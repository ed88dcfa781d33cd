//! Crypto Core: deterministic hashing and signing of audit events.
//!
//! Hashing is always local (SHA-256 over the sorted critical-field
//! projection). Signing is pluggable: a local HMAC-SHA256 keyring or a
//! remote KMS reached through the [`KmsClient`] trait, so the remote-KMS
//! mode and the local mode share one call site.

use crate::error::{Error, Result};
use crate::model::AuditEvent;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

/// Constant-time byte comparison (no early return on first mismatch).
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub const HMAC_ALGORITHM: &str = "HMAC-SHA256";

/// Recompute the deterministic hash over an event's critical field set.
pub fn hash_event(event: &AuditEvent) -> String {
    let projection = event.critical_fields();
    let canonical = canonicalize(&projection);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison against a previously recorded hash.
pub fn verify_hash(event: &AuditEvent, expected: &str) -> bool {
    let actual = hash_event(event);
    constant_time_eq(actual.as_bytes(), expected.as_bytes())
}

/// Join sorted `"key":value` pairs with `|`, matching the projection's own
/// key order (the projection is already built with sorted keys via
/// `serde_json::json!`, but `Value::Object` does not guarantee iteration
/// order is preserved across implementations, so we sort explicitly here).
fn canonicalize(value: &serde_json::Value) -> String {
    let obj = value.as_object().expect("critical_fields is always an object");
    let mut keys: Vec<&String> = obj.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{}:{}", k, obj[k]))
        .collect::<Vec<_>>()
        .join("|")
}

/// A signature envelope: the algorithm tag and key identifier travel with
/// the signature so verification can pick the right key out of a rotating
/// keyring without trial-and-error on every call.
#[derive(Debug, Clone)]
pub struct Signature {
    pub value: String,
    pub algorithm: String,
    pub key_id: Option<String>,
}

/// Symmetric signing keyring for local HMAC mode. Supports rotation: a
/// designated "current" key signs, verification tries the hinted key, then
/// the current key, then falls back through every key in the ring.
#[derive(Clone)]
pub struct HmacKeyring {
    keys: HashMap<String, Vec<u8>>,
    current: String,
}

impl HmacKeyring {
    pub fn single(key_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        let key_id = key_id.into();
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), secret.into());
        Self { keys, current: key_id }
    }

    pub fn with_keys(keys: HashMap<String, Vec<u8>>, current: impl Into<String>) -> Result<Self> {
        let current = current.into();
        if !keys.contains_key(&current) {
            return Err(Error::internal("current HMAC key id not present in keyring"));
        }
        Ok(Self { keys, current })
    }

    fn sign(&self, data: &[u8]) -> Result<Signature> {
        let secret = self.keys.get(&self.current).ok_or_else(|| {
            Error::crypto_unavailable("current HMAC signing key missing from keyring")
        })?;
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| Error::crypto_unavailable(format!("invalid HMAC key: {e}")))?;
        mac.update(data);
        let value = hex::encode(mac.finalize().into_bytes());
        Ok(Signature {
            value,
            algorithm: HMAC_ALGORITHM.to_string(),
            key_id: Some(self.current.clone()),
        })
    }

    fn verify(&self, data: &[u8], signature: &str, hint: Option<&str>) -> bool {
        let mut order: Vec<&String> = Vec::new();
        if let Some(hint) = hint {
            if let Some(k) = self.keys.keys().find(|k| k.as_str() == hint) {
                order.push(k);
            }
        }
        if !order.iter().any(|k| **k == self.current) {
            order.push(&self.current);
        }
        for k in self.keys.keys() {
            if !order.contains(&k) {
                order.push(k);
            }
        }

        for key_id in order {
            let secret = &self.keys[key_id];
            let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                continue;
            };
            mac.update(data);
            if mac.verify_slice(&hex_decode(signature)).is_ok() {
                return true;
            }
        }
        false
    }
}

fn hex_decode(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap_or_default()
}

/// Boundary trait for remote key-management signing, generalizing
/// `EncryptionService`'s local cipher into an external collaborator.
#[async_trait]
pub trait KmsClient: Send + Sync {
    async fn sign(&self, data: &[u8]) -> Result<Signature>;
    async fn verify(&self, data: &[u8], signature: &str, algorithm_hint: Option<&str>) -> Result<bool>;
    async fn encrypt_data_key(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    async fn decrypt_data_key(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// In-process KMS backed by AES-256-GCM, used for local-secret deployments
/// and tests. Stores ciphertext as nonce-prepended bytes.
pub struct LocalKms {
    cipher: Aes256Gcm,
    keyring: HmacKeyring,
}

impl LocalKms {
    pub fn new(aes_key: &[u8], keyring: HmacKeyring) -> Result<Self> {
        if aes_key.len() != 32 {
            return Err(Error::crypto_unavailable("local KMS key must be exactly 32 bytes"));
        }
        let key = Key::<Aes256Gcm>::from_slice(aes_key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
            keyring,
        })
    }
}

#[async_trait]
impl KmsClient for LocalKms {
    async fn sign(&self, data: &[u8]) -> Result<Signature> {
        self.keyring.sign(data)
    }

    async fn verify(&self, data: &[u8], signature: &str, algorithm_hint: Option<&str>) -> Result<bool> {
        Ok(self.keyring.verify(data, signature, algorithm_hint))
    }

    async fn encrypt_data_key(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::crypto_unavailable(format!("encryption failed: {e}")))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn decrypt_data_key(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 12 {
            return Err(Error::crypto_mismatch("ciphertext too short to contain a nonce"));
        }
        let (nonce_bytes, encrypted) = ciphertext.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, encrypted)
            .map_err(|e| Error::crypto_mismatch(format!("decryption failed: {e}")))
    }
}

/// Crypto Core facade used by the producer and processor.
pub struct CryptoCore {
    kms: Box<dyn KmsClient>,
    signature_required: bool,
}

impl CryptoCore {
    pub fn new(kms: Box<dyn KmsClient>, signature_required: bool) -> Self {
        Self { kms, signature_required }
    }

    pub fn hash(&self, event: &AuditEvent) -> String {
        hash_event(event)
    }

    pub fn verify_hash(&self, event: &AuditEvent, expected: &str) -> bool {
        verify_hash(event, expected)
    }

    /// Sign the event's hash. Degrades gracefully on KMS failure unless a
    /// signature is mandated, per §4.1.
    pub async fn sign(&self, hash: &str) -> Result<Option<Signature>> {
        match self.kms.sign(hash.as_bytes()).await {
            Ok(sig) => Ok(Some(sig)),
            Err(e) if self.signature_required => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "signature generation failed; proceeding without signature");
                Ok(None)
            }
        }
    }

    pub async fn verify_signature(
        &self,
        hash: &str,
        signature: &str,
        algorithm_hint: Option<&str>,
    ) -> Result<bool> {
        self.kms.verify(hash.as_bytes(), signature, algorithm_hint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventStatus};

    fn keyring() -> HmacKeyring {
        HmacKeyring::single("k1", b"0123456789abcdef0123456789abcdef".to_vec())
    }

    #[test]
    fn hash_is_deterministic() {
        let event = AuditEvent::builder("auth.login.success")
            .status(EventStatus::Success)
            .principal_id("user-1")
            .build();
        assert_eq!(hash_event(&event), hash_event(&event));
    }

    #[test]
    fn hash_changes_with_critical_field() {
        let a = AuditEvent::builder("auth.login.success").principal_id("user-1").build();
        let b = AuditEvent::builder("auth.login.success").principal_id("user-2").build();
        assert_ne!(hash_event(&a), hash_event(&b));
    }

    #[tokio::test]
    async fn hmac_sign_then_verify_roundtrips() {
        let ring = keyring();
        let sig = ring.sign(b"hash-value").unwrap();
        assert!(ring.verify(b"hash-value", &sig.value, Some("k1")));
    }

    #[tokio::test]
    async fn hmac_verify_fails_on_tamper() {
        let ring = keyring();
        let sig = ring.sign(b"hash-value").unwrap();
        assert!(!ring.verify(b"different-hash", &sig.value, Some("k1")));
    }

    #[tokio::test]
    async fn local_kms_encrypt_decrypt_roundtrip() {
        let kms = LocalKms::new(b"01234567890123456789012345678901", keyring()).unwrap();
        let ciphertext = kms.encrypt_data_key(b"original-id").await.unwrap();
        let plaintext = kms.decrypt_data_key(&ciphertext).await.unwrap();
        assert_eq!(plaintext, b"original-id");
    }
}

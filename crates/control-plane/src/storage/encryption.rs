// Credential vault: AES-256-GCM encryption of provider API keys.
//
// Each secret is stored as a bundle of three base64 columns: ciphertext,
// 96-bit nonce (iv) and 128-bit authentication tag. A fresh nonce is drawn
// for every encryption. The vault performs no I/O.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const DEFAULT_KEY_ID: &str = "kek-v1";
const SHORT_KEY_MASK: &str = "••••••••";
const MASK_MIN_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Invalid credential bundle: {0}")]
    InvalidBundle(String),

    #[error("Failed to decrypt credential")]
    DecryptionFailure,

    #[error("Failed to encrypt credential")]
    EncryptionFailure,
}

/// Encrypted secret as stored in the provider row (base64 fields)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

impl std::fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("ciphertext", &"[REDACTED]")
            .field("iv", &self.iv)
            .finish()
    }
}

/// Where the vault key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VaultKeyMode {
    /// SECRETS_ENCRYPTION_KEY
    Configured,
    /// Random per-process key; stored credentials become unreadable after restart
    Ephemeral,
}

impl std::fmt::Display for VaultKeyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultKeyMode::Configured => write!(f, "configured"),
            VaultKeyMode::Ephemeral => write!(f, "ephemeral"),
        }
    }
}

/// Symmetric vault for provider credentials.
/// Cheap to clone, safe for concurrent use.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Arc<Aes256Gcm>,
    key_id: String,
    fingerprint: String,
    mode: VaultKeyMode,
}

impl CredentialVault {
    /// Build from `SECRETS_ENCRYPTION_KEY`-style input.
    ///
    /// `None` or a blank value selects an ephemeral key.
    pub fn from_config(key: Option<&str>) -> Result<Self, VaultError> {
        match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Self::from_key_string(key),
            None => {
                let vault = Self::ephemeral();
                tracing::warn!(
                    fingerprint = %vault.fingerprint,
                    "SECRETS_ENCRYPTION_KEY is not set. Using an EPHEMERAL vault key: \
                     provider API keys stored now cannot be decrypted after a restart. \
                     Set SECRETS_ENCRYPTION_KEY (base64 of 32 bytes) for persistent storage."
                );
                Ok(vault)
            }
        }
    }

    /// Parse `[key_id:]base64_key`
    pub fn from_key_string(raw: &str) -> Result<Self, VaultError> {
        let (key_id, encoded) = match raw.split_once(':') {
            Some((id, key)) if !id.is_empty() => (id.to_string(), key),
            _ => (DEFAULT_KEY_ID.to_string(), raw),
        };

        let key_bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| VaultError::InvalidKey("key is not valid base64".to_string()))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(VaultError::InvalidKey(format!(
                "key must be {} bytes, got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            )));
        }

        Self::from_bytes(key_id, &key_bytes, VaultKeyMode::Configured)
    }

    /// Vault with a random key that lives only as long as the process
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self {
            cipher: Arc::new(cipher),
            key_id: "ephemeral".to_string(),
            fingerprint: fingerprint(&key),
            mode: VaultKeyMode::Ephemeral,
        }
    }

    fn from_bytes(key_id: String, key: &[u8], mode: VaultKeyMode) -> Result<Self, VaultError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| VaultError::InvalidKey("key has the wrong length".to_string()))?;
        Ok(Self {
            cipher: Arc::new(cipher),
            key_id,
            fingerprint: fingerprint(key),
            mode,
        })
    }

    pub fn mode(&self) -> VaultKeyMode {
        self.mode
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Short SHA-256 fingerprint of the key, safe to log
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypt a secret with a fresh random nonce
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailure)?;

        // aes-gcm appends the tag to the ciphertext
        let split = sealed.len() - TAG_SIZE;
        let (ciphertext, tag) = sealed.split_at(split);

        Ok(EncryptedSecret {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(nonce_bytes),
            auth_tag: BASE64.encode(tag),
        })
    }

    /// Decrypt and authenticate a bundle. Never returns partial plaintext.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, VaultError> {
        let decode = |field: &str, value: &str| {
            BASE64
                .decode(value)
                .map_err(|_| VaultError::InvalidBundle(format!("{} is not valid base64", field)))
        };

        let ciphertext = decode("ciphertext", &secret.ciphertext)?;
        let iv = decode("iv", &secret.iv)?;
        let tag = decode("auth_tag", &secret.auth_tag)?;

        if iv.len() != NONCE_SIZE {
            return Err(VaultError::InvalidBundle(format!(
                "iv must be {} bytes, got {}",
                NONCE_SIZE,
                iv.len()
            )));
        }
        if tag.len() != TAG_SIZE {
            return Err(VaultError::InvalidBundle(format!(
                "auth_tag must be {} bytes, got {}",
                TAG_SIZE,
                tag.len()
            )));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| VaultError::DecryptionFailure)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::DecryptionFailure)
    }

    /// Display-safe hint for a key
    pub fn mask(plaintext: &str) -> String {
        mask(plaintext)
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("key_id", &self.key_id)
            .field("fingerprint", &self.fingerprint)
            .field("mode", &self.mode)
            .finish()
    }
}

/// `sk-a...wxyz` for keys of 12+ characters, a fixed bullet string otherwise
pub fn mask(plaintext: &str) -> String {
    let chars: Vec<char> = plaintext.chars().collect();
    if chars.len() < MASK_MIN_LEN {
        return SHORT_KEY_MASK.to_string();
    }
    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", prefix, suffix)
}

fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(&digest[..8])
}

/// Generate a new random key in `kek-v1:base64` form
pub fn generate_encryption_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    format!("{}:{}", DEFAULT_KEY_ID, BASE64.encode(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::from_key_string(&generate_encryption_key()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let vault = vault();
        let secret = vault.encrypt("sk-test-api-key-12345").unwrap();
        assert_eq!(vault.decrypt(&secret).unwrap(), "sk-test-api-key-12345");
        assert_eq!(vault.mode(), VaultKeyMode::Configured);
        assert_eq!(vault.key_id(), "kek-v1");
    }

    #[test]
    fn test_bundle_shape() {
        let secret = vault().encrypt("sk-abc").unwrap();
        assert_eq!(BASE64.decode(&secret.iv).unwrap().len(), NONCE_SIZE);
        assert_eq!(BASE64.decode(&secret.auth_tag).unwrap().len(), TAG_SIZE);
        assert_eq!(BASE64.decode(&secret.ciphertext).unwrap().len(), 6);
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let vault = vault();
        let a = vault.encrypt("same").unwrap();
        let b = vault.encrypt("same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let vault = vault();
        let mut secret = vault.encrypt("sk-live-abcdef").unwrap();
        let mut bytes = BASE64.decode(&secret.ciphertext).unwrap();
        bytes[0] ^= 0x01;
        secret.ciphertext = BASE64.encode(bytes);
        assert!(matches!(
            vault.decrypt(&secret),
            Err(VaultError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_tampered_iv_fails() {
        let vault = vault();
        let mut secret = vault.encrypt("sk-live-abcdef").unwrap();
        let mut bytes = BASE64.decode(&secret.iv).unwrap();
        bytes[11] ^= 0x80;
        secret.iv = BASE64.encode(bytes);
        assert!(vault.decrypt(&secret).is_err());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let vault = vault();
        let mut secret = vault.encrypt("sk-live-abcdef").unwrap();
        let mut bytes = BASE64.decode(&secret.auth_tag).unwrap();
        bytes[0] ^= 0xff;
        secret.auth_tag = BASE64.encode(bytes);
        assert!(matches!(
            vault.decrypt(&secret),
            Err(VaultError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_malformed_bundle_rejected() {
        let vault = vault();
        let good = vault.encrypt("sk-live-abcdef").unwrap();

        let bad_base64 = EncryptedSecret {
            ciphertext: "!!!".to_string(),
            ..good.clone()
        };
        assert!(matches!(
            vault.decrypt(&bad_base64),
            Err(VaultError::InvalidBundle(_))
        ));

        let short_iv = EncryptedSecret {
            iv: BASE64.encode([0u8; 8]),
            ..good.clone()
        };
        assert!(matches!(
            vault.decrypt(&short_iv),
            Err(VaultError::InvalidBundle(_))
        ));

        let short_tag = EncryptedSecret {
            auth_tag: BASE64.encode([0u8; 4]),
            ..good
        };
        assert!(matches!(
            vault.decrypt(&short_tag),
            Err(VaultError::InvalidBundle(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let secret = vault().encrypt("sk-live-abcdef").unwrap();
        assert!(vault().decrypt(&secret).is_err());
    }

    #[test]
    fn test_key_formats() {
        let raw = BASE64.encode([7u8; KEY_SIZE]);
        let plain = CredentialVault::from_key_string(&raw).unwrap();
        let prefixed = CredentialVault::from_key_string(&format!("kek-v2:{}", raw)).unwrap();
        assert_eq!(plain.key_id(), "kek-v1");
        assert_eq!(prefixed.key_id(), "kek-v2");
        assert_eq!(plain.fingerprint(), prefixed.fingerprint());

        // Same key material decrypts across both
        let secret = plain.encrypt("x").unwrap();
        assert_eq!(prefixed.decrypt(&secret).unwrap(), "x");
    }

    #[test]
    fn test_invalid_keys_rejected() {
        assert!(matches!(
            CredentialVault::from_key_string("not base64 at all!"),
            Err(VaultError::InvalidKey(_))
        ));
        assert!(matches!(
            CredentialVault::from_key_string(&BASE64.encode([1u8; 16])),
            Err(VaultError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_ephemeral_mode() {
        let vault = CredentialVault::from_config(None).unwrap();
        assert_eq!(vault.mode(), VaultKeyMode::Ephemeral);
        let blank = CredentialVault::from_config(Some("   ")).unwrap();
        assert_eq!(blank.mode(), VaultKeyMode::Ephemeral);

        let secret = vault.encrypt("sk-temp").unwrap();
        assert_eq!(vault.decrypt(&secret).unwrap(), "sk-temp");
        assert!(blank.decrypt(&secret).is_err());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("sk-proj-1234567890abcd"), "sk-p...abcd");
        assert_eq!(mask("123456789012"), "1234...9012");
        assert_eq!(mask("short-key"), SHORT_KEY_MASK);
        assert_eq!(mask(""), SHORT_KEY_MASK);
        assert_eq!(mask("sk-proj-1234567890abcd"), mask("sk-proj-1234567890abcd"));
    }

    #[test]
    fn test_short_mask_reveals_nothing() {
        let key = "abcdefghijk";
        let masked = mask(key);
        assert!(key.chars().all(|c| !masked.contains(c)));
    }

    #[test]
    fn test_debug_redacts() {
        let vault = vault();
        let secret = vault.encrypt("sk-live-abcdef").unwrap();
        let debug = format!("{:?}", secret);
        assert!(!debug.contains(&secret.ciphertext));
    }
}

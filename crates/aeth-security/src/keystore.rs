//! Where the AES-256-GCM master key comes from. A 64-hex-character key from
//! config/env in production; a random per-process key in dev mode, with a
//! loud log warning — never silent, per §4.7.

use anyhow::{anyhow, Result};
use tracing::warn;
use zeroize::Zeroizing;

pub trait KeyProvider: Send + Sync {
    fn key(&self) -> Zeroizing<Vec<u8>>;
}

pub struct EnvKeyProvider {
    key: Zeroizing<Vec<u8>>,
}

impl EnvKeyProvider {
    pub fn from_hex(hex: &str) -> Result<Self> {
        let key = hex_decode(hex)?;
        if key.len() != 32 {
            return Err(anyhow!(
                "encryption key must decode to 32 bytes, got {}",
                key.len()
            ));
        }
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }
}

impl KeyProvider for EnvKeyProvider {
    fn key(&self) -> Zeroizing<Vec<u8>> {
        self.key.clone()
    }
}

/// Dev-mode fallback: one random 32-byte key generated at process start.
/// Secrets encrypted under it do not survive a restart.
pub struct RandomDevKeyProvider {
    key: Zeroizing<Vec<u8>>,
}

impl RandomDevKeyProvider {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        warn!("AETH_SECRETS_ENCRYPTION_KEY_HEX not set: generated a random dev-mode key; secrets will not survive a restart");
        Self {
            key: Zeroizing::new(bytes),
        }
    }
}

impl KeyProvider for RandomDevKeyProvider {
    fn key(&self) -> Zeroizing<Vec<u8>> {
        self.key.clone()
    }
}

/// Resolves the configured key, falling back to a random dev key with a
/// warning when `encryption_key_hex` is absent.
pub fn default_provider(encryption_key_hex: Option<&str>) -> Result<Box<dyn KeyProvider>> {
    match encryption_key_hex {
        Some(hex) => Ok(Box::new(EnvKeyProvider::from_hex(hex)?)),
        None => Ok(Box::new(RandomDevKeyProvider::generate())),
    }
}

pub(crate) fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(anyhow!("hex string has odd length"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| anyhow!("invalid hex at {i}: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hex_accepts_a_valid_64_char_key() {
        let hex = "a".repeat(64);
        let provider = EnvKeyProvider::from_hex(&hex).unwrap();
        assert_eq!(provider.key().len(), 32);
    }

    #[test]
    fn from_hex_rejects_the_wrong_length() {
        let err = EnvKeyProvider::from_hex("abcd").unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn default_provider_falls_back_to_a_random_key_when_absent() {
        let a = default_provider(None).unwrap();
        let b = default_provider(None).unwrap();
        assert_ne!(a.key().to_vec(), b.key().to_vec());
    }

    #[test]
    fn default_provider_uses_the_configured_key_when_present() {
        let hex = "b".repeat(64);
        let provider = default_provider(Some(&hex)).unwrap();
        assert_eq!(provider.key().len(), 32);
    }
}

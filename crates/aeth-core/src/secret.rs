//! Encrypted credential metadata (§3, §4.7). The plaintext itself never
//! lives here — only ciphertext, nonce, and a key identifier; `aeth-security`
//! owns encrypt/decrypt.

use crate::{SecretId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    ApiKey,
    Token,
    SshKey,
    Password,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: SecretId,
    pub workspace_id: Option<WorkspaceId>,
    pub name: String,
    pub secret_type: SecretType,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    pub key_id: String,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }

    mod hex {
        pub fn encode(bytes: &[u8]) -> String {
            bytes.iter().map(|b| format!("{b:02x}")).collect()
        }

        pub fn decode(s: String) -> Result<Vec<u8>, String> {
            if s.len() % 2 != 0 {
                return Err("odd-length hex string".into());
            }
            (0..s.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_metadata_serializes_ciphertext_and_nonce_as_hex() {
        let secret = Secret {
            id: SecretId::new(),
            workspace_id: None,
            name: "github-token".into(),
            secret_type: SecretType::Token,
            ciphertext: vec![0xde, 0xad, 0xbe, 0xef],
            nonce: vec![0u8; 12],
            key_id: "default".into(),
        };
        let json = serde_json::to_string(&secret).unwrap();
        assert!(json.contains("\"deadbeef\""));
        let back: Secret = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ciphertext, secret.ciphertext);
        assert_eq!(back.nonce.len(), 12);
    }
}

//! AES-256-GCM secret envelope encryption. One fresh 12-byte nonce per
//! secret, stored beside the ciphertext (§4.7).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Result};
use rand::RngCore;
use zeroize::Zeroizing;

pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 12],
}

pub fn encrypt(plaintext: &[u8], key: &Zeroizing<Vec<u8>>) -> Result<EncryptedSecret> {
    if key.len() != 32 {
        return Err(anyhow!("encryption key must be 32 bytes"));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow!("encryption failed: {e}"))?;
    Ok(EncryptedSecret {
        ciphertext,
        nonce: nonce_bytes,
    })
}

pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &Zeroizing<Vec<u8>>) -> Result<Zeroizing<Vec<u8>>> {
    if key.len() != 32 {
        return Err(anyhow!("encryption key must be 32 bytes"));
    }
    if nonce.len() != 12 {
        return Err(anyhow!("nonce must be 12 bytes"));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("decryption failed: {e}"))?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Zeroizing<Vec<u8>> {
        Zeroizing::new(vec![7u8; 32])
    }

    #[test]
    fn decrypt_of_encrypt_returns_the_original_plaintext() {
        let plaintext = b"super-secret-token-value";
        let enc = encrypt(plaintext, &key()).unwrap();
        let dec = decrypt(&enc.ciphertext, &enc.nonce, &key()).unwrap();
        assert_eq!(&dec[..], plaintext);
    }

    #[test]
    fn two_encryptions_of_the_same_plaintext_use_independent_nonces() {
        let plaintext = b"same-value";
        let a = encrypt(plaintext, &key()).unwrap();
        let b = encrypt(plaintext, &key()).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn decrypting_with_the_wrong_key_fails() {
        let enc = encrypt(b"value", &key()).unwrap();
        let wrong_key = Zeroizing::new(vec![9u8; 32]);
        assert!(decrypt(&enc.ciphertext, &enc.nonce, &wrong_key).is_err());
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let enc = encrypt(b"", &key()).unwrap();
        let dec = decrypt(&enc.ciphertext, &enc.nonce, &key()).unwrap();
        assert!(dec.is_empty());
    }
}

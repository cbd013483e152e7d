//! Secret encryption and execution-output redaction (§4.4, §4.7).

pub mod crypto;
pub mod keystore;
pub mod redact;

pub use crypto::{decrypt, encrypt, EncryptedSecret};
pub use keystore::{default_provider, EnvKeyProvider, KeyProvider, RandomDevKeyProvider};
pub use redact::Redactor;

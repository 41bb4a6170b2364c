//! Summarizer credential handling: key storage backends and the
//! per-source resolver.

pub mod backends;
pub mod crypto;
pub mod error;
pub mod resolver;

pub use backends::{backend_for_ref, BackendConfig, EncryptedFileBackend, EnvBackend, KeyBackend, VaultBackend};
pub use crypto::SecretCipher;
pub use error::{KeyError, Result};
pub use resolver::{ApiKeyResolver, KeySource, ResolvedKey, ServerKeyConfig};

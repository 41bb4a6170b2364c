//! Import adapters for externally exported chat history.

pub mod error;
pub mod types;
pub mod whatsapp;

pub use error::{ImportError, Result};
pub use types::{
    DateRange, ImportCoverage, ImportFormat, ImportManifest, ImportManifestEntry, ImportResult,
    ImportedMessage,
};
pub use whatsapp::WhatsAppImporter;

//! pinup-transport: HTTP clients for the upload gateway and pinning service

pub mod auth;
pub mod client;
pub mod error;
pub mod health;
pub mod traits;

pub use auth::{credentials_from_config, CredentialProvider, NoCredential, StaticCredential};
pub use client::{HttpTransport, TransportConfig};
pub use error::TransportError;
pub use health::check_health;
pub use traits::{PinTransport, ProgressFn, UploadRequest, UploadTransport};

//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for bearer tokens and OAuth client
//! secrets. `SecretString` implements `Debug` with redaction, so any struct
//! deriving `Debug` that holds one is safe to hand to `tracing`.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = Credentials {
//!     client_id: "tcp_router".to_string(),
//!     client_secret: SecretString::from("router-secret"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("router-secret"));
//! assert_eq!(creds.client_secret.expose_secret(), "router-secret");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

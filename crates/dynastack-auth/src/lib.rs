//! AWS Signature Version 4 for dynastack.
//!
//! The client side signs every request attempt with [`SigV4Signer`] just
//! before dispatch; the test server verifies with [`verify_sigv4`].
//!
//! ```rust
//! use dynastack_auth::{Credentials, SigV4Signer};
//!
//! let signer = SigV4Signer::new(Credentials::new("AKID", "secret"), "us-east-1");
//! let request = http::Request::builder()
//!     .method("POST")
//!     .uri("http://localhost:8000/")
//!     .header("x-amz-target", "DynamoDB_20111205.ListTables")
//!     .body(b"{}".to_vec())
//!     .unwrap();
//! let signed = signer.sign(request).unwrap();
//! assert!(signed.headers().contains_key("authorization"));
//! ```

pub mod canonical;
pub mod credentials;
pub mod error;
pub mod sigv4;

pub use credentials::{CredentialProvider, Credentials, StaticCredentialProvider};
pub use error::AuthError;
pub use sigv4::{AuthResult, SigV4Signer, hash_payload, verify_sigv4};

//! Credential verification and the dual-scheme authentication policy.

pub mod api_key;
pub mod directory;
mod error;
pub mod principal;
pub mod storage;
pub mod token;
pub mod verifier;

mod dual;

pub use dual::{CredentialPolicy, DualAuthenticator, PresentedCredentials, API_KEY_HEADER};
pub use error::Error;
pub use principal::Principal;
pub use verifier::CredentialVerifier;

use thiserror::Error;

/// Credential verification and authentication failures.
///
/// Every variant maps to exactly one HTTP status in the API layer: missing
/// or invalid credentials are 401, live-state rejections (inactive, revoked,
/// permission denied) are 403, and collaborator failures are 500 so an
/// availability problem is never masked as a security rejection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong token type for this endpoint")]
    WrongTokenType,
    #[error("hash error")]
    Hash,
    #[error("signing secret must be at least 32 bytes")]
    WeakSigningSecret,
    #[error("missing credentials")]
    MissingCredentials,
    #[error("credential scheme not allowed for this endpoint")]
    SchemeNotAllowed,
    #[error("principal not found")]
    PrincipalNotFound,
    #[error("principal inactive")]
    PrincipalInactive,
    #[error("api key not found")]
    ApiKeyNotFound,
    #[error("api key revoked")]
    ApiKeyRevoked,
    #[error("api key expired")]
    ApiKeyExpired,
    #[error("permission denied")]
    PermissionDenied,
    #[error("directory unavailable")]
    DirectoryUnavailable,
    #[error("credential store unavailable")]
    StoreUnavailable,
    #[error("random generator failure")]
    Entropy,
}

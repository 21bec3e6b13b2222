//! # Portero (Platform Gateway Auth Core)
//!
//! `portero` gates access to a multi-module internal platform. For every
//! incoming request it decides *who* is making it and *what* they may do,
//! and it protects state-changing requests from forged-request and replay
//! attacks.
//!
//! ## Credentials
//!
//! Two independent credential schemes are accepted and normalized into a
//! single [`auth::Principal`]:
//!
//! - **Bearer tokens** (`Authorization: Bearer <token>`): signed, expiring
//!   tokens whose principal is re-validated against the user directory on
//!   every request. Revocation takes effect on the very next request, never
//!   after token expiry.
//! - **API keys** (`X-API-Key: <key>`): static service credentials stored
//!   only as one-way hashes. A key with no linked directory entry acts as a
//!   privileged service account.
//!
//! ## Authorization
//!
//! Roles map resource names to sets of actions, with `"*"` as a wildcard
//! sentinel for "all resources" or "all actions". Missing or empty
//! permission maps deny everything; the decision engine never fails open.
//!
//! ## Request Protection
//!
//! - **CSRF synchronizer tokens**: high-entropy single-use-capable tokens
//!   required on mutating requests, bounded by a configurable TTL.
//! - **CAPTCHA challenges**: human-verification puzzles consumed on the
//!   first validation attempt regardless of outcome.
//!
//! Both live in ephemeral keyed stores with atomic per-key operations so
//! that concurrent validations of the same token resolve to exactly one
//! winner.

pub mod acl;
pub mod api;
pub mod auth;
pub mod captcha;
pub mod cli;
pub mod clock;
pub mod csrf;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

//! Security helpers for TrailVerse.
//!
//! Provides:
//! - **Fingerprinting**: derive a stable anonymous identity from connection
//!   and browser metadata, without cookies or accounts
//! - **Bearer tokens**: parse `Authorization` headers for the authenticated routes

pub mod bearer;
pub mod fingerprint;

pub use bearer::extract_bearer_token;
pub use fingerprint::{derive_identity, AnonymousIdentity, RequestMetadata};

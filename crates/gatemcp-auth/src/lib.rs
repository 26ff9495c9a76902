//! Bearer-token verification against a remotely published JWKS.
//!
//! This crate provides the authentication core of GateMCP:
//!
//! - Fetches the identity provider's JSON Web Key Set and caches the decoded
//!   public keys by `kid`
//! - Verifies RS256/ES256 JWT signatures and expiry on every guarded request
//! - Refreshes the key set in the background when an unknown `kid` shows up,
//!   rate-limited so a flood of bad tokens cannot hammer the provider
//!
//! The cache is the only shared mutable state on the request path and sits
//! behind a reader/writer lock; reads are the fast path.

mod error;
mod jwks;
mod verifier;

pub use error::AuthError;
pub use jwks::{Jwk, JwkSet, KeyStore, VerificationKey};
pub use verifier::{Claims, TokenVerifier};

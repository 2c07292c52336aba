//! # Outbound Ports (Driven Ports / SPI)
//!
//! Capabilities the engines consume but never implement themselves:
//! byte-level cryptography, replay-state persistence, out-of-band token
//! resolution and token authentication.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wss_types::algorithms;
use wss_types::{
    DerivedKeyElement, EncryptedData, EncryptedKey, HeaderElement, KeyBytes, KeyIdentifierClause,
    SecurityToken, SecurityVersion, SignedInfo,
};

// =============================================================================
// CRYPTOGRAPHIC PROVIDER
// =============================================================================

/// Error from the cryptographic provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Signature value does not match `SignedInfo` under the given key
    #[error("Signature verification failed")]
    VerificationFailed,

    /// Cipher text could not be decrypted or failed authentication
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Token carries no key usable for the operation
    #[error("No key material for token {0}")]
    MissingKeyMaterial(String),

    /// Algorithm URI not supported by this provider
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Decrypted bytes are not a well-formed header element
    #[error("Malformed element: {0}")]
    MalformedElement(String),

    /// Provider-internal failure (entropy source, serializer)
    #[error("Crypto provider failure: {0}")]
    Internal(String),
}

/// Version-specific cryptographic strategy.
///
/// One provider is selected per WS-Security version and injected into every
/// engine created for that version. All methods are synchronous and must be
/// callable concurrently from independent engines.
pub trait CryptoProvider: Send + Sync {
    /// WS-Security version this provider speaks.
    fn security_version(&self) -> SecurityVersion;

    /// Canonical bytes of a header element, as digested and encrypted.
    fn canonicalize(&self, element: &HeaderElement) -> Result<Vec<u8>, CryptoError>;

    /// Inverse of `canonicalize` for decrypted header content.
    fn parse_element(&self, plaintext: &[u8]) -> Result<HeaderElement, CryptoError>;

    fn compute_digest(&self, method: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify `value` over the canonical `SignedInfo` with `key`.
    fn verify_signature(
        &self,
        signed_info: &SignedInfo,
        value: &[u8],
        key: &SecurityToken,
    ) -> Result<(), CryptoError>;

    /// Unwrap the symmetric key carried by an `EncryptedKey`.
    fn decrypt_wrapped_key(
        &self,
        encrypted_key: &EncryptedKey,
        wrapping: &SecurityToken,
    ) -> Result<KeyBytes, CryptoError>;

    fn decrypt_data(
        &self,
        data: &EncryptedData,
        key: &SecurityToken,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Compute the key described by a derived-key element.
    fn derive_key(
        &self,
        source: &SecurityToken,
        element: &DerivedKeyElement,
    ) -> Result<KeyBytes, CryptoError>;

    /// Fresh random bytes for session keys and derivation nonces.
    fn generate_key_material(&self, length: usize) -> Result<Vec<u8>, CryptoError>;

    fn wrap_key(&self, key: &KeyBytes, wrapping: &SecurityToken) -> Result<Vec<u8>, CryptoError>;

    fn encrypt_data(&self, plaintext: &[u8], key: &SecurityToken) -> Result<Vec<u8>, CryptoError>;

    fn compute_signature(
        &self,
        signed_info: &SignedInfo,
        key: &SecurityToken,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Signature method URI for a key.
    fn signature_method(&self, key: &SecurityToken) -> &'static str {
        if key.has_asymmetric_key() {
            algorithms::RSA_SHA256
        } else {
            algorithms::HMAC_SHA256
        }
    }

    fn digest_method(&self) -> &'static str {
        algorithms::SHA256
    }
}

// =============================================================================
// NONCE CACHE
// =============================================================================

/// Error from a nonce cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NonceCacheError {
    /// Capacity reached; the sender may retry later
    #[error("Nonce cache is full (capacity {capacity})")]
    Full { capacity: usize },

    /// Backing store unreachable
    #[error("Nonce cache unavailable: {0}")]
    Unavailable(String),
}

/// Replay-detection store shared by every message a listener processes.
///
/// Implementations must make `try_add_nonce` an atomic check-and-insert:
/// two concurrent calls with the same nonce must not both return `true`.
pub trait NonceCache: Send + Sync {
    /// How long an entry is retained.
    fn caching_time_span(&self) -> Duration;

    /// Maximum number of retained entries.
    fn cache_size(&self) -> usize;

    /// Store `nonce`. `Ok(true)` iff it was not already present.
    fn try_add_nonce(&self, nonce: &[u8]) -> Result<bool, NonceCacheError>;

    /// Presence test without inserting.
    fn check_nonce(&self, nonce: &[u8]) -> Result<bool, NonceCacheError>;
}

/// Wall-clock source, as time since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;

    fn now_secs(&self) -> u64 {
        self.now().as_secs()
    }
}

// =============================================================================
// TOKEN RESOLUTION & AUTHENTICATION
// =============================================================================

/// Resolves references to tokens that are not carried in the header.
pub trait TokenResolver: Send + Sync {
    fn resolve(&self, clause: &KeyIdentifierClause) -> Option<Arc<SecurityToken>>;
}

/// An authorization claim produced by token authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
}

/// Error from a token authenticator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("Token {token_id} rejected: {reason}")]
    Rejected { token_id: String, reason: String },

    #[error("No authenticator for token type {0}")]
    UnsupportedTokenType(String),
}

/// Validates a token read from the header and yields its claims.
pub trait TokenAuthenticator: Send + Sync {
    fn authenticate(&self, token: &SecurityToken) -> Result<Vec<Claim>, AuthenticationError>;
}

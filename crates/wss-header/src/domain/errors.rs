//! # Security Header Errors
//!
//! Every per-message failure surfaces as a `SecurityError` from the single
//! call that drives processing. The dispatch layer maps it to a fault with
//! `fault()`; misuse errors map to no fault at all.

use std::time::Duration;

use thiserror::Error;
use wss_types::{MessageProtectionOrder, TokenType};

use crate::domain::order_tracker::ReceiverProcessingOrder;
use crate::ports::outbound::{AuthenticationError, CryptoError, NonceCacheError};

/// Broad class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed, missing, duplicate or misplaced element.
    Format,
    /// Negotiated policy not satisfied.
    Policy,
    /// Programming error by the caller. Never a protocol fault.
    Misuse,
    /// Propagated unmodified.
    Fatal,
}

/// SOAP fault code for a rejected message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    /// Bad request.
    Sender,
    /// Resource exhaustion on the receiver; the sender may retry.
    Receiver,
}

/// Invalid configuration of a policy or collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Caching time span {0:?} exceeds the maximum")]
    CachingTimeSpanTooLarge(Duration),

    #[error("Cache size {0} exceeds the maximum")]
    CacheSizeTooLarge(usize),

    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    #[error("Signature confirmation requires WS-Security 1.1")]
    SignatureConfirmationUnsupported,

    #[error("Encrypting the primary signature requires message encryption")]
    SignatureEncryptionWithoutEncryption,

    #[error("Invalid policy document: {0}")]
    InvalidDocument(String),
}

/// Errors raised while building or processing a security header.
#[derive(Debug, Error)]
pub enum SecurityError {
    // =========================================================================
    // FORMAT
    // =========================================================================
    #[error("At most one timestamp is allowed in a security header")]
    DuplicateTimestamp,

    #[error("Timestamp must be the first element of the security header")]
    TimestampNotFirst,

    #[error("Timestamp must be the last element of the security header")]
    TimestampNotLast,

    #[error("Duplicate id {0} in security header")]
    DuplicateId(String),

    #[error("Unexpected {token_type:?} token {id}")]
    UnexpectedToken { id: String, token_type: TokenType },

    #[error("Unable to resolve key reference {clause} used by {element}")]
    UnresolvedKeyReference { element: String, clause: String },

    #[error("Source token of derived key {0} could not be resolved")]
    UnresolvedDerivedKeySource(String),

    #[error("Element {0} is not valid at this point of the security header")]
    UnexpectedElement(String),

    #[error("Reference lists inside EncryptedKey are not allowed")]
    EncryptedKeyReferenceListNotAllowed,

    #[error("Reference {0} does not name an element of this message")]
    UnknownReference(String),

    #[error("Encrypted item {0} was referenced but never decrypted")]
    DecryptionIncomplete(String),

    #[error("EncryptedData {0} is not named by any reference list")]
    UnreferencedEncryptedData(String),

    // =========================================================================
    // POLICY
    // =========================================================================
    #[error("Message protection order mismatch: required {required:?}, observed {observed:?}")]
    ProtectionOrderMismatch {
        required: MessageProtectionOrder,
        observed: ReceiverProcessingOrder,
    },

    #[error("The primary signature must be encrypted")]
    SignatureNotEncrypted,

    #[error("At most one signature is supported with the default policy")]
    AtMostOneSignature,

    #[error("At most one reference list is supported with the default policy")]
    AtMostOneReferenceList,

    #[error("At most {limit} wrapped key(s) are supported")]
    AtMostOneWrappedKey { limit: usize },

    #[error("Derived key limit of {limit} exceeded")]
    DerivedKeyLimitExceeded { limit: usize },

    #[error("Derived key length {requested} exceeds the maximum of {max}")]
    DerivedKeyLengthExceeded { requested: u32, max: u32 },

    #[error("Replay detected: primary signature value already seen")]
    ReplayDetected,

    #[error("Replay detection requires a timestamp")]
    MissingTimestamp,

    #[error("Replay detection requires a primary signature")]
    MissingPrimarySignature,

    #[error("Timestamp expired at {expires}, now {now}")]
    TimestampExpired { expires: u64, now: u64 },

    #[error("Timestamp created at {created} is in the future, now {now}")]
    TimestampInFuture { created: u64, now: u64 },

    #[error("Timestamp created at {created} is outside the replay window, now {now}")]
    TimestampStale { created: u64, now: u64 },

    #[error("Part {0} is required to be signed")]
    PartNotSigned(String),

    #[error("Part {0} is required to be encrypted")]
    PartNotEncrypted(String),

    #[error("The timestamp is not covered by the primary signature")]
    TimestampNotSigned,

    #[error("Digest mismatch for reference {0}")]
    DigestMismatch(String),

    #[error("Primary signature key {0} is not a primary token")]
    SignatureKeyNotPrimary(String),

    #[error("The signing token does not match the expected token")]
    SigningTokenMismatch,

    #[error("The encryption token does not match the expected token")]
    EncryptionTokenMismatch,

    #[error("EncryptedKey {0} is not wrapped by the required wrapping token")]
    WrappingTokenMismatch(String),

    #[error("Signing and encryption tokens differ")]
    SignatureEncryptionTokenMismatch,

    #[error("The primary signature is not computed with a derived key")]
    PrimarySignatureNotDerived,

    #[error("Encryption is not performed with a derived key")]
    PrimaryEncryptionNotDerived,

    #[error("Supporting token ({0}) was not provided")]
    SupportingTokenNotProvided(String),

    #[error("Supporting token ({0}) did not endorse the primary signature")]
    SupportingTokenNotEndorsing(String),

    #[error("Supporting token ({0}) is not signed")]
    SupportingTokenNotSigned(String),

    #[error("Supporting token ({0}) is not encrypted")]
    SupportingTokenNotEncrypted(String),

    #[error("Supporting token ({0}) is not used through a derived key")]
    SupportingTokenNotDerived(String),

    #[error("Endorsing signature {0} does not cover the primary signature")]
    EndorsingSignatureMissingPrimary(String),

    #[error("Signature {0} is keyed by a token that may not endorse")]
    EndorsingTokenNotExpected(String),

    #[error("Token {0} endorsed the primary signature more than once")]
    DuplicateEndorsingSignature(String),

    #[error("Signature confirmations do not match the request signatures")]
    SignatureConfirmationMismatch,

    #[error("Signature confirmation {0} was not expected")]
    UnexpectedSignatureConfirmation(String),

    #[error("Signature confirmation {0} is not signed")]
    SignatureConfirmationNotSigned(String),

    // =========================================================================
    // RESOURCE EXHAUSTION (receiver faults)
    // =========================================================================
    #[error("Security header processing exceeded {0:?}")]
    Timeout(Duration),

    // =========================================================================
    // MISUSE
    // =========================================================================
    #[error("Operation {operation} is invalid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Required collaborator {0} was not configured")]
    MissingCollaborator(&'static str),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // =========================================================================
    // PROPAGATED
    // =========================================================================
    #[error("Cryptographic provider: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Nonce cache: {0}")]
    NonceCache(#[from] NonceCacheError),

    #[error("Token authentication: {0}")]
    Authentication(#[from] AuthenticationError),
}

impl SecurityError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        use SecurityError::*;
        match self {
            DuplicateTimestamp
            | TimestampNotFirst
            | TimestampNotLast
            | DuplicateId(_)
            | UnexpectedToken { .. }
            | UnresolvedKeyReference { .. }
            | UnresolvedDerivedKeySource(_)
            | UnexpectedElement(_)
            | EncryptedKeyReferenceListNotAllowed
            | UnknownReference(_)
            | DecryptionIncomplete(_)
            | UnreferencedEncryptedData(_) => ErrorKind::Format,

            InvalidState { .. } | MissingCollaborator(_) | Config(_) => ErrorKind::Misuse,

            Crypto(e) => match e {
                CryptoError::VerificationFailed => ErrorKind::Policy,
                CryptoError::DecryptionFailed(_)
                | CryptoError::MalformedElement(_)
                | CryptoError::UnsupportedAlgorithm(_)
                | CryptoError::MissingKeyMaterial(_) => ErrorKind::Format,
                CryptoError::Internal(_) => ErrorKind::Fatal,
            },
            NonceCache(NonceCacheError::Full { .. }) => ErrorKind::Policy,
            NonceCache(NonceCacheError::Unavailable(_)) => ErrorKind::Fatal,
            Authentication(_) => ErrorKind::Policy,

            _ => ErrorKind::Policy,
        }
    }

    /// Fault reported to the sender, `None` for errors that are not
    /// protocol faults.
    pub fn fault(&self) -> Option<FaultCode> {
        match self {
            Self::Timeout(_) | Self::NonceCache(NonceCacheError::Full { .. }) => {
                Some(FaultCode::Receiver)
            }
            _ => match self.kind() {
                ErrorKind::Format | ErrorKind::Policy => Some(FaultCode::Sender),
                ErrorKind::Misuse | ErrorKind::Fatal => None,
            },
        }
    }

    /// True only for receiver faults: the same message may succeed later.
    pub fn is_retryable(&self) -> bool {
        self.fault() == Some(FaultCode::Receiver)
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, SecurityError>;

//! # Policy Vocabulary
//!
//! Negotiated settings both engines consume.

use serde::{Deserialize, Serialize};

/// Ordering discipline for security header children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityHeaderLayout {
    /// Fixed canonical order: declare before use.
    #[default]
    Strict,
    /// Any order.
    Lax,
    /// Any order, timestamp first.
    LaxTimestampFirst,
    /// Any order, timestamp last.
    LaxTimestampLast,
}

impl SecurityHeaderLayout {
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Required sequencing of signing and encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MessageProtectionOrder {
    SignBeforeEncrypt,
    EncryptBeforeSign,
    /// Sign, then encrypt both the content and the signature.
    #[default]
    SignBeforeEncryptAndEncryptSignature,
}

impl MessageProtectionOrder {
    /// True when signatures are computed before encryption.
    pub fn sign_then_encrypt(self) -> bool {
        !matches!(self, Self::EncryptBeforeSign)
    }
}

/// WS-Security protocol version a cryptographic provider is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityVersion {
    WsSecurity10,
    #[default]
    WsSecurity11,
}

impl SecurityVersion {
    pub fn supports_signature_confirmation(self) -> bool {
        matches!(self, Self::WsSecurity11)
    }
}

/// How a supporting token is attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportingTokenMode {
    /// Signs the primary signature.
    Endorsing,
    /// Covered by the primary signature.
    Signed,
    /// Covered by the primary signature and encrypted ("basic").
    SignedEncrypted,
    /// Covered by the primary signature and signs it.
    SignedEndorsing,
}

impl SupportingTokenMode {
    pub fn is_endorsing(self) -> bool {
        matches!(self, Self::Endorsing | Self::SignedEndorsing)
    }

    pub fn is_signed(self) -> bool {
        !matches!(self, Self::Endorsing)
    }

    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::SignedEncrypted)
    }
}

//! # Security Header Elements
//!
//! Typed views of the children of a `<wsse:Security>` header.
//!
//! Each element carries its `wsu:Id`. Binary content (digests, signature
//! values, cipher text, nonces) is base64 on the wire.

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::tokens::{KeyIdentifierClause, SecurityToken};

// =============================================================================
// TIMESTAMP
// =============================================================================

/// `wsu:Timestamp`. Times are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub id: String,
    pub created: u64,
    pub expires: Option<u64>,
}

// =============================================================================
// ENCRYPTION
// =============================================================================

/// `xenc:EncryptedData`: a header element or message part under encryption.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub id: String,
    /// Key the content was encrypted with.
    pub key_clause: KeyIdentifierClause,
    #[serde_as(as = "Base64")]
    pub cipher_value: Vec<u8>,
}

/// `xenc:ReferenceList`: ids of the `EncryptedData` items it covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceList {
    pub data_references: Vec<String>,
}

/// `xenc:EncryptedKey`: a symmetric key wrapped under another token.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub id: String,
    pub wrapping_clause: KeyIdentifierClause,
    #[serde_as(as = "Base64")]
    pub cipher_value: Vec<u8>,
    /// Data encrypted directly under this key (WS-Security 1.0 style).
    pub reference_list: Option<ReferenceList>,
}

/// `wsc:DerivedKeyToken`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedKeyElement {
    pub id: String,
    /// Token the key is derived from.
    pub source: KeyIdentifierClause,
    #[serde_as(as = "Base64")]
    pub nonce: Vec<u8>,
    pub label: String,
    pub offset: u32,
    pub length: u32,
}

// =============================================================================
// SIGNATURE
// =============================================================================

/// One `ds:Reference` inside `SignedInfo`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureReference {
    /// `#id` of the covered element.
    pub uri: String,
    pub digest_method: String,
    #[serde_as(as = "Base64")]
    pub digest_value: Vec<u8>,
}

impl SignatureReference {
    /// The referenced id without the leading `#`.
    pub fn target_id(&self) -> &str {
        self.uri.strip_prefix('#').unwrap_or(&self.uri)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInfo {
    pub canonicalization: String,
    pub signature_method: String,
    pub references: Vec<SignatureReference>,
}

impl SignedInfo {
    /// Does any reference point at `id`?
    pub fn covers(&self, id: &str) -> bool {
        self.references.iter().any(|r| r.target_id() == id)
    }
}

/// `ds:Signature`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub id: String,
    pub signed_info: SignedInfo,
    #[serde_as(as = "Base64")]
    pub value: Vec<u8>,
    pub key_clause: KeyIdentifierClause,
}

/// `wsse11:SignatureConfirmation`. A missing value confirms an unsigned request.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureConfirmation {
    pub id: String,
    #[serde_as(as = "Option<Base64>")]
    pub value: Option<Vec<u8>>,
}

/// `wsse:SecurityTokenReference` emitted as a header child so that a token
/// that is not itself in the header can be signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityTokenReference {
    pub id: String,
    pub clause: KeyIdentifierClause,
}

// =============================================================================
// HEADER ELEMENT
// =============================================================================

/// Any child of the security header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "element")]
pub enum HeaderElement {
    Timestamp(Timestamp),
    Token(SecurityToken),
    EncryptedKey(EncryptedKey),
    DerivedKey(DerivedKeyElement),
    ReferenceList(ReferenceList),
    EncryptedData(EncryptedData),
    Signature(Signature),
    SignatureConfirmation(SignatureConfirmation),
    SecurityTokenReference(SecurityTokenReference),
}

impl HeaderElement {
    /// Wire id. Reference lists carry none.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Timestamp(e) => Some(&e.id),
            Self::Token(e) => Some(&e.id),
            Self::EncryptedKey(e) => Some(&e.id),
            Self::DerivedKey(e) => Some(&e.id),
            Self::ReferenceList(_) => None,
            Self::EncryptedData(e) => Some(&e.id),
            Self::Signature(e) => Some(&e.id),
            Self::SignatureConfirmation(e) => Some(&e.id),
            Self::SecurityTokenReference(e) => Some(&e.id),
        }
    }

    /// Element name as used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timestamp(_) => "Timestamp",
            Self::Token(_) => "Token",
            Self::EncryptedKey(_) => "EncryptedKey",
            Self::DerivedKey(_) => "DerivedKeyToken",
            Self::ReferenceList(_) => "ReferenceList",
            Self::EncryptedData(_) => "EncryptedData",
            Self::Signature(_) => "Signature",
            Self::SignatureConfirmation(_) => "SignatureConfirmation",
            Self::SecurityTokenReference(_) => "SecurityTokenReference",
        }
    }
}

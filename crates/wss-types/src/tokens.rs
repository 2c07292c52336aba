//! # Security Tokens
//!
//! Tokens carried in, or referenced from, a security header.
//!
//! ## Identity
//!
//! Tokens are shared as `Arc<SecurityToken>` and compared by reference
//! identity (`Arc::ptr_eq`). Two tokens with equal fields are still two
//! tokens. The only value comparison the engines make is the X.509
//! thumbprint check performed by the token trackers.
//!
//! ## Key Material
//!
//! Symmetric secrets live in `KeyBytes`, which is zeroized on drop, never
//! serialized and never printed.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use zeroize::Zeroizing;

// =============================================================================
// KEY MATERIAL
// =============================================================================

/// Secret key bytes, wiped from memory when dropped.
#[derive(Clone, Default)]
pub struct KeyBytes(Zeroizing<Vec<u8>>);

impl KeyBytes {
    /// Take ownership of raw key bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyBytes({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for KeyBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

// =============================================================================
// TOKEN TYPES
// =============================================================================

/// The kinds of token a security header can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    X509Certificate,
    UserName,
    /// WS-SecureConversation context token (shared session secret).
    SecurityContext,
    Saml,
    Kerberos,
    /// Symmetric key transported in an `EncryptedKey`.
    WrappedKey,
    /// Key derived from another token with a nonce and label.
    DerivedKey,
}

/// How a token reached the engine when it was not read verbatim.
#[derive(Debug, Clone)]
pub enum TokenOrigin {
    /// Derived from `source` (WS-SecureConversation `DerivedKeyToken`).
    Derived { source: Arc<SecurityToken> },
    /// Unwrapped with the key of `wrapping`.
    Wrapped { wrapping: Arc<SecurityToken> },
}

/// A reference from one element to the token holding its key.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyIdentifierClause {
    /// `wsu:Id` of a token or key element in the same header.
    LocalId(String),
    /// SHA-1 thumbprint of an X.509 certificate.
    Thumbprint(#[serde_as(as = "Base64")] Vec<u8>),
    /// Reference to a token outside the message (issued token, session).
    External(String),
}

impl fmt::Display for KeyIdentifierClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalId(id) => write!(f, "#{id}"),
            Self::Thumbprint(tp) => write!(f, "thumbprint({} bytes)", tp.len()),
            Self::External(reference) => write!(f, "external({reference})"),
        }
    }
}

// =============================================================================
// SECURITY TOKEN
// =============================================================================

/// A security token as seen by the header engines.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityToken {
    /// Wire id (`wsu:Id`).
    pub id: String,
    pub token_type: TokenType,
    /// Certificate thumbprint for X.509 tokens.
    #[serde_as(as = "Option<Base64>")]
    pub thumbprint: Option<Vec<u8>>,
    /// Subject name, user name or issued-token subject.
    #[serde(default)]
    pub subject: Option<String>,
    /// Symmetric key. Never leaves the process.
    #[serde(skip)]
    pub secret: Option<KeyBytes>,
    #[serde(skip)]
    pub origin: Option<TokenOrigin>,
}

impl SecurityToken {
    /// A bare token of the given type with no key material.
    pub fn new(id: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            id: id.into(),
            token_type,
            thumbprint: None,
            subject: None,
            secret: None,
            origin: None,
        }
    }

    /// An X.509 certificate token identified by its thumbprint.
    pub fn x509(id: impl Into<String>, subject: impl Into<String>, thumbprint: Vec<u8>) -> Self {
        let mut token = Self::new(id, TokenType::X509Certificate);
        token.subject = Some(subject.into());
        token.thumbprint = Some(thumbprint);
        token
    }

    pub fn user_name(id: impl Into<String>, user: impl Into<String>) -> Self {
        let mut token = Self::new(id, TokenType::UserName);
        token.subject = Some(user.into());
        token
    }

    /// A secure-conversation context token holding the session key.
    pub fn security_context(id: impl Into<String>, secret: KeyBytes) -> Self {
        Self::new(id, TokenType::SecurityContext).with_secret(secret)
    }

    /// A key that travelled wrapped under `wrapping`.
    pub fn wrapped_key(
        id: impl Into<String>,
        secret: KeyBytes,
        wrapping: Arc<SecurityToken>,
    ) -> Self {
        let mut token = Self::new(id, TokenType::WrappedKey).with_secret(secret);
        token.origin = Some(TokenOrigin::Wrapped { wrapping });
        token
    }

    /// A key derived from `source`.
    pub fn derived_key(
        id: impl Into<String>,
        secret: KeyBytes,
        source: Arc<SecurityToken>,
    ) -> Self {
        let mut token = Self::new(id, TokenType::DerivedKey).with_secret(secret);
        token.origin = Some(TokenOrigin::Derived { source });
        token
    }

    pub fn with_secret(mut self, secret: KeyBytes) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn with_thumbprint(mut self, thumbprint: Vec<u8>) -> Self {
        self.thumbprint = Some(thumbprint);
        self
    }

    /// True when the token is keyed by a public/private key pair.
    pub fn has_asymmetric_key(&self) -> bool {
        matches!(self.token_type, TokenType::X509Certificate)
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.origin, Some(TokenOrigin::Derived { .. }))
    }

    /// The token a derived key was derived from, if any.
    pub fn derivation_source(&self) -> Option<&Arc<SecurityToken>> {
        match &self.origin {
            Some(TokenOrigin::Derived { source }) => Some(source),
            _ => None,
        }
    }

    /// The token this key was wrapped under, if any.
    pub fn wrapping_token(&self) -> Option<&Arc<SecurityToken>> {
        match &self.origin {
            Some(TokenOrigin::Wrapped { wrapping }) => Some(wrapping),
            _ => None,
        }
    }

    /// Does this token match a key identifier clause without a resolver?
    pub fn matches_clause(&self, clause: &KeyIdentifierClause) -> bool {
        match clause {
            KeyIdentifierClause::LocalId(id) | KeyIdentifierClause::External(id) => self.id == *id,
            KeyIdentifierClause::Thumbprint(tp) => {
                self.thumbprint.as_deref() == Some(tp.as_slice())
            }
        }
    }
}

/// Walk a derived key back to the token it was derived from.
///
/// Wrapped keys are their own root: the wrapping token only transports them.
pub fn underlying_token(token: &Arc<SecurityToken>) -> Arc<SecurityToken> {
    let mut current = Arc::clone(token);
    while let Some(source) = current.derivation_source().cloned() {
        current = source;
    }
    current
}

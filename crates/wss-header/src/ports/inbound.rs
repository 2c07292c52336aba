//! # Inbound Ports (Driving Ports / API)
//!
//! The API a message dispatcher drives: verify one incoming message,
//! secure one outgoing message.

use std::sync::Arc;

use wss_types::{SecurityToken, SoapMessage};

use crate::domain::errors::Result;
use crate::domain::receive::VerifiedMessage;
use crate::domain::send::{OutgoingSupportingToken, SecuredMessage};

/// Per-message expectations of the receiving side.
#[derive(Debug, Clone, Default)]
pub struct IncomingExpectations {
    /// Token that must key the primary signature.
    pub signing_token: Option<Arc<SecurityToken>>,
    /// Token every decryption key must trace back to.
    pub encryption_token: Option<Arc<SecurityToken>>,
    /// Token every `EncryptedKey` must be wrapped under.
    pub wrapping_token: Option<Arc<SecurityToken>>,
    /// Signature values of the request this message answers.
    pub signature_confirmations: Option<Vec<Vec<u8>>>,
}

/// Per-message credentials of the sending side.
#[derive(Debug, Clone, Default)]
pub struct OutgoingCredentials {
    pub signing_token: Option<Arc<SecurityToken>>,
    pub encryption_token: Option<Arc<SecurityToken>>,
    /// Wrap a fresh session key for `encryption_token`.
    pub wrap_key: bool,
    pub supporting_tokens: Vec<OutgoingSupportingToken>,
    /// Signature values of the request being answered.
    pub signature_confirmations: Option<Vec<Vec<u8>>>,
}

/// Message security API.
///
/// Implementations must be thread-safe (`Send + Sync`); every call
/// processes exactly one message with its own engine.
pub trait MessageSecurityApi: Send + Sync {
    /// Verify the security header of an incoming message.
    ///
    /// # Errors
    /// Any format or policy violation rejects the whole message.
    fn verify_incoming(
        &self,
        message: SoapMessage,
        expectations: IncomingExpectations,
    ) -> Result<VerifiedMessage>;

    /// Build the security header of an outgoing message.
    fn secure_outgoing(
        &self,
        message: SoapMessage,
        credentials: OutgoingCredentials,
    ) -> Result<SecuredMessage>;
}

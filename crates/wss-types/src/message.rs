//! # Message Model
//!
//! The minimal SOAP envelope the header engines operate on: addressable
//! parts (the body and any protected headers) plus the security header.

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::elements::{EncryptedData, HeaderElement};

/// Content of a message part, either in the clear or encrypted in place.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartContent {
    Plain(#[serde_as(as = "Base64")] Vec<u8>),
    Encrypted(EncryptedData),
}

/// A signable/encryptable part of the envelope (`soap:Body` or a header).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    /// `wsu:Id` of the plaintext element.
    pub id: String,
    /// Qualified name used by policies (`Body`, `To`, `Action`, ...).
    pub name: String,
    pub content: PartContent,
}

impl MessagePart {
    pub fn plain(id: impl Into<String>, name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: PartContent::Plain(content),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.content, PartContent::Encrypted(_))
    }

    /// Id of the `EncryptedData` wrapper, when encrypted.
    pub fn encrypted_id(&self) -> Option<&str> {
        match &self.content {
            PartContent::Encrypted(data) => Some(&data.id),
            PartContent::Plain(_) => None,
        }
    }

    /// Plaintext bytes, when not encrypted.
    pub fn plaintext(&self) -> Option<&[u8]> {
        match &self.content {
            PartContent::Plain(bytes) => Some(bytes),
            PartContent::Encrypted(_) => None,
        }
    }
}

/// The `<wsse:Security>` header: children in wire order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityHeader {
    pub elements: Vec<HeaderElement>,
}

/// A SOAP message as seen by the security layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapMessage {
    /// Protected SOAP headers other than the security header.
    pub headers: Vec<MessagePart>,
    pub body: MessagePart,
    pub security: SecurityHeader,
}

impl SoapMessage {
    /// A message with a plain body and an empty security header.
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            headers: Vec::new(),
            body: MessagePart::plain("Body", "Body", body),
            security: SecurityHeader::default(),
        }
    }

    pub fn with_header(mut self, part: MessagePart) -> Self {
        self.headers.push(part);
        self
    }

    /// All parts, headers first, body last.
    pub fn parts(&self) -> impl Iterator<Item = &MessagePart> {
        self.headers.iter().chain(std::iter::once(&self.body))
    }

    pub fn parts_mut(&mut self) -> impl Iterator<Item = &mut MessagePart> {
        self.headers.iter_mut().chain(std::iter::once(&mut self.body))
    }

    pub fn part_by_name(&self, name: &str) -> Option<&MessagePart> {
        self.parts().find(|p| p.name == name)
    }
}

//! Outgoing header assembly.
//!
//! Elements are appended as they are produced, tagged with the section
//! they belong to. Serialization orders them by section, then by the
//! order they were produced in, and emits the encrypted form of any
//! element that was encrypted.

use wss_types::HeaderElement;

use crate::domain::element_store::{HeaderElementEntry, HeaderElementStore};
use crate::domain::errors::{Result, SecurityError};

/// Position of an element in the emitted header. Every key is declared
/// before the first element that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum HeaderSection {
    Timestamp,
    SigningToken,
    /// Derived from the signing token.
    SigningDerivedKey,
    EncryptionToken,
    EncryptionDerivedKey,
    WrappedKey,
    /// Derived from the wrapped session key, in production order.
    WrappedKeyDerivedKey,
    /// Encrypt-then-sign: decryption happens before verification.
    ReferenceListBeforeSignature,
    SignedSupportingToken,
    EncryptedSupportingToken,
    EndorsingToken,
    SignedEndorsingToken,
    SignatureConfirmation,
    PrimarySignature,
    EndorsingSignature,
    /// Sign-then-encrypt: the list follows every signature.
    ReferenceListAfterSignature,
    TimestampLast,
}

#[derive(Debug, Default)]
pub(crate) struct OutgoingHeader {
    store: HeaderElementStore,
    sections: Vec<HeaderSection>,
}

impl OutgoingHeader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, section: HeaderSection, element: HeaderElement) -> Result<usize> {
        let index = self.store.append(HeaderElementEntry::new(element))?;
        self.sections.push(section);
        Ok(index)
    }

    pub(crate) fn get(&self, index: usize) -> Result<&HeaderElementEntry> {
        self.store
            .get(index)
            .ok_or_else(|| SecurityError::UnexpectedElement(format!("outgoing slot {index}")))
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Result<&mut HeaderElementEntry> {
        self.store
            .get_mut(index)
            .ok_or_else(|| SecurityError::UnexpectedElement(format!("outgoing slot {index}")))
    }

    pub(crate) fn len(&self) -> usize {
        self.store.len()
    }

    /// Elements in emission order.
    pub(crate) fn into_elements(self) -> Vec<HeaderElement> {
        let mut ordered: Vec<(HeaderSection, usize, HeaderElementEntry)> = self
            .sections
            .into_iter()
            .zip(self.store.into_entries())
            .enumerate()
            .map(|(index, (section, entry))| (section, index, entry))
            .collect();
        ordered.sort_by_key(|(section, index, _)| (*section, *index));
        ordered
            .into_iter()
            .map(|(_, _, entry)| match entry.encrypted_form {
                Some(form) => HeaderElement::EncryptedData(form),
                None => entry.element,
            })
            .collect()
    }
}

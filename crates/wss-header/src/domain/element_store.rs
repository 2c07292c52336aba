//! # Header Element Store
//!
//! Index-addressable arena of security header entries in wire order.
//!
//! Entries are replaced in place (`replace`) when a later pass decrypts or
//! resolves them, so an index handed out by `append` stays valid for the
//! whole message. Lookup by id matches both the plaintext id of an entry
//! and the id of the `EncryptedData` it arrived in.

use std::collections::HashMap;
use std::sync::Arc;

use wss_types::{EncryptedData, HeaderElement, SecurityToken};

use crate::domain::errors::{Result, SecurityError};

/// How a signature entry was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingMode {
    Primary,
    Endorsing,
    #[default]
    Unknown,
}

/// Raw category of an entry, derived from the element it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementCategory {
    Timestamp,
    Token,
    EncryptedKey,
    DerivedKey,
    ReferenceList,
    EncryptedData,
    Signature,
    SignatureConfirmation,
    SecurityTokenReference,
}

impl ElementCategory {
    pub fn of(element: &HeaderElement) -> Self {
        match element {
            HeaderElement::Timestamp(_) => Self::Timestamp,
            HeaderElement::Token(_) => Self::Token,
            HeaderElement::EncryptedKey(_) => Self::EncryptedKey,
            HeaderElement::DerivedKey(_) => Self::DerivedKey,
            HeaderElement::ReferenceList(_) => Self::ReferenceList,
            HeaderElement::EncryptedData(_) => Self::EncryptedData,
            HeaderElement::Signature(_) => Self::Signature,
            HeaderElement::SignatureConfirmation(_) => Self::SignatureConfirmation,
            HeaderElement::SecurityTokenReference(_) => Self::SecurityTokenReference,
        }
    }
}

/// One header child and what is known about it.
#[derive(Debug, Clone)]
pub struct HeaderElementEntry {
    /// Plaintext element. Still `EncryptedData` until decrypted.
    pub element: HeaderElement,
    /// Token produced by this entry (read, unwrapped or derived).
    pub token: Option<Arc<SecurityToken>>,
    pub binding_mode: BindingMode,
    /// Arrived inside an `EncryptedData`.
    pub encrypted: bool,
    /// The wrapper it arrived in; its id is the encrypted-form id.
    pub encrypted_form: Option<EncryptedData>,
}

impl HeaderElementEntry {
    pub fn new(element: HeaderElement) -> Self {
        Self {
            element,
            token: None,
            binding_mode: BindingMode::Unknown,
            encrypted: false,
            encrypted_form: None,
        }
    }

    pub fn category(&self) -> ElementCategory {
        ElementCategory::of(&self.element)
    }

    pub fn id(&self) -> Option<&str> {
        self.element.id()
    }

    pub fn encrypted_form_id(&self) -> Option<&str> {
        self.encrypted_form.as_ref().map(|e| e.id.as_str())
    }

    /// Matches `id` by plaintext or encrypted-form id.
    pub fn is_known_as(&self, id: &str) -> bool {
        self.id() == Some(id) || self.encrypted_form_id() == Some(id)
    }

    /// A derived or wrapped key whose token is not available yet.
    pub fn is_stub(&self) -> bool {
        matches!(
            self.category(),
            ElementCategory::DerivedKey | ElementCategory::EncryptedKey
        ) && self.token.is_none()
    }

    /// Header `EncryptedData` still waiting to be decrypted.
    pub fn is_pending_decryption(&self) -> bool {
        self.category() == ElementCategory::EncryptedData
    }
}

/// Ordered collection of header entries for one message.
#[derive(Debug, Default)]
pub struct HeaderElementStore {
    entries: Vec<HeaderElementEntry>,
    ids: HashMap<String, usize>,
}

impl HeaderElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry; fails on a duplicate wire id.
    pub fn append(&mut self, entry: HeaderElementEntry) -> Result<usize> {
        let index = self.entries.len();
        self.register_ids(&entry, index)?;
        self.entries.push(entry);
        Ok(index)
    }

    /// Replace slot `index`, keeping ids of the previous entry resolvable.
    pub fn replace(&mut self, index: usize, entry: HeaderElementEntry) -> Result<()> {
        if index >= self.entries.len() {
            return Err(SecurityError::UnexpectedElement(format!("slot {index}")));
        }
        self.register_ids(&entry, index)?;
        self.entries[index] = entry;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&HeaderElementEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut HeaderElementEntry> {
        self.entries.get_mut(index)
    }

    /// Index of the entry known as `id` (plaintext or encrypted form).
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.get(id).copied()
    }

    pub fn find(&self, id: &str) -> Option<&HeaderElementEntry> {
        self.index_of(id).and_then(|i| self.entries.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderElementEntry> {
        self.entries.iter()
    }

    /// Indices of the entries matching `predicate`, in wire order.
    pub fn indices_where(&self, predicate: impl Fn(&HeaderElementEntry) -> bool) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| predicate(e))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn stub_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_stub()).count()
    }

    /// The entry classified as the primary signature.
    pub fn primary_signature(&self) -> Option<&HeaderElementEntry> {
        self.entries
            .iter()
            .find(|e| e.binding_mode == BindingMode::Primary)
    }

    pub fn into_entries(self) -> Vec<HeaderElementEntry> {
        self.entries
    }

    fn register_ids(&mut self, entry: &HeaderElementEntry, index: usize) -> Result<()> {
        let ids = [entry.id(), entry.encrypted_form_id()];
        for id in ids.into_iter().flatten() {
            match self.ids.get(id) {
                Some(&existing) if existing != index => {
                    return Err(SecurityError::DuplicateId(id.to_string()));
                }
                Some(_) => {}
                None => {
                    self.ids.insert(id.to_string(), index);
                }
            }
        }
        Ok(())
    }
}

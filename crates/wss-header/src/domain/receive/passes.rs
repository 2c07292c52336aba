//! Reading, resolution and processing passes over the security header.

use std::sync::Arc;

use tracing::{debug, trace};
use wss_types::{
    underlying_token, HeaderElement, KeyIdentifierClause, PartContent, ReferenceList,
    SecurityToken, Signature,
};

use super::{DeferredReference, Endorsement, ReceiveContext};
use crate::domain::derived_keys::derive_token;
use crate::domain::element_store::{BindingMode, ElementCategory, HeaderElementEntry};
use crate::domain::errors::{Result, SecurityError};

/// Same token, or the same certificate seen through two instances.
pub(super) fn same_token(a: &Arc<SecurityToken>, b: &Arc<SecurityToken>) -> bool {
    Arc::ptr_eq(a, b) || (a.thumbprint.is_some() && a.thumbprint == b.thumbprint)
}

impl ReceiveContext<'_> {
    // =========================================================================
    // PASS DRIVERS
    // =========================================================================

    /// Strict layout: everything is declared before use, one pass suffices.
    pub(super) fn full_pass(&mut self, elements: Vec<HeaderElement>) -> Result<()> {
        debug!(elements = elements.len(), "Strict header pass");
        for element in elements {
            self.check_deadline()?;
            let index = self.store.append(HeaderElementEntry::new(element))?;
            self.read_entry(index, true)?;
        }
        Ok(())
    }

    /// Lax layouts: read everything, resolve to a fixed point, then process.
    pub(super) fn lax_passes(&mut self, elements: Vec<HeaderElement>) -> Result<()> {
        debug!(elements = elements.len(), "Lax header passes");
        for element in elements {
            self.check_deadline()?;
            let index = self.store.append(HeaderElementEntry::new(element))?;
            self.read_entry(index, false)?;
        }

        loop {
            self.check_deadline()?;
            let mut progress = self.resolve_stubs()?;
            progress |= self.decrypt_pending_header_elements()?;
            if !progress {
                break;
            }
        }
        debug!(stubs = self.store.stub_count(), "Key resolution settled");
        self.final_stub_pass()?;

        for index in 0..self.store.len() {
            self.check_deadline()?;
            self.process_entry(index)?;
        }
        Ok(())
    }

    // =========================================================================
    // READING
    // =========================================================================

    fn category_at(&self, index: usize) -> Result<ElementCategory> {
        self.store
            .get(index)
            .map(HeaderElementEntry::category)
            .ok_or_else(|| SecurityError::UnexpectedElement(format!("slot {index}")))
    }

    fn element_at(&self, index: usize) -> Result<HeaderElement> {
        self.store
            .get(index)
            .map(|e| e.element.clone())
            .ok_or_else(|| SecurityError::UnexpectedElement(format!("slot {index}")))
    }

    /// Read one entry. In strict mode the entry is also fully processed.
    fn read_entry(&mut self, index: usize, strict: bool) -> Result<()> {
        let element = self.element_at(index)?;
        trace!(index, element = element.name(), "Reading header element");

        match element {
            HeaderElement::Timestamp(_) => self.read_timestamp(index, strict),
            HeaderElement::Token(token) => self.register_token(index, token),
            HeaderElement::EncryptedKey(key) => {
                self.order.on_encrypted_key()?;
                if key.reference_list.is_some() && !self.policy.allow_encrypted_key_reference_list {
                    return Err(SecurityError::EncryptedKeyReferenceListNotAllowed);
                }
                let resolved = self.resolve_encrypted_key(index)?;
                if strict {
                    if !resolved {
                        return Err(SecurityError::UnresolvedKeyReference {
                            element: key.id,
                            clause: key.wrapping_clause.to_string(),
                        });
                    }
                    if let Some(list) = &key.reference_list {
                        self.apply_reference_list(list)?;
                    }
                }
                Ok(())
            }
            HeaderElement::DerivedKey(key) => {
                if !self.resolve_derived_key(index)? && strict {
                    return Err(SecurityError::UnresolvedDerivedKeySource(key.id));
                }
                Ok(())
            }
            HeaderElement::EncryptedData(data) => {
                if !strict {
                    return Ok(());
                }
                if !self.decrypt_header_element(index)? {
                    return Err(SecurityError::UnresolvedKeyReference {
                        element: data.id,
                        clause: data.key_clause.to_string(),
                    });
                }
                self.after_strict_decryption(index)
            }
            HeaderElement::Signature(_) if strict => self.process_signature(index),
            HeaderElement::ReferenceList(list) if strict => self.apply_reference_list(&list),
            HeaderElement::Signature(_)
            | HeaderElement::ReferenceList(_)
            | HeaderElement::SignatureConfirmation(_)
            | HeaderElement::SecurityTokenReference(_) => Ok(()),
        }
    }

    /// Strict mode: what was inside a header `EncryptedData` is usable now.
    fn after_strict_decryption(&mut self, index: usize) -> Result<()> {
        let entry = self
            .store
            .get(index)
            .ok_or_else(|| SecurityError::UnexpectedElement(format!("slot {index}")))?;
        if entry.is_stub() {
            let id = entry.id().unwrap_or_default().to_string();
            return Err(SecurityError::UnresolvedDerivedKeySource(id));
        }
        if entry.category() == ElementCategory::Signature {
            self.process_signature(index)?;
        }
        Ok(())
    }

    fn read_timestamp(&mut self, index: usize, strict: bool) -> Result<()> {
        if self.timestamp_index.is_some() {
            return Err(SecurityError::DuplicateTimestamp);
        }
        if strict && index != 0 {
            return Err(SecurityError::TimestampNotFirst);
        }
        let HeaderElement::Timestamp(ts) = self.element_at(index)? else {
            return Err(SecurityError::UnexpectedElement(format!("slot {index}")));
        };

        let skew = self.policy.max_clock_skew.as_secs();
        if let Some(expires) = ts.expires {
            if self.now >= expires.saturating_add(skew) {
                return Err(SecurityError::TimestampExpired {
                    expires,
                    now: self.now,
                });
            }
        }
        if ts.created > self.now.saturating_add(skew) {
            return Err(SecurityError::TimestampInFuture {
                created: ts.created,
                now: self.now,
            });
        }
        self.timestamp_index = Some(index);
        Ok(())
    }

    /// Register a token read from the header. The primary token is
    /// recognized here; supporting tokens are bound to their specs once
    /// every pass has shown how they were protected.
    fn register_token(&mut self, index: usize, token: SecurityToken) -> Result<()> {
        let token = match self.cached_token(&token) {
            Some(cached) => cached,
            None => Arc::new(token),
        };
        if let Some(authenticator) = &self.engine.authenticator {
            self.claims.extend(authenticator.authenticate(&token)?);
        }

        let is_primary = self.primary_token.is_none()
            && self.policy.primary_token_type == Some(token.token_type);
        if is_primary {
            debug!(id = %token.id, token_type = ?token.token_type, "Primary token");
            self.primary_token = Some(Arc::clone(&token));
            self.primary.add(Arc::clone(&token));
        } else {
            debug!(id = %token.id, token_type = ?token.token_type, "Header token");
        }

        self.universal.add(Arc::clone(&token));
        if let Some(entry) = self.store.get_mut(index) {
            entry.token = Some(token);
        }
        Ok(())
    }

    /// A symmetric token arrives without its secret; the session it names
    /// must already be known out of band.
    fn cached_token(&self, token: &SecurityToken) -> Option<Arc<SecurityToken>> {
        if token.secret.is_some() || token.has_asymmetric_key() {
            return None;
        }
        self.universal
            .resolve(&KeyIdentifierClause::External(token.id.clone()))
            .filter(|cached| cached.token_type == token.token_type && cached.secret.is_some())
    }

    // =========================================================================
    // KEY RESOLUTION
    // =========================================================================

    /// Unwrap an `EncryptedKey`. `Ok(false)` while its wrapping token is unknown.
    fn resolve_encrypted_key(&mut self, index: usize) -> Result<bool> {
        let HeaderElement::EncryptedKey(key) = self.element_at(index)? else {
            return Ok(false);
        };
        let Some(wrapping) = self.universal.resolve(&key.wrapping_clause) else {
            return Ok(false);
        };
        if let Some(required) = &self.engine.wrapping_token {
            if !same_token(required, &wrapping) {
                return Err(SecurityError::WrappingTokenMismatch(key.id));
            }
        }

        let secret = self.provider.decrypt_wrapped_key(&key, &wrapping)?;
        let token = Arc::new(SecurityToken::wrapped_key(key.id.clone(), secret, wrapping));
        self.universal.add(Arc::clone(&token));
        self.primary.add(Arc::clone(&token));
        if let Some(entry) = self.store.get_mut(index) {
            entry.token = Some(token);
        }
        debug!(id = %key.id, "Unwrapped key");
        Ok(true)
    }

    /// Compute a derived key. `Ok(false)` while its source is unknown.
    fn resolve_derived_key(&mut self, index: usize) -> Result<bool> {
        let HeaderElement::DerivedKey(element) = self.element_at(index)? else {
            return Ok(false);
        };
        let Some(source) = self.universal.resolve(&element.source) else {
            return Ok(false);
        };

        self.budget.reserve()?;
        let token = derive_token(
            self.provider,
            &source,
            &element,
            self.policy.max_derived_key_length,
        )?;
        self.universal.add(Arc::clone(&token));
        if self.primary.contains(&source) {
            self.primary.add(Arc::clone(&token));
        }
        if let Some(entry) = self.store.get_mut(index) {
            entry.token = Some(token);
        }
        debug!(id = %element.id, used = self.budget.used(), "Derived key");
        Ok(true)
    }

    fn resolve_stubs(&mut self) -> Result<bool> {
        let stubs = self.store.indices_where(HeaderElementEntry::is_stub);
        let mut progress = false;
        for index in stubs {
            progress |= match self.category_at(index)? {
                ElementCategory::DerivedKey => self.resolve_derived_key(index)?,
                ElementCategory::EncryptedKey => self.resolve_encrypted_key(index)?,
                _ => false,
            };
        }
        Ok(progress)
    }

    fn decrypt_pending_header_elements(&mut self) -> Result<bool> {
        let mut progress = false;
        for index in self.store.indices_where(HeaderElementEntry::is_pending_decryption) {
            progress |= self.decrypt_header_element(index)?;
        }
        Ok(progress)
    }

    /// Anything still unresolved after the fixed point is an error.
    fn final_stub_pass(&self) -> Result<()> {
        for entry in self.store.iter() {
            match &entry.element {
                HeaderElement::DerivedKey(key) if entry.token.is_none() => {
                    return Err(SecurityError::UnresolvedDerivedKeySource(key.id.clone()));
                }
                HeaderElement::EncryptedKey(key) if entry.token.is_none() => {
                    return Err(SecurityError::UnresolvedKeyReference {
                        element: key.id.clone(),
                        clause: key.wrapping_clause.to_string(),
                    });
                }
                HeaderElement::EncryptedData(data) => {
                    return Err(SecurityError::UnresolvedKeyReference {
                        element: data.id.clone(),
                        clause: data.key_clause.to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    // =========================================================================
    // DECRYPTION
    // =========================================================================

    /// Decrypt a header `EncryptedData` into its slot. `Ok(false)` while the
    /// key is unknown.
    fn decrypt_header_element(&mut self, index: usize) -> Result<bool> {
        let HeaderElement::EncryptedData(data) = self.element_at(index)? else {
            return Ok(false);
        };
        let Some(key) = self.universal.resolve(&data.key_clause) else {
            return Ok(false);
        };

        let plaintext = self.provider.decrypt_data(&data, &key)?;
        let inner = self.provider.parse_element(&plaintext)?;
        match &inner {
            HeaderElement::Signature(_)
            | HeaderElement::Token(_)
            | HeaderElement::SignatureConfirmation(_)
            | HeaderElement::DerivedKey(_)
            | HeaderElement::SecurityTokenReference(_) => {}
            other => {
                return Err(SecurityError::UnexpectedElement(format!(
                    "{} inside EncryptedData {}",
                    other.name(),
                    data.id
                )));
            }
        }
        self.record_decryption_key(&key)?;

        let mut entry = HeaderElementEntry::new(inner.clone());
        entry.encrypted = true;
        entry.encrypted_form = Some(data.clone());
        self.store.replace(index, entry)?;
        debug!(id = %data.id, inner = inner.name(), "Decrypted header element");

        match inner {
            HeaderElement::Token(token) => self.register_token(index, token)?,
            HeaderElement::DerivedKey(_) => {
                self.resolve_derived_key(index)?;
            }
            _ => {}
        }
        Ok(true)
    }

    fn record_decryption_key(&mut self, key: &Arc<SecurityToken>) -> Result<()> {
        let root = underlying_token(key);
        self.encryption_tracker
            .record_token(&root)
            .map_err(|_| SecurityError::EncryptionTokenMismatch)?;
        self.encryption_tracker.record_key_use(key.is_derived());
        Ok(())
    }

    /// Decrypt every part named by `list`; remember the rest for the
    /// completeness check.
    fn apply_reference_list(&mut self, list: &ReferenceList) -> Result<()> {
        self.order.on_process_reference_list()?;
        for uri in &list.data_references {
            let id = uri.trim_start_matches('#').to_string();
            if let Some(position) = self
                .parts
                .iter()
                .position(|p| p.encrypted_id() == Some(id.as_str()))
            {
                self.decrypt_part(position)?;
            }
            self.referenced_ids.push(id);
        }
        Ok(())
    }

    fn decrypt_part(&mut self, position: usize) -> Result<()> {
        let PartContent::Encrypted(data) = &self.parts[position].content else {
            return Ok(());
        };
        let data = data.clone();
        let key = self.universal.resolve(&data.key_clause).ok_or_else(|| {
            SecurityError::UnresolvedKeyReference {
                element: data.id.clone(),
                clause: data.key_clause.to_string(),
            }
        })?;
        let plaintext = self.provider.decrypt_data(&data, &key)?;
        self.record_decryption_key(&key)?;

        let part = &mut self.parts[position];
        debug!(part = %part.name, encrypted_id = %data.id, "Decrypted message part");
        part.content = PartContent::Plain(plaintext);
        self.part_encrypted_forms.insert(part.id.clone(), data);
        Ok(())
    }

    // =========================================================================
    // PROCESSING
    // =========================================================================

    /// Lax processing pass over one resolved entry.
    fn process_entry(&mut self, index: usize) -> Result<()> {
        match self.element_at(index)? {
            HeaderElement::Signature(_) => self.process_signature(index),
            HeaderElement::ReferenceList(list) => self.apply_reference_list(&list),
            HeaderElement::EncryptedKey(key) => match &key.reference_list {
                Some(list) => self.apply_reference_list(list),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// The first signature is primary; later ones endorse it when the
    /// policy expects endorsing tokens.
    fn process_signature(&mut self, index: usize) -> Result<()> {
        let entry = self
            .store
            .get(index)
            .ok_or_else(|| SecurityError::UnexpectedElement(format!("slot {index}")))?;
        let HeaderElement::Signature(signature) = &entry.element else {
            return Err(SecurityError::UnexpectedElement(entry.element.name().to_string()));
        };
        let (signature, encrypted) = (signature.clone(), entry.encrypted);

        if self.store.primary_signature().is_none() || !self.policy.expects_endorsing_tokens() {
            self.process_primary_signature(index, signature, encrypted)
        } else {
            self.process_endorsing_signature(index, signature)
        }
    }

    fn process_primary_signature(
        &mut self,
        index: usize,
        signature: Signature,
        encrypted: bool,
    ) -> Result<()> {
        self.order.on_process_signature(encrypted)?;

        let key = match self.primary.resolve(&signature.key_clause) {
            Some(key) => key,
            None if self.universal.resolve(&signature.key_clause).is_some() => {
                return Err(SecurityError::SignatureKeyNotPrimary(signature.id));
            }
            None => {
                return Err(SecurityError::UnresolvedKeyReference {
                    element: signature.id,
                    clause: signature.key_clause.to_string(),
                });
            }
        };
        self.provider
            .verify_signature(&signature.signed_info, &signature.value, &key)?;

        let root = underlying_token(&key);
        self.signature_tracker.record_token(&root)?;
        self.signature_tracker.record_key_use(key.is_derived());

        if let Some(entry) = self.store.get_mut(index) {
            entry.binding_mode = BindingMode::Primary;
        }
        self.defer_references(index, &signature);
        debug!(id = %signature.id, encrypted, key = %key.id, "Primary signature verified");
        Ok(())
    }

    fn process_endorsing_signature(&mut self, index: usize, signature: Signature) -> Result<()> {
        let key = self.universal.resolve(&signature.key_clause).ok_or_else(|| {
            SecurityError::UnresolvedKeyReference {
                element: signature.id.clone(),
                clause: signature.key_clause.to_string(),
            }
        })?;
        let root = underlying_token(&key);

        let covers_primary = self.store.primary_signature().is_some_and(|primary| {
            signature
                .signed_info
                .references
                .iter()
                .any(|r| primary.is_known_as(r.target_id()))
        });
        if !covers_primary {
            return Err(SecurityError::EndorsingSignatureMissingPrimary(signature.id));
        }

        let expected = self.supporting.iter().any(|t| {
            t.spec()
                .is_some_and(|s| s.mode.is_endorsing() && s.token_type == root.token_type)
        });
        if !expected {
            return Err(SecurityError::EndorsingTokenNotExpected(signature.id));
        }
        if self.endorsements.iter().any(|e| same_token(&e.token, &root)) {
            return Err(SecurityError::DuplicateEndorsingSignature(root.id.clone()));
        }
        self.provider
            .verify_signature(&signature.signed_info, &signature.value, &key)?;
        self.endorsements.push(Endorsement {
            token: Arc::clone(&root),
            derived: key.is_derived(),
        });

        if let Some(entry) = self.store.get_mut(index) {
            entry.binding_mode = BindingMode::Endorsing;
        }
        self.defer_references(index, &signature);
        debug!(id = %signature.id, token = %root.id, "Endorsing signature verified");
        Ok(())
    }

    fn defer_references(&mut self, signature_index: usize, signature: &Signature) {
        self.deferred
            .extend(signature.signed_info.references.iter().map(|reference| DeferredReference {
                signature_index,
                reference: reference.clone(),
            }));
    }
}

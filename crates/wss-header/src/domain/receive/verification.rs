//! Post-processing checks run once every element has been read.

use std::collections::HashSet;
use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::debug;
use wss_types::{HeaderElement, MessagePart, SecurityHeaderLayout, SecurityToken};

use super::ReceiveContext;
use super::passes::same_token;
use crate::domain::element_store::{BindingMode, ElementCategory, HeaderElementEntry};
use crate::domain::errors::{Result, SecurityError};
use crate::domain::token_tracker::{SpecFit, TokenTracker, TokenUsage};

impl ReceiveContext<'_> {
    // =========================================================================
    // COVERAGE HELPERS
    // =========================================================================

    fn entry_signed(&self, entry: &HeaderElementEntry) -> bool {
        entry.id().is_some_and(|id| self.signed_ids.contains(id))
            || entry
                .encrypted_form_id()
                .is_some_and(|id| self.signed_ids.contains(id))
    }

    fn part_signed(&self, part: &MessagePart) -> bool {
        self.signed_ids.contains(&part.id)
            || self
                .part_encrypted_forms
                .get(&part.id)
                .is_some_and(|form| self.signed_ids.contains(&form.id))
    }

    fn part_decrypted(&self, part: &MessagePart) -> bool {
        self.part_encrypted_forms.contains_key(&part.id)
    }

    /// Bytes a signature reference to `id` was computed over.
    fn referenced_bytes(&self, id: &str, uri: &str) -> Result<Vec<u8>> {
        if let Some(entry) = self.store.find(id) {
            let bytes = match &entry.encrypted_form {
                Some(form) if form.id == id => self
                    .provider
                    .canonicalize(&HeaderElement::EncryptedData(form.clone()))?,
                _ => self.provider.canonicalize(&entry.element)?,
            };
            return Ok(bytes);
        }
        if let Some(part) = self.parts.iter().find(|p| p.id == id) {
            return part
                .plaintext()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| SecurityError::DecryptionIncomplete(id.to_string()));
        }
        if let Some(form) = self.part_encrypted_forms.values().find(|f| f.id == id) {
            return Ok(self
                .provider
                .canonicalize(&HeaderElement::EncryptedData(form.clone()))?);
        }
        Err(SecurityError::UnknownReference(uri.to_string()))
    }

    // =========================================================================
    // CHECKS, IN ORDER
    // =========================================================================

    pub(super) fn verify_timestamp_position(&self) -> Result<()> {
        let Some(index) = self.timestamp_index else {
            return Ok(());
        };
        match self.policy.layout {
            SecurityHeaderLayout::Strict | SecurityHeaderLayout::LaxTimestampFirst
                if index != 0 =>
            {
                Err(SecurityError::TimestampNotFirst)
            }
            SecurityHeaderLayout::LaxTimestampLast if index + 1 != self.store.len() => {
                Err(SecurityError::TimestampNotLast)
            }
            _ => Ok(()),
        }
    }

    /// Digest every reference of every verified signature.
    pub(super) fn verify_references(&mut self) -> Result<()> {
        let deferred = std::mem::take(&mut self.deferred);
        for item in &deferred {
            self.check_deadline()?;
            let id = item.reference.target_id();
            let data = self.referenced_bytes(id, &item.reference.uri)?;
            let digest = self
                .provider
                .compute_digest(&item.reference.digest_method, &data)?;
            if !bool::from(digest.as_slice().ct_eq(item.reference.digest_value.as_slice())) {
                return Err(SecurityError::DigestMismatch(item.reference.uri.clone()));
            }
            let by_primary = self
                .store
                .get(item.signature_index)
                .is_some_and(|e| e.binding_mode == BindingMode::Primary);
            if by_primary {
                self.signed_ids.insert(id.to_string());
            }
        }
        debug!(references = deferred.len(), signed = self.signed_ids.len(), "References verified");
        Ok(())
    }

    /// Every referenced item was decrypted and every decrypted item was
    /// referenced.
    pub(super) fn verify_decryption_completeness(&self) -> Result<()> {
        for id in &self.referenced_ids {
            let part_done = self.part_encrypted_forms.values().any(|f| &f.id == id);
            let header_done = self
                .store
                .find(id)
                .is_some_and(|e| e.encrypted_form_id() == Some(id.as_str()));
            if !part_done && !header_done {
                return Err(SecurityError::DecryptionIncomplete(id.clone()));
            }
        }

        let referenced: HashSet<&str> = self.referenced_ids.iter().map(String::as_str).collect();
        for entry in self.store.iter() {
            if let Some(id) = entry.encrypted_form_id() {
                if !referenced.contains(id) {
                    return Err(SecurityError::UnreferencedEncryptedData(id.to_string()));
                }
            }
        }
        if let Some(id) = self.parts.iter().find_map(MessagePart::encrypted_id) {
            return Err(SecurityError::UnreferencedEncryptedData(id.to_string()));
        }
        Ok(())
    }

    /// After a downgrade from encrypting the signature, a signature over
    /// encrypted content must still not travel in the clear.
    pub(super) fn verify_signature_encryption(&self) -> Result<()> {
        if !self.downgraded {
            return Ok(());
        }
        let signed_and_encrypted = self
            .parts
            .iter()
            .any(|p| self.part_decrypted(p) && self.part_signed(p))
            || self
                .store
                .iter()
                .any(|e| e.encrypted && self.entry_signed(e));
        if signed_and_encrypted && self.order.unencrypted_signature_count() > 0 {
            return Err(SecurityError::SignatureNotEncrypted);
        }
        Ok(())
    }

    /// Bind every non-primary token to the supporting spec its observed
    /// protection fits best. Exact fits are bound first across all tokens,
    /// so the order specs are listed in does not decide the outcome.
    pub(super) fn bind_supporting_tokens(&mut self) -> Result<()> {
        let mut observed: Vec<(Arc<SecurityToken>, TokenUsage, bool)> = Vec::new();
        for entry in self.store.iter() {
            if entry.category() != ElementCategory::Token {
                continue;
            }
            let Some(token) = &entry.token else {
                continue;
            };
            if self.primary_token.as_ref().is_some_and(|p| Arc::ptr_eq(p, token)) {
                continue;
            }
            let usage = TokenUsage {
                signed: self.entry_signed(entry),
                encrypted: entry.encrypted,
                endorsing: false,
            };
            observed.push((Arc::clone(token), usage, false));
        }
        for endorsement in &self.endorsements {
            match observed.iter_mut().find(|(t, _, _)| same_token(t, &endorsement.token)) {
                Some((_, usage, derived)) => {
                    usage.endorsing = true;
                    *derived = endorsement.derived;
                }
                None => {
                    // Endorsing token known only out of band.
                    let usage = TokenUsage {
                        endorsing: true,
                        ..TokenUsage::default()
                    };
                    observed.push((Arc::clone(&endorsement.token), usage, endorsement.derived));
                }
            }
        }

        let mut bound = vec![false; observed.len()];
        for fit in SpecFit::ALL {
            for (slot, (token, usage, derived)) in observed.iter().enumerate() {
                // A certificate nothing was done with is an encryption or
                // wrapping candidate, not a supporting token.
                let unused_certificate =
                    token.has_asymmetric_key() && *usage == TokenUsage::default();
                if bound[slot] || (fit == SpecFit::Partial && unused_certificate) {
                    continue;
                }
                let tracker = self.supporting.iter_mut().find(|t| {
                    t.token().is_none()
                        && t.spec().is_some_and(|s| {
                            s.token_type == token.token_type && s.fit(*usage) == Some(fit)
                        })
                });
                if let Some(tracker) = tracker {
                    tracker.bind(token, *usage, *derived)?;
                    bound[slot] = true;
                    debug!(id = %token.id, ?fit, "Supporting token bound");
                }
            }
        }

        for ((token, usage, _), bound) in observed.iter().zip(bound) {
            if bound {
                continue;
            }
            if usage.endorsing {
                return Err(SecurityError::EndorsingTokenNotExpected(token.id.clone()));
            }
            if !token.has_asymmetric_key() {
                return Err(SecurityError::UnexpectedToken {
                    id: token.id.clone(),
                    token_type: token.token_type,
                });
            }
            debug!(id = %token.id, "Certificate not bound to a supporting token");
        }
        Ok(())
    }

    /// Required parts and the timestamp are covered.
    pub(super) fn verify_protection(&self) -> Result<()> {
        if !self.policy.require_message_protection {
            return Ok(());
        }
        for name in &self.policy.signed_parts {
            if let Some(part) = self.parts.iter().find(|p| &p.name == name) {
                if !self.part_signed(part) {
                    return Err(SecurityError::PartNotSigned(name.clone()));
                }
            }
        }
        for name in &self.policy.encrypted_parts {
            if let Some(part) = self.parts.iter().find(|p| &p.name == name) {
                if !self.part_decrypted(part) {
                    return Err(SecurityError::PartNotEncrypted(name.clone()));
                }
            }
        }
        if let Some(entry) = self.timestamp_index.and_then(|i| self.store.get(i)) {
            if !self.entry_signed(entry) {
                return Err(SecurityError::TimestampNotSigned);
            }
        }
        Ok(())
    }

    pub(super) fn verify_token_identity(&self) -> Result<()> {
        if !self.policy.require_same_signing_and_encryption_token {
            return Ok(());
        }
        match (self.signature_tracker.token(), self.encryption_tracker.token()) {
            (Some(signing), Some(encryption)) if !Arc::ptr_eq(signing, encryption) => {
                Err(SecurityError::SignatureEncryptionTokenMismatch)
            }
            _ => Ok(()),
        }
    }

    pub(super) fn verify_derived_keys(&self) -> Result<()> {
        if !self.policy.require_derived_keys {
            return Ok(());
        }
        let needs_derivation = |tracker: &TokenTracker| {
            tracker.key_uses() > 0
                && tracker.token().is_some_and(|t| !t.has_asymmetric_key())
                && !tracker.is_derived_from()
        };
        if needs_derivation(&self.signature_tracker) {
            return Err(SecurityError::PrimarySignatureNotDerived);
        }
        if needs_derivation(&self.encryption_tracker) {
            return Err(SecurityError::PrimaryEncryptionNotDerived);
        }
        Ok(())
    }

    /// Reject a primary signature value seen before, then check freshness.
    pub(super) fn detect_replay(&self) -> Result<()> {
        if !self.policy.detect_replays {
            return Ok(());
        }
        let cache = self
            .engine
            .nonce_cache
            .as_ref()
            .ok_or(SecurityError::MissingCollaborator("nonce cache"))?;
        let timestamp = self.timestamp().ok_or(SecurityError::MissingTimestamp)?;
        let nonce = self
            .primary_signature_value()
            .ok_or(SecurityError::MissingPrimarySignature)?;

        if !cache.try_add_nonce(nonce)? {
            return Err(SecurityError::ReplayDetected);
        }

        let window = self.policy.replay_window.as_secs() + self.policy.max_clock_skew.as_secs();
        if timestamp.created.saturating_add(window) < self.now {
            return Err(SecurityError::TimestampStale {
                created: timestamp.created,
                now: self.now,
            });
        }
        Ok(())
    }

    pub(super) fn verify_supporting_tokens(&self) -> Result<()> {
        for tracker in &self.supporting {
            tracker.verify(self.policy.require_message_protection)?;
        }
        Ok(())
    }

    /// Received confirmations must echo the request's signature values.
    pub(super) fn verify_signature_confirmations(&self) -> Result<()> {
        let received: Vec<(&HeaderElementEntry, Option<&Vec<u8>>)> = self
            .store
            .iter()
            .filter_map(|e| match &e.element {
                HeaderElement::SignatureConfirmation(sc) => Some((e, sc.value.as_ref())),
                _ => None,
            })
            .collect();

        let Some(expected) = &self.engine.expected_signature_confirmations else {
            return match received.first() {
                Some((entry, _)) => Err(SecurityError::UnexpectedSignatureConfirmation(
                    entry.id().unwrap_or_default().to_string(),
                )),
                None => Ok(()),
            };
        };

        for (entry, _) in &received {
            if !self.entry_signed(entry) {
                return Err(SecurityError::SignatureConfirmationNotSigned(
                    entry.id().unwrap_or_default().to_string(),
                ));
            }
        }

        if expected.is_empty() {
            return match received.as_slice() {
                [(_, None)] => Ok(()),
                _ => Err(SecurityError::SignatureConfirmationMismatch),
            };
        }

        let mut remaining: Vec<&Vec<u8>> = expected.iter().collect();
        for (_, value) in &received {
            let value = (*value).ok_or(SecurityError::SignatureConfirmationMismatch)?;
            let position = remaining
                .iter()
                .position(|v| bool::from(v.as_slice().ct_eq(value.as_slice())))
                .ok_or(SecurityError::SignatureConfirmationMismatch)?;
            remaining.swap_remove(position);
        }
        if !remaining.is_empty() {
            return Err(SecurityError::SignatureConfirmationMismatch);
        }
        Ok(())
    }
}

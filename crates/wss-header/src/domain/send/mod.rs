//! # Send Engine
//!
//! Builds the security header of one outgoing message.
//!
//! ## Lifecycle
//!
//! ```text
//! Configuring ──start()──→ Started ──complete()──→ Completed
//! ```
//!
//! `start` materializes every key and assigns every wire id: timestamp,
//! wrapped session key, derived keys, reserved ids of encrypted items.
//! `complete` signs, encrypts and serializes. In sign-then-encrypt order
//! the primary signature is computed over plaintext and encrypted
//! afterwards; endorsing signatures always come last, over the primary
//! signature as it appears on the wire.

mod serialize;

use std::sync::Arc;

use tracing::{debug, info};
use wss_types::{
    algorithms, EncryptedData, EncryptedKey, HeaderElement, KeyBytes, KeyIdentifierClause,
    MessageProtectionOrder, PartContent, ReferenceList, SecurityHeaderLayout, SecurityToken,
    SecurityTokenReference, Signature, SignatureConfirmation, SignatureReference, SignedInfo,
    SoapMessage, SupportingTokenMode, Timestamp,
};
use zeroize::Zeroizing;

use crate::domain::derived_keys::new_derived_key;
use crate::domain::errors::{ConfigError, Result, SecurityError};
use crate::domain::id_generator::IdGenerator;
use crate::domain::policy::{KeyReferenceStyle, SendPolicy, TokenInclusion};
use crate::ports::outbound::CryptoProvider;

use serialize::{HeaderSection, OutgoingHeader};

/// Length in bytes of a generated session key.
pub const SESSION_KEY_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Configuring,
    Started,
    Completed,
}

impl SendState {
    fn name(self) -> &'static str {
        match self {
            Self::Configuring => "Configuring",
            Self::Started => "Started",
            Self::Completed => "Completed",
        }
    }
}

/// A supporting token to attach to the outgoing message.
#[derive(Debug, Clone)]
pub struct OutgoingSupportingToken {
    pub token: Arc<SecurityToken>,
    pub mode: SupportingTokenMode,
    /// Endorse through a key derived from the token.
    pub derive_keys: bool,
}

/// A secured message and what the sender must remember about it.
#[derive(Debug, Clone)]
pub struct SecuredMessage {
    pub message: SoapMessage,
    /// Expected back in the reply's signature confirmation.
    pub primary_signature_value: Option<Vec<u8>>,
    /// Session key generated for this message, when one was wrapped.
    pub wrapped_key: Option<Arc<SecurityToken>>,
}

// =============================================================================
// PLAN
// =============================================================================

/// The key an operation uses and how elements reference it.
#[derive(Debug, Clone)]
struct KeyUse {
    token: Arc<SecurityToken>,
    clause: KeyIdentifierClause,
}

#[derive(Debug)]
struct SupportingPlan {
    token: OutgoingSupportingToken,
    token_index: usize,
    /// Reserved id of the encrypted token element.
    encrypted_id: Option<String>,
    endorsing_key: Option<KeyUse>,
    signature_id: Option<String>,
}

/// Everything `start` decided, consumed by `complete`.
#[derive(Debug)]
struct SendPlan {
    message: SoapMessage,
    ids: IdGenerator,
    header: OutgoingHeader,
    timestamp: Option<usize>,
    wrapped_key: Option<Arc<SecurityToken>>,
    encryption_token_clause: Option<KeyIdentifierClause>,
    signing: Option<KeyUse>,
    signing_token_reference: Option<usize>,
    signature_id: Option<String>,
    signature_encrypted_id: Option<String>,
    encryption: Option<KeyUse>,
    /// Part name to reserved `EncryptedData` id.
    encrypted_parts: Vec<(String, String)>,
    supporting: Vec<SupportingPlan>,
    /// Confirmation slot and its reserved encrypted id.
    confirmations: Vec<(usize, Option<String>)>,
    primary_signature: Option<usize>,
    reference_ids: Vec<String>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Single-use send-side security header builder.
pub struct SendEngine {
    policy: SendPolicy,
    provider: Arc<dyn CryptoProvider>,
    state: SendState,
    id_prefix: Option<String>,
    signing_token: Option<Arc<SecurityToken>>,
    encryption_token: Option<Arc<SecurityToken>>,
    wrap_key: bool,
    supporting: Vec<OutgoingSupportingToken>,
    signature_confirmations: Option<Vec<Vec<u8>>>,
    plan: Option<SendPlan>,
}

impl SendEngine {
    pub fn new(policy: SendPolicy, provider: Arc<dyn CryptoProvider>) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            provider,
            state: SendState::Configuring,
            id_prefix: None,
            signing_token: None,
            encryption_token: None,
            wrap_key: false,
            supporting: Vec::new(),
            signature_confirmations: None,
            plan: None,
        })
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    fn ensure_state(&self, expected: SendState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SecurityError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    pub fn set_signing_token(&mut self, token: Arc<SecurityToken>) -> Result<()> {
        self.ensure_state(SendState::Configuring, "set_signing_token")?;
        self.signing_token = Some(token);
        Ok(())
    }

    /// Encrypt for `token`. With `wrap_key` a fresh session key is wrapped
    /// for `token` and used instead; without a signing token the session
    /// key also signs.
    pub fn set_encryption_token(
        &mut self,
        token: Arc<SecurityToken>,
        wrap_key: bool,
    ) -> Result<()> {
        self.ensure_state(SendState::Configuring, "set_encryption_token")?;
        self.encryption_token = Some(token);
        self.wrap_key = wrap_key;
        Ok(())
    }

    pub fn add_supporting_token(
        &mut self,
        token: Arc<SecurityToken>,
        mode: SupportingTokenMode,
        derive_keys: bool,
    ) -> Result<()> {
        self.ensure_state(SendState::Configuring, "add_supporting_token")?;
        self.supporting.push(OutgoingSupportingToken {
            token,
            mode,
            derive_keys,
        });
        Ok(())
    }

    /// Confirm the signatures of the request being answered. An empty list
    /// emits one confirmation without a value.
    pub fn set_signature_confirmations(&mut self, values: Vec<Vec<u8>>) -> Result<()> {
        self.ensure_state(SendState::Configuring, "set_signature_confirmations")?;
        if !self.provider.security_version().supports_signature_confirmation() {
            return Err(ConfigError::SignatureConfirmationUnsupported.into());
        }
        self.signature_confirmations = Some(values);
        Ok(())
    }

    pub fn set_id_prefix(&mut self, prefix: impl Into<String>) -> Result<()> {
        self.ensure_state(SendState::Configuring, "set_id_prefix")?;
        self.id_prefix = Some(prefix.into());
        Ok(())
    }

    /// Start securing `message` at Unix time `now`.
    pub fn start(&mut self, message: SoapMessage, now: u64) -> Result<()> {
        self.ensure_state(SendState::Configuring, "start")?;
        self.validate_configuration(&message)?;

        let ids = match &self.id_prefix {
            Some(prefix) => IdGenerator::with_prefix(prefix.clone()),
            None if self.policy.unique_id_prefix => IdGenerator::with_unique_prefix(),
            None => IdGenerator::new(),
        };
        let mut plan = SendPlan {
            message,
            ids,
            header: OutgoingHeader::new(),
            timestamp: None,
            wrapped_key: None,
            encryption_token_clause: None,
            signing: None,
            signing_token_reference: None,
            signature_id: None,
            signature_encrypted_id: None,
            encryption: None,
            encrypted_parts: Vec::new(),
            supporting: Vec::new(),
            confirmations: Vec::new(),
            primary_signature: None,
            reference_ids: Vec::new(),
        };

        self.start_timestamp(&mut plan, now)?;
        self.start_key_wrap(&mut plan)?;
        if self.policy.protection_order.sign_then_encrypt() {
            self.start_signature(&mut plan)?;
            self.start_encryption(&mut plan)?;
        } else {
            self.start_encryption(&mut plan)?;
            self.start_signature(&mut plan)?;
        }
        self.start_supporting_tokens(&mut plan)?;
        self.start_confirmations(&mut plan)?;

        debug!(elements = plan.header.len(), ids = plan.ids.issued(), "Send header started");
        self.plan = Some(plan);
        self.state = SendState::Started;
        Ok(())
    }

    /// Sign, encrypt and serialize the started message.
    pub fn complete(&mut self) -> Result<SecuredMessage> {
        self.ensure_state(SendState::Started, "complete")?;
        let mut plan = self
            .plan
            .take()
            .ok_or(SecurityError::MissingCollaborator("started message"))?;
        self.state = SendState::Completed;

        self.remove_signature_encryption_if_appropriate(&mut plan);
        let encrypt_signature = plan.signature_encrypted_id.is_some();
        if self.policy.protection_order.sign_then_encrypt() {
            self.sign_primary(&mut plan)?;
            self.encrypt(&mut plan, encrypt_signature)?;
        } else {
            self.encrypt(&mut plan, false)?;
            self.sign_primary(&mut plan)?;
        }
        self.endorse(&mut plan)?;

        let primary_signature_value = match plan.primary_signature {
            Some(index) => match &plan.header.get(index)?.element {
                HeaderElement::Signature(signature) => Some(signature.value.clone()),
                _ => None,
            },
            None => None,
        };
        let mut message = plan.message;
        message.security.elements = plan.header.into_elements();

        info!(
            elements = message.security.elements.len(),
            signed = primary_signature_value.is_some(),
            encrypt_signature,
            "Security header built"
        );
        Ok(SecuredMessage {
            message,
            primary_signature_value,
            wrapped_key: plan.wrapped_key,
        })
    }

    /// `start` followed by `complete`.
    pub fn secure(&mut self, message: SoapMessage, now: u64) -> Result<SecuredMessage> {
        self.start(message, now)?;
        self.complete()
    }

    // =========================================================================
    // START
    // =========================================================================

    fn validate_configuration(&self, message: &SoapMessage) -> Result<()> {
        let can_sign = self.signing_token.is_some() || self.wrap_key;
        let needs_signature = !self.policy.signed_parts.is_empty()
            || self.supporting.iter().any(|s| s.mode.is_endorsing())
            || self.signature_confirmations.is_some();
        if needs_signature && !can_sign {
            return Err(SecurityError::MissingCollaborator("signing token"));
        }

        let needs_encryption = self
            .policy
            .encrypted_parts
            .iter()
            .any(|name| message.part_by_name(name).is_some())
            || self
                .supporting
                .iter()
                .any(|s| s.mode == SupportingTokenMode::SignedEncrypted);
        if needs_encryption && self.encryption_token.is_none() {
            return Err(SecurityError::MissingCollaborator("encryption token"));
        }
        Ok(())
    }

    /// How an element references `token`.
    fn reference_clause(&self, token: &SecurityToken, included: bool) -> KeyIdentifierClause {
        if included {
            return KeyIdentifierClause::LocalId(token.id.clone());
        }
        match self.policy.key_reference_style {
            KeyReferenceStyle::LocalId => KeyIdentifierClause::LocalId(token.id.clone()),
            KeyReferenceStyle::Thumbprint => match &token.thumbprint {
                Some(thumbprint) => KeyIdentifierClause::Thumbprint(thumbprint.clone()),
                None => KeyIdentifierClause::External(token.id.clone()),
            },
            KeyReferenceStyle::External => KeyIdentifierClause::External(token.id.clone()),
        }
    }

    fn signing_token_included(&self) -> bool {
        self.signing_token.is_some()
            && self.policy.signing_token_inclusion == TokenInclusion::Always
    }

    /// Emit the encryption token when asked to, and decide its clause.
    fn include_encryption_token(
        &self,
        plan: &mut SendPlan,
        token: &Arc<SecurityToken>,
    ) -> Result<KeyIdentifierClause> {
        if let Some(clause) = &plan.encryption_token_clause {
            return Ok(clause.clone());
        }
        let is_signing_token = self
            .signing_token
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, token));
        let included = if is_signing_token {
            self.signing_token_included()
        } else if self.policy.encryption_token_inclusion == TokenInclusion::Always {
            plan.header.push(
                HeaderSection::EncryptionToken,
                HeaderElement::Token((**token).clone()),
            )?;
            true
        } else {
            false
        };
        let clause = self.reference_clause(token, included);
        plan.encryption_token_clause = Some(clause.clone());
        Ok(clause)
    }

    fn start_timestamp(&self, plan: &mut SendPlan, now: u64) -> Result<()> {
        if !self.policy.include_timestamp {
            return Ok(());
        }
        let timestamp = Timestamp {
            id: plan.ids.next_id(),
            created: now,
            expires: Some(now + self.policy.timestamp_validity.as_secs()),
        };
        let section = if self.policy.layout == SecurityHeaderLayout::LaxTimestampLast {
            HeaderSection::TimestampLast
        } else {
            HeaderSection::Timestamp
        };
        plan.timestamp = Some(plan.header.push(section, HeaderElement::Timestamp(timestamp))?);
        Ok(())
    }

    /// Generate and wrap the session key.
    fn start_key_wrap(&self, plan: &mut SendPlan) -> Result<()> {
        let Some(wrapping) = self.encryption_token.as_ref().filter(|_| self.wrap_key) else {
            return Ok(());
        };
        let wrapping_clause = self.include_encryption_token(plan, wrapping)?;
        let session = KeyBytes::new(self.provider.generate_key_material(SESSION_KEY_LENGTH)?);
        let cipher_value = self.provider.wrap_key(&session, wrapping)?;

        let id = plan.ids.next_id();
        plan.header.push(
            HeaderSection::WrappedKey,
            HeaderElement::EncryptedKey(EncryptedKey {
                id: id.clone(),
                wrapping_clause,
                cipher_value,
                reference_list: None,
            }),
        )?;
        plan.wrapped_key = Some(Arc::new(SecurityToken::wrapped_key(
            id,
            session,
            Arc::clone(wrapping),
        )));
        Ok(())
    }

    /// Derive from `base` when the policy asks for derived keys.
    fn key_use(
        &self,
        plan: &mut SendPlan,
        base: Arc<SecurityToken>,
        clause: KeyIdentifierClause,
        derive: bool,
        section: HeaderSection,
    ) -> Result<KeyUse> {
        if !derive || base.has_asymmetric_key() {
            return Ok(KeyUse { token: base, clause });
        }
        let (element, derived) = new_derived_key(
            self.provider.as_ref(),
            &mut plan.ids,
            &base,
            clause,
            self.policy.derived_key_length,
        )?;
        plan.header.push(section, HeaderElement::DerivedKey(element))?;
        Ok(KeyUse {
            clause: KeyIdentifierClause::LocalId(derived.id.clone()),
            token: derived,
        })
    }

    fn start_signature(&self, plan: &mut SendPlan) -> Result<()> {
        let (base, clause) = match (&self.signing_token, &plan.wrapped_key) {
            (Some(token), _) => {
                let included = self.signing_token_included();
                let clause = self.reference_clause(token, included);
                if included {
                    let index = plan.header.push(
                        HeaderSection::SigningToken,
                        HeaderElement::Token((**token).clone()),
                    )?;
                    if self.policy.protect_tokens {
                        plan.signing_token_reference = Some(index);
                    }
                } else if self.policy.protect_tokens {
                    let reference = SecurityTokenReference {
                        id: plan.ids.next_id(),
                        clause: clause.clone(),
                    };
                    plan.signing_token_reference = Some(plan.header.push(
                        HeaderSection::SigningToken,
                        HeaderElement::SecurityTokenReference(reference),
                    )?);
                }
                (Arc::clone(token), clause)
            }
            (None, Some(wrapped)) => (
                Arc::clone(wrapped),
                KeyIdentifierClause::LocalId(wrapped.id.clone()),
            ),
            (None, None) => return Ok(()),
        };

        let section = if self.signing_token.is_some() {
            HeaderSection::SigningDerivedKey
        } else {
            HeaderSection::WrappedKeyDerivedKey
        };
        let key = self.key_use(plan, base, clause, self.policy.derive_keys, section)?;
        plan.signing = Some(key);
        plan.signature_id = Some(plan.ids.next_id());
        Ok(())
    }

    fn start_encryption(&self, plan: &mut SendPlan) -> Result<()> {
        let Some(token) = &self.encryption_token else {
            return Ok(());
        };
        let (base, clause) = match plan.wrapped_key.clone() {
            Some(wrapped) => {
                let clause = KeyIdentifierClause::LocalId(wrapped.id.clone());
                (wrapped, clause)
            }
            None => (Arc::clone(token), self.include_encryption_token(plan, token)?),
        };
        let section = if plan.wrapped_key.is_some() {
            HeaderSection::WrappedKeyDerivedKey
        } else {
            HeaderSection::EncryptionDerivedKey
        };
        let key = self.key_use(plan, base, clause, self.policy.derive_keys, section)?;
        plan.encryption = Some(key);

        for name in &self.policy.encrypted_parts {
            if plan.message.part_by_name(name).is_some() {
                let id = plan.ids.next_id();
                plan.encrypted_parts.push((name.clone(), id));
            }
        }
        if self.policy.protection_order
            == MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature
            && plan.signature_id.is_some()
        {
            plan.signature_encrypted_id = Some(plan.ids.next_id());
        }
        Ok(())
    }

    fn start_supporting_tokens(&self, plan: &mut SendPlan) -> Result<()> {
        for supporting in &self.supporting {
            let section = match supporting.mode {
                SupportingTokenMode::Signed => HeaderSection::SignedSupportingToken,
                SupportingTokenMode::SignedEncrypted => HeaderSection::EncryptedSupportingToken,
                SupportingTokenMode::Endorsing => HeaderSection::EndorsingToken,
                SupportingTokenMode::SignedEndorsing => HeaderSection::SignedEndorsingToken,
            };
            let token_index = plan
                .header
                .push(section, HeaderElement::Token((*supporting.token).clone()))?;
            let encrypted_id = (supporting.mode == SupportingTokenMode::SignedEncrypted)
                .then(|| plan.ids.next_id());

            let (endorsing_key, signature_id) = if supporting.mode.is_endorsing() {
                let clause = KeyIdentifierClause::LocalId(supporting.token.id.clone());
                let key = self.key_use(
                    plan,
                    Arc::clone(&supporting.token),
                    clause,
                    supporting.derive_keys,
                    section,
                )?;
                (Some(key), Some(plan.ids.next_id()))
            } else {
                (None, None)
            };

            plan.supporting.push(SupportingPlan {
                token: supporting.clone(),
                token_index,
                encrypted_id,
                endorsing_key,
                signature_id,
            });
        }
        Ok(())
    }

    fn start_confirmations(&self, plan: &mut SendPlan) -> Result<()> {
        let Some(values) = &self.signature_confirmations else {
            return Ok(());
        };
        let values: Vec<Option<Vec<u8>>> = if values.is_empty() {
            vec![None]
        } else {
            values.iter().cloned().map(Some).collect()
        };
        let encryptable = plan.encryption.is_some()
            && self.policy.protection_order
                == MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature;

        for value in values {
            let confirmation = SignatureConfirmation {
                id: plan.ids.next_id(),
                value,
            };
            let index = plan.header.push(
                HeaderSection::SignatureConfirmation,
                HeaderElement::SignatureConfirmation(confirmation),
            )?;
            let encrypted_id = encryptable.then(|| plan.ids.next_id());
            plan.confirmations.push((index, encrypted_id));
        }
        Ok(())
    }

    // =========================================================================
    // COMPLETE
    // =========================================================================

    /// The primary signature is only worth encrypting when it could leak
    /// something: a digest of encrypted content, a basic token or a
    /// confirmation. Otherwise its reserved encrypted id is released.
    fn remove_signature_encryption_if_appropriate(&self, plan: &mut SendPlan) {
        if plan.signature_encrypted_id.is_none() {
            return;
        }
        let has_basic_tokens = plan
            .supporting
            .iter()
            .any(|s| s.token.mode == SupportingTokenMode::SignedEncrypted);
        let signed_and_encrypted = plan
            .encrypted_parts
            .iter()
            .any(|(name, _)| self.policy.signed_parts.iter().any(|signed| signed == name));
        if !has_basic_tokens && plan.confirmations.is_empty() && !signed_and_encrypted {
            debug!("Primary signature left unencrypted");
            plan.signature_encrypted_id = None;
        }
    }

    /// Reference to a header slot, through its encrypted form if it has one.
    fn reference_to_entry(&self, plan: &SendPlan, index: usize) -> Result<SignatureReference> {
        let entry = plan.header.get(index)?;
        let (id, bytes) = match &entry.encrypted_form {
            Some(form) => (
                form.id.clone(),
                self.provider
                    .canonicalize(&HeaderElement::EncryptedData(form.clone()))?,
            ),
            None => (
                entry.id().unwrap_or_default().to_string(),
                self.provider.canonicalize(&entry.element)?,
            ),
        };
        self.reference(&id, &bytes)
    }

    fn reference(&self, id: &str, bytes: &[u8]) -> Result<SignatureReference> {
        let digest_method = self.provider.digest_method();
        Ok(SignatureReference {
            uri: format!("#{id}"),
            digest_method: digest_method.to_string(),
            digest_value: self.provider.compute_digest(digest_method, bytes)?,
        })
    }

    fn sign(
        &self,
        key: &KeyUse,
        id: String,
        references: Vec<SignatureReference>,
    ) -> Result<Signature> {
        let signed_info = SignedInfo {
            canonicalization: algorithms::EXCLUSIVE_C14N.to_string(),
            signature_method: self.provider.signature_method(&key.token).to_string(),
            references,
        };
        let value = self.provider.compute_signature(&signed_info, &key.token)?;
        Ok(Signature {
            id,
            signed_info,
            value,
            key_clause: key.clause.clone(),
        })
    }

    fn sign_primary(&self, plan: &mut SendPlan) -> Result<()> {
        let (Some(key), Some(id)) = (plan.signing.clone(), plan.signature_id.clone()) else {
            return Ok(());
        };

        let mut references = Vec::new();
        if let Some(index) = plan.timestamp {
            references.push(self.reference_to_entry(plan, index)?);
        }
        for name in &self.policy.signed_parts {
            let Some(part) = plan.message.part_by_name(name) else {
                continue;
            };
            let reference = match &part.content {
                PartContent::Plain(bytes) => self.reference(&part.id, bytes)?,
                PartContent::Encrypted(data) => self.reference(
                    &data.id,
                    &self
                        .provider
                        .canonicalize(&HeaderElement::EncryptedData(data.clone()))?,
                )?,
            };
            references.push(reference);
        }
        if let Some(index) = plan.signing_token_reference {
            references.push(self.reference_to_entry(plan, index)?);
        }
        for supporting in plan.supporting.iter().filter(|s| s.token.mode.is_signed()) {
            references.push(self.reference_to_entry(plan, supporting.token_index)?);
        }
        for (index, _) in &plan.confirmations {
            references.push(self.reference_to_entry(plan, *index)?);
        }

        let signature = self.sign(&key, id, references)?;
        debug!(
            id = %signature.id,
            references = signature.signed_info.references.len(),
            "Primary signature computed"
        );
        plan.primary_signature = Some(
            plan.header
                .push(HeaderSection::PrimarySignature, HeaderElement::Signature(signature))?,
        );
        Ok(())
    }

    /// Encrypt a header slot in place under a reserved id.
    fn encrypt_entry(
        &self,
        plan: &mut SendPlan,
        index: usize,
        id: String,
        key: &KeyUse,
    ) -> Result<()> {
        let plaintext =
            Zeroizing::new(self.provider.canonicalize(&plan.header.get(index)?.element)?);
        let cipher_value = self.provider.encrypt_data(&plaintext, &key.token)?;
        let entry = plan.header.get_mut(index)?;
        entry.encrypted = true;
        entry.encrypted_form = Some(EncryptedData {
            id: id.clone(),
            key_clause: key.clause.clone(),
            cipher_value,
        });
        plan.reference_ids.push(id);
        Ok(())
    }

    fn encrypt(&self, plan: &mut SendPlan, encrypt_signature: bool) -> Result<()> {
        let Some(key) = plan.encryption.clone() else {
            return Ok(());
        };

        for (name, id) in plan.encrypted_parts.clone() {
            let Some(part) = plan.message.parts_mut().find(|p| p.name == name) else {
                continue;
            };
            let PartContent::Plain(plaintext) = &part.content else {
                continue;
            };
            let cipher_value = self.provider.encrypt_data(plaintext, &key.token)?;
            part.content = PartContent::Encrypted(EncryptedData {
                id: id.clone(),
                key_clause: key.clause.clone(),
                cipher_value,
            });
            plan.reference_ids.push(id);
        }

        let basic: Vec<(usize, String)> = plan
            .supporting
            .iter()
            .filter_map(|s| Some((s.token_index, s.encrypted_id.clone()?)))
            .collect();
        for (index, id) in basic {
            self.encrypt_entry(plan, index, id, &key)?;
        }

        if encrypt_signature {
            if let (Some(index), Some(id)) =
                (plan.primary_signature, plan.signature_encrypted_id.clone())
            {
                self.encrypt_entry(plan, index, id, &key)?;
            }
            let confirmations: Vec<(usize, String)> = plan
                .confirmations
                .iter()
                .filter_map(|(index, id)| Some((*index, id.clone()?)))
                .collect();
            for (index, id) in confirmations {
                self.encrypt_entry(plan, index, id, &key)?;
            }
        }

        if plan.reference_ids.is_empty() {
            return Ok(());
        }
        let section = if self.policy.protection_order.sign_then_encrypt() {
            HeaderSection::ReferenceListAfterSignature
        } else {
            HeaderSection::ReferenceListBeforeSignature
        };
        let list = ReferenceList {
            data_references: plan.reference_ids.iter().map(|id| format!("#{id}")).collect(),
        };
        plan.header.push(section, HeaderElement::ReferenceList(list))?;
        debug!(items = plan.reference_ids.len(), encrypt_signature, "Encrypted message content");
        Ok(())
    }

    /// Endorsing signatures cover the primary signature as emitted.
    fn endorse(&self, plan: &mut SendPlan) -> Result<()> {
        let endorsements: Vec<(KeyUse, String)> = plan
            .supporting
            .iter()
            .filter_map(|s| Some((s.endorsing_key.clone()?, s.signature_id.clone()?)))
            .collect();
        if endorsements.is_empty() {
            return Ok(());
        }
        let primary = plan
            .primary_signature
            .ok_or(SecurityError::MissingCollaborator("signing token"))?;
        let reference = self.reference_to_entry(plan, primary)?;

        for (key, id) in endorsements {
            let signature = self.sign(&key, id, vec![reference.clone()])?;
            debug!(id = %signature.id, token = %key.token.id, "Endorsing signature computed");
            plan.header
                .push(HeaderSection::EndorsingSignature, HeaderElement::Signature(signature))?;
        }
        Ok(())
    }
}

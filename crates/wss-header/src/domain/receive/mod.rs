//! # Receive Engine
//!
//! Parses, decrypts and verifies the security header of one incoming
//! message, then enforces the receive policy against what was found.
//!
//! ## Lifecycle
//!
//! ```text
//! Configuring ──process()──→ Processing ──→ Done
//! ```
//!
//! Setters are only accepted while `Configuring`. An engine processes
//! exactly one message; the message is consumed and nothing of it is
//! returned on failure.
//!
//! ## Passes
//!
//! - **Strict** layout: one forward pass. Every element is processed as it
//!   is read, encrypted header elements are decrypted on the spot.
//! - **Lax** layouts: a reading pass, then stub resolution and header
//!   decryption repeated to a fixed point, a final stub pass, and a
//!   processing pass over the stored entries in wire order.
//!
//! Reference digests are checked after all decryption has finished.

mod passes;
mod verification;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wss_types::{
    EncryptedData, HeaderElement, MessagePart, MessageProtectionOrder, SecurityToken,
    SignatureReference, SoapMessage, SupportingTokenMode, Timestamp,
};

use crate::domain::derived_keys::{max_derived_keys, DerivedKeyBudget};
use crate::domain::element_store::HeaderElementStore;
use crate::domain::errors::{ConfigError, Result, SecurityError};
use crate::domain::order_tracker::{OrderTracker, ReceiverProcessingOrder};
use crate::domain::policy::ReceivePolicy;
use crate::domain::resolver::TokenResolverMap;
use crate::domain::token_tracker::TokenTracker;
use crate::ports::outbound::{
    Claim, CryptoProvider, NonceCache, TokenAuthenticator, TokenResolver,
};

// =============================================================================
// PUBLIC TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Configuring,
    Processing,
    Done,
}

impl ReceiveState {
    fn name(self) -> &'static str {
        match self {
            Self::Configuring => "Configuring",
            Self::Processing => "Processing",
            Self::Done => "Done",
        }
    }
}

/// A supporting token found in a verified message.
#[derive(Debug, Clone)]
pub struct ReceivedSupportingToken {
    pub name: String,
    pub mode: SupportingTokenMode,
    pub token: Arc<SecurityToken>,
}

/// Outcome of a successfully verified message.
#[derive(Debug, Clone)]
pub struct VerifiedMessage {
    /// Protected headers, decrypted.
    pub headers: Vec<MessagePart>,
    /// Body, decrypted.
    pub body: MessagePart,
    pub timestamp: Option<Timestamp>,
    /// Token that keyed the primary signature (derived keys unwound).
    pub primary_token: Option<Arc<SecurityToken>>,
    pub primary_signature_value: Option<Vec<u8>>,
    pub supporting_tokens: Vec<ReceivedSupportingToken>,
    /// Confirmation values received, in wire order.
    pub signature_confirmations: Vec<Option<Vec<u8>>>,
    /// Claims produced by the token authenticator.
    pub claims: Vec<Claim>,
    pub processing_order: ReceiverProcessingOrder,
}

impl VerifiedMessage {
    pub fn supporting_token(&self, name: &str) -> Option<&ReceivedSupportingToken> {
        self.supporting_tokens.iter().find(|t| t.name == name)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Single-use receive-side security header processor.
pub struct ReceiveEngine {
    policy: ReceivePolicy,
    provider: Arc<dyn CryptoProvider>,
    state: ReceiveState,
    required_order: Option<MessageProtectionOrder>,
    nonce_cache: Option<Arc<dyn NonceCache>>,
    authenticator: Option<Arc<dyn TokenAuthenticator>>,
    out_of_band_resolver: Option<Arc<dyn TokenResolver>>,
    out_of_band_tokens: Vec<Arc<SecurityToken>>,
    expected_signing_token: Option<Arc<SecurityToken>>,
    expected_encryption_token: Option<Arc<SecurityToken>>,
    wrapping_token: Option<Arc<SecurityToken>>,
    expected_signature_confirmations: Option<Vec<Vec<u8>>>,
}

impl ReceiveEngine {
    pub fn new(policy: ReceivePolicy, provider: Arc<dyn CryptoProvider>) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            required_order: policy.required_order,
            policy,
            provider,
            state: ReceiveState::Configuring,
            nonce_cache: None,
            authenticator: None,
            out_of_band_resolver: None,
            out_of_band_tokens: Vec::new(),
            expected_signing_token: None,
            expected_encryption_token: None,
            wrapping_token: None,
            expected_signature_confirmations: None,
        })
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn policy(&self) -> &ReceivePolicy {
        &self.policy
    }

    fn ensure_configuring(&self, operation: &'static str) -> Result<()> {
        if self.state == ReceiveState::Configuring {
            Ok(())
        } else {
            Err(SecurityError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    /// Enforce `order` on the sign/decrypt sequence.
    pub fn set_required_order(&mut self, order: MessageProtectionOrder) -> Result<()> {
        self.ensure_configuring("set_required_order")?;
        self.required_order = Some(order);
        Ok(())
    }

    pub fn set_nonce_cache(&mut self, cache: Arc<dyn NonceCache>) -> Result<()> {
        self.ensure_configuring("set_nonce_cache")?;
        self.nonce_cache = Some(cache);
        Ok(())
    }

    pub fn set_token_authenticator(
        &mut self,
        authenticator: Arc<dyn TokenAuthenticator>,
    ) -> Result<()> {
        self.ensure_configuring("set_token_authenticator")?;
        self.authenticator = Some(authenticator);
        Ok(())
    }

    pub fn set_out_of_band_resolver(&mut self, resolver: Arc<dyn TokenResolver>) -> Result<()> {
        self.ensure_configuring("set_out_of_band_resolver")?;
        self.out_of_band_resolver = Some(resolver);
        Ok(())
    }

    /// A token known without being carried in the header. Out-of-band
    /// tokens may key the primary signature.
    pub fn add_out_of_band_token(&mut self, token: Arc<SecurityToken>) -> Result<()> {
        self.ensure_configuring("add_out_of_band_token")?;
        self.out_of_band_tokens.push(token);
        Ok(())
    }

    pub fn set_expected_signing_token(&mut self, token: Arc<SecurityToken>) -> Result<()> {
        self.ensure_configuring("set_expected_signing_token")?;
        self.expected_signing_token = Some(token);
        Ok(())
    }

    pub fn set_expected_encryption_token(&mut self, token: Arc<SecurityToken>) -> Result<()> {
        self.ensure_configuring("set_expected_encryption_token")?;
        self.expected_encryption_token = Some(token);
        Ok(())
    }

    /// Every `EncryptedKey` must be wrapped by `token`.
    pub fn set_wrapping_token(&mut self, token: Arc<SecurityToken>) -> Result<()> {
        self.ensure_configuring("set_wrapping_token")?;
        self.wrapping_token = Some(token);
        Ok(())
    }

    /// Signature values of the request this message replies to. An empty
    /// list expects a single confirmation without a value.
    pub fn set_expected_signature_confirmations(&mut self, values: Vec<Vec<u8>>) -> Result<()> {
        self.ensure_configuring("set_expected_signature_confirmations")?;
        if !self.provider.security_version().supports_signature_confirmation() {
            return Err(ConfigError::SignatureConfirmationUnsupported.into());
        }
        self.expected_signature_confirmations = Some(values);
        Ok(())
    }

    /// Process the security header of `message`.
    ///
    /// `now` is the current Unix time in seconds; `timeout` bounds the
    /// whole header processing.
    pub fn process(
        &mut self,
        message: SoapMessage,
        now: u64,
        timeout: Duration,
    ) -> Result<VerifiedMessage> {
        self.ensure_configuring("process")?;
        self.state = ReceiveState::Processing;

        let started = Instant::now();
        let result = self.run(message, now, started + timeout, timeout);
        self.state = ReceiveState::Done;

        match &result {
            Ok(verified) => info!(
                elapsed_us = started.elapsed().as_micros() as u64,
                supporting_tokens = verified.supporting_tokens.len(),
                order = ?verified.processing_order,
                "Security header accepted"
            ),
            Err(e) => warn!(error = %e, kind = ?e.kind(), "Security header rejected"),
        }
        result
    }

    fn run(
        &self,
        mut message: SoapMessage,
        now: u64,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<VerifiedMessage> {
        if self.policy.detect_replays && self.nonce_cache.is_none() {
            return Err(SecurityError::MissingCollaborator("nonce cache"));
        }

        let elements = std::mem::take(&mut message.security.elements);
        let mut cx = ReceiveContext::new(self, message, now, deadline, timeout)?;
        cx.configure_order();

        if self.policy.layout.is_strict() {
            cx.full_pass(elements)?;
        } else {
            cx.lax_passes(elements)?;
        }

        cx.verify_timestamp_position()?;
        cx.verify_references()?;
        cx.verify_decryption_completeness()?;
        cx.verify_signature_encryption()?;
        cx.bind_supporting_tokens()?;
        cx.verify_protection()?;
        cx.verify_token_identity()?;
        cx.verify_derived_keys()?;
        cx.detect_replay()?;
        cx.verify_supporting_tokens()?;
        cx.verify_signature_confirmations()?;
        Ok(cx.into_verified())
    }
}

// =============================================================================
// PER-MESSAGE CONTEXT
// =============================================================================

/// A reference whose digest is checked once decryption has finished.
#[derive(Debug, Clone)]
struct DeferredReference {
    signature_index: usize,
    reference: SignatureReference,
}

/// A verified endorsing signature and the token behind its key.
#[derive(Debug, Clone)]
struct Endorsement {
    token: Arc<SecurityToken>,
    derived: bool,
}

struct ReceiveContext<'a> {
    engine: &'a ReceiveEngine,
    policy: &'a ReceivePolicy,
    provider: &'a dyn CryptoProvider,
    now: u64,
    deadline: Instant,
    timeout: Duration,
    /// Protected headers followed by the body.
    parts: Vec<MessagePart>,
    store: HeaderElementStore,
    order: OrderTracker,
    downgraded: bool,
    universal: TokenResolverMap,
    primary: TokenResolverMap,
    signature_tracker: TokenTracker,
    encryption_tracker: TokenTracker,
    supporting: Vec<TokenTracker>,
    budget: DerivedKeyBudget,
    timestamp_index: Option<usize>,
    primary_token: Option<Arc<SecurityToken>>,
    endorsements: Vec<Endorsement>,
    deferred: Vec<DeferredReference>,
    signed_ids: HashSet<String>,
    referenced_ids: Vec<String>,
    /// Part id to the `EncryptedData` it arrived in.
    part_encrypted_forms: HashMap<String, EncryptedData>,
    claims: Vec<Claim>,
}

impl<'a> ReceiveContext<'a> {
    fn new(
        engine: &'a ReceiveEngine,
        message: SoapMessage,
        now: u64,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Self> {
        let policy = &engine.policy;

        let (mut universal, mut primary) = match &engine.out_of_band_resolver {
            Some(resolver) => (
                TokenResolverMap::with_fallback(Arc::clone(resolver)),
                TokenResolverMap::with_fallback(Arc::clone(resolver)),
            ),
            None => (TokenResolverMap::new(), TokenResolverMap::new()),
        };
        for token in &engine.out_of_band_tokens {
            universal.add(Arc::clone(token));
            primary.add(Arc::clone(token));
        }

        let mut signature_tracker = TokenTracker::new();
        if let Some(expected) = &engine.expected_signing_token {
            signature_tracker.record_token(expected)?;
        }
        let mut encryption_tracker = TokenTracker::new();
        if let Some(expected) = &engine.expected_encryption_token {
            encryption_tracker.record_token(expected)?;
        }

        let supporting = policy
            .supporting_tokens
            .iter()
            .cloned()
            .map(TokenTracker::for_spec)
            .collect();
        let budget = DerivedKeyBudget::new(max_derived_keys(
            policy.supporting_tokens_requiring_derivation(),
        ));
        debug!(max_derived_keys = budget.limit(), "Derived key budget");

        let mut parts = message.headers;
        parts.push(message.body);

        Ok(Self {
            engine,
            policy,
            provider: engine.provider.as_ref(),
            now,
            deadline,
            timeout,
            parts,
            store: HeaderElementStore::new(),
            order: OrderTracker::new(),
            downgraded: false,
            universal,
            primary,
            signature_tracker,
            encryption_tracker,
            supporting,
            budget,
            timestamp_index: None,
            primary_token: None,
            endorsements: Vec::new(),
            deferred: Vec::new(),
            signed_ids: HashSet::new(),
            referenced_ids: Vec::new(),
            part_encrypted_forms: HashMap::new(),
            claims: Vec::new(),
        })
    }

    /// Apply the required order, downgrading signature encryption when
    /// the body need not be encrypted.
    fn configure_order(&mut self) {
        let mut required = self.engine.required_order;
        if required == Some(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature)
            && !self.policy.requires_body_encryption()
        {
            required = Some(MessageProtectionOrder::SignBeforeEncrypt);
            self.downgraded = true;
        }
        match required {
            Some(order) => {
                debug!(?order, downgraded = self.downgraded, "Protection order enforced");
                self.order.set_required_order(order);
            }
            None if self.policy.require_message_protection => {
                warn!("Message protection required but no protection order configured");
            }
            None => {}
        }
    }

    fn check_deadline(&self) -> Result<()> {
        if Instant::now() > self.deadline {
            Err(SecurityError::Timeout(self.timeout))
        } else {
            Ok(())
        }
    }

    fn timestamp(&self) -> Option<&Timestamp> {
        let entry = self.store.get(self.timestamp_index?)?;
        match &entry.element {
            HeaderElement::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    fn primary_signature_value(&self) -> Option<&[u8]> {
        match &self.store.primary_signature()?.element {
            HeaderElement::Signature(sig) => Some(&sig.value),
            _ => None,
        }
    }

    fn into_verified(mut self) -> VerifiedMessage {
        let timestamp = self.timestamp().cloned();
        let primary_signature_value = self.primary_signature_value().map(<[u8]>::to_vec);
        let signature_confirmations = self
            .store
            .iter()
            .filter_map(|e| match &e.element {
                HeaderElement::SignatureConfirmation(sc) => Some(sc.value.clone()),
                _ => None,
            })
            .collect();
        let supporting_tokens = self
            .supporting
            .iter()
            .filter_map(|tracker| {
                let spec = tracker.spec()?;
                Some(ReceivedSupportingToken {
                    name: spec.name.clone(),
                    mode: spec.mode,
                    token: Arc::clone(tracker.token()?),
                })
            })
            .collect();

        let body = self
            .parts
            .pop()
            .unwrap_or_else(|| MessagePart::plain("Body", "Body", Vec::new()));
        VerifiedMessage {
            headers: self.parts,
            body,
            timestamp,
            primary_token: self.signature_tracker.token().cloned(),
            primary_signature_value,
            supporting_tokens,
            signature_confirmations,
            claims: self.claims,
            processing_order: self.order.state(),
        }
    }
}

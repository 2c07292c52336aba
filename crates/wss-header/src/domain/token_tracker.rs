//! # Token Tracker
//!
//! Per-token bookkeeping of how a token was used while a header was
//! processed: signed, encrypted, endorsing, and whether every key use went
//! through a derived key.
//!
//! A tracker locks onto the first token recorded. Later records must be
//! the same token (`Arc` identity). One substitution is tolerated: an
//! out-of-band X.509 certificate replaced by the certificate carried in the
//! reply, when both have the same thumbprint. The tracker then locks onto
//! the replacement.
//!
//! Supporting tokens are bound to their specs after the header has been
//! processed, from how each token was actually protected (`TokenUsage`).

use std::sync::Arc;

use wss_types::{SecurityToken, SupportingTokenMode, TokenType};

use crate::domain::errors::{Result, SecurityError};

/// Attachment requirements for one supporting token.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SupportingTokenSpec {
    /// Name used in diagnostics.
    pub name: String,
    pub token_type: TokenType,
    pub mode: SupportingTokenMode,
    #[serde(default)]
    pub optional: bool,
    /// The token's key must only be used through derived keys.
    #[serde(default)]
    pub require_derived_keys: bool,
}

impl SupportingTokenSpec {
    pub fn new(name: impl Into<String>, token_type: TokenType, mode: SupportingTokenMode) -> Self {
        Self {
            name: name.into(),
            token_type,
            mode,
            optional: false,
            require_derived_keys: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_derived_keys(mut self) -> Self {
        self.require_derived_keys = true;
        self
    }
}

/// How a token in the header was protected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Covered by the primary signature.
    pub signed: bool,
    /// Arrived inside an `EncryptedData`.
    pub encrypted: bool,
    /// Keyed an endorsing signature.
    pub endorsing: bool,
}

/// How closely a token's usage matches a spec's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpecFit {
    /// Protected exactly as the mode asks.
    Exact,
    /// Every requirement of the mode is met, with extra protection.
    Sufficient,
    /// Some requirement is unmet; verification reports which.
    Partial,
}

impl SpecFit {
    pub const ALL: [SpecFit; 3] = [SpecFit::Exact, SpecFit::Sufficient, SpecFit::Partial];
}

impl SupportingTokenSpec {
    /// How `usage` fits this spec. An endorsing token only binds to an
    /// endorsing spec.
    pub fn fit(&self, usage: TokenUsage) -> Option<SpecFit> {
        if usage.endorsing && !self.mode.is_endorsing() {
            return None;
        }
        let mode = self.mode;
        let satisfied = (!mode.is_endorsing() || usage.endorsing)
            && (!mode.is_signed() || usage.signed)
            && (!mode.is_encrypted() || usage.encrypted);
        let exact = mode.is_endorsing() == usage.endorsing
            && mode.is_signed() == usage.signed
            && mode.is_encrypted() == usage.encrypted;
        Some(match (satisfied, exact) {
            (true, true) => SpecFit::Exact,
            (true, false) => SpecFit::Sufficient,
            (false, _) => SpecFit::Partial,
        })
    }
}

/// Usage record for a single token.
#[derive(Debug, Default)]
pub struct TokenTracker {
    token: Option<Arc<SecurityToken>>,
    legacy_substitution_used: bool,
    key_uses: usize,
    derived_key_uses: usize,
    pub is_signed: bool,
    pub is_encrypted: bool,
    pub is_endorsing: bool,
    pub already_read_endorsing_signature: bool,
    spec: Option<SupportingTokenSpec>,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker for a supporting token attached under `spec`.
    pub fn for_spec(spec: SupportingTokenSpec) -> Self {
        Self {
            spec: Some(spec),
            ..Self::default()
        }
    }

    pub fn token(&self) -> Option<&Arc<SecurityToken>> {
        self.token.as_ref()
    }

    pub fn spec(&self) -> Option<&SupportingTokenSpec> {
        self.spec.as_ref()
    }

    /// Is `token` the token this tracker is locked onto?
    pub fn tracks(&self, token: &Arc<SecurityToken>) -> bool {
        self.token.as_ref().is_some_and(|t| Arc::ptr_eq(t, token))
    }

    /// Record the token this tracker is about.
    pub fn record_token(&mut self, token: &Arc<SecurityToken>) -> Result<()> {
        match &self.token {
            None => {
                self.token = Some(Arc::clone(token));
                Ok(())
            }
            Some(current) if Arc::ptr_eq(current, token) => Ok(()),
            Some(current) => {
                if !self.legacy_substitution_used && same_certificate(current, token) {
                    self.token = Some(Arc::clone(token));
                    self.legacy_substitution_used = true;
                    Ok(())
                } else {
                    Err(SecurityError::SigningTokenMismatch)
                }
            }
        }
    }

    /// Lock onto a supporting token and take over how it was used.
    /// `derived` tells whether its endorsing signature used a derived key.
    pub fn bind(
        &mut self,
        token: &Arc<SecurityToken>,
        usage: TokenUsage,
        derived: bool,
    ) -> Result<()> {
        self.record_token(token)?;
        self.is_signed = usage.signed;
        self.is_encrypted = usage.encrypted;
        if usage.endorsing {
            self.is_endorsing = true;
            self.already_read_endorsing_signature = true;
            self.record_key_use(derived);
        }
        Ok(())
    }

    /// Record one use of the token's key.
    pub fn record_key_use(&mut self, derived: bool) {
        self.key_uses += 1;
        if derived {
            self.derived_key_uses += 1;
        }
    }

    /// True when the key was used, and every use went through a derived key.
    pub fn is_derived_from(&self) -> bool {
        self.key_uses > 0 && self.key_uses == self.derived_key_uses
    }

    pub fn key_uses(&self) -> usize {
        self.key_uses
    }

    /// Check the tracker against its spec once the message is processed.
    ///
    /// `require_message_protection` gates the signed checks of `Signed`
    /// tokens only.
    pub fn verify(&self, require_message_protection: bool) -> Result<()> {
        let Some(spec) = &self.spec else {
            return Ok(());
        };
        let Some(token) = &self.token else {
            return if spec.optional {
                Ok(())
            } else {
                Err(SecurityError::SupportingTokenNotProvided(spec.name.clone()))
            };
        };
        let derivation_applies = spec.require_derived_keys && !token.has_asymmetric_key();

        match spec.mode {
            SupportingTokenMode::Endorsing => {
                self.require_endorsing(spec)?;
                if derivation_applies && !self.is_derived_from() {
                    return Err(SecurityError::SupportingTokenNotDerived(spec.name.clone()));
                }
            }
            SupportingTokenMode::Signed => {
                if require_message_protection && !self.is_signed {
                    return Err(SecurityError::SupportingTokenNotSigned(spec.name.clone()));
                }
            }
            SupportingTokenMode::SignedEncrypted => {
                if !self.is_signed {
                    return Err(SecurityError::SupportingTokenNotSigned(spec.name.clone()));
                }
                if !self.is_encrypted {
                    return Err(SecurityError::SupportingTokenNotEncrypted(spec.name.clone()));
                }
            }
            SupportingTokenMode::SignedEndorsing => {
                if !self.is_signed {
                    return Err(SecurityError::SupportingTokenNotSigned(spec.name.clone()));
                }
                self.require_endorsing(spec)?;
                if derivation_applies && !self.is_derived_from() {
                    return Err(SecurityError::SupportingTokenNotDerived(spec.name.clone()));
                }
            }
        }
        Ok(())
    }

    fn require_endorsing(&self, spec: &SupportingTokenSpec) -> Result<()> {
        if self.is_endorsing {
            Ok(())
        } else {
            Err(SecurityError::SupportingTokenNotEndorsing(spec.name.clone()))
        }
    }
}

fn same_certificate(a: &SecurityToken, b: &SecurityToken) -> bool {
    a.token_type == TokenType::X509Certificate
        && b.token_type == TokenType::X509Certificate
        && a.thumbprint.is_some()
        && a.thumbprint == b.thumbprint
}

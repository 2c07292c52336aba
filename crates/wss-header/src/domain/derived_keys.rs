//! # Derived Keys
//!
//! Per-message derived-key budget and the construction of derived-key
//! tokens for both engines.
//!
//! The budget is `(1 + 1 + k) * 2`: the primary signing token, the
//! encryption token and `k` supporting tokens that require derivation,
//! each allowed one signing and one encryption key.

use std::sync::Arc;

use wss_types::{algorithms, DerivedKeyElement, KeyIdentifierClause, SecurityToken};

use crate::domain::errors::{Result, SecurityError};
use crate::domain::id_generator::IdGenerator;
use crate::ports::outbound::CryptoProvider;

/// Default upper bound on the length of a derived key in bytes.
pub const DEFAULT_MAX_DERIVED_KEY_LENGTH: u32 = 64;

/// Length of the nonce mixed into a derived key.
pub const DERIVATION_NONCE_LENGTH: usize = 16;

/// Compute the per-message derived-key budget.
pub fn max_derived_keys(supporting_tokens_requiring_derivation: usize) -> usize {
    (1 + 1 + supporting_tokens_requiring_derivation) * 2
}

/// Running count of derived keys against the budget.
#[derive(Debug, Clone, Copy)]
pub struct DerivedKeyBudget {
    limit: usize,
    used: usize,
}

impl DerivedKeyBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// Count one more derived key.
    pub fn reserve(&mut self) -> Result<()> {
        if self.used >= self.limit {
            return Err(SecurityError::DerivedKeyLimitExceeded { limit: self.limit });
        }
        self.used += 1;
        Ok(())
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Compute the token described by a received derived-key element.
pub fn derive_token(
    provider: &dyn CryptoProvider,
    source: &Arc<SecurityToken>,
    element: &DerivedKeyElement,
    max_length: u32,
) -> Result<Arc<SecurityToken>> {
    if element.length > max_length {
        return Err(SecurityError::DerivedKeyLengthExceeded {
            requested: element.length,
            max: max_length,
        });
    }
    let key = provider.derive_key(source, element)?;
    Ok(Arc::new(SecurityToken::derived_key(
        element.id.clone(),
        key,
        Arc::clone(source),
    )))
}

/// Create a fresh derived key from `source` for an outgoing message.
pub fn new_derived_key(
    provider: &dyn CryptoProvider,
    ids: &mut IdGenerator,
    source: &Arc<SecurityToken>,
    source_clause: KeyIdentifierClause,
    length: u32,
) -> Result<(DerivedKeyElement, Arc<SecurityToken>)> {
    let element = DerivedKeyElement {
        id: ids.next_id(),
        source: source_clause,
        nonce: provider.generate_key_material(DERIVATION_NONCE_LENGTH)?,
        label: algorithms::DEFAULT_DERIVATION_LABEL.to_string(),
        offset: 0,
        length,
    };
    let token = derive_token(provider, source, &element, length)?;
    Ok((element, token))
}

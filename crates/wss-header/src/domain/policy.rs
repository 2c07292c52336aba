//! # Security Policies
//!
//! Negotiated settings for each engine, loadable from JSON. Durations are
//! whole seconds on the wire.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::warn;
use wss_types::{MessageProtectionOrder, SecurityHeaderLayout, TokenType};

use crate::domain::derived_keys::DEFAULT_MAX_DERIVED_KEY_LENGTH;
use crate::domain::errors::ConfigError;
use crate::domain::token_tracker::SupportingTokenSpec;

/// Default tolerated clock difference between sender and receiver.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Default window in which a message is considered fresh.
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default lifetime of an outgoing timestamp.
pub const DEFAULT_TIMESTAMP_VALIDITY: Duration = Duration::from_secs(5 * 60);

/// Default derived key length for outgoing messages, in bytes.
pub const DEFAULT_DERIVED_KEY_LENGTH: u32 = 32;

// =============================================================================
// RECEIVE POLICY
// =============================================================================

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivePolicy {
    pub layout: SecurityHeaderLayout,
    /// Protection order to enforce. `None` disables order enforcement.
    pub required_order: Option<MessageProtectionOrder>,
    /// Check signed/encrypted coverage of parts and tokens.
    pub require_message_protection: bool,
    /// Part names that must be covered by the primary signature.
    pub signed_parts: Vec<String>,
    /// Part names that must arrive encrypted.
    pub encrypted_parts: Vec<String>,
    /// Type of the primary token when it travels in the header.
    pub primary_token_type: Option<TokenType>,
    /// The primary token's key may only be used through derived keys.
    pub require_derived_keys: bool,
    pub supporting_tokens: Vec<SupportingTokenSpec>,
    /// Signing and encryption must use the same token.
    pub require_same_signing_and_encryption_token: bool,
    pub allow_encrypted_key_reference_list: bool,
    pub detect_replays: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub replay_window: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_clock_skew: Duration,
    pub max_derived_key_length: u32,
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        Self {
            layout: SecurityHeaderLayout::Strict,
            required_order: None,
            require_message_protection: true,
            signed_parts: vec!["Body".to_string()],
            encrypted_parts: Vec::new(),
            primary_token_type: None,
            require_derived_keys: false,
            supporting_tokens: Vec::new(),
            require_same_signing_and_encryption_token: false,
            allow_encrypted_key_reference_list: false,
            detect_replays: false,
            replay_window: DEFAULT_REPLAY_WINDOW,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
            max_derived_key_length: DEFAULT_MAX_DERIVED_KEY_LENGTH,
        }
    }
}

impl ReceivePolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_derived_key_length == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_derived_key_length",
            });
        }
        if self.detect_replays && self.replay_window.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "replay_window",
            });
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let policy: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidDocument(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Supporting tokens whose keys must be derived.
    pub fn supporting_tokens_requiring_derivation(&self) -> usize {
        self.supporting_tokens
            .iter()
            .filter(|s| s.require_derived_keys)
            .count()
    }

    pub fn expects_endorsing_tokens(&self) -> bool {
        self.supporting_tokens.iter().any(|s| s.mode.is_endorsing())
    }

    /// Whether the body must arrive encrypted.
    pub fn requires_body_encryption(&self) -> bool {
        self.encrypted_parts.iter().any(|p| p == "Body")
    }
}

// =============================================================================
// SEND POLICY
// =============================================================================

/// Whether a token is emitted into the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TokenInclusion {
    #[default]
    Always,
    Never,
}

/// How a token that is not in the header is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyReferenceStyle {
    #[default]
    LocalId,
    Thumbprint,
    External,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendPolicy {
    pub layout: SecurityHeaderLayout,
    pub protection_order: MessageProtectionOrder,
    pub include_timestamp: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timestamp_validity: Duration,
    /// Part names covered by the primary signature.
    pub signed_parts: Vec<String>,
    /// Part names encrypted in place.
    pub encrypted_parts: Vec<String>,
    /// Sign and encrypt with keys derived from the primary tokens.
    pub derive_keys: bool,
    pub derived_key_length: u32,
    pub signing_token_inclusion: TokenInclusion,
    pub encryption_token_inclusion: TokenInclusion,
    pub key_reference_style: KeyReferenceStyle,
    /// Cover the signing token with the primary signature.
    pub protect_tokens: bool,
    /// Prefix every wire id with a per-message UUID.
    pub unique_id_prefix: bool,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            layout: SecurityHeaderLayout::Strict,
            protection_order: MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature,
            include_timestamp: true,
            timestamp_validity: DEFAULT_TIMESTAMP_VALIDITY,
            signed_parts: vec!["Body".to_string()],
            encrypted_parts: vec!["Body".to_string()],
            derive_keys: false,
            derived_key_length: DEFAULT_DERIVED_KEY_LENGTH,
            signing_token_inclusion: TokenInclusion::Always,
            encryption_token_inclusion: TokenInclusion::Never,
            key_reference_style: KeyReferenceStyle::Thumbprint,
            protect_tokens: false,
            unique_id_prefix: false,
        }
    }
}

impl SendPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.derive_keys && self.derived_key_length == 0 {
            return Err(ConfigError::NotPositive {
                field: "derived_key_length",
            });
        }
        if self.include_timestamp && self.timestamp_validity.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "timestamp_validity",
            });
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let policy: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidDocument(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }
}

// =============================================================================
// NONCE CACHE CONFIG
// =============================================================================

/// Largest accepted retention: `i32::MAX` milliseconds (~24.8 days).
pub const MAX_CACHING_TIME_SPAN: Duration = Duration::from_millis(i32::MAX as u64);

/// Largest accepted capacity.
pub const MAX_CACHE_SIZE: usize = i32::MAX as usize;

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceCacheConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub caching_time_span: Duration,
    pub cache_size: usize,
}

impl Default for NonceCacheConfig {
    fn default() -> Self {
        Self {
            caching_time_span: recommended_caching_time_span(
                DEFAULT_MAX_CLOCK_SKEW,
                DEFAULT_REPLAY_WINDOW,
            ),
            cache_size: 900_000,
        }
    }
}

impl NonceCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.caching_time_span > MAX_CACHING_TIME_SPAN {
            return Err(ConfigError::CachingTimeSpanTooLarge(self.caching_time_span));
        }
        if self.cache_size > MAX_CACHE_SIZE {
            return Err(ConfigError::CacheSizeTooLarge(self.cache_size));
        }
        Ok(())
    }

    /// Warn when entries expire before a replayed message would be rejected
    /// as stale.
    pub fn check_retention(&self, policy: &ReceivePolicy) -> bool {
        let recommended =
            recommended_caching_time_span(policy.max_clock_skew, policy.replay_window);
        if self.caching_time_span < recommended {
            warn!(
                caching_time_span_secs = self.caching_time_span.as_secs(),
                recommended_secs = recommended.as_secs(),
                "Nonce cache retention shorter than 2 x clock skew + replay window"
            );
            return false;
        }
        true
    }
}

/// `2 * max_clock_skew + replay_window`.
pub fn recommended_caching_time_span(
    max_clock_skew: Duration,
    replay_window: Duration,
) -> Duration {
    max_clock_skew
        .saturating_mul(2)
        .saturating_add(replay_window)
}

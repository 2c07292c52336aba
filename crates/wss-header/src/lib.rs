//! # WS-Security Header Engine
//!
//! Receive-side and send-side processing of the SOAP `<wsse:Security>`
//! header for WS-Security 1.0 and 1.1.
//!
//! ## Architecture
//!
//! This crate follows hexagonal architecture:
//! - **Domain Layer** (`domain/`): header state machines, no I/O
//! - **Ports Layer** (`ports/`): the API offered to dispatchers and the
//!   capabilities consumed (crypto provider, nonce cache, token resolution)
//! - **Adapters** (`adapters/`): in-memory nonce cache, software provider
//! - **Service Layer** (`service.rs`): one engine per message, provider
//!   chosen once per protocol version
//!
//! ## Security Notes
//!
//! - Failure is fail-closed: a rejected message exposes no token or
//!   signature state.
//! - Replay detection keys the nonce cache on the primary signature value.
//! - Digests are compared in constant time.
//! - Key material is zeroed on drop and never logged.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export public API
pub use adapters::nonce_cache::{InMemoryNonceCache, SystemClock};
pub use domain::derived_keys::{max_derived_keys, DerivedKeyBudget};
pub use domain::errors::{ConfigError, ErrorKind, FaultCode, Result, SecurityError};
pub use domain::order_tracker::{OrderTracker, ReceiverProcessingOrder, MAX_ALLOWED_WRAPPED_KEYS};
pub use domain::policy::{
    KeyReferenceStyle, NonceCacheConfig, ReceivePolicy, SendPolicy, TokenInclusion,
};
pub use domain::receive::{ReceiveEngine, ReceiveState, ReceivedSupportingToken, VerifiedMessage};
pub use domain::send::{OutgoingSupportingToken, SecuredMessage, SendEngine, SendState};
pub use domain::token_tracker::{SpecFit, SupportingTokenSpec, TokenTracker, TokenUsage};
pub use ports::inbound::{IncomingExpectations, MessageSecurityApi, OutgoingCredentials};
pub use ports::outbound::{
    AuthenticationError, Claim, Clock, CryptoError, CryptoProvider, NonceCache, NonceCacheError,
    TokenAuthenticator, TokenResolver,
};
pub use service::{ProviderRegistry, SecurityProtocolFactory, DEFAULT_PROCESSING_TIMEOUT};

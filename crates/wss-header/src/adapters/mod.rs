//! # Adapters Module
//!
//! Implementations of the outbound ports.

pub mod nonce_cache;

#[cfg(any(test, feature = "test-utils"))]
pub mod software_provider;

//! # Security Protocol Service
//!
//! Application service layer that implements the `MessageSecurityApi` trait.
//!
//! ## Architecture
//!
//! This is the hexagonal "application service" that:
//! - Selects the `CryptoProvider` once per `SecurityVersion`
//! - Holds the collaborators shared by every message of a listener: nonce
//!   cache, clock, out-of-band tokens, authenticator
//! - Creates one `ReceiveEngine` or `SendEngine` per message

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use wss_types::{SecurityToken, SecurityVersion, SoapMessage};

use crate::adapters::nonce_cache::{InMemoryNonceCache, SystemClock};
use crate::domain::errors::{Result, SecurityError};
use crate::domain::policy::{
    recommended_caching_time_span, NonceCacheConfig, ReceivePolicy, SendPolicy,
};
use crate::domain::receive::{ReceiveEngine, VerifiedMessage};
use crate::domain::send::{SecuredMessage, SendEngine};
use crate::ports::inbound::{IncomingExpectations, MessageSecurityApi, OutgoingCredentials};
use crate::ports::outbound::{Clock, CryptoProvider, NonceCache, TokenAuthenticator, TokenResolver};

/// Default bound on processing one incoming header.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// PROVIDER REGISTRY
// =============================================================================

/// Cryptographic providers keyed by the protocol version they speak.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<SecurityVersion, Arc<dyn CryptoProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for the version it reports. Replaces any
    /// provider registered for that version.
    pub fn register(&mut self, provider: Arc<dyn CryptoProvider>) {
        let version = provider.security_version();
        debug!(?version, "Crypto provider registered");
        self.providers.insert(version, provider);
    }

    pub fn get(&self, version: SecurityVersion) -> Result<Arc<dyn CryptoProvider>> {
        self.providers
            .get(&version)
            .cloned()
            .ok_or(SecurityError::MissingCollaborator("crypto provider"))
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Creates configured engines for one endpoint.
pub struct SecurityProtocolFactory {
    version: SecurityVersion,
    provider: Arc<dyn CryptoProvider>,
    receive_policy: ReceivePolicy,
    send_policy: SendPolicy,
    nonce_cache: Option<Arc<dyn NonceCache>>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    out_of_band_tokens: Vec<Arc<SecurityToken>>,
    out_of_band_resolver: Option<Arc<dyn TokenResolver>>,
    authenticator: Option<Arc<dyn TokenAuthenticator>>,
}

impl SecurityProtocolFactory {
    /// Create a factory for `version`.
    ///
    /// When the receive policy detects replays, an in-memory nonce cache
    /// sized for the policy's skew and replay window is created; replace it
    /// with `with_nonce_cache` to share one across listeners.
    pub fn new(
        registry: &ProviderRegistry,
        version: SecurityVersion,
        receive_policy: ReceivePolicy,
        send_policy: SendPolicy,
    ) -> Result<Self> {
        receive_policy.validate()?;
        send_policy.validate()?;
        let provider = registry.get(version)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let nonce_cache: Option<Arc<dyn NonceCache>> = if receive_policy.detect_replays {
            let config = NonceCacheConfig {
                caching_time_span: recommended_caching_time_span(
                    receive_policy.max_clock_skew,
                    receive_policy.replay_window,
                ),
                ..NonceCacheConfig::default()
            };
            Some(Arc::new(InMemoryNonceCache::with_clock(config, Arc::clone(&clock))?))
        } else {
            None
        };

        info!(
            ?version,
            detect_replays = receive_policy.detect_replays,
            "Security protocol factory created"
        );
        Ok(Self {
            version,
            provider,
            receive_policy,
            send_policy,
            nonce_cache,
            clock,
            timeout: DEFAULT_PROCESSING_TIMEOUT,
            out_of_band_tokens: Vec::new(),
            out_of_band_resolver: None,
            authenticator: None,
        })
    }

    pub fn version(&self) -> SecurityVersion {
        self.version
    }

    /// Share `cache` with other factories.
    pub fn with_nonce_cache(mut self, cache: Arc<dyn NonceCache>) -> Self {
        let config = NonceCacheConfig {
            caching_time_span: cache.caching_time_span(),
            cache_size: cache.cache_size(),
        };
        config.check_retention(&self.receive_policy);
        self.nonce_cache = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_out_of_band_token(mut self, token: Arc<SecurityToken>) -> Self {
        self.out_of_band_tokens.push(token);
        self
    }

    pub fn with_out_of_band_resolver(mut self, resolver: Arc<dyn TokenResolver>) -> Self {
        self.out_of_band_resolver = Some(resolver);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn TokenAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// A receive engine carrying the endpoint's shared collaborators.
    pub fn create_receive_engine(&self) -> Result<ReceiveEngine> {
        let mut engine =
            ReceiveEngine::new(self.receive_policy.clone(), Arc::clone(&self.provider))?;
        if let Some(cache) = &self.nonce_cache {
            engine.set_nonce_cache(Arc::clone(cache))?;
        }
        for token in &self.out_of_band_tokens {
            engine.add_out_of_band_token(Arc::clone(token))?;
        }
        if let Some(resolver) = &self.out_of_band_resolver {
            engine.set_out_of_band_resolver(Arc::clone(resolver))?;
        }
        if let Some(authenticator) = &self.authenticator {
            engine.set_token_authenticator(Arc::clone(authenticator))?;
        }
        Ok(engine)
    }

    pub fn create_send_engine(&self) -> Result<SendEngine> {
        SendEngine::new(self.send_policy.clone(), Arc::clone(&self.provider))
    }
}

impl MessageSecurityApi for SecurityProtocolFactory {
    fn verify_incoming(
        &self,
        message: SoapMessage,
        expectations: IncomingExpectations,
    ) -> Result<VerifiedMessage> {
        let mut engine = self.create_receive_engine()?;
        if let Some(token) = expectations.signing_token {
            engine.set_expected_signing_token(token)?;
        }
        if let Some(token) = expectations.encryption_token {
            engine.set_expected_encryption_token(token)?;
        }
        if let Some(token) = expectations.wrapping_token {
            engine.set_wrapping_token(token)?;
        }
        if let Some(values) = expectations.signature_confirmations {
            engine.set_expected_signature_confirmations(values)?;
        }
        engine.process(message, self.clock.now_secs(), self.timeout)
    }

    fn secure_outgoing(
        &self,
        message: SoapMessage,
        credentials: OutgoingCredentials,
    ) -> Result<SecuredMessage> {
        let mut engine = self.create_send_engine()?;
        if let Some(token) = credentials.signing_token {
            engine.set_signing_token(token)?;
        }
        if let Some(token) = credentials.encryption_token {
            engine.set_encryption_token(token, credentials.wrap_key)?;
        }
        for supporting in credentials.supporting_tokens {
            engine.add_supporting_token(supporting.token, supporting.mode, supporting.derive_keys)?;
        }
        if let Some(values) = credentials.signature_confirmations {
            engine.set_signature_confirmations(values)?;
        }
        engine.secure(message, self.clock.now_secs())
    }
}

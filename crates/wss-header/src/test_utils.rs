//! # Test Utilities
//!
//! Deterministic clock and fixtures shared by unit and integration tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wss_types::{SecurityToken, SecurityVersion};

pub use crate::adapters::software_provider::SoftwareCryptoProvider;
use crate::ports::outbound::Clock;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(unix_secs: u64) -> Self {
        Self {
            millis: AtomicU64::new(unix_secs * 1000),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, unix_secs: u64) {
        self.millis.store(unix_secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Tokens for a client/service pair sharing one software keyring.
pub struct Fixture {
    pub provider: Arc<SoftwareCryptoProvider>,
    pub client_cert: Arc<SecurityToken>,
    pub service_cert: Arc<SecurityToken>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::for_version(SecurityVersion::WsSecurity11)
    }

    pub fn for_version(version: SecurityVersion) -> Self {
        let provider = SoftwareCryptoProvider::new(version);
        let client_cert = provider.issue_certificate("client-cert", "CN=client");
        let service_cert = provider.issue_certificate("service-cert", "CN=service");
        Self {
            provider: Arc::new(provider),
            client_cert,
            service_cert,
        }
    }

    /// The service certificate as known out of band: same thumbprint,
    /// different token instance.
    pub fn service_cert_out_of_band(&self) -> Arc<SecurityToken> {
        Arc::new((*self.service_cert).clone())
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

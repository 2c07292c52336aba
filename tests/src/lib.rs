//! # WS-Security Header Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── integration/      # Send → wire → receive flows
//! │   ├── round_trip.rs
//! │   ├── ordering.rs
//! │   ├── cardinality.rs
//! │   ├── derived_keys.rs
//! │   ├── lax_layouts.rs
//! │   └── replay.rs
//! └── lib.rs            # Shared fixtures
//!
//! tests/benches/        # Criterion benchmarks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p wss-tests
//!
//! # By category
//! cargo test -p wss-tests integration::replay::
//!
//! # Benchmarks
//! cargo bench -p wss-tests
//! ```

pub mod integration;

use std::sync::{Arc, Once};
use std::time::Duration;

use wss_header::test_utils::Fixture;
use wss_header::{ReceiveEngine, ReceivePolicy, SecuredMessage, SendEngine, SendPolicy};
use wss_types::{MessageProtectionOrder, SoapMessage, TokenType};

/// Unix time every fixture message is stamped with.
pub const NOW: u64 = 1_700_000_000;

pub const TIMEOUT: Duration = Duration::from_secs(30);

pub const REQUEST_BODY: &[u8] = b"<GetQuote symbol=\"WSS\"/>";

static LOGGING: Once = Once::new();

/// Install a `tracing` subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Serialize and parse a message, as a transport would.
pub fn over_the_wire(message: &SoapMessage) -> SoapMessage {
    let json = serde_json::to_string(message).expect("message serializes");
    serde_json::from_str(&json).expect("message parses")
}

/// A client request signed with the client certificate and, when the policy
/// encrypts anything, encrypted under a key wrapped for the service.
pub fn client_request(fixture: &Fixture, policy: SendPolicy) -> SecuredMessage {
    let encrypt = !policy.encrypted_parts.is_empty();
    let mut engine = SendEngine::new(policy, fixture.provider.clone()).expect("valid send policy");
    engine
        .set_signing_token(Arc::clone(&fixture.client_cert))
        .expect("configuring");
    if encrypt {
        engine
            .set_encryption_token(Arc::clone(&fixture.service_cert), true)
            .expect("configuring");
    }
    engine
        .secure(SoapMessage::new(REQUEST_BODY.to_vec()), NOW)
        .expect("request secured")
}

/// Receive policy of a service expecting a client certificate in the header
/// and an encrypted body.
pub fn service_policy(order: MessageProtectionOrder) -> ReceivePolicy {
    ReceivePolicy {
        required_order: Some(order),
        primary_token_type: Some(TokenType::X509Certificate),
        encrypted_parts: vec!["Body".into()],
        ..ReceivePolicy::default()
    }
}

/// A receive engine that knows the service certificate out of band.
pub fn service_engine(fixture: &Fixture, policy: ReceivePolicy) -> ReceiveEngine {
    let mut engine =
        ReceiveEngine::new(policy, fixture.provider.clone()).expect("valid receive policy");
    engine
        .add_out_of_band_token(fixture.service_cert_out_of_band())
        .expect("configuring");
    engine
}

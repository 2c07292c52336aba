//! # Replay Detection
//!
//! One nonce cache is shared by every message a listener processes. The
//! primary signature value is the nonce; concurrent deliveries of the same
//! message must not both be accepted.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rand::RngCore;
    use wss_header::test_utils::{Fixture, ManualClock};
    use wss_header::{
        InMemoryNonceCache, NonceCache, NonceCacheConfig, ReceivePolicy, SecurityError, SendPolicy,
    };
    use wss_types::MessageProtectionOrder;

    use crate::{
        client_request, init_test_logging, over_the_wire, service_engine, service_policy, NOW,
        TIMEOUT,
    };

    fn shared_cache(clock: Arc<ManualClock>) -> Arc<InMemoryNonceCache> {
        Arc::new(InMemoryNonceCache::with_clock(NonceCacheConfig::default(), clock).unwrap())
    }

    fn replay_policy() -> ReceivePolicy {
        ReceivePolicy {
            detect_replays: true,
            ..service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_nonce_insert_accepted_once() {
        let cache = shared_cache(Arc::new(ManualClock::new(NOW)));
        let mut nonce = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let nonce = nonce.clone();
                tokio::task::spawn_blocking(move || cache.try_add_nonce(&nonce).unwrap())
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert!(cache.check_nonce(&nonce).unwrap());
    }

    #[test]
    fn test_nonce_window() {
        let clock = Arc::new(ManualClock::new(NOW));
        let cache = shared_cache(Arc::clone(&clock));
        let span = cache.caching_time_span();
        let nonces: Vec<Vec<u8>> = (0..16)
            .map(|_| {
                let mut nonce = vec![0u8; 16];
                rand::thread_rng().fill_bytes(&mut nonce);
                nonce
            })
            .collect();

        for nonce in &nonces {
            assert!(cache.try_add_nonce(nonce).unwrap());
        }
        clock.advance(span - Duration::from_secs(1));
        for nonce in &nonces {
            assert!(!cache.try_add_nonce(nonce).unwrap());
        }
        clock.advance(Duration::from_secs(1));
        for nonce in &nonces {
            assert!(cache.try_add_nonce(nonce).unwrap());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replays_accepted_once() {
        init_test_logging();
        let fixture = Arc::new(Fixture::new());
        let cache = shared_cache(Arc::new(ManualClock::new(NOW)));
        let secured = client_request(&fixture, SendPolicy::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fixture = Arc::clone(&fixture);
                let cache: Arc<dyn NonceCache> = cache.clone();
                let message = over_the_wire(&secured.message);
                tokio::task::spawn_blocking(move || {
                    let mut engine = service_engine(&fixture, replay_policy());
                    engine.set_nonce_cache(cache).unwrap();
                    engine.process(message, NOW + 1, TIMEOUT)
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(SecurityError::ReplayDetected) => {}
                Err(other) => panic!("unexpected rejection: {other}"),
            }
        }
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_stale_message_rejected_even_when_unseen() {
        let fixture = Fixture::new();
        let cache = shared_cache(Arc::new(ManualClock::new(NOW)));
        let secured = client_request(
            &fixture,
            SendPolicy {
                timestamp_validity: Duration::from_secs(24 * 3600),
                ..SendPolicy::default()
            },
        );

        let mut engine = service_engine(&fixture, replay_policy());
        engine.set_nonce_cache(cache).unwrap();
        let err = engine
            .process(over_the_wire(&secured.message), NOW + 3600, TIMEOUT)
            .unwrap_err();
        assert!(matches!(
            err,
            SecurityError::TimestampStale { created: NOW, now } if now == NOW + 3600
        ));
    }

    #[test]
    fn test_full_cache_is_receiver_fault() {
        let fixture = Fixture::new();
        let config = NonceCacheConfig {
            cache_size: 1,
            ..NonceCacheConfig::default()
        };
        let cache: Arc<dyn NonceCache> = Arc::new(
            InMemoryNonceCache::with_clock(config, Arc::new(ManualClock::new(NOW))).unwrap(),
        );
        assert!(cache.try_add_nonce(b"earlier message").unwrap());

        let secured = client_request(&fixture, SendPolicy::default());
        let mut engine = service_engine(&fixture, replay_policy());
        engine.set_nonce_cache(cache).unwrap();
        let err = engine
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, SecurityError::NonceCache(_)));
        assert!(err.is_retryable());
    }
}

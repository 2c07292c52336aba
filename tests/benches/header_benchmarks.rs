//! # Security Header Benchmarks
//!
//! | Operation | Path |
//! |-----------|------|
//! | Secure | `SendEngine::secure`, sign-then-encrypt with wrapped key |
//! | Verify (strict) | `ReceiveEngine::process`, one pass |
//! | Verify (lax) | `ReceiveEngine::process`, forward-referenced derived keys |
//! | Nonce cache | `InMemoryNonceCache::try_add_nonce` on fresh nonces |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::RngCore;
use wss_header::test_utils::Fixture;
use wss_header::{
    InMemoryNonceCache, NonceCache, NonceCacheConfig, ReceivePolicy, SendEngine, SendPolicy,
};
use wss_tests::{client_request, service_engine, service_policy, NOW, TIMEOUT};
use wss_types::{HeaderElement, MessageProtectionOrder, SecurityHeaderLayout, SoapMessage};

fn bench_secure(c: &mut Criterion) {
    let fixture = Fixture::new();
    let mut group = c.benchmark_group("send");

    for size in [256usize, 4096, 65536] {
        let body = vec![b'x'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("secure", size), &body, |b, body| {
            b.iter(|| {
                let mut engine =
                    SendEngine::new(SendPolicy::default(), fixture.provider.clone()).unwrap();
                engine.set_signing_token(Arc::clone(&fixture.client_cert)).unwrap();
                engine
                    .set_encryption_token(Arc::clone(&fixture.service_cert), true)
                    .unwrap();
                black_box(engine.secure(SoapMessage::new(body.clone()), NOW).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let fixture = Fixture::new();
    let mut group = c.benchmark_group("receive");
    group.measurement_time(Duration::from_secs(10));

    let strict = client_request(&fixture, SendPolicy::default()).message;
    group.bench_function("strict", |b| {
        b.iter(|| {
            let mut engine = service_engine(
                &fixture,
                service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature),
            );
            black_box(engine.process(strict.clone(), NOW, TIMEOUT).unwrap())
        })
    });

    let mut sender = SendEngine::new(
        SendPolicy {
            derive_keys: true,
            ..SendPolicy::default()
        },
        fixture.provider.clone(),
    )
    .unwrap();
    sender
        .set_encryption_token(Arc::clone(&fixture.service_cert), true)
        .unwrap();
    let mut lax = sender
        .secure(SoapMessage::new(b"<GetQuote/>".to_vec()), NOW)
        .unwrap()
        .message;
    let (derived, mut rest): (Vec<_>, Vec<_>) = std::mem::take(&mut lax.security.elements)
        .into_iter()
        .partition(|e| matches!(e, HeaderElement::DerivedKey(_)));
    rest.extend(derived);
    lax.security.elements = rest;

    let lax_policy = ReceivePolicy {
        layout: SecurityHeaderLayout::Lax,
        primary_token_type: None,
        ..service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature)
    };
    group.bench_function("lax_forward_references", |b| {
        b.iter(|| {
            let mut engine = service_engine(&fixture, lax_policy.clone());
            black_box(engine.process(lax.clone(), NOW, TIMEOUT).unwrap())
        })
    });
    group.finish();
}

fn bench_nonce_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("nonce_cache");
    let cache = InMemoryNonceCache::new(NonceCacheConfig::default()).unwrap();
    let mut rng = rand::thread_rng();

    group.bench_function("try_add_fresh", |b| {
        b.iter(|| {
            let mut nonce = [0u8; 32];
            rng.fill_bytes(&mut nonce);
            black_box(cache.try_add_nonce(&nonce).is_ok())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_secure, bench_verify, bench_nonce_cache);
criterion_main!(benches);

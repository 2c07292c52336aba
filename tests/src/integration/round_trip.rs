//! # Round Trip
//!
//! A header built by `SendEngine` and sent over the wire is accepted by a
//! `ReceiveEngine` enforcing the matching order, with the same primary
//! signature value and the same supporting-token classification.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wss_header::test_utils::Fixture;
    use wss_header::{
        IncomingExpectations, MessageSecurityApi, OutgoingCredentials, ProviderRegistry,
        ReceivePolicy, ReceiverProcessingOrder, SendEngine, SendPolicy, SecurityProtocolFactory,
        SupportingTokenSpec, TokenInclusion,
    };
    use wss_types::{
        MessageProtectionOrder, SecurityToken, SecurityVersion, SoapMessage, SupportingTokenMode,
        TokenType,
    };

    use crate::{
        client_request, init_test_logging, over_the_wire, service_engine, service_policy, NOW,
        REQUEST_BODY, TIMEOUT,
    };

    #[test]
    fn test_sign_then_encrypt_accepted_under_sign_before_encrypt() {
        init_test_logging();
        let fixture = Fixture::new();
        let secured = client_request(&fixture, SendPolicy::default());

        let mut engine =
            service_engine(&fixture, service_policy(MessageProtectionOrder::SignBeforeEncrypt));
        let verified = engine
            .process(over_the_wire(&secured.message), NOW + 3, TIMEOUT)
            .unwrap();

        assert_eq!(verified.primary_signature_value, secured.primary_signature_value);
        assert_eq!(verified.body.plaintext(), Some(REQUEST_BODY));
        assert_eq!(verified.processing_order, ReceiverProcessingOrder::VerifyDecrypt);
        let primary = verified.primary_token.unwrap();
        assert_eq!(primary.thumbprint, fixture.client_cert.thumbprint);
    }

    #[test]
    fn test_supporting_tokens_keep_their_classification() {
        init_test_logging();
        let fixture = Fixture::new();
        let session = fixture.provider.issue_security_context("session-1");
        let bob = Arc::new(SecurityToken::user_name("user-bob", "bob"));
        let alice = Arc::new(SecurityToken::user_name("user-alice", "alice"));

        let mut sender = SendEngine::new(SendPolicy::default(), fixture.provider.clone()).unwrap();
        sender.set_signing_token(Arc::clone(&fixture.client_cert)).unwrap();
        sender
            .set_encryption_token(Arc::clone(&fixture.service_cert), true)
            .unwrap();
        sender
            .add_supporting_token(bob, SupportingTokenMode::Signed, false)
            .unwrap();
        sender
            .add_supporting_token(alice, SupportingTokenMode::SignedEncrypted, false)
            .unwrap();
        sender
            .add_supporting_token(Arc::clone(&session), SupportingTokenMode::Endorsing, true)
            .unwrap();
        let secured = sender
            .secure(SoapMessage::new(REQUEST_BODY.to_vec()), NOW)
            .unwrap();

        let policy = ReceivePolicy {
            supporting_tokens: vec![
                SupportingTokenSpec::new(
                    "caller",
                    TokenType::UserName,
                    SupportingTokenMode::Signed,
                ),
                SupportingTokenSpec::new(
                    "on-behalf-of",
                    TokenType::UserName,
                    SupportingTokenMode::SignedEncrypted,
                ),
                SupportingTokenSpec::new(
                    "session",
                    TokenType::SecurityContext,
                    SupportingTokenMode::Endorsing,
                )
                .with_derived_keys(),
            ],
            ..service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature)
        };
        let mut engine = service_engine(&fixture, policy);
        engine.add_out_of_band_token(Arc::clone(&session)).unwrap();

        let verified = engine
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap();

        assert_eq!(verified.primary_signature_value, secured.primary_signature_value);
        let classified: Vec<(&str, SupportingTokenMode, &str)> = verified
            .supporting_tokens
            .iter()
            .map(|t| (t.name.as_str(), t.mode, t.token.id.as_str()))
            .collect();
        assert_eq!(
            classified,
            vec![
                ("caller", SupportingTokenMode::Signed, "user-bob"),
                ("on-behalf-of", SupportingTokenMode::SignedEncrypted, "user-alice"),
                ("session", SupportingTokenMode::Endorsing, "session-1"),
            ]
        );
        assert!(Arc::ptr_eq(&verified.supporting_token("session").unwrap().token, &session));
    }

    #[test]
    fn test_supporting_tokens_bound_by_protection_not_list_order() {
        let fixture = Fixture::new();
        let bob = Arc::new(SecurityToken::user_name("user-bob", "bob"));
        let alice = Arc::new(SecurityToken::user_name("user-alice", "alice"));

        let mut sender = SendEngine::new(SendPolicy::default(), fixture.provider.clone()).unwrap();
        sender.set_signing_token(Arc::clone(&fixture.client_cert)).unwrap();
        sender
            .set_encryption_token(Arc::clone(&fixture.service_cert), true)
            .unwrap();
        sender
            .add_supporting_token(bob, SupportingTokenMode::Signed, false)
            .unwrap();
        sender
            .add_supporting_token(alice, SupportingTokenMode::SignedEncrypted, false)
            .unwrap();
        let secured = sender
            .secure(SoapMessage::new(REQUEST_BODY.to_vec()), NOW)
            .unwrap();

        let policy = ReceivePolicy {
            supporting_tokens: vec![
                SupportingTokenSpec::new(
                    "on-behalf-of",
                    TokenType::UserName,
                    SupportingTokenMode::SignedEncrypted,
                ),
                SupportingTokenSpec::new(
                    "caller",
                    TokenType::UserName,
                    SupportingTokenMode::Signed,
                ),
            ],
            ..service_policy(MessageProtectionOrder::SignBeforeEncrypt)
        };
        let verified = service_engine(&fixture, policy)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap();

        let classified: Vec<(&str, &str)> = verified
            .supporting_tokens
            .iter()
            .map(|t| (t.name.as_str(), t.token.id.as_str()))
            .collect();
        assert_eq!(
            classified,
            vec![("on-behalf-of", "user-alice"), ("caller", "user-bob")]
        );
    }

    #[test]
    fn test_included_encryption_certificate_accepted() {
        init_test_logging();
        let fixture = Fixture::new();
        let secured = client_request(
            &fixture,
            SendPolicy {
                encryption_token_inclusion: TokenInclusion::Always,
                ..SendPolicy::default()
            },
        );
        let tokens = secured
            .message
            .security
            .elements
            .iter()
            .filter(|e| e.name() == "Token")
            .count();
        assert_eq!(tokens, 2);

        let policy = service_policy(MessageProtectionOrder::SignBeforeEncrypt);
        let verified = service_engine(&fixture, policy)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap();

        let primary = verified.primary_token.unwrap();
        assert_eq!(primary.thumbprint, fixture.client_cert.thumbprint);
        assert!(verified.supporting_tokens.is_empty());
        assert_eq!(verified.body.plaintext(), Some(REQUEST_BODY));
    }

    #[test]
    fn test_missing_supporting_token_rejected() {
        let fixture = Fixture::new();
        let secured = client_request(&fixture, SendPolicy::default());
        let policy = ReceivePolicy {
            supporting_tokens: vec![SupportingTokenSpec::new(
                "caller",
                TokenType::UserName,
                SupportingTokenMode::Signed,
            )],
            ..service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature)
        };

        let err = service_engine(&fixture, policy)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert_eq!(err.to_string(), "Supporting token (caller) was not provided");
    }

    #[test]
    fn test_request_reply_with_signature_confirmation() {
        init_test_logging();
        let fixture = Fixture::new();
        let mut registry = ProviderRegistry::new();
        registry.register(fixture.provider.clone());

        let x509_policy = |order| ReceivePolicy {
            detect_replays: true,
            ..service_policy(order)
        };
        let client = SecurityProtocolFactory::new(
            &registry,
            SecurityVersion::WsSecurity11,
            x509_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature),
            SendPolicy::default(),
        )
        .unwrap()
        .with_out_of_band_token(Arc::clone(&fixture.client_cert));
        let service = SecurityProtocolFactory::new(
            &registry,
            SecurityVersion::WsSecurity11,
            x509_policy(MessageProtectionOrder::SignBeforeEncrypt),
            SendPolicy::default(),
        )
        .unwrap()
        .with_out_of_band_token(fixture.service_cert_out_of_band());

        let request = client
            .secure_outgoing(
                SoapMessage::new(REQUEST_BODY.to_vec()),
                OutgoingCredentials {
                    signing_token: Some(Arc::clone(&fixture.client_cert)),
                    encryption_token: Some(Arc::clone(&fixture.service_cert)),
                    wrap_key: true,
                    ..OutgoingCredentials::default()
                },
            )
            .unwrap();
        let request_value = request.primary_signature_value.clone().unwrap();

        let received = service
            .verify_incoming(over_the_wire(&request.message), IncomingExpectations::default())
            .unwrap();
        assert_eq!(received.primary_signature_value.as_ref(), Some(&request_value));

        let reply = service
            .secure_outgoing(
                SoapMessage::new(b"<Quote price=\"42\"/>".to_vec()),
                OutgoingCredentials {
                    signing_token: Some(Arc::clone(&fixture.service_cert)),
                    encryption_token: Some(Arc::clone(&fixture.client_cert)),
                    wrap_key: true,
                    signature_confirmations: Some(vec![request_value.clone()]),
                    ..OutgoingCredentials::default()
                },
            )
            .unwrap();

        let verified = client
            .verify_incoming(
                over_the_wire(&reply.message),
                IncomingExpectations {
                    signature_confirmations: Some(vec![request_value.clone()]),
                    ..IncomingExpectations::default()
                },
            )
            .unwrap();
        assert_eq!(verified.signature_confirmations, vec![Some(request_value)]);
        assert_eq!(verified.body.plaintext(), Some(&b"<Quote price=\"42\"/>"[..]));
    }

    #[test]
    fn test_policy_documents_drive_both_engines() {
        let fixture = Fixture::new();
        let send = SendPolicy::from_json(
            r#"{ "protection_order": "EncryptBeforeSign", "timestamp_validity": 120 }"#,
        )
        .unwrap();
        let receive = ReceivePolicy::from_json(
            r#"{
                "required_order": "EncryptBeforeSign",
                "primary_token_type": "X509Certificate",
                "encrypted_parts": ["Body"]
            }"#,
        )
        .unwrap();

        let secured = client_request(&fixture, send);
        let verified = service_engine(&fixture, receive)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap();
        let timestamp = verified.timestamp.unwrap();
        assert_eq!(timestamp.expires, Some(NOW + 120));
        assert_eq!(verified.processing_order, ReceiverProcessingOrder::DecryptVerify);
    }
}

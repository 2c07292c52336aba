//! # Derived Keys
//!
//! Symmetric binding: the client signs and encrypts with a session key
//! wrapped for the service, optionally through derived keys.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wss_header::test_utils::Fixture;
    use wss_header::{
        max_derived_keys, ReceivePolicy, SecuredMessage, SecurityError, SendEngine, SendPolicy,
        SupportingTokenSpec,
    };
    use wss_types::{
        HeaderElement, MessageProtectionOrder, SecurityToken, SoapMessage, SupportingTokenMode,
        TokenType,
    };

    use crate::{over_the_wire, service_engine, NOW, REQUEST_BODY, TIMEOUT};

    fn symmetric_request(fixture: &Fixture, derive_keys: bool) -> SecuredMessage {
        let policy = SendPolicy {
            derive_keys,
            ..SendPolicy::default()
        };
        let mut engine = SendEngine::new(policy, fixture.provider.clone()).unwrap();
        engine
            .set_encryption_token(Arc::clone(&fixture.service_cert), true)
            .unwrap();
        engine
            .secure(SoapMessage::new(REQUEST_BODY.to_vec()), NOW)
            .unwrap()
    }

    /// Copies of the first derived key, inserted right after it until the
    /// header carries `total` derived keys.
    fn pad_derived_keys(secured: &mut SecuredMessage, total: usize) {
        let elements = &mut secured.message.security.elements;
        let first = elements
            .iter()
            .position(|e| matches!(e, HeaderElement::DerivedKey(_)))
            .unwrap();
        let HeaderElement::DerivedKey(template) = elements[first].clone() else {
            unreachable!();
        };
        let present = elements
            .iter()
            .filter(|e| matches!(e, HeaderElement::DerivedKey(_)))
            .count();
        for n in 0..(total - present) {
            let mut extra = template.clone();
            extra.id = format!("extra-dk-{n}");
            elements.insert(first + 1, HeaderElement::DerivedKey(extra));
        }
    }

    fn symmetric_policy() -> ReceivePolicy {
        ReceivePolicy {
            required_order: Some(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature),
            encrypted_parts: vec!["Body".into()],
            require_derived_keys: true,
            ..ReceivePolicy::default()
        }
    }

    #[test]
    fn test_derived_keys_accepted() {
        let fixture = Fixture::new();
        let secured = symmetric_request(&fixture, true);

        let verified = service_engine(&fixture, symmetric_policy())
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap();
        let primary = verified.primary_token.unwrap();
        assert_eq!(primary.id, secured.wrapped_key.unwrap().id);
        assert_eq!(verified.body.plaintext(), Some(REQUEST_BODY));
    }

    #[test]
    fn test_primary_signature_must_be_derived() {
        let fixture = Fixture::new();
        let secured = symmetric_request(&fixture, false);

        let err = service_engine(&fixture, symmetric_policy())
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, SecurityError::PrimarySignatureNotDerived));
    }

    #[test]
    fn test_derived_key_budget_exhausted() {
        let fixture = Fixture::new();
        let mut secured = symmetric_request(&fixture, true);
        let limit = max_derived_keys(0);
        assert_eq!(limit, 4);
        pad_derived_keys(&mut secured, limit + 1);

        let err = service_engine(&fixture, symmetric_policy())
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, SecurityError::DerivedKeyLimitExceeded { limit: 4 }));
    }

    #[test]
    fn test_budget_grows_with_derived_supporting_tokens() {
        let fixture = Fixture::new();
        let session = fixture.provider.issue_security_context("session-1");
        let endorsed_request = || {
            let policy = SendPolicy {
                derive_keys: true,
                ..SendPolicy::default()
            };
            let mut engine = SendEngine::new(policy, fixture.provider.clone()).unwrap();
            engine
                .set_encryption_token(Arc::clone(&fixture.service_cert), true)
                .unwrap();
            engine
                .add_supporting_token(Arc::clone(&session), SupportingTokenMode::Endorsing, true)
                .unwrap();
            engine
                .secure(SoapMessage::new(REQUEST_BODY.to_vec()), NOW)
                .unwrap()
        };
        let receiver = |session: &Arc<SecurityToken>| {
            let policy = ReceivePolicy {
                supporting_tokens: vec![SupportingTokenSpec::new(
                    "session",
                    TokenType::SecurityContext,
                    SupportingTokenMode::Endorsing,
                )
                .with_derived_keys()],
                ..symmetric_policy()
            };
            let mut engine = service_engine(&fixture, policy);
            engine.add_out_of_band_token(Arc::clone(session)).unwrap();
            engine
        };
        let limit = max_derived_keys(1);
        assert_eq!(limit, 6);

        let mut secured = endorsed_request();
        pad_derived_keys(&mut secured, limit);
        let verified = receiver(&session)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap();
        assert!(Arc::ptr_eq(&verified.supporting_token("session").unwrap().token, &session));

        let mut secured = endorsed_request();
        pad_derived_keys(&mut secured, limit + 1);
        let err = receiver(&session)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, SecurityError::DerivedKeyLimitExceeded { limit: 6 }));
    }

    #[test]
    fn test_oversized_derivation_rejected() {
        let fixture = Fixture::new();
        let mut secured = symmetric_request(&fixture, true);
        for element in &mut secured.message.security.elements {
            if let HeaderElement::DerivedKey(key) = element {
                key.length = 1024;
            }
        }

        let err = service_engine(&fixture, symmetric_policy())
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert!(matches!(
            err,
            SecurityError::DerivedKeyLengthExceeded { requested: 1024, max: 64 }
        ));
    }
}

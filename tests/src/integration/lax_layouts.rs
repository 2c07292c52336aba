//! # Header Layouts
//!
//! Strict headers declare everything before use. Lax headers may refer
//! forward; the receiver resolves them in later passes.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wss_header::test_utils::Fixture;
    use wss_header::{ReceivePolicy, SecurityError, SendEngine, SendPolicy};
    use wss_types::{
        HeaderElement, KeyIdentifierClause, MessageProtectionOrder, SecurityHeaderLayout,
        SoapMessage,
    };

    use crate::{
        client_request, over_the_wire, service_engine, service_policy, NOW, REQUEST_BODY, TIMEOUT,
    };

    fn policy(layout: SecurityHeaderLayout) -> ReceivePolicy {
        ReceivePolicy {
            layout,
            ..service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature)
        }
    }

    fn process(
        fixture: &Fixture,
        layout: SecurityHeaderLayout,
        message: &SoapMessage,
    ) -> Result<(), SecurityError> {
        service_engine(fixture, policy(layout))
            .process(over_the_wire(message), NOW, TIMEOUT)
            .map(|_| ())
    }

    #[test]
    fn test_timestamp_last() {
        let fixture = Fixture::new();
        let secured = client_request(
            &fixture,
            SendPolicy {
                layout: SecurityHeaderLayout::LaxTimestampLast,
                ..SendPolicy::default()
            },
        );
        let elements = &secured.message.security.elements;
        assert!(matches!(elements.last(), Some(HeaderElement::Timestamp(_))));

        process(&fixture, SecurityHeaderLayout::LaxTimestampLast, &secured.message).unwrap();
        process(&fixture, SecurityHeaderLayout::Lax, &secured.message).unwrap();
        assert!(matches!(
            process(&fixture, SecurityHeaderLayout::LaxTimestampFirst, &secured.message),
            Err(SecurityError::TimestampNotFirst)
        ));
        assert!(matches!(
            process(&fixture, SecurityHeaderLayout::Strict, &secured.message),
            Err(SecurityError::TimestampNotFirst)
        ));
    }

    #[test]
    fn test_timestamp_first_required_last() {
        let fixture = Fixture::new();
        let secured = client_request(&fixture, SendPolicy::default());
        assert!(matches!(
            process(&fixture, SecurityHeaderLayout::LaxTimestampLast, &secured.message),
            Err(SecurityError::TimestampNotLast)
        ));
    }

    #[test]
    fn test_forward_referenced_derived_keys() {
        let fixture = Fixture::new();
        let mut engine = SendEngine::new(
            SendPolicy {
                derive_keys: true,
                ..SendPolicy::default()
            },
            fixture.provider.clone(),
        )
        .unwrap();
        engine
            .set_encryption_token(Arc::clone(&fixture.service_cert), true)
            .unwrap();
        let mut secured = engine
            .secure(SoapMessage::new(REQUEST_BODY.to_vec()), NOW)
            .unwrap();

        // Move every derived key behind the elements that use it.
        let elements = std::mem::take(&mut secured.message.security.elements);
        let (derived, mut rest): (Vec<_>, Vec<_>) = elements
            .into_iter()
            .partition(|e| matches!(e, HeaderElement::DerivedKey(_)));
        assert_eq!(derived.len(), 2);
        rest.extend(derived);
        secured.message.security.elements = rest;

        let symmetric = |layout| ReceivePolicy {
            primary_token_type: None,
            ..policy(layout)
        };
        let strict = service_engine(&fixture, symmetric(SecurityHeaderLayout::Strict))
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert!(matches!(strict, SecurityError::UnresolvedKeyReference { .. }));

        let verified = service_engine(&fixture, symmetric(SecurityHeaderLayout::Lax))
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap();
        assert_eq!(verified.body.plaintext(), Some(REQUEST_BODY));
    }

    #[test]
    fn test_unresolvable_derived_key_fails_final_pass() {
        let fixture = Fixture::new();
        let mut engine = SendEngine::new(
            SendPolicy {
                derive_keys: true,
                layout: SecurityHeaderLayout::Lax,
                ..SendPolicy::default()
            },
            fixture.provider.clone(),
        )
        .unwrap();
        engine
            .set_encryption_token(Arc::clone(&fixture.service_cert), true)
            .unwrap();
        let mut secured = engine
            .secure(SoapMessage::new(REQUEST_BODY.to_vec()), NOW)
            .unwrap();
        for element in &mut secured.message.security.elements {
            if let HeaderElement::DerivedKey(key) = element {
                key.source = KeyIdentifierClause::LocalId("no-such-token".into());
            }
        }

        let err = service_engine(
            &fixture,
            ReceivePolicy {
                primary_token_type: None,
                ..policy(SecurityHeaderLayout::Lax)
            },
        )
        .process(over_the_wire(&secured.message), NOW, TIMEOUT)
        .unwrap_err();
        assert!(matches!(err, SecurityError::UnresolvedDerivedKeySource(_)));
    }
}

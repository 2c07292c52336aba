//! # Cardinality
//!
//! Under the default policy a header carries at most one primary
//! signature, one reference list and one wrapped key.

#[cfg(test)]
mod tests {
    use wss_header::test_utils::Fixture;
    use wss_header::{ReceivePolicy, SecurityError, SendPolicy, MAX_ALLOWED_WRAPPED_KEYS};
    use wss_types::{HeaderElement, MessageProtectionOrder, SoapMessage};

    use crate::{client_request, over_the_wire, service_engine, service_policy, NOW, TIMEOUT};

    fn position(message: &SoapMessage, name: &str) -> usize {
        message
            .security
            .elements
            .iter()
            .position(|e| e.name() == name)
            .unwrap()
    }

    fn process(fixture: &Fixture, policy: ReceivePolicy, message: &SoapMessage) -> SecurityError {
        service_engine(fixture, policy)
            .process(over_the_wire(message), NOW, TIMEOUT)
            .unwrap_err()
    }

    #[test]
    fn test_second_signature_rejected() {
        let fixture = Fixture::new();
        let mut secured = client_request(
            &fixture,
            SendPolicy {
                encrypted_parts: vec![],
                ..SendPolicy::default()
            },
        );
        let index = position(&secured.message, "Signature");
        let HeaderElement::Signature(mut copy) = secured.message.security.elements[index].clone()
        else {
            unreachable!();
        };
        copy.id = "second-signature".into();
        secured.message.security.elements.push(HeaderElement::Signature(copy));

        let policy = ReceivePolicy {
            encrypted_parts: vec![],
            ..service_policy(MessageProtectionOrder::SignBeforeEncrypt)
        };
        let err = process(&fixture, policy, &secured.message);
        assert!(matches!(err, SecurityError::AtMostOneSignature));
    }

    #[test]
    fn test_second_reference_list_rejected() {
        let fixture = Fixture::new();
        let mut secured = client_request(&fixture, SendPolicy::default());
        let index = position(&secured.message, "ReferenceList");
        let list = secured.message.security.elements[index].clone();
        secured.message.security.elements.push(list);

        let err = process(
            &fixture,
            service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature),
            &secured.message,
        );
        assert!(matches!(err, SecurityError::AtMostOneReferenceList));
    }

    #[test]
    fn test_second_wrapped_key_rejected() {
        let fixture = Fixture::new();
        let mut secured = client_request(&fixture, SendPolicy::default());
        let index = position(&secured.message, "EncryptedKey");
        let HeaderElement::EncryptedKey(mut copy) = secured.message.security.elements[index].clone()
        else {
            unreachable!();
        };
        copy.id = "second-key".into();
        secured
            .message
            .security
            .elements
            .insert(index + 1, HeaderElement::EncryptedKey(copy));

        let err = process(
            &fixture,
            service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature),
            &secured.message,
        );
        assert!(matches!(
            err,
            SecurityError::AtMostOneWrappedKey { limit } if limit == MAX_ALLOWED_WRAPPED_KEYS
        ));
    }

    #[test]
    fn test_duplicate_wire_id_rejected() {
        let fixture = Fixture::new();
        let mut secured = client_request(&fixture, SendPolicy::default());
        let index = position(&secured.message, "Token");
        let token = secured.message.security.elements[index].clone();
        secured.message.security.elements.insert(index + 1, token);

        let err = process(
            &fixture,
            service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature),
            &secured.message,
        );
        assert!(matches!(err, SecurityError::DuplicateId(id) if id == "client-cert"));
    }
}

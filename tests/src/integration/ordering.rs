//! # Protection Order
//!
//! The order in which a receiver meets the primary signature and the
//! reference list must match the negotiated protection order.

#[cfg(test)]
mod tests {
    use wss_header::test_utils::Fixture;
    use wss_header::{ReceivePolicy, ReceiverProcessingOrder, SecurityError, SendPolicy};
    use wss_types::{HeaderElement, MessageProtectionOrder};

    use crate::{client_request, over_the_wire, service_engine, service_policy, NOW, TIMEOUT};

    fn sent_with(order: MessageProtectionOrder) -> SendPolicy {
        SendPolicy {
            protection_order: order,
            ..SendPolicy::default()
        }
    }

    #[test]
    fn test_decrypt_then_verify_rejected_under_sign_before_encrypt() {
        let fixture = Fixture::new();
        let secured =
            client_request(&fixture, sent_with(MessageProtectionOrder::EncryptBeforeSign));
        let names: Vec<&str> = secured
            .message
            .security
            .elements
            .iter()
            .map(HeaderElement::name)
            .collect();
        let list = names.iter().position(|n| *n == "ReferenceList").unwrap();
        let signature = names.iter().position(|n| *n == "Signature").unwrap();
        assert!(list < signature);

        let policy = service_policy(MessageProtectionOrder::SignBeforeEncrypt);
        let err = service_engine(&fixture, policy)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert!(matches!(
            err,
            SecurityError::ProtectionOrderMismatch {
                required: MessageProtectionOrder::SignBeforeEncrypt,
                observed: ReceiverProcessingOrder::DecryptVerify,
            }
        ));
        assert!(err.fault().is_some());
    }

    #[test]
    fn test_verify_then_decrypt_rejected_under_encrypt_before_sign() {
        let fixture = Fixture::new();
        let secured =
            client_request(&fixture, sent_with(MessageProtectionOrder::SignBeforeEncrypt));

        let policy = service_policy(MessageProtectionOrder::EncryptBeforeSign);
        let err = service_engine(&fixture, policy)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap_err();
        assert!(matches!(
            err,
            SecurityError::ProtectionOrderMismatch {
                required: MessageProtectionOrder::EncryptBeforeSign,
                observed: ReceiverProcessingOrder::VerifyDecrypt,
            }
        ));
    }

    #[test]
    fn test_clear_signature_rejected_when_signature_must_be_encrypted() {
        let fixture = Fixture::new();
        let secured =
            client_request(&fixture, sent_with(MessageProtectionOrder::SignBeforeEncrypt));

        let err = service_engine(
            &fixture,
            service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature),
        )
        .process(over_the_wire(&secured.message), NOW, TIMEOUT)
        .unwrap_err();
        assert!(matches!(err, SecurityError::ProtectionOrderMismatch { .. }));
    }

    #[test]
    fn test_downgraded_order_accepts_clear_signature_over_clear_body() {
        let fixture = Fixture::new();
        let secured = client_request(
            &fixture,
            SendPolicy {
                encrypted_parts: vec![],
                ..SendPolicy::default()
            },
        );
        let policy = ReceivePolicy {
            encrypted_parts: vec![],
            ..service_policy(MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature)
        };

        let verified = service_engine(&fixture, policy)
            .process(over_the_wire(&secured.message), NOW, TIMEOUT)
            .unwrap();
        assert_eq!(verified.processing_order, ReceiverProcessingOrder::Verify);
    }

    #[test]
    fn test_no_required_order_accepts_either_sequence() {
        let fixture = Fixture::new();
        let policy = ReceivePolicy {
            required_order: None,
            ..service_policy(MessageProtectionOrder::SignBeforeEncrypt)
        };

        for order in [
            MessageProtectionOrder::SignBeforeEncrypt,
            MessageProtectionOrder::EncryptBeforeSign,
        ] {
            let secured = client_request(&fixture, sent_with(order));
            service_engine(&fixture, policy.clone())
                .process(over_the_wire(&secured.message), NOW, TIMEOUT)
                .unwrap();
        }
    }
}

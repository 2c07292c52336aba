//! # Order Tracker
//!
//! Records the relative order in which a receiver verifies the primary
//! signature and processes reference lists, and checks it against the
//! required message protection order.
//!
//! ## State Machine
//!
//! ```text
//!                 on_reference_list   on_signature
//! None            Decrypt             Verify
//! Verify          VerifyDecrypt       Verify
//! Decrypt         Decrypt             DecryptVerify
//! DecryptVerify   Mixed               DecryptVerify
//! VerifyDecrypt   VerifyDecrypt       Mixed
//! Mixed           Mixed               Mixed
//! ```
//!
//! Order checks run only after `set_required_order`. Cardinality checks
//! (one signature, one reference list, one wrapped key) always run.

use serde::{Deserialize, Serialize};
use wss_types::MessageProtectionOrder;

use crate::domain::errors::{Result, SecurityError};

/// Maximum number of `EncryptedKey` elements per message.
pub const MAX_ALLOWED_WRAPPED_KEYS: usize = 1;

/// Observed receiver processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReceiverProcessingOrder {
    #[default]
    None = 0,
    Verify = 1,
    Decrypt = 2,
    DecryptVerify = 3,
    VerifyDecrypt = 4,
    Mixed = 5,
}

use ReceiverProcessingOrder as S;

const ON_REFERENCE_LIST: [ReceiverProcessingOrder; 6] = [
    S::Decrypt,
    S::VerifyDecrypt,
    S::Decrypt,
    S::Mixed,
    S::VerifyDecrypt,
    S::Mixed,
];

const ON_SIGNATURE: [ReceiverProcessingOrder; 6] = [
    S::Verify,
    S::Verify,
    S::DecryptVerify,
    S::DecryptVerify,
    S::Mixed,
    S::Mixed,
];

/// Per-message protection order bookkeeping.
#[derive(Debug, Default)]
pub struct OrderTracker {
    state: ReceiverProcessingOrder,
    signature_count: usize,
    unencrypted_signature_count: usize,
    reference_list_count: usize,
    wrapped_key_count: usize,
    required_order: Option<MessageProtectionOrder>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable enforcement of `order`.
    pub fn set_required_order(&mut self, order: MessageProtectionOrder) {
        self.required_order = Some(order);
    }

    pub fn required_order(&self) -> Option<MessageProtectionOrder> {
        self.required_order
    }

    pub fn state(&self) -> ReceiverProcessingOrder {
        self.state
    }

    pub fn signature_count(&self) -> usize {
        self.signature_count
    }

    pub fn unencrypted_signature_count(&self) -> usize {
        self.unencrypted_signature_count
    }

    pub fn reference_list_count(&self) -> usize {
        self.reference_list_count
    }

    pub fn wrapped_key_count(&self) -> usize {
        self.wrapped_key_count
    }

    /// A primary signature is about to be verified.
    pub fn on_process_signature(&mut self, is_encrypted: bool) -> Result<()> {
        if self.signature_count >= 1 {
            return Err(SecurityError::AtMostOneSignature);
        }
        self.signature_count += 1;
        if !is_encrypted {
            self.unencrypted_signature_count += 1;
        }
        self.state = ON_SIGNATURE[self.state as usize];
        self.enforce()
    }

    /// A reference list is about to be processed.
    pub fn on_process_reference_list(&mut self) -> Result<()> {
        if self.reference_list_count >= 1 {
            return Err(SecurityError::AtMostOneReferenceList);
        }
        self.reference_list_count += 1;
        self.state = ON_REFERENCE_LIST[self.state as usize];
        self.enforce()
    }

    /// An `EncryptedKey` was read.
    pub fn on_encrypted_key(&mut self) -> Result<()> {
        if self.wrapped_key_count >= MAX_ALLOWED_WRAPPED_KEYS {
            return Err(SecurityError::AtMostOneWrappedKey {
                limit: MAX_ALLOWED_WRAPPED_KEYS,
            });
        }
        self.wrapped_key_count += 1;
        Ok(())
    }

    fn enforce(&self) -> Result<()> {
        let Some(required) = self.required_order else {
            return Ok(());
        };
        let satisfied = match required {
            MessageProtectionOrder::SignBeforeEncryptAndEncryptSignature => {
                self.unencrypted_signature_count == 0
                    && !matches!(self.state, S::DecryptVerify | S::Mixed)
            }
            MessageProtectionOrder::SignBeforeEncrypt => {
                !matches!(self.state, S::DecryptVerify | S::Mixed)
            }
            MessageProtectionOrder::EncryptBeforeSign => {
                !matches!(self.state, S::VerifyDecrypt | S::Mixed)
            }
        };
        if satisfied {
            Ok(())
        } else {
            Err(SecurityError::ProtectionOrderMismatch {
                required,
                observed: self.state,
            })
        }
    }
}

//! # WS-Security Types Crate
//!
//! Wire vocabulary shared by the header engines.
//!
//! ## Contents
//!
//! - **Tokens** (`tokens`): `SecurityToken`, `TokenType`, `KeyIdentifierClause`
//! - **Header elements** (`elements`): the tagged `HeaderElement` variants that
//!   may appear inside a `<wsse:Security>` header
//! - **Message model** (`message`): `SoapMessage`, `MessagePart`, `PartContent`
//! - **Policy vocabulary** (`policy`): header layout, protection order,
//!   WS-Security version, supporting-token attachment modes
//! - **Algorithm and namespace URIs** (`algorithms`)
//!
//! ## Design Principles
//!
//! - **Already-parsed XML**: XML reading and canonicalization live behind the
//!   cryptographic provider. Everything here is a typed view of an element.
//! - **Key material never travels**: symmetric secrets on a `SecurityToken`
//!   are skipped by serde and zeroized on drop.

pub mod algorithms;
pub mod elements;
pub mod message;
pub mod policy;
pub mod tokens;

pub use elements::{
    DerivedKeyElement, EncryptedData, EncryptedKey, HeaderElement, ReferenceList, Signature,
    SignatureConfirmation, SignatureReference, SignedInfo, SecurityTokenReference, Timestamp,
};
pub use message::{MessagePart, PartContent, SecurityHeader, SoapMessage};
pub use policy::{
    MessageProtectionOrder, SecurityHeaderLayout, SecurityVersion, SupportingTokenMode,
};
pub use tokens::{
    underlying_token, KeyBytes, KeyIdentifierClause, SecurityToken, TokenOrigin, TokenType,
};

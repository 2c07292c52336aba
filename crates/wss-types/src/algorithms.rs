//! # Algorithm and Namespace URIs
//!
//! URIs written into `SignedInfo` and used by providers to pick primitives.

/// Exclusive XML canonicalization.
pub const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// HMAC-SHA256 signature method (symmetric keys).
pub const HMAC_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha256";

/// RSA-SHA256 signature method (asymmetric keys).
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// SHA-256 digest method.
pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// WS-SecureConversation P_SHA1 key derivation.
pub const P_SHA1: &str = "http://schemas.xmlsoap.org/ws/2005/02/sc/dk/p_sha1";

/// Default label mixed into derived keys when none is negotiated.
pub const DEFAULT_DERIVATION_LABEL: &str = "WS-SecureConversationWS-SecureConversation";

pub mod ns {
    /// WS-Security 1.0 extension namespace.
    pub const WSSE: &str =
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";

    /// WS-Security utility namespace (wsu:Id, wsu:Timestamp).
    pub const WSU: &str =
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";

    /// WS-Security 1.1 namespace (SignatureConfirmation).
    pub const WSSE11: &str = "http://docs.oasis-open.org/wss/oasis-wss-wssecurity-secext-1.1.xsd";

    /// XML Digital Signature namespace.
    pub const DS: &str = "http://www.w3.org/2000/09/xmldsig#";

    /// XML Encryption namespace.
    pub const XENC: &str = "http://www.w3.org/2001/04/xmlenc#";
}

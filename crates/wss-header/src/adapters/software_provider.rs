//! # Software Crypto Provider
//!
//! A pure-software `CryptoProvider` for tests and demos.
//!
//! | Operation | Primitive |
//! |-----------|-----------|
//! | Canonical form | `serde_json` bytes of the element |
//! | Digest | SHA-256 |
//! | Signature | HMAC-SHA256 over the canonical `SignedInfo` |
//! | Data / key encryption | XChaCha20-Poly1305, 24-byte nonce prefix |
//! | Key derivation | P_hash with HMAC-SHA256 over `label \|\| nonce` |
//!
//! X.509 tokens carry no secret. Their key is looked up by thumbprint in a
//! keyring shared by every clone of the provider, standing in for the
//! certificate's key pair.

use std::collections::HashMap;
use std::sync::Arc;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use wss_types::{
    algorithms, DerivedKeyElement, EncryptedData, EncryptedKey, HeaderElement, KeyBytes,
    SecurityToken, SecurityVersion, SignedInfo,
};

use crate::ports::outbound::{CryptoError, CryptoProvider};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 24;

#[derive(Clone)]
pub struct SoftwareCryptoProvider {
    version: SecurityVersion,
    keyring: Arc<RwLock<HashMap<Vec<u8>, KeyBytes>>>,
}

impl SoftwareCryptoProvider {
    pub fn new(version: SecurityVersion) -> Self {
        Self {
            version,
            keyring: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Same keyring, different protocol version.
    pub fn for_version(&self, version: SecurityVersion) -> Self {
        Self {
            version,
            keyring: Arc::clone(&self.keyring),
        }
    }

    /// Create an X.509 token whose key pair lives in the keyring.
    pub fn issue_certificate(&self, id: &str, subject: &str) -> Arc<SecurityToken> {
        let mut thumbprint = vec![0u8; 20];
        rand::thread_rng().fill_bytes(&mut thumbprint);
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        self.keyring
            .write()
            .insert(thumbprint.clone(), KeyBytes::new(key));
        Arc::new(SecurityToken::x509(id, subject, thumbprint))
    }

    /// A fresh secure-conversation token with a random 32-byte secret.
    pub fn issue_security_context(&self, id: &str) -> Arc<SecurityToken> {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Arc::new(SecurityToken::security_context(id, KeyBytes::new(key)))
    }

    fn key_of(&self, token: &SecurityToken) -> Result<KeyBytes, CryptoError> {
        if let Some(secret) = &token.secret {
            return Ok(secret.clone());
        }
        token
            .thumbprint
            .as_ref()
            .and_then(|tp| self.keyring.read().get(tp).cloned())
            .ok_or_else(|| CryptoError::MissingKeyMaterial(token.id.clone()))
    }

    fn cipher_for(&self, token: &SecurityToken) -> Result<XChaCha20Poly1305, CryptoError> {
        let key = self.key_of(token)?;
        let cipher_key = Sha256::digest(key.as_bytes());
        Ok(XChaCha20Poly1305::new(&cipher_key))
    }

    fn mac_for(&self, token: &SecurityToken) -> Result<HmacSha256, CryptoError> {
        let key = self.key_of(token)?;
        <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Internal(e.to_string()))
    }

    fn signed_info_bytes(signed_info: &SignedInfo) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(signed_info).map_err(|e| CryptoError::Internal(e.to_string()))
    }

    fn seal(&self, plaintext: &[u8], token: &SecurityToken) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher_for(token)?;
        let nonce = self.generate_key_material(NONCE_LEN)?;
        let sealed = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Internal(e.to_string()))?;
        let mut out = nonce;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, cipher_value: &[u8], token: &SecurityToken) -> Result<Vec<u8>, CryptoError> {
        if cipher_value.len() < NONCE_LEN {
            return Err(CryptoError::DecryptionFailed("cipher value too short".into()));
        }
        let cipher = self.cipher_for(token)?;
        let (nonce, sealed) = cipher_value.split_at(NONCE_LEN);
        cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

impl Default for SoftwareCryptoProvider {
    fn default() -> Self {
        Self::new(SecurityVersion::WsSecurity11)
    }
}

impl CryptoProvider for SoftwareCryptoProvider {
    fn security_version(&self) -> SecurityVersion {
        self.version
    }

    fn canonicalize(&self, element: &HeaderElement) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(element).map_err(|e| CryptoError::Internal(e.to_string()))
    }

    fn parse_element(&self, plaintext: &[u8]) -> Result<HeaderElement, CryptoError> {
        serde_json::from_slice(plaintext).map_err(|e| CryptoError::MalformedElement(e.to_string()))
    }

    fn compute_digest(&self, method: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if method != algorithms::SHA256 {
            return Err(CryptoError::UnsupportedAlgorithm(method.to_string()));
        }
        Ok(Sha256::digest(data).to_vec())
    }

    fn verify_signature(
        &self,
        signed_info: &SignedInfo,
        value: &[u8],
        key: &SecurityToken,
    ) -> Result<(), CryptoError> {
        let mut mac = self.mac_for(key)?;
        mac.update(&Self::signed_info_bytes(signed_info)?);
        mac.verify_slice(value)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    fn decrypt_wrapped_key(
        &self,
        encrypted_key: &EncryptedKey,
        wrapping: &SecurityToken,
    ) -> Result<KeyBytes, CryptoError> {
        self.open(&encrypted_key.cipher_value, wrapping)
            .map(KeyBytes::new)
    }

    fn decrypt_data(
        &self,
        data: &EncryptedData,
        key: &SecurityToken,
    ) -> Result<Vec<u8>, CryptoError> {
        self.open(&data.cipher_value, key)
    }

    fn derive_key(
        &self,
        source: &SecurityToken,
        element: &DerivedKeyElement,
    ) -> Result<KeyBytes, CryptoError> {
        let secret = self.key_of(source)?;
        let mut seed = element.label.as_bytes().to_vec();
        seed.extend_from_slice(&element.nonce);

        let wanted = (element.offset + element.length) as usize;
        let mut output = Vec::with_capacity(wanted + 32);
        // A(0) = seed, A(i) = HMAC(secret, A(i-1))
        let mut a = seed.clone();
        while output.len() < wanted {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
                .map_err(|e| CryptoError::Internal(e.to_string()))?;
            mac.update(&a);
            a = mac.finalize().into_bytes().to_vec();

            let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
                .map_err(|e| CryptoError::Internal(e.to_string()))?;
            mac.update(&a);
            mac.update(&seed);
            output.extend_from_slice(&mac.finalize().into_bytes());
        }
        let key = output[element.offset as usize..wanted].to_vec();
        zeroize::Zeroize::zeroize(&mut output);
        Ok(KeyBytes::new(key))
    }

    fn generate_key_material(&self, length: usize) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = vec![0u8; length];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::Internal(e.to_string()))?;
        Ok(bytes)
    }

    fn wrap_key(&self, key: &KeyBytes, wrapping: &SecurityToken) -> Result<Vec<u8>, CryptoError> {
        self.seal(key.as_bytes(), wrapping)
    }

    fn encrypt_data(&self, plaintext: &[u8], key: &SecurityToken) -> Result<Vec<u8>, CryptoError> {
        self.seal(plaintext, key)
    }

    fn compute_signature(
        &self,
        signed_info: &SignedInfo,
        key: &SecurityToken,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut mac = self.mac_for(key)?;
        mac.update(&Self::signed_info_bytes(signed_info)?);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::{NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

/// Encrypted message text as it travels and rests: ciphertext, the per-message
/// key and the nonce, all base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherBundle {
    pub encrypted_message: String,
    pub key: String,
    pub iv: String,
}

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Fresh key and nonce per message
pub fn encrypt_text(text: &str) -> Result<CipherBundle, CryptoError> {
    let key = generate_symmetric_key();
    let nonce_bytes = generate_nonce();

    let cipher = XChaCha20Poly1305::new((&key).into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), text.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(CipherBundle {
        encrypted_message: BASE64.encode(ciphertext),
        key: BASE64.encode(key),
        iv: BASE64.encode(nonce_bytes),
    })
}

pub fn decrypt_text(bundle: &CipherBundle) -> Result<String, CryptoError> {
    let key = decode_field(&bundle.key, "key")?;
    let nonce = decode_field(&bundle.iv, "iv")?;
    let ciphertext = decode_field(&bundle.encrypted_message, "encryptedMessage")?;

    if key.len() != SYMMETRIC_KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength);
    }
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher =
        XChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength)?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(value)
        .map_err(|e| CryptoError::InvalidEncoding(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let bundle = encrypt_text("Can you explain recursion?").unwrap();
        assert_eq!(decrypt_text(&bundle).unwrap(), "Can you explain recursion?");
    }

    #[test]
    fn test_each_message_gets_fresh_key() {
        let a = encrypt_text("same text").unwrap();
        let b = encrypt_text("same text").unwrap();
        assert_ne!(a.key, b.key);
        assert_ne!(a.encrypted_message, b.encrypted_message);
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut bundle = encrypt_text("Secret message").unwrap();
        bundle.key = BASE64.encode(generate_symmetric_key());
        assert!(decrypt_text(&bundle).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut bundle = encrypt_text("Important data").unwrap();
        let mut raw = BASE64.decode(&bundle.encrypted_message).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        bundle.encrypted_message = BASE64.encode(raw);

        assert!(matches!(
            decrypt_text(&bundle),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_short_key_rejected() {
        let mut bundle = encrypt_text("x").unwrap();
        bundle.key = BASE64.encode([1u8; 16]);
        assert!(matches!(
            decrypt_text(&bundle),
            Err(CryptoError::InvalidKeyLength)
        ));
    }

    #[test]
    fn test_bundle_uses_camel_case_fields() {
        let bundle = encrypt_text("hi").unwrap();
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json.get("encryptedMessage").is_some());
        assert!(json.get("iv").is_some());
    }

    proptest! {
        #[test]
        fn prop_decrypt_inverts_encrypt(text in ".{1,512}") {
            let bundle = encrypt_text(&text).unwrap();
            prop_assert_eq!(decrypt_text(&bundle).unwrap(), text);
        }
    }
}

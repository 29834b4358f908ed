use doubtroom_shared::crypto::{decrypt_text, encrypt_text, CipherBundle};
use doubtroom_shared::error::CryptoError;

/// Encryption capability applied to message text before it leaves the server.
pub trait MessageCipher: Send + Sync {
    fn encrypt(&self, text: &str) -> Result<CipherBundle, CryptoError>;
    fn decrypt(&self, bundle: &CipherBundle) -> Result<String, CryptoError>;
}

/// XChaCha20-Poly1305 with a fresh key and nonce per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct XChaChaCipher;

impl MessageCipher for XChaChaCipher {
    fn encrypt(&self, text: &str) -> Result<CipherBundle, CryptoError> {
        encrypt_text(text)
    }

    fn decrypt(&self, bundle: &CipherBundle) -> Result<String, CryptoError> {
        decrypt_text(bundle)
    }
}

//! Cipher - authenticated encryption of stored payloads
//!
//! One long-lived age X25519 identity encrypts everything. Every call to
//! [`Cipher::encrypt`] produces a self-contained armored age file with its
//! own ephemeral key and nonce, so callers never track IVs.

use crate::error::{Result, StoreError};
use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::secrecy::ExposeSecret;
use std::fmt;
use std::io::{Read, Write};
use std::iter;

/// Process-wide cipher, read-only after construction
pub struct Cipher {
    identity: age::x25519::Identity,
    recipient: age::x25519::Recipient,
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("recipient", &self.recipient.to_string())
            .finish_non_exhaustive()
    }
}

impl Cipher {
    /// Build from an `AGE-SECRET-KEY-1...` string
    pub fn from_key(secret: &str) -> Result<Self> {
        let identity = secret
            .trim()
            .parse::<age::x25519::Identity>()
            .map_err(|e| StoreError::MissingKey(e.to_string()))?;
        let recipient = identity.to_public();

        Ok(Self {
            identity,
            recipient,
        })
    }

    /// Generate a fresh identity, returning the cipher and its secret key
    pub fn generate() -> (Self, String) {
        let identity = age::x25519::Identity::generate();
        let secret = identity.to_string().expose_secret().to_string();
        let recipient = identity.to_public();

        (
            Self {
                identity,
                recipient,
            },
            secret,
        )
    }

    /// Public half of the key, safe to print
    pub fn public_key(&self) -> String {
        self.recipient.to_string()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let encryptor = age::Encryptor::with_recipients(vec![Box::new(self.recipient.clone())])
            .ok_or_else(|| StoreError::Encryption("no recipients".to_string()))?;

        let mut encrypted = vec![];
        let armor = ArmoredWriter::wrap_output(&mut encrypted, Format::AsciiArmor)
            .map_err(encryption_error)?;
        let mut writer = encryptor.wrap_output(armor).map_err(encryption_error)?;

        writer.write_all(plaintext).map_err(encryption_error)?;
        writer
            .finish()
            .and_then(|armor| armor.finish())
            .map_err(encryption_error)?;

        Ok(encrypted)
    }

    /// Fails with [`StoreError::Decryption`] on tampered, truncated or foreign input
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let decryptor = match age::Decryptor::new(ArmoredReader::new(ciphertext))
            .map_err(decryption_error)?
        {
            age::Decryptor::Recipients(d) => d,
            _ => {
                return Err(StoreError::Decryption(
                    "unexpected passphrase encryption".to_string(),
                ))
            }
        };

        let mut reader = decryptor
            .decrypt(iter::once(&self.identity as &dyn age::Identity))
            .map_err(decryption_error)?;

        let mut decrypted = vec![];
        reader
            .read_to_end(&mut decrypted)
            .map_err(decryption_error)?;

        Ok(decrypted)
    }

    /// Encrypt into a string suitable for a JSON field
    pub fn encrypt_to_string(&self, plaintext: &[u8]) -> Result<String> {
        let armored = self.encrypt(plaintext)?;
        String::from_utf8(armored).map_err(encryption_error)
    }

    pub fn decrypt_str(&self, ciphertext: &str) -> Result<Vec<u8>> {
        self.decrypt(ciphertext.as_bytes())
    }
}

fn encryption_error<E: fmt::Display>(e: E) -> StoreError {
    StoreError::Encryption(e.to_string())
}

fn decryption_error<E: fmt::Display>(e: E) -> StoreError {
    StoreError::Decryption(e.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Flip one base64 character in the armored body
    pub(crate) fn tamper(armored: &[u8]) -> Vec<u8> {
        let mut bytes = armored.to_vec();
        let start = bytes.len() / 2;
        let pos = (start..bytes.len())
            .find(|&i| bytes[i].is_ascii_alphanumeric())
            .expect("armored body has alphanumerics");
        bytes[pos] = if bytes[pos] == b'A' { b'B' } else { b'A' };
        bytes
    }

    #[test]
    fn test_round_trip() {
        let (cipher, _) = Cipher::generate();
        let encrypted = cipher.encrypt(b"{\"A\":\"1\"}").unwrap();
        assert_ne!(encrypted, b"{\"A\":\"1\"}".to_vec());
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), b"{\"A\":\"1\"}".to_vec());
    }

    #[test]
    fn test_each_token_is_independent() {
        let (cipher, _) = Cipher::generate();
        let first = cipher.encrypt(b"same").unwrap();
        let second = cipher.encrypt(b"same").unwrap();
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), b"same".to_vec());
        assert_eq!(cipher.decrypt(&second).unwrap(), b"same".to_vec());
    }

    #[test]
    fn test_key_round_trip() {
        let (cipher, secret) = Cipher::generate();
        assert!(secret.starts_with("AGE-SECRET-KEY-1"));
        assert!(cipher.public_key().starts_with("age1"));

        let reloaded = Cipher::from_key(&secret).unwrap();
        let encrypted = cipher.encrypt(b"payload").unwrap();
        assert_eq!(reloaded.decrypt(&encrypted).unwrap(), b"payload".to_vec());
    }

    #[test]
    fn test_invalid_key() {
        let err = Cipher::from_key("not-a-key").unwrap_err();
        assert!(matches!(err, StoreError::MissingKey(_)));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let (cipher, _) = Cipher::generate();
        let encrypted = cipher.encrypt(b"secret value").unwrap();
        let err = cipher.decrypt(&tamper(&encrypted)).unwrap_err();
        assert!(err.is_decryption());
    }

    #[test]
    fn test_wrong_key() {
        let (cipher, _) = Cipher::generate();
        let (other, _) = Cipher::generate();
        let encrypted = cipher.encrypt(b"secret value").unwrap();
        assert!(other.decrypt(&encrypted).unwrap_err().is_decryption());
    }

    #[test]
    fn test_garbage_input() {
        let (cipher, _) = Cipher::generate();
        assert!(cipher.decrypt(b"not an age file").unwrap_err().is_decryption());
        assert!(cipher.decrypt(b"").unwrap_err().is_decryption());
    }

    #[test]
    fn test_string_form() {
        let (cipher, _) = Cipher::generate();
        let token = cipher.encrypt_to_string(b"text").unwrap();
        assert!(token.starts_with("-----BEGIN AGE ENCRYPTED FILE-----"));
        assert_eq!(cipher.decrypt_str(&token).unwrap(), b"text".to_vec());
    }
}

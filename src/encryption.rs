//! Symmetric encryption of config values.
//!
//! Values are encrypted with AES-256-GCM. The key is a hex-encoded 32-byte string and an encrypted
//! value has the form `"{ciphertext}--{iv}--{auth_tag}"` with every part hex-encoded.
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{thread_rng, RngCore};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

const TAG_SIZE: usize = 16;
const SEPARATOR: &str = "--";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum EncryptionError {
    #[error("encryption key must be 32 hex-encoded bytes")]
    InvalidKey,
    #[error("encrypted value must be \"data--iv--tag\" hex-encoded")]
    InvalidFormat,
    #[error("cipher failure")]
    Cipher,
    #[error("decrypted value is not valid UTF-8")]
    Utf8,
}

fn cipher(key_hex: &str) -> Result<Aes256Gcm, EncryptionError> {
    let key = hex::decode(key_hex.trim()).map_err(|_| EncryptionError::InvalidKey)?;
    Aes256Gcm::new_from_slice(&key).map_err(|_| EncryptionError::InvalidKey)
}

/// Decrypt `encrypted` with the hex-encoded `key_hex`.
pub fn decrypt(key_hex: &str, encrypted: &str) -> Result<String, EncryptionError> {
    let cipher = cipher(key_hex)?;

    let mut parts = encrypted.split(SEPARATOR).map(hex::decode);
    let (Some(Ok(mut data)), Some(Ok(iv)), Some(Ok(tag)), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(EncryptionError::InvalidFormat);
    };
    if iv.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return Err(EncryptionError::InvalidFormat);
    }

    // aes-gcm expects the tag appended to the ciphertext.
    data.extend_from_slice(&tag);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), data.as_slice())
        .map_err(|_| EncryptionError::Cipher)?;

    String::from_utf8(plaintext).map_err(|_| EncryptionError::Utf8)
}

/// Encrypt `plaintext` with the hex-encoded `key_hex` using a random IV.
pub fn encrypt(key_hex: &str, plaintext: &str) -> Result<String, EncryptionError> {
    let cipher = cipher(key_hex)?;

    let mut iv = [0u8; NONCE_SIZE];
    thread_rng().fill_bytes(&mut iv);

    let mut data = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|_| EncryptionError::Cipher)?;
    let tag = data.split_off(data.len() - TAG_SIZE);

    Ok([hex::encode(data), hex::encode(iv), hex::encode(tag)].join(SEPARATOR))
}

/// Generate a random hex-encoded key.
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    thread_rng().fill_bytes(&mut key);
    hex::encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "e657e0406fc22e17d3145966396b2130d33dcb30ac0edd62a77235cdd01fc49d";

    #[test]
    fn decrypts_what_it_encrypts() {
        let encrypted = encrypt(KEY, "the secret").unwrap();
        assert_eq!(encrypted.split("--").count(), 3);
        assert_eq!(decrypt(KEY, &encrypted).unwrap(), "the secret");
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = encrypt(KEY, "the secret").unwrap();
        assert_eq!(
            decrypt(&generate_key(), &encrypted),
            Err(EncryptionError::Cipher)
        );
    }

    #[test]
    fn malformed_input() {
        assert_eq!(decrypt("nothex", "aa--bb--cc"), Err(EncryptionError::InvalidKey));
        assert_eq!(decrypt(KEY, "aabb"), Err(EncryptionError::InvalidFormat));
        assert_eq!(decrypt(KEY, "zz--00--00"), Err(EncryptionError::InvalidFormat));
        assert_eq!(
            decrypt(KEY, "aa--000000000000000000000000--00"),
            Err(EncryptionError::InvalidFormat)
        );
    }

    #[test]
    fn tampering_is_detected() {
        let encrypted = encrypt(KEY, "the secret").unwrap();
        let mut parts = encrypted.split("--").map(str::to_owned).collect::<Vec<_>>();
        let flipped = if parts[0].starts_with("00") { "01" } else { "00" };
        parts[0].replace_range(0..2, flipped);
        assert_eq!(decrypt(KEY, &parts.join("--")), Err(EncryptionError::Cipher));
    }
}

use crate::error::{CoreError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};

// ChaCha20Poly1305 for authenticated encryption
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KDF_ROUNDS: u32 = 100_000;

/// Seal `data` under `passphrase`.
///
/// Output is base64 of `salt ‖ nonce ‖ ciphertext`, with a fresh salt and
/// nonce per call.
pub fn seal(data: &[u8], passphrase: &str) -> Result<String> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(&derive_key(passphrase, &salt));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), data)
        .map_err(|e| CoreError::internal(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

/// Reverse of [`seal`]. Fails on a wrong passphrase or tampered input.
pub fn unseal(sealed: &str, passphrase: &str) -> Result<Vec<u8>> {
    let raw = STANDARD
        .decode(sealed)
        .map_err(|e| CoreError::decode(format!("sealed value is not base64: {}", e)))?;
    if raw.len() < SALT_SIZE + NONCE_SIZE {
        return Err(CoreError::decode("sealed value too short"));
    }

    let (salt, rest) = raw.split_at(SALT_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let cipher = ChaCha20Poly1305::new(&derive_key(passphrase, salt));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| CoreError::internal(format!("Decryption failed: {}", e)))
}

/// Derive encryption key from passphrase using PBKDF2
fn derive_key(passphrase: &str, salt: &[u8]) -> Key {
    use pbkdf2::pbkdf2_hmac;
    use sha2::Sha256;

    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, KDF_ROUNDS, &mut key);
    *Key::from_slice(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let data = [9u8; 32];
        let sealed = seal(&data, "correct horse").unwrap();
        assert_eq!(unseal(&sealed, "correct horse").unwrap(), data.to_vec());
    }

    #[test]
    fn test_wrong_passphrase() {
        let sealed = seal(b"secret", "correct horse").unwrap();
        assert!(unseal(&sealed, "battery staple").is_err());
    }

    #[test]
    fn test_fresh_salt_per_seal() {
        let a = seal(b"secret", "pw").unwrap();
        let b = seal(b"secret", "pw").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncated_input() {
        assert!(unseal("AAAA", "pw").is_err());
    }
}

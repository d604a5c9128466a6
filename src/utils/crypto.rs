//! Session cipher and handshake primitives.
//!
//! Payloads on an encrypted channel are laid out as
//! `AES-256-ECB(iv) || AES-256-CBC-PKCS7(iv, plaintext)` with a fresh random
//! IV per message. The session key itself is wrapped with RSA-OAEP (SHA-1)
//! under the realm's public key.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::{Aes256, Block};
use rsa::{Oaep, RsaPublicKey};
use zeroize::Zeroizing;

use crate::error::{constants, ProtocolError, Result};

pub const SESSION_KEY_LEN: usize = 32;
pub const BLOCK_LEN: usize = 16;

/// Fill a buffer from the operating system's CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    getrandom::fill(&mut out).map_err(|_| ProtocolError::EncryptionFailure)?;
    Ok(out)
}

/// Generate a new 32-byte session key.
pub fn generate_session_key() -> Result<Zeroizing<[u8; SESSION_KEY_LEN]>> {
    Ok(Zeroizing::new(random_bytes::<SESSION_KEY_LEN>()?))
}

/// Wrap `data` with RSA-OAEP/SHA-1 under `key`.
pub fn rsa_encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
    key.encrypt(&mut rsa::rand_core::OsRng, Oaep::new::<sha1::Sha1>(), data)
        .map_err(|_| ProtocolError::EncryptionFailure)
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Symmetric cipher installed on a connection once the handshake completes.
#[derive(Clone)]
pub struct SessionCipher {
    key: Zeroizing<[u8; SESSION_KEY_LEN]>,
    ecb: Aes256,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

impl SessionCipher {
    /// Build a cipher from a raw key.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidKeyLength` unless `key` is exactly 32 bytes
    pub fn new(key: &[u8]) -> Result<Self> {
        let raw: [u8; SESSION_KEY_LEN] = key
            .try_into()
            .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?;
        let ecb = Aes256::new_from_slice(&raw).map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?;
        Ok(Self {
            key: Zeroizing::new(raw),
            ecb,
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = random_bytes::<BLOCK_LEN>()?;
        self.encrypt_with_iv(plaintext, &iv)
    }

    fn encrypt_with_iv(&self, plaintext: &[u8], iv: &[u8; BLOCK_LEN]) -> Result<Vec<u8>> {
        let mut header = Block::clone_from_slice(iv);
        self.ecb.encrypt_block(&mut header);

        let body = cbc::Encryptor::<Aes256>::new_from_slices(self.key.as_slice(), iv)
            .map_err(|_| ProtocolError::EncryptionFailure)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(BLOCK_LEN + body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// # Errors
    /// Returns `ProtocolError::DecryptionFailure` when the input is not a whole
    /// number of blocks, is shorter than IV plus one block, or fails unpadding
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < BLOCK_LEN * 2 || ciphertext.len() % BLOCK_LEN != 0 {
            tracing::debug!(len = ciphertext.len(), "{}", constants::ERR_CIPHERTEXT_TOO_SHORT);
            return Err(ProtocolError::DecryptionFailure);
        }
        let (header, body) = ciphertext.split_at(BLOCK_LEN);

        let mut iv = Block::clone_from_slice(header);
        self.ecb.decrypt_block(&mut iv);

        cbc::Decryptor::<Aes256>::new_from_slices(self.key.as_slice(), &iv)
            .map_err(|_| ProtocolError::DecryptionFailure)?
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_key() {
        assert!(matches!(
            SessionCipher::new(&[0u8; 16]),
            Err(ProtocolError::InvalidKeyLength(16))
        ));
        assert!(SessionCipher::new(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_roundtrip_and_layout() {
        let cipher = SessionCipher::new(&[7u8; 32]).unwrap();
        let ct = cipher.encrypt(b"hello gateway").unwrap();
        // IV block plus one padded body block
        assert_eq!(ct.len(), 32);
        assert_eq!(cipher.decrypt(&ct).unwrap(), b"hello gateway");
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let cipher = SessionCipher::new(&[1u8; 32]).unwrap();
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fixed_iv_is_deterministic() {
        let cipher = SessionCipher::new(&[9u8; 32]).unwrap();
        let iv = [3u8; BLOCK_LEN];
        let a = cipher.encrypt_with_iv(b"payload", &iv).unwrap();
        let b = cipher.encrypt_with_iv(b"payload", &iv).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_key_or_truncation_fails() {
        let cipher = SessionCipher::new(&[2u8; 32]).unwrap();
        let other = SessionCipher::new(&[3u8; 32]).unwrap();
        let ct = cipher.encrypt(&[0xAB; 40]).unwrap();

        assert!(cipher.decrypt(&ct[..ct.len() - 1]).is_err());
        assert!(cipher.decrypt(&ct[..BLOCK_LEN]).is_err());
        // wrong key almost always breaks the padding; if it does not, the bytes differ
        match other.decrypt(&ct) {
            Ok(plain) => assert_ne!(plain, vec![0xAB; 40]),
            Err(e) => assert!(matches!(e, ProtocolError::DecryptionFailure)),
        }
    }

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}

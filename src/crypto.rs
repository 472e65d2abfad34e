//! Entry payload ciphers.
//!
//! Two decryptors feed the codec chain: WinZip AES-256 (AE-2) and the
//! legacy PKWARE stream cipher. Both are push-style state machines so the
//! pipeline can hand them arbitrarily sized chunks.
//!
//! AES framing inside the compressed stream:
//!
//! ```text
//! [16-byte salt][2-byte password verifier][ciphertext][10-byte auth code]
//! ```
//!
//! Keys come from PBKDF2-HMAC-SHA1 over the password and salt (1000
//! iterations, 66 bytes of material: AES key, HMAC key, verifier). The
//! cipher is AES-256-CTR with a little-endian counter starting at 1, and
//! the HMAC-SHA1 authentication code covers the ciphertext.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

use crate::error::{Result, ZipReadError};

type HmacSha1 = Hmac<Sha1>;
type Aes256Ctr = ctr::Ctr128LE<Aes256>;

/// AES-256 salt length in bytes
pub const AES_SALT_LENGTH: usize = 16;
/// Password verifier length in bytes
pub const AES_VERIFIER_LENGTH: usize = 2;
/// Trailing authentication code length in bytes
pub const AES_AUTH_CODE_LENGTH: usize = 10;
/// AES-256 key length in bytes
const AES_KEY_LENGTH: usize = 32;
/// PBKDF2 iteration count fixed by the WinZip AE specification
const PBKDF2_ROUNDS: u32 = 1000;

struct AesEngine {
    cipher: Aes256Ctr,
    hmac: HmacSha1,
}

/// Streaming AES-256 (AE-2) decryptor.
///
/// `update` buffers until the salt and verifier arrive, verifies the
/// password, then decrypts everything except a 10-byte holdback that may
/// turn out to be the trailing authentication code. `finalize` checks it.
pub struct AesCtrDecryptor {
    password: String,
    pending: Vec<u8>,
    engine: Option<AesEngine>,
}

impl AesCtrDecryptor {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            pending: Vec::new(),
            engine: None,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.pending.extend_from_slice(chunk);

        if self.engine.is_none() {
            if self.pending.len() < AES_SALT_LENGTH + AES_VERIFIER_LENGTH {
                return Ok(Vec::new());
            }
            let header: Vec<u8> = self
                .pending
                .drain(..AES_SALT_LENGTH + AES_VERIFIER_LENGTH)
                .collect();
            self.engine = Some(self.key_material(&header)?);
        }

        if self.pending.len() <= AES_AUTH_CODE_LENGTH {
            return Ok(Vec::new());
        }

        let take = self.pending.len() - AES_AUTH_CODE_LENGTH;
        let mut output: Vec<u8> = self.pending.drain(..take).collect();
        if let Some(engine) = self.engine.as_mut() {
            engine.hmac.update(&output);
            engine.cipher.apply_keystream(&mut output);
        }
        Ok(output)
    }

    /// Verify the trailing authentication code
    pub fn finalize(&mut self) -> Result<()> {
        let engine = self
            .engine
            .take()
            .ok_or(ZipReadError::BadFormat("truncated AES stream"))?;
        if self.pending.len() != AES_AUTH_CODE_LENGTH {
            return Err(ZipReadError::BadFormat("truncated AES stream"));
        }

        let computed = engine.hmac.finalize().into_bytes();
        if computed[..AES_AUTH_CODE_LENGTH] != self.pending[..] {
            return Err(ZipReadError::InvalidPassword);
        }
        Ok(())
    }

    fn key_material(&self, header: &[u8]) -> Result<AesEngine> {
        let (salt, verifier) = header.split_at(AES_SALT_LENGTH);

        let mut derived = [0u8; AES_KEY_LENGTH * 2 + AES_VERIFIER_LENGTH];
        pbkdf2_hmac::<Sha1>(self.password.as_bytes(), salt, PBKDF2_ROUNDS, &mut derived);

        if derived[AES_KEY_LENGTH * 2..] != *verifier {
            return Err(ZipReadError::InvalidPassword);
        }

        // WinZip counts blocks little-endian from 1; no nonce
        let mut counter = [0u8; 16];
        counter[0] = 1;
        let cipher = Aes256Ctr::new(derived[..AES_KEY_LENGTH].into(), &counter.into());
        let hmac = HmacSha1::new_from_slice(&derived[AES_KEY_LENGTH..AES_KEY_LENGTH * 2])
            .map_err(|_| ZipReadError::InvalidPassword)?;

        Ok(AesEngine { cipher, hmac })
    }
}

/// Legacy PKWARE stream-cipher preamble length
pub const ZIPCRYPTO_PREAMBLE_LENGTH: usize = 12;

/// The PKWARE three-key schedule (APPNOTE 6.1)
#[derive(Clone)]
pub struct ZipCryptoKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCryptoKeys {
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            key0: 0x12345678,
            key1: 0x23456789,
            key2: 0x34567890,
        };
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.key0 = crc32_update(self.key0, plain);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.key2 = crc32_update(self.key2, (self.key1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.key2 | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }
}

fn crc32_update(crc: u32, byte: u8) -> u32 {
    let mut entry = (crc ^ u32::from(byte)) & 0xFF;
    for _ in 0..8 {
        entry = if entry & 1 != 0 {
            0xEDB88320 ^ (entry >> 1)
        } else {
            entry >> 1
        };
    }
    (crc >> 8) ^ entry
}

/// Streaming legacy decryptor.
///
/// The payload starts with a 12-byte preamble of keystream-encrypted
/// random bytes whose final byte must match `check_byte` (the high byte of
/// the expected CRC, or of the DOS time when a data descriptor is in use).
/// A mismatch is the legacy format's only password check.
pub struct ZipCryptoDecryptor {
    keys: ZipCryptoKeys,
    check_byte: u8,
    preamble_remaining: usize,
}

impl ZipCryptoDecryptor {
    pub fn new(password: &[u8], check_byte: u8) -> Self {
        Self {
            keys: ZipCryptoKeys::new(password),
            check_byte,
            preamble_remaining: ZIPCRYPTO_PREAMBLE_LENGTH,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(chunk.len());

        for &byte in chunk {
            let plain = self.keys.decrypt_byte(byte);
            if self.preamble_remaining > 0 {
                self.preamble_remaining -= 1;
                if self.preamble_remaining == 0 && plain != self.check_byte {
                    return Err(ZipReadError::InvalidPassword);
                }
            } else {
                output.push(plain);
            }
        }

        Ok(output)
    }

    pub fn finalize(&mut self) -> Result<()> {
        if self.preamble_remaining > 0 {
            return Err(ZipReadError::BadFormat("truncated encrypted stream"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aes_encrypt(password: &str, salt: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
        let mut derived = [0u8; 66];
        pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut derived);

        let mut counter = [0u8; 16];
        counter[0] = 1;
        let mut cipher = Aes256Ctr::new(derived[..32].into(), &counter.into());
        let mut body = plaintext.to_vec();
        cipher.apply_keystream(&mut body);

        let mut hmac = HmacSha1::new_from_slice(&derived[32..64]).unwrap();
        hmac.update(&body);
        let auth = hmac.finalize().into_bytes();

        let mut stream = Vec::new();
        stream.extend_from_slice(salt);
        stream.extend_from_slice(&derived[64..66]);
        stream.extend_from_slice(&body);
        stream.extend_from_slice(&auth[..AES_AUTH_CODE_LENGTH]);
        stream
    }

    #[test]
    fn aes_round_trip_in_odd_chunks() {
        let plaintext = b"chunked decryption should not care about boundaries";
        let stream = aes_encrypt("secret", &[7u8; 16], plaintext);

        let mut decryptor = AesCtrDecryptor::new("secret");
        let mut recovered = Vec::new();
        for chunk in stream.chunks(5) {
            recovered.extend_from_slice(&decryptor.update(chunk).unwrap());
        }
        decryptor.finalize().unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn aes_wrong_password_fails_at_verifier() {
        let stream = aes_encrypt("secret", &[7u8; 16], b"data");
        let mut decryptor = AesCtrDecryptor::new("not-secret");
        assert!(matches!(
            decryptor.update(&stream),
            Err(ZipReadError::InvalidPassword)
        ));
    }

    #[test]
    fn aes_tampered_auth_code_fails_at_finalize() {
        let mut stream = aes_encrypt("secret", &[7u8; 16], b"data");
        let last = stream.len() - 1;
        stream[last] ^= 0xFF;

        let mut decryptor = AesCtrDecryptor::new("secret");
        decryptor.update(&stream).unwrap();
        assert!(matches!(
            decryptor.finalize(),
            Err(ZipReadError::InvalidPassword)
        ));
    }

    #[test]
    fn aes_empty_plaintext() {
        let stream = aes_encrypt("secret", &[3u8; 16], b"");
        let mut decryptor = AesCtrDecryptor::new("secret");
        assert!(decryptor.update(&stream).unwrap().is_empty());
        decryptor.finalize().unwrap();
    }

    fn zipcrypto_encrypt(password: &[u8], check_byte: u8, plaintext: &[u8]) -> Vec<u8> {
        let mut keys = ZipCryptoKeys::new(password);
        let mut preamble = [0x5Au8; ZIPCRYPTO_PREAMBLE_LENGTH];
        preamble[ZIPCRYPTO_PREAMBLE_LENGTH - 1] = check_byte;

        let mut out = Vec::new();
        for &byte in preamble.iter().chain(plaintext) {
            out.push(keys.encrypt_byte(byte));
        }
        out
    }

    #[test]
    fn zipcrypto_round_trip() {
        let stream = zipcrypto_encrypt(b"pw", 0xC3, b"legacy cipher payload");

        let mut decryptor = ZipCryptoDecryptor::new(b"pw", 0xC3);
        let mut recovered = Vec::new();
        for chunk in stream.chunks(7) {
            recovered.extend_from_slice(&decryptor.update(chunk).unwrap());
        }
        decryptor.finalize().unwrap();
        assert_eq!(recovered, b"legacy cipher payload");
    }

    #[test]
    fn zipcrypto_wrong_password_fails_on_preamble() {
        let stream = zipcrypto_encrypt(b"pw", 0xC3, b"payload");
        let mut decryptor = ZipCryptoDecryptor::new(b"wrong", 0xC3);
        assert!(matches!(
            decryptor.update(&stream),
            Err(ZipReadError::InvalidPassword)
        ));
    }
}

//! Extraction of password-protected entries.
//!
//! Archives are crafted in place: the AES streams with the same PBKDF2 /
//! AES-CTR / HMAC-SHA1 primitives the reader uses, the legacy streams with
//! a from-scratch copy of the PKWARE key schedule.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use std::io::Write;

use stream_unzip::{
    CompressionMethod, DataOptions, MemorySource, VecSink, ZipReadError, ZipReader,
};

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Single-entry archive with identical local and central headers
fn build_single(
    name: &str,
    method: u16,
    flags: u16,
    crc: u32,
    uncompressed_size: u32,
    extra: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
    out.extend_from_slice(&20u16.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&method.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0x21, 0x4D]); // mod time/date
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&uncompressed_size.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(extra);
    out.extend_from_slice(payload);

    let directory_start = out.len() as u32;
    out.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
    out.extend_from_slice(&20u16.to_le_bytes());
    out.extend_from_slice(&20u16.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&method.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0x21, 0x4D]);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&uncompressed_size.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment
    out.extend_from_slice(&0u16.to_le_bytes()); // disk start
    out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
    out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
    out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(extra);
    let directory_size = out.len() as u32 - directory_start;

    out.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&directory_size.to_le_bytes());
    out.extend_from_slice(&directory_start.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    out
}

fn aes_extra(vendor_version: u16, strength: u8, wrapped_method: u16) -> Vec<u8> {
    let mut extra = Vec::new();
    extra.extend_from_slice(&0x9901u16.to_le_bytes());
    extra.extend_from_slice(&7u16.to_le_bytes());
    extra.extend_from_slice(&vendor_version.to_le_bytes());
    extra.extend_from_slice(&0x4541u16.to_le_bytes()); // "AE"
    extra.push(strength);
    extra.extend_from_slice(&wrapped_method.to_le_bytes());
    extra
}

/// salt || verifier || AES-256-CTR ciphertext || truncated HMAC-SHA1
fn aes_stream(password: &str, salt: &[u8; 16], body: &[u8]) -> Vec<u8> {
    let mut derived = [0u8; 66];
    pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, 1000, &mut derived);

    let mut counter = [0u8; 16];
    counter[0] = 1;
    let mut cipher = ctr::Ctr128LE::<Aes256>::new(derived[..32].into(), &counter.into());
    let mut ciphertext = body.to_vec();
    cipher.apply_keystream(&mut ciphertext);

    let mut hmac = <Hmac<Sha1>>::new_from_slice(&derived[32..64]).unwrap();
    hmac.update(&ciphertext);
    let auth = hmac.finalize().into_bytes();

    let mut stream = Vec::new();
    stream.extend_from_slice(salt);
    stream.extend_from_slice(&derived[64..66]);
    stream.extend_from_slice(&ciphertext);
    stream.extend_from_slice(&auth[..10]);
    stream
}

#[tokio::test]
async fn aes_store_round_trip() {
    let plaintext = b"aes protected payload";
    let payload = aes_stream("secret", &[0x11; 16], plaintext);
    let archive = build_single(
        "vault.txt",
        99,
        0x0001,
        0, // AE-2: no CRC
        plaintext.len() as u32,
        &aes_extra(2, 3, 0),
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();
    let entry = &entries[0];
    assert!(entry.encrypted);
    assert_eq!(entry.compression_method, CompressionMethod::Store);
    assert_eq!(entry.raw_compression_method, 99);
    let aes = entry.extra_field_aes.as_ref().unwrap();
    assert_eq!(aes.strength, 3);
    assert_eq!(aes.compression_method, 0);

    let mut sink = VecSink::new();
    let data = reader
        .get_data(
            entry,
            &mut sink,
            DataOptions::new()
                .with_password("secret")
                .with_check_signature(true),
        )
        .await
        .unwrap();
    assert_eq!(data, plaintext);
}

#[tokio::test]
async fn aes_deflate_round_trip() {
    let plaintext: Vec<u8> = (0..30_000u32).map(|value| (value % 200) as u8).collect();
    let payload = aes_stream("hunter2", &[0x42; 16], &deflate(&plaintext));
    let archive = build_single(
        "big.log",
        99,
        0x0001,
        0,
        plaintext.len() as u32,
        &aes_extra(2, 3, 8),
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();
    assert_eq!(entries[0].compression_method, CompressionMethod::Deflate);

    let mut sink = VecSink::new();
    let data = reader
        .get_data(
            &entries[0],
            &mut sink,
            DataOptions::new().with_password("hunter2"),
        )
        .await
        .unwrap();
    assert_eq!(data, plaintext);
}

#[tokio::test]
async fn aes_ae1_still_carries_a_crc() {
    let plaintext = b"authenticated and checksummed";
    let payload = aes_stream("secret", &[0x05; 16], plaintext);
    let archive = build_single(
        "both.txt",
        99,
        0x0001,
        crc32fast::hash(plaintext),
        plaintext.len() as u32,
        &aes_extra(1, 3, 0),
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();

    let mut sink = VecSink::new();
    let data = reader
        .get_data(
            &entries[0],
            &mut sink,
            DataOptions::new()
                .with_password("secret")
                .with_check_signature(true),
        )
        .await
        .unwrap();
    assert_eq!(data, plaintext);
}

#[tokio::test]
async fn aes_wrong_password() {
    let payload = aes_stream("secret", &[0x11; 16], b"text");
    let archive = build_single(
        "vault.txt",
        99,
        0x0001,
        0,
        4,
        &aes_extra(2, 3, 0),
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();
    let mut sink = VecSink::new();
    assert!(matches!(
        reader
            .get_data(
                &entries[0],
                &mut sink,
                DataOptions::new().with_password("wrong")
            )
            .await,
        Err(ZipReadError::InvalidPassword)
    ));
}

#[tokio::test]
async fn encrypted_entry_demands_a_password() {
    let payload = aes_stream("secret", &[0x11; 16], b"text");
    let archive = build_single(
        "vault.txt",
        99,
        0x0001,
        0,
        4,
        &aes_extra(2, 3, 0),
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();
    let mut sink = VecSink::new();
    assert!(matches!(
        reader
            .get_data(&entries[0], &mut sink, DataOptions::new())
            .await,
        Err(ZipReadError::Encrypted)
    ));
}

#[tokio::test]
async fn aes_strength_other_than_256_is_rejected() {
    let payload = aes_stream("secret", &[0x11; 16], b"text");
    let archive = build_single(
        "vault.txt",
        99,
        0x0001,
        0,
        4,
        &aes_extra(2, 1, 0), // AES-128
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();
    let mut sink = VecSink::new();
    assert!(matches!(
        reader
            .get_data(
                &entries[0],
                &mut sink,
                DataOptions::new().with_password("secret")
            )
            .await,
        Err(ZipReadError::UnsupportedEncryption(1))
    ));
}

#[tokio::test]
async fn aes_extra_on_non_sentinel_method_is_rejected() {
    let payload = aes_stream("secret", &[0x11; 16], b"text");
    let archive = build_single(
        "vault.txt",
        0, // should be 99 whenever the AES extra is present
        0x0001,
        0,
        4,
        &aes_extra(2, 3, 0),
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();
    let mut sink = VecSink::new();
    assert!(matches!(
        reader
            .get_data(
                &entries[0],
                &mut sink,
                DataOptions::new().with_password("secret")
            )
            .await,
        Err(ZipReadError::UnsupportedCompression(0))
    ));
}

// From-scratch copy of the PKWARE key schedule for crafting test input
struct LegacyKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl LegacyKeys {
    fn new(password: &[u8]) -> Self {
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

    fn crc32(value: u32, byte: u8) -> u32 {
        let mut entry = (value ^ u32::from(byte)) & 0xFF;
        for _ in 0..8 {
            entry = if entry & 1 != 0 {
                0xEDB88320 ^ (entry >> 1)
            } else {
                entry >> 1
            };
        }
        (value >> 8) ^ entry
    }

    fn update(&mut self, plain: u8) {
        self.key0 = Self::crc32(self.key0, plain);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.key2 = Self::crc32(self.key2, (self.key1 >> 24) as u8);
    }

    fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let temp = (self.key2 | 2) as u16;
        let cipher = plain ^ (temp.wrapping_mul(temp ^ 1) >> 8) as u8;
        self.update(plain);
        cipher
    }
}

fn legacy_stream(password: &[u8], check_byte: u8, body: &[u8]) -> Vec<u8> {
    let mut keys = LegacyKeys::new(password);
    let mut preamble = [0xA5u8; 12];
    preamble[11] = check_byte;

    preamble
        .iter()
        .chain(body)
        .map(|&byte| keys.encrypt_byte(byte))
        .collect()
}

#[tokio::test]
async fn legacy_store_round_trip() {
    let plaintext = b"pkware classic";
    let crc = crc32fast::hash(plaintext);
    let payload = legacy_stream(b"pw", (crc >> 24) as u8, plaintext);
    let archive = build_single(
        "old.txt",
        0,
        0x0001,
        crc,
        plaintext.len() as u32,
        &[],
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();
    assert!(entries[0].encrypted);
    assert!(entries[0].extra_field_aes.is_none());

    let mut sink = VecSink::new();
    let data = reader
        .get_data(
            &entries[0],
            &mut sink,
            DataOptions::new()
                .with_password("pw")
                .with_check_signature(true),
        )
        .await
        .unwrap();
    assert_eq!(data, plaintext);
}

#[tokio::test]
async fn legacy_deflate_round_trip() {
    let plaintext: Vec<u8> = (0..9_000u32).map(|value| (value % 97) as u8).collect();
    let crc = crc32fast::hash(&plaintext);
    let payload = legacy_stream(b"s3cret", (crc >> 24) as u8, &deflate(&plaintext));
    let archive = build_single(
        "old.bin",
        8,
        0x0001,
        crc,
        plaintext.len() as u32,
        &[],
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();

    let mut sink = VecSink::new();
    let data = reader
        .get_data(
            &entries[0],
            &mut sink,
            DataOptions::new()
                .with_password("s3cret")
                .with_check_signature(true),
        )
        .await
        .unwrap();
    assert_eq!(data, plaintext);
}

#[tokio::test]
async fn legacy_wrong_password() {
    let plaintext = b"pkware classic";
    let crc = crc32fast::hash(plaintext);
    let payload = legacy_stream(b"pw", (crc >> 24) as u8, plaintext);
    let archive = build_single(
        "old.txt",
        0,
        0x0001,
        crc,
        plaintext.len() as u32,
        &[],
        &payload,
    );

    let reader = ZipReader::new(MemorySource::new(archive));
    let entries = reader.get_entries().await.unwrap();
    let mut sink = VecSink::new();
    assert!(matches!(
        reader
            .get_data(
                &entries[0],
                &mut sink,
                DataOptions::new().with_password("guess")
            )
            .await,
        Err(ZipReadError::InvalidPassword)
    ));
}

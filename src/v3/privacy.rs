//! Privacy (encryption) for SNMPv3 messages: DES-CBC, 3DES-EDE-CBC, and
//! AES-128/192/256-CFB per RFC 3414 §8 and RFC 3826.

use std::sync::atomic::{AtomicU64, Ordering};

use aes::{Aes128, Aes192, Aes256};
use bytes::Bytes;
use cbc::{Decryptor as CbcDecryptor, Encryptor as CbcEncryptor};
use cfb_mode::{Decryptor as CfbDecryptor, Encryptor as CfbEncryptor};
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use des::{Des, TdesEde3};

use crate::error::CryptoErrorKind;

use super::auth::LocalizedKey;
use super::PrivProtocol;

/// Error from an encryption or decryption operation, independent of any
/// particular target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivacyError(pub CryptoErrorKind);

pub type PrivacyResult<T> = std::result::Result<T, PrivacyError>;

impl PrivacyError {
    pub fn kind(self) -> CryptoErrorKind {
        self.0
    }
}

impl std::fmt::Display for PrivacyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for PrivacyError {}

/// A monotonically increasing counter used to build the low 32 bits of the
/// 8-octet `salt`/`privParameters` value, seeded randomly so restarts don't
/// reuse a salt that paired with the same engine boots/time.
pub struct SaltCounter(AtomicU64);

impl SaltCounter {
    pub fn new() -> Self {
        let mut seed = [0u8; 8];
        let _ = getrandom::fill(&mut seed);
        Self(AtomicU64::new(u64::from_be_bytes(seed)))
    }

    /// Return the next salt value; never repeats within this counter's
    /// lifetime (short of wrapping after 2^64 calls).
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SaltCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A privacy key localized to a specific engine, paired with its protocol.
pub struct PrivKey {
    protocol: PrivProtocol,
    key: LocalizedKey,
}

impl PrivKey {
    pub fn new(protocol: PrivProtocol, key: LocalizedKey) -> Self {
        Self { protocol, key }
    }

    pub fn protocol(&self) -> PrivProtocol {
        self.protocol
    }

    /// Encrypt `plaintext` (a BER-encoded scopedPDU), returning the
    /// `(privParameters, encryptedPDU)` pair to place on the wire.
    pub fn encrypt(
        &self,
        engine_boots: i32,
        engine_time: i32,
        salt: u64,
        plaintext: &[u8],
    ) -> PrivacyResult<(Bytes, Bytes)> {
        let key = self.key.as_bytes();
        match self.protocol {
            PrivProtocol::Des => {
                let salt_bytes = cbc_salt(engine_boots, salt);
                let ct = des_cbc_encrypt(key, &salt_bytes, plaintext)?;
                Ok((Bytes::copy_from_slice(&salt_bytes), Bytes::from(ct)))
            }
            PrivProtocol::Des3 => {
                let salt_bytes = cbc_salt(engine_boots, salt);
                let ct = des3_cbc_encrypt(key, &salt_bytes, plaintext)?;
                Ok((Bytes::copy_from_slice(&salt_bytes), Bytes::from(ct)))
            }
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                let salt_bytes = salt.to_be_bytes();
                let iv = aes_iv(engine_boots, engine_time, &salt_bytes);
                let ct = aes_cfb_encrypt(self.protocol, key, &iv, plaintext)?;
                Ok((Bytes::copy_from_slice(&salt_bytes), Bytes::from(ct)))
            }
        }
    }

    /// Decrypt an incoming `encryptedPDU` given the `privParameters` it was
    /// sent with.
    pub fn decrypt(
        &self,
        engine_boots: i32,
        engine_time: i32,
        priv_params: &[u8],
        ciphertext: &[u8],
    ) -> PrivacyResult<Bytes> {
        if priv_params.len() != 8 {
            return Err(PrivacyError(CryptoErrorKind::InvalidPrivParamsLength {
                expected: 8,
                actual: priv_params.len(),
            }));
        }
        let key = self.key.as_bytes();
        match self.protocol {
            PrivProtocol::Des => {
                let pt = des_cbc_decrypt(key, priv_params, ciphertext)?;
                Ok(Bytes::from(pt))
            }
            PrivProtocol::Des3 => {
                let pt = des3_cbc_decrypt(key, priv_params, ciphertext)?;
                Ok(Bytes::from(pt))
            }
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                let iv = aes_iv(engine_boots, engine_time, priv_params);
                let pt = aes_cfb_decrypt(self.protocol, key, &iv, ciphertext)?;
                Ok(Bytes::from(pt))
            }
        }
    }
}

/// RFC 3414 §8.1.1.1: the 8-octet salt is `engineBoots || localInteger`.
fn cbc_salt(engine_boots: i32, counter: u64) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&engine_boots.to_be_bytes());
    out[4..].copy_from_slice(&(counter as u32).to_be_bytes());
    out
}

/// RFC 3826 §3.1.2.1: the 16-octet IV is `engineBoots || engineTime || salt`.
fn aes_iv(engine_boots: i32, engine_time: i32, salt: &[u8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
    iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
    iv[8..].copy_from_slice(salt);
    iv
}

fn pad_to_block(plaintext: &[u8], block_size: usize) -> Vec<u8> {
    let padded_len = plaintext.len().div_ceil(block_size) * block_size;
    let mut buf = vec![0u8; padded_len.max(block_size)];
    buf[..plaintext.len()].copy_from_slice(plaintext);
    buf
}

fn check_block_aligned(ciphertext: &[u8], block_size: usize) -> PrivacyResult<()> {
    if ciphertext.len() % block_size != 0 {
        return Err(PrivacyError(CryptoErrorKind::InvalidCiphertextLength {
            length: ciphertext.len(),
            block_size,
        }));
    }
    Ok(())
}

fn des_cbc_encrypt(key: &[u8], salt: &[u8; 8], plaintext: &[u8]) -> PrivacyResult<Vec<u8>> {
    let (des_key, pre_iv) = key.split_at(8);
    let iv = xor8(pre_iv, salt);
    let mut buf = pad_to_block(plaintext, 8);
    let msg_len = plaintext.len();
    CbcEncryptor::<Des>::new_from_slices(des_key, &iv)
        .map_err(|_| PrivacyError(CryptoErrorKind::InvalidKeyLength))?
        .encrypt_padded_mut::<NoPadding>(&mut buf, msg_len)
        .map_err(|_| PrivacyError(CryptoErrorKind::CipherError))?;
    Ok(buf)
}

fn des_cbc_decrypt(key: &[u8], priv_params: &[u8], ciphertext: &[u8]) -> PrivacyResult<Vec<u8>> {
    check_block_aligned(ciphertext, 8)?;
    let (des_key, pre_iv) = key.split_at(8);
    let iv = xor8(pre_iv, priv_params);
    let mut buf = ciphertext.to_vec();
    CbcDecryptor::<Des>::new_from_slices(des_key, &iv)
        .map_err(|_| PrivacyError(CryptoErrorKind::InvalidKeyLength))?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| PrivacyError(CryptoErrorKind::InvalidPadding))?;
    Ok(buf)
}

fn des3_cbc_encrypt(key: &[u8], salt: &[u8; 8], plaintext: &[u8]) -> PrivacyResult<Vec<u8>> {
    let (des_key, pre_iv) = key.split_at(24);
    let iv = xor8(pre_iv, salt);
    let mut buf = pad_to_block(plaintext, 8);
    let msg_len = plaintext.len();
    CbcEncryptor::<TdesEde3>::new_from_slices(des_key, &iv)
        .map_err(|_| PrivacyError(CryptoErrorKind::InvalidKeyLength))?
        .encrypt_padded_mut::<NoPadding>(&mut buf, msg_len)
        .map_err(|_| PrivacyError(CryptoErrorKind::CipherError))?;
    Ok(buf)
}

fn des3_cbc_decrypt(key: &[u8], priv_params: &[u8], ciphertext: &[u8]) -> PrivacyResult<Vec<u8>> {
    check_block_aligned(ciphertext, 8)?;
    let (des_key, pre_iv) = key.split_at(24);
    let iv = xor8(pre_iv, priv_params);
    let mut buf = ciphertext.to_vec();
    CbcDecryptor::<TdesEde3>::new_from_slices(des_key, &iv)
        .map_err(|_| PrivacyError(CryptoErrorKind::InvalidKeyLength))?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| PrivacyError(CryptoErrorKind::InvalidPadding))?;
    Ok(buf)
}

macro_rules! run_aes_cfb {
    ($Direction:ident, $Aes:ty, $key:expr, $iv:expr, $buf:expr) => {{
        let mut cipher = $Direction::<$Aes>::new_from_slices($key, $iv)
            .map_err(|_| PrivacyError(CryptoErrorKind::InvalidKeyLength))?;
        cipher.apply_keystream($buf);
    }};
}

fn aes_cfb_encrypt(
    protocol: PrivProtocol,
    key: &[u8],
    iv: &[u8; 16],
    plaintext: &[u8],
) -> PrivacyResult<Vec<u8>> {
    let mut buf = plaintext.to_vec();
    match protocol {
        PrivProtocol::Aes128 => run_aes_cfb!(CfbEncryptor, Aes128, key, iv, &mut buf),
        PrivProtocol::Aes192 => run_aes_cfb!(CfbEncryptor, Aes192, key, iv, &mut buf),
        PrivProtocol::Aes256 => run_aes_cfb!(CfbEncryptor, Aes256, key, iv, &mut buf),
        PrivProtocol::Des | PrivProtocol::Des3 => {
            return Err(PrivacyError(CryptoErrorKind::UnsupportedProtocol));
        }
    }
    Ok(buf)
}

fn aes_cfb_decrypt(
    protocol: PrivProtocol,
    key: &[u8],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> PrivacyResult<Vec<u8>> {
    let mut buf = ciphertext.to_vec();
    match protocol {
        PrivProtocol::Aes128 => run_aes_cfb!(CfbDecryptor, Aes128, key, iv, &mut buf),
        PrivProtocol::Aes192 => run_aes_cfb!(CfbDecryptor, Aes192, key, iv, &mut buf),
        PrivProtocol::Aes256 => run_aes_cfb!(CfbDecryptor, Aes256, key, iv, &mut buf),
        PrivProtocol::Des | PrivProtocol::Des3 => {
            return Err(PrivacyError(CryptoErrorKind::UnsupportedProtocol));
        }
    }
    Ok(buf)
}

fn xor8(a: &[u8], b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for i in 0..8 {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of_len(protocol: PrivProtocol) -> LocalizedKey {
        LocalizedKey::from_bytes(vec![0x5au8; protocol.key_len()])
    }

    #[test]
    fn test_salt_counter_monotonic_and_unique() {
        let counter = SaltCounter::new();
        let a = counter.next();
        let b = counter.next();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_des_roundtrip() {
        let priv_key = PrivKey::new(PrivProtocol::Des, key_of_len(PrivProtocol::Des));
        let plaintext = b"a scoped pdu payload, not block aligned";
        let (params, ct) = priv_key.encrypt(3, 100, 42, plaintext).unwrap();
        let pt = priv_key.decrypt(3, 100, &params, &ct).unwrap();
        assert_eq!(&pt[..plaintext.len()], plaintext);
    }

    #[test]
    fn test_des3_roundtrip() {
        let priv_key = PrivKey::new(PrivProtocol::Des3, key_of_len(PrivProtocol::Des3));
        let plaintext = b"exactly16 bytes!";
        let (params, ct) = priv_key.encrypt(1, 1, 7, plaintext).unwrap();
        let pt = priv_key.decrypt(1, 1, &params, &ct).unwrap();
        assert_eq!(&pt[..plaintext.len()], plaintext);
    }

    #[test]
    fn test_aes128_roundtrip() {
        let priv_key = PrivKey::new(PrivProtocol::Aes128, key_of_len(PrivProtocol::Aes128));
        let plaintext = b"odd-length payload for a stream cipher";
        let (params, ct) = priv_key.encrypt(5, 9000, 123, plaintext).unwrap();
        assert_eq!(ct.len(), plaintext.len());
        let pt = priv_key.decrypt(5, 9000, &params, &ct).unwrap();
        assert_eq!(&pt[..], plaintext);
    }

    #[test]
    fn test_aes256_roundtrip() {
        let priv_key = PrivKey::new(PrivProtocol::Aes256, key_of_len(PrivProtocol::Aes256));
        let plaintext = b"another payload";
        let (params, ct) = priv_key.encrypt(2, 2, 99, plaintext).unwrap();
        let pt = priv_key.decrypt(2, 2, &params, &ct).unwrap();
        assert_eq!(&pt[..], plaintext);
    }

    #[test]
    fn test_decrypt_rejects_wrong_priv_params_length() {
        let priv_key = PrivKey::new(PrivProtocol::Aes128, key_of_len(PrivProtocol::Aes128));
        let err = priv_key.decrypt(1, 1, &[0u8; 4], &[0u8; 16]).unwrap_err();
        assert_eq!(
            err.kind(),
            CryptoErrorKind::InvalidPrivParamsLength {
                expected: 8,
                actual: 4
            }
        );
    }

    #[test]
    fn test_des_decrypt_rejects_unaligned_ciphertext() {
        let priv_key = PrivKey::new(PrivProtocol::Des, key_of_len(PrivProtocol::Des));
        let err = priv_key
            .decrypt(1, 1, &[0u8; 8], &[0u8; 5])
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            CryptoErrorKind::InvalidCiphertextLength { .. }
        ));
    }
}

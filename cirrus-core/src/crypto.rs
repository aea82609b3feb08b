//! Cryptographic primitives for Cirrus
//!
//! Provides:
//! - AES-256 XTS sector cipher (IEEE P1619 tweaks, 512-byte sectors)
//! - Data-key derivation from the account crypt password using Argon2
//! - The per-file crypto header (salt + tweak key)

use crate::error::{CirrusError, Result};
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// AES-256 key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Cipher block size (16 bytes)
pub const BLOCK_SIZE: usize = 16;

/// Sector size; every sector is encrypted with its own tweak
pub const SECTOR_SIZE: usize = 512;

/// Salt bounds accepted by the key derivation
pub const MIN_SALT_SIZE: usize = 8;
pub const MAX_SALT_SIZE: usize = 48;

/// AES-256 key material
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(CirrusError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Derive key from password using Argon2
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> Result<Self> {
        use argon2::password_hash::SaltString;
        use argon2::{Argon2, PasswordHasher};

        // Create salt string (must be base64-encoded)
        let salt_b64 = base64::engine::general_purpose::STANDARD_NO_PAD.encode(salt);
        let salt_string = SaltString::from_b64(&salt_b64)
            .map_err(|e| CirrusError::KeyDerivation(e.to_string()))?;

        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password, &salt_string)
            .map_err(|e| CirrusError::KeyDerivation(e.to_string()))?;

        let hash_bytes = password_hash
            .hash
            .ok_or_else(|| CirrusError::KeyDerivation("No hash output".to_string()))?;

        Self::from_slice(hash_bytes.as_bytes())
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        // Zeroize key on drop
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// AES-256 in XTS mode over fixed 512-byte sectors.
///
/// Within a sector, block `j` is whitened with `E_tweak(sector) * alpha^j`,
/// so any block-aligned prefix of a sector decrypts on its own. A sector
/// cannot be decrypted from a range that starts inside it.
pub struct XtsCipher {
    data: Aes256,
    tweak: Aes256,
}

impl XtsCipher {
    pub fn new(data_key: &EncryptionKey, tweak_key: &EncryptionKey) -> Self {
        Self {
            data: Aes256::new(GenericArray::from_slice(&data_key.as_bytes()[..])),
            tweak: Aes256::new(GenericArray::from_slice(&tweak_key.as_bytes()[..])),
        }
    }

    /// Build the cipher for a file: data key from password + salt, tweak key from the IV
    pub fn for_file(password: &[u8], info: &CryptoPublicInfo) -> Result<Self> {
        let data_key = EncryptionKey::derive_from_password(password, &info.salt)?;
        let tweak_key = EncryptionKey::from_bytes(info.iv);
        Ok(Self::new(&data_key, &tweak_key))
    }

    fn initial_tweak(&self, sector: u64) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[..8].copy_from_slice(&sector.to_le_bytes());
        let ga = GenericArray::from_mut_slice(&mut block);
        self.tweak.encrypt_block(ga);
        block
    }

    fn check_sector_len(len: usize) -> Result<()> {
        if len == 0 || len > SECTOR_SIZE || len % BLOCK_SIZE != 0 {
            return Err(CirrusError::Decryption(format!(
                "sector span of {} bytes is not a block multiple within one sector",
                len
            )));
        }
        Ok(())
    }

    /// Decrypt one sector (or a block-aligned prefix of it) in place
    pub fn decrypt_sector(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        Self::check_sector_len(buf.len())?;
        let mut t = self.initial_tweak(sector);
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            xor_block(block, &t);
            self.data.decrypt_block(GenericArray::from_mut_slice(block));
            xor_block(block, &t);
            mul_alpha(&mut t);
        }
        Ok(())
    }

    /// Encrypt one sector (or a block-aligned prefix of it) in place
    pub fn encrypt_sector(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        Self::check_sector_len(buf.len())?;
        let mut t = self.initial_tweak(sector);
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            xor_block(block, &t);
            self.data.encrypt_block(GenericArray::from_mut_slice(block));
            xor_block(block, &t);
            mul_alpha(&mut t);
        }
        Ok(())
    }

    /// Decrypt consecutive sectors starting at `first_sector`
    pub fn decrypt_area(&self, first_sector: u64, buf: &mut [u8]) -> Result<()> {
        for (i, sector) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            self.decrypt_sector(first_sector + i as u64, sector)?;
        }
        Ok(())
    }

    /// Encrypt consecutive sectors starting at `first_sector`
    pub fn encrypt_area(&self, first_sector: u64, buf: &mut [u8]) -> Result<()> {
        for (i, sector) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            self.encrypt_sector(first_sector + i as u64, sector)?;
        }
        Ok(())
    }
}

impl fmt::Debug for XtsCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XtsCipher([REDACTED])")
    }
}

fn xor_block(block: &mut [u8], tweak: &[u8; BLOCK_SIZE]) {
    block.iter_mut().zip(tweak).for_each(|(b, t)| *b ^= t);
}

/// Multiply the tweak by the primitive element in GF(2^128), little-endian
fn mul_alpha(t: &mut [u8; BLOCK_SIZE]) {
    let carry = t[BLOCK_SIZE - 1] >> 7;
    for i in (1..BLOCK_SIZE).rev() {
        t[i] = (t[i] << 1) | (t[i - 1] >> 7);
    }
    t[0] <<= 1;
    if carry == 1 {
        t[0] ^= 0x87;
    }
}

/// Padding needed to bring `len` up to a whole number of sectors
pub fn sector_padding(len: u64) -> u32 {
    let rem = len % SECTOR_SIZE as u64;
    if rem == 0 {
        0
    } else {
        (SECTOR_SIZE as u64 - rem) as u32
    }
}

/// Salt and tweak key read from a file's crypto header
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoPublicInfo {
    pub salt: Vec<u8>,
    pub iv: [u8; KEY_SIZE],
}

#[derive(Serialize, Deserialize)]
struct HeaderFile {
    #[serde(rename = "PublicKey")]
    public_key: HeaderKey,
}

#[derive(Serialize, Deserialize)]
struct HeaderKey {
    #[serde(rename = "Salt")]
    salt: String,
    #[serde(rename = "IV")]
    iv: String,
}

impl CryptoPublicInfo {
    pub fn new(salt: Vec<u8>, iv: [u8; KEY_SIZE]) -> Self {
        Self { salt, iv }
    }

    /// Parse the JSON header object
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let header: HeaderFile = serde_json::from_slice(data)
            .map_err(|e| CirrusError::CryptoHeader(e.to_string()))?;

        let engine = &base64::engine::general_purpose::STANDARD;
        let salt = engine
            .decode(header.public_key.salt.as_bytes())
            .map_err(|e| CirrusError::CryptoHeader(format!("salt: {}", e)))?;
        let iv = engine
            .decode(header.public_key.iv.as_bytes())
            .map_err(|e| CirrusError::CryptoHeader(format!("iv: {}", e)))?;

        if !(MIN_SALT_SIZE..=MAX_SALT_SIZE).contains(&salt.len()) {
            return Err(CirrusError::CryptoHeader(format!(
                "salt length {} outside {}..={}",
                salt.len(),
                MIN_SALT_SIZE,
                MAX_SALT_SIZE
            )));
        }
        let iv: [u8; KEY_SIZE] = iv.as_slice().try_into().map_err(|_| {
            CirrusError::CryptoHeader(format!("iv length {} (expected {})", iv.len(), KEY_SIZE))
        })?;

        Ok(Self { salt, iv })
    }

    /// Serialize to the JSON header format
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let engine = &base64::engine::general_purpose::STANDARD;
        let header = HeaderFile {
            public_key: HeaderKey {
                salt: engine.encode(&self.salt),
                iv: engine.encode(self.iv),
            },
        };
        Ok(serde_json::to_vec(&header)?)
    }
}

impl fmt::Debug for CryptoPublicInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoPublicInfo")
            .field("salt_len", &self.salt.len())
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

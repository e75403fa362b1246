//! Privacy (encryption) protocols (RFC 3414 §8, RFC 3826).
//!
//! The scoped PDU is encrypted with a key derived from the user's privacy
//! password via the authentication protocol's localization, extended by
//! rehashing when the cipher needs more material than the digest provides.
//!
//! Salt/IV construction differs per cipher family:
//!
//! - DES-CBC: privParameters = engineBoots (4) || counter low 32 bits (4);
//!   IV = pre-IV XOR privParameters, where pre-IV is the last 8 bytes of
//!   the 16-byte localized key.
//! - AES-CFB: privParameters = 64-bit counter; IV = engineBoots (4) ||
//!   engineTime (4) || privParameters (8), concatenated, not XORed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{AsyncStreamCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use bytes::Bytes;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{AuthProtocol, PrivProtocol, auth};
use crate::error::{ErrorIndication, Result};

type DesCbcEnc = cbc::Encryptor<des::Des>;
type DesCbcDec = cbc::Decryptor<des::Des>;
type Aes128CfbEnc = cfb_mode::Encryptor<aes::Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<aes::Aes128>;
type Aes192CfbEnc = cfb_mode::Encryptor<aes::Aes192>;
type Aes192CfbDec = cfb_mode::Decryptor<aes::Aes192>;
type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

/// Monotonic salt source shared by every encryption under one engine.
///
/// Starts at a random non-zero value and never yields zero, so two engine
/// instances started close together do not replay each other's IVs.
pub struct SaltCounter(AtomicU64);

impl SaltCounter {
    /// Create a counter seeded from the OS random source.
    pub fn new() -> Self {
        let mut seed = [0u8; 8];
        if getrandom::fill(&mut seed).is_err() {
            // no system entropy; clock bits still give distinct salt streams
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            seed = nanos.to_be_bytes();
        }
        let value = u64::from_be_bytes(seed);
        Self(AtomicU64::new(if value == 0 { 1 } else { value }))
    }

    /// Create a counter at a specific value, for deterministic tests.
    pub fn from_value(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// The next salt value. Zero is skipped on wraparound.
    pub fn next(&self) -> u64 {
        loop {
            let value = self.0.fetch_add(1, Ordering::SeqCst);
            if value != 0 {
                return value;
            }
        }
    }
}

impl Default for SaltCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SaltCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SaltCounter")
            .field(&self.0.load(Ordering::Relaxed))
            .finish()
    }
}

/// A localized privacy key for one user at one engine.
///
/// Key material is zeroed from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: PrivProtocol,
}

impl PrivKey {
    /// Derive a privacy key from a password.
    ///
    /// The password goes through the same expansion and localization as an
    /// authentication password, using `auth_protocol`'s digest. If the
    /// digest is shorter than the cipher key, the localized key is extended
    /// by iterated rehashing before truncation to the cipher's key length.
    pub fn from_password(
        auth_protocol: AuthProtocol,
        priv_protocol: PrivProtocol,
        password: &[u8],
        engine_id: &[u8],
    ) -> Self {
        let mut master = auth::password_to_key(auth_protocol, password);
        let mut key = auth::localize_key(auth_protocol, &master, engine_id);
        master.zeroize();
        auth::extend_key(auth_protocol, &mut key, priv_protocol.key_len());
        key.truncate(priv_protocol.key_len());
        Self {
            key,
            protocol: priv_protocol,
        }
    }

    /// Build a privacy key from an already-localized authentication key.
    pub fn from_localized(priv_protocol: PrivProtocol, localized: &auth::LocalizedKey) -> Self {
        let mut key = localized.as_bytes().to_vec();
        auth::extend_key(localized.protocol(), &mut key, priv_protocol.key_len());
        key.truncate(priv_protocol.key_len());
        Self {
            key,
            protocol: priv_protocol,
        }
    }

    /// Wrap raw key material. The key is used as given; encryption fails
    /// if it is shorter than the protocol's key length.
    pub fn from_bytes(protocol: PrivProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// The privacy protocol this key drives.
    pub fn protocol(&self) -> PrivProtocol {
        self.protocol
    }

    /// Encrypt a serialized scoped PDU.
    ///
    /// Returns the ciphertext and the privParameters (salt) to place in
    /// the USM security parameters. `engine_boots`/`engine_time` are the
    /// authoritative engine's notion of time, as carried in the same
    /// message.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt: &SaltCounter,
    ) -> Result<(Bytes, Bytes)> {
        if self.key.len() < self.protocol.key_len() {
            tracing::debug!(
                target: "snmp_engine::privacy",
                { snmp.priv_protocol = %self.protocol, snmp.key_len = self.key.len() },
                "privacy key too short for cipher"
            );
            return Err(ErrorIndication::EncryptionError.into());
        }
        match self.protocol {
            PrivProtocol::Des => self.encrypt_des(plaintext, engine_boots, salt),
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                self.encrypt_aes(plaintext, engine_boots, engine_time, salt)
            }
        }
    }

    /// Decrypt a ciphertext using the salt carried in privParameters.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Bytes> {
        if self.key.len() < self.protocol.key_len() {
            tracing::debug!(
                target: "snmp_engine::privacy",
                { snmp.priv_protocol = %self.protocol, snmp.key_len = self.key.len() },
                "privacy key too short for cipher"
            );
            return Err(ErrorIndication::DecryptionError.into());
        }
        if priv_params.len() != self.protocol.salt_len() {
            tracing::debug!(
                target: "snmp_engine::privacy",
                { snmp.priv_params_len = priv_params.len(), snmp.expected_len = self.protocol.salt_len() },
                "privParameters have wrong length"
            );
            return Err(ErrorIndication::DecryptionError.into());
        }
        match self.protocol {
            PrivProtocol::Des => self.decrypt_des(ciphertext, priv_params),
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                self.decrypt_aes(ciphertext, engine_boots, engine_time, priv_params)
            }
        }
    }

    /// DES-CBC encryption (RFC 3414 §8.1.1.1).
    fn encrypt_des(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        salt: &SaltCounter,
    ) -> Result<(Bytes, Bytes)> {
        let des_key = &self.key[..8];
        let pre_iv = &self.key[8..16];

        // Salt: engineBoots || low 32 bits of the counter.
        let mut salt_bytes = [0u8; 8];
        salt_bytes[..4].copy_from_slice(&engine_boots.to_be_bytes());
        salt_bytes[4..].copy_from_slice(&(salt.next() as u32).to_be_bytes());

        let mut iv = [0u8; 8];
        for i in 0..8 {
            iv[i] = pre_iv[i] ^ salt_bytes[i];
        }

        // Zero-pad to the DES block size.
        let mut buf = plaintext.to_vec();
        let rem = buf.len() % 8;
        if rem != 0 {
            buf.resize(buf.len() + (8 - rem), 0);
        }
        let padded_len = buf.len();

        let encryptor = match DesCbcEnc::new_from_slices(des_key, &iv) {
            Ok(encryptor) => encryptor,
            Err(_) => return Err(ErrorIndication::UnsupportedPrivProtocol.into()),
        };
        if encryptor
            .encrypt_padded_mut::<NoPadding>(&mut buf, padded_len)
            .is_err()
        {
            return Err(ErrorIndication::EncryptionError.into());
        }

        Ok((Bytes::from(buf), Bytes::copy_from_slice(&salt_bytes)))
    }

    /// DES-CBC decryption (RFC 3414 §8.1.1.3).
    fn decrypt_des(&self, ciphertext: &[u8], priv_params: &[u8]) -> Result<Bytes> {
        if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(8) {
            tracing::debug!(
                target: "snmp_engine::privacy",
                { snmp.ciphertext_len = ciphertext.len() },
                "DES ciphertext is not a whole number of blocks"
            );
            return Err(ErrorIndication::DecryptionError.into());
        }

        let des_key = &self.key[..8];
        let pre_iv = &self.key[8..16];

        let mut iv = [0u8; 8];
        for i in 0..8 {
            iv[i] = pre_iv[i] ^ priv_params[i];
        }

        let decryptor = match DesCbcDec::new_from_slices(des_key, &iv) {
            Ok(decryptor) => decryptor,
            Err(_) => return Err(ErrorIndication::UnsupportedPrivProtocol.into()),
        };
        let mut buf = ciphertext.to_vec();
        if decryptor.decrypt_padded_mut::<NoPadding>(&mut buf).is_err() {
            return Err(ErrorIndication::DecryptionError.into());
        }

        Ok(Bytes::from(buf))
    }

    /// AES-CFB encryption (RFC 3826 §3.1.2.1).
    fn encrypt_aes(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt: &SaltCounter,
    ) -> Result<(Bytes, Bytes)> {
        let salt_bytes = salt.next().to_be_bytes();
        let iv = aes_iv(engine_boots, engine_time, &salt_bytes);
        let key = &self.key[..self.protocol.key_len()];

        let mut buf = plaintext.to_vec();
        match self.protocol {
            PrivProtocol::Aes128 => match Aes128CfbEnc::new_from_slices(key, &iv) {
                Ok(encryptor) => encryptor.encrypt(&mut buf),
                Err(_) => return Err(ErrorIndication::UnsupportedPrivProtocol.into()),
            },
            PrivProtocol::Aes192 => match Aes192CfbEnc::new_from_slices(key, &iv) {
                Ok(encryptor) => encryptor.encrypt(&mut buf),
                Err(_) => return Err(ErrorIndication::UnsupportedPrivProtocol.into()),
            },
            PrivProtocol::Aes256 => match Aes256CfbEnc::new_from_slices(key, &iv) {
                Ok(encryptor) => encryptor.encrypt(&mut buf),
                Err(_) => return Err(ErrorIndication::UnsupportedPrivProtocol.into()),
            },
            PrivProtocol::Des => unreachable!("dispatched in encrypt"),
        }

        Ok((Bytes::from(buf), Bytes::copy_from_slice(&salt_bytes)))
    }

    /// AES-CFB decryption (RFC 3826 §3.1.2.2).
    fn decrypt_aes(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Bytes> {
        let iv = aes_iv(engine_boots, engine_time, priv_params);
        let key = &self.key[..self.protocol.key_len()];

        let mut buf = ciphertext.to_vec();
        match self.protocol {
            PrivProtocol::Aes128 => match Aes128CfbDec::new_from_slices(key, &iv) {
                Ok(decryptor) => decryptor.decrypt(&mut buf),
                Err(_) => return Err(ErrorIndication::UnsupportedPrivProtocol.into()),
            },
            PrivProtocol::Aes192 => match Aes192CfbDec::new_from_slices(key, &iv) {
                Ok(decryptor) => decryptor.decrypt(&mut buf),
                Err(_) => return Err(ErrorIndication::UnsupportedPrivProtocol.into()),
            },
            PrivProtocol::Aes256 => match Aes256CfbDec::new_from_slices(key, &iv) {
                Ok(decryptor) => decryptor.decrypt(&mut buf),
                Err(_) => return Err(ErrorIndication::UnsupportedPrivProtocol.into()),
            },
            PrivProtocol::Des => unreachable!("dispatched in decrypt"),
        }

        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivKey")
            .field("key", &"[REDACTED]")
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// AES IV: engineBoots || engineTime || salt.
fn aes_iv(engine_boots: u32, engine_time: u32, salt: &[u8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
    iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
    iv[8..16].copy_from_slice(salt);
    iv
}

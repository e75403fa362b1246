//! Authentication key localization and message authentication (RFC 3414 §2.6, §6-7; RFC 7860).
//!
//! Keys are derived from passwords using the password-to-key algorithm
//! (RFC 3414 A.2), then localized to a specific engine ID. The localized
//! key signs whole messages over the wire: the digest is computed with the
//! msgAuthenticationParameters field zeroed, then spliced into that field.
//!
//! HMAC-MD5-96 and HMAC-SHA-96 are computed with the two-pass construction
//! written out directly (RFC 3414 §6.3.1, §7.3.1); the SHA-2 variants go
//! through the `hmac` crate.

use std::fmt;

use digest::Digest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::AuthProtocol;
use crate::error::{Error, ErrorIndication, Result};

/// Minimum password length required by RFC 3414.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// HMAC block size for MD5 and SHA-1.
const HMAC96_BLOCK: usize = 64;

/// A localized authentication key bound to a specific engine ID.
///
/// Create with [`LocalizedKey::from_password`] (RFC 3414 key derivation)
/// or [`LocalizedKey::from_bytes`] (pre-derived key material).
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct LocalizedKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl LocalizedKey {
    /// Derive a localized key from a password and engine ID.
    ///
    /// Performs the password expansion of RFC 3414 A.2 followed by key
    /// localization (RFC 3414 §2.6). Passwords shorter than
    /// [`MIN_PASSWORD_LENGTH`] are accepted but logged, as many agents
    /// reject them.
    pub fn from_password(protocol: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Self {
        if password.len() < MIN_PASSWORD_LENGTH {
            tracing::warn!(
                target: "snmp_engine::auth",
                { snmp.password_len = password.len(), snmp.min_len = MIN_PASSWORD_LENGTH },
                "authentication password shorter than RFC 3414 minimum"
            );
        }
        let mut master = password_to_key(protocol, password);
        let key = localize_key(protocol, &master, engine_id);
        master.zeroize();
        Self { key, protocol }
    }

    /// Wrap pre-derived localized key material.
    pub fn from_bytes(protocol: AuthProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// The authentication protocol this key drives.
    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    /// Raw localized key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Width of the msgAuthenticationParameters field for this protocol.
    pub fn mac_len(&self) -> usize {
        self.protocol.mac_len()
    }

    /// Compute the truncated MAC over a serialized message.
    ///
    /// The caller must have zeroed the msgAuthenticationParameters field
    /// first; the MAC covers the entire octet stream as given.
    pub fn compute_mac(&self, message: &[u8]) -> Vec<u8> {
        match self.protocol {
            AuthProtocol::Md5 => hmac_96::<Md5>(&self.key, message).to_vec(),
            AuthProtocol::Sha1 => hmac_96::<Sha1>(&self.key, message).to_vec(),
            AuthProtocol::Sha224 => truncated::<hmac::Hmac<Sha224>>(&self.key, message, 16),
            AuthProtocol::Sha256 => truncated::<hmac::Hmac<Sha256>>(&self.key, message, 24),
            AuthProtocol::Sha384 => truncated::<hmac::Hmac<Sha384>>(&self.key, message, 32),
            AuthProtocol::Sha512 => truncated::<hmac::Hmac<Sha512>>(&self.key, message, 48),
        }
    }
}

impl fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalizedKey")
            .field("key", &"[REDACTED]")
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// Expand a password into a master key (RFC 3414 A.2.1/A.2.2).
///
/// The password is repeated to fill 1MB of digest input. An empty password
/// yields an all-zero key of the digest's output size.
pub fn password_to_key(protocol: AuthProtocol, password: &[u8]) -> Vec<u8> {
    match protocol {
        AuthProtocol::Md5 => expand_password::<Md5>(password),
        AuthProtocol::Sha1 => expand_password::<Sha1>(password),
        AuthProtocol::Sha224 => expand_password::<Sha224>(password),
        AuthProtocol::Sha256 => expand_password::<Sha256>(password),
        AuthProtocol::Sha384 => expand_password::<Sha384>(password),
        AuthProtocol::Sha512 => expand_password::<Sha512>(password),
    }
}

fn expand_password<D: Digest>(password: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![0; <D as Digest>::output_size()];
    }

    let mut hasher = D::new();
    let mut password_index = 0usize;
    let mut count = 0usize;

    // Hash 1MB of the password repeated.
    while count < 1_048_576 {
        let mut buf = [0u8; 64];
        for byte in buf.iter_mut() {
            *byte = password[password_index % password.len()];
            password_index += 1;
        }
        hasher.update(buf);
        count += 64;
    }

    hasher.finalize().to_vec()
}

/// Localize a master key to an engine ID: `H(master || engine_id || master)`.
pub fn localize_key(protocol: AuthProtocol, master_key: &[u8], engine_id: &[u8]) -> Vec<u8> {
    match protocol {
        AuthProtocol::Md5 => localize::<Md5>(master_key, engine_id),
        AuthProtocol::Sha1 => localize::<Sha1>(master_key, engine_id),
        AuthProtocol::Sha224 => localize::<Sha224>(master_key, engine_id),
        AuthProtocol::Sha256 => localize::<Sha256>(master_key, engine_id),
        AuthProtocol::Sha384 => localize::<Sha384>(master_key, engine_id),
        AuthProtocol::Sha512 => localize::<Sha512>(master_key, engine_id),
    }
}

fn localize<D: Digest>(master_key: &[u8], engine_id: &[u8]) -> Vec<u8> {
    D::new()
        .chain_update(master_key)
        .chain_update(engine_id)
        .chain_update(master_key)
        .finalize()
        .to_vec()
}

/// Extend a localized key to `target_len` bytes by iterated rehashing.
///
/// Privacy keys for AES-192/AES-256 can be longer than the auth digest;
/// the localized key is then grown as `Kul' = Kul || H(Kul) || ...` and
/// truncated, the key extension from draft-blumenthal-aes-usm.
pub fn extend_key(protocol: AuthProtocol, key: &mut Vec<u8>, target_len: usize) {
    while key.len() < target_len {
        let digest = match protocol {
            AuthProtocol::Md5 => Md5::digest(&key[..]).to_vec(),
            AuthProtocol::Sha1 => Sha1::digest(&key[..]).to_vec(),
            AuthProtocol::Sha224 => Sha224::digest(&key[..]).to_vec(),
            AuthProtocol::Sha256 => Sha256::digest(&key[..]).to_vec(),
            AuthProtocol::Sha384 => Sha384::digest(&key[..]).to_vec(),
            AuthProtocol::Sha512 => Sha512::digest(&key[..]).to_vec(),
        };
        key.extend_from_slice(&digest);
    }
    key.truncate(target_len);
}

/// HMAC with 96-bit truncation, written out per RFC 3414 §6.3.1:
/// zero-pad the key to the 64-byte block, XOR with the inner/outer pads,
/// and run the two digest passes.
fn hmac_96<D: Digest>(key: &[u8], message: &[u8]) -> [u8; 12] {
    let mut block = [0u8; HMAC96_BLOCK];
    if key.len() > HMAC96_BLOCK {
        let digest = D::digest(key);
        block[..digest.len()].copy_from_slice(&digest);
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0u8; HMAC96_BLOCK];
    let mut opad = [0u8; HMAC96_BLOCK];
    for i in 0..HMAC96_BLOCK {
        ipad[i] = block[i] ^ 0x36;
        opad[i] = block[i] ^ 0x5c;
    }

    let inner = D::new().chain_update(ipad).chain_update(message).finalize();
    let outer = D::new().chain_update(opad).chain_update(&inner).finalize();

    let mut mac = [0u8; 12];
    mac.copy_from_slice(&outer[..12]);

    block.zeroize();
    ipad.zeroize();
    opad.zeroize();

    mac
}

fn truncated<M>(key: &[u8], message: &[u8], mac_len: usize) -> Vec<u8>
where
    M: hmac::Mac + hmac::digest::KeyInit,
{
    let mut mac = <M as hmac::Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    let mut out = mac.finalize().into_bytes().to_vec();
    out.truncate(mac_len);
    out
}

/// Sign an outgoing serialized message in place.
///
/// Locates the all-zero digest placeholder the caller encoded into
/// msgAuthenticationParameters, computes the MAC over the whole message,
/// and splices it in. Pass `None` for a user provisioned without
/// authentication; that always fails with `noAuthentication`.
///
/// A missing placeholder is a construction bug in the caller and is
/// reported as the fatal [`Error::AuthParamsNotFound`].
pub fn authenticate_outgoing(key: Option<&LocalizedKey>, whole_msg: &mut [u8]) -> Result<()> {
    let Some(key) = key else {
        return Err(ErrorIndication::NoAuthentication.into());
    };

    let placeholder = vec![0u8; key.mac_len()];
    let Some(offset) = find_subslice(whole_msg, &placeholder) else {
        return Err(Error::AuthParamsNotFound.boxed());
    };

    let mac = key.compute_mac(whole_msg);
    whole_msg[offset..offset + mac.len()].copy_from_slice(&mac);

    tracing::trace!(
        target: "snmp_engine::auth",
        { snmp.auth_protocol = %key.protocol(), snmp.mac_offset = offset },
        "signed outgoing message"
    );
    Ok(())
}

/// Verify the digest of an incoming serialized message.
///
/// `auth_params` is the digest claimed in msgAuthenticationParameters.
/// Its bytes are located in the message, zeroed in a scratch copy, and
/// the MAC is recomputed and compared in constant time.
pub fn authenticate_incoming(
    key: Option<&LocalizedKey>,
    whole_msg: &[u8],
    auth_params: &[u8],
) -> Result<()> {
    let Some(key) = key else {
        return Err(ErrorIndication::NoAuthentication.into());
    };

    if auth_params.len() != key.mac_len() {
        tracing::debug!(
            target: "snmp_engine::auth",
            { snmp.auth_params_len = auth_params.len(), snmp.expected_len = key.mac_len() },
            "authentication parameters have wrong length"
        );
        return Err(ErrorIndication::AuthenticationError.into());
    }

    let Some(offset) = find_subslice(whole_msg, auth_params) else {
        return Err(Error::AuthParamsNotFound.boxed());
    };

    let mut scratch = whole_msg.to_vec();
    scratch[offset..offset + auth_params.len()].fill(0);
    let expected = key.compute_mac(&scratch);

    if bool::from(expected.ct_eq(auth_params)) {
        Ok(())
    } else {
        tracing::debug!(
            target: "snmp_engine::auth",
            { snmp.auth_protocol = %key.protocol() },
            "message digest mismatch"
        );
        Err(ErrorIndication::AuthenticationFailure.into())
    }
}

/// First occurrence of `needle` in `haystack`.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

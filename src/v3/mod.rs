//! User-based Security Model (RFC 3414, RFC 7860).
//!
//! Everything msgSecurityModel 3 needs lives here: the security
//! parameters codec and the send/receive processing ([`usm`]),
//! password-to-key derivation and HMAC signing ([`auth`]), the
//! CBC/CFB privacy ciphers ([`privacy`]), and the engine timeline
//! bookkeeping behind discovery, time synchronization, and report
//! generation ([`engine`]).

use std::fmt;

pub mod auth;
pub mod engine;
pub mod privacy;
pub mod usm;

pub use auth::{LocalizedKey, MIN_PASSWORD_LENGTH, extend_key, localize_key, password_to_key};
pub use engine::{LocalEngine, MAX_ENGINE_TIME, TIME_WINDOW, EngineState, report_oids};
pub use privacy::{PrivKey, SaltCounter};
pub use usm::{
    ReportSpec, SecurityOutcome, SecurityRejection, Usm, UsmResult, UsmSecurityParams, UsmStats,
};

use crate::message::SecurityLevel;

/// Error returned when parsing a protocol name fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseProtocolError {
    input: String,
    kind: ProtocolKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolKind {
    Auth,
    Priv,
}

impl fmt::Display for ParseProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (what, expected) = match self.kind {
            ProtocolKind::Auth => (
                "authentication",
                "MD5, SHA, SHA-224, SHA-256, SHA-384, SHA-512",
            ),
            ProtocolKind::Priv => ("privacy", "DES, AES, AES-128, AES-192, AES-256"),
        };
        write!(
            f,
            "unknown {what} protocol '{}'; expected one of: {expected}",
            self.input
        )
    }
}

impl std::error::Error for ParseProtocolError {}

/// Authentication protocol.
///
/// MD5 and SHA-1 are the RFC 3414 originals; the SHA-2 family comes
/// from RFC 7860. Each pairs a digest with a truncated-MAC length, see
/// [`digest_len`](Self::digest_len) and [`mac_len`](Self::mac_len).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AuthProtocol {
    /// HMAC-MD5-96.
    Md5,
    /// HMAC-SHA-96.
    Sha1,
    /// HMAC-SHA-224, 128-bit MAC.
    Sha224,
    /// HMAC-SHA-256, 192-bit MAC.
    Sha256,
    /// HMAC-SHA-384, 256-bit MAC.
    Sha384,
    /// HMAC-SHA-512, 384-bit MAC.
    Sha512,
}

impl fmt::Display for AuthProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        })
    }
}

impl std::str::FromStr for AuthProtocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALIASES: [(&str, AuthProtocol); 12] = [
            ("MD5", AuthProtocol::Md5),
            ("SHA", AuthProtocol::Sha1),
            ("SHA1", AuthProtocol::Sha1),
            ("SHA-1", AuthProtocol::Sha1),
            ("SHA224", AuthProtocol::Sha224),
            ("SHA-224", AuthProtocol::Sha224),
            ("SHA256", AuthProtocol::Sha256),
            ("SHA-256", AuthProtocol::Sha256),
            ("SHA384", AuthProtocol::Sha384),
            ("SHA-384", AuthProtocol::Sha384),
            ("SHA512", AuthProtocol::Sha512),
            ("SHA-512", AuthProtocol::Sha512),
        ];
        ALIASES
            .into_iter()
            .find_map(|(name, proto)| s.eq_ignore_ascii_case(name).then_some(proto))
            .ok_or_else(|| ParseProtocolError {
                input: s.to_owned(),
                kind: ProtocolKind::Auth,
            })
    }
}

impl AuthProtocol {
    /// Digest output length in bytes.
    ///
    /// Localized keys are raw digest output, so this is also the key
    /// length that [`localize_key`] produces.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Length in bytes of the truncated MAC carried in
    /// msgAuthenticationParameters.
    pub fn mac_len(self) -> usize {
        // RFC 3414 truncates both classic HMACs to 96 bits; RFC 7860
        // scales the truncation with the digest
        match self {
            Self::Md5 | Self::Sha1 => 12,
            Self::Sha224 => 16,
            Self::Sha256 => 24,
            Self::Sha384 => 32,
            Self::Sha512 => 48,
        }
    }

    /// Whether this digest yields enough key material for
    /// `priv_protocol` without key extension.
    ///
    /// Privacy keys are sliced from the localized authentication key.
    /// DES and AES-128 need 16 bytes, which every digest covers;
    /// AES-192 needs 24 (SHA-224 and up) and AES-256 needs 32 (SHA-256
    /// and up). Shorter digests still work, they just fall back on
    /// iterated-hash extension ([`extend_key`]) and depend on the peer
    /// extending the same way.
    ///
    /// ```
    /// use snmp_engine::v3::{AuthProtocol, PrivProtocol};
    ///
    /// assert!(AuthProtocol::Sha256.is_compatible_with(PrivProtocol::Aes256));
    /// assert!(!AuthProtocol::Sha1.is_compatible_with(PrivProtocol::Aes256));
    /// ```
    pub fn is_compatible_with(self, priv_protocol: PrivProtocol) -> bool {
        self.digest_len() >= priv_protocol.key_len()
    }
}

/// Privacy protocol.
///
/// DES-CBC is the RFC 3414 original; AES-CFB comes from RFC 3826,
/// with the 192- and 256-bit key sizes taken from the
/// draft-blumenthal-aes-usm key extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrivProtocol {
    /// DES in CBC mode, 56-bit key.
    Des,
    /// AES-128 in CFB-128 mode.
    Aes128,
    /// AES-192 in CFB-128 mode.
    Aes192,
    /// AES-256 in CFB-128 mode.
    Aes256,
}

impl fmt::Display for PrivProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Des => "DES",
            Self::Aes128 => "AES",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
        })
    }
}

impl std::str::FromStr for PrivProtocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALIASES: [(&str, PrivProtocol); 8] = [
            ("DES", PrivProtocol::Des),
            ("AES", PrivProtocol::Aes128),
            ("AES128", PrivProtocol::Aes128),
            ("AES-128", PrivProtocol::Aes128),
            ("AES192", PrivProtocol::Aes192),
            ("AES-192", PrivProtocol::Aes192),
            ("AES256", PrivProtocol::Aes256),
            ("AES-256", PrivProtocol::Aes256),
        ];
        ALIASES
            .into_iter()
            .find_map(|(name, proto)| s.eq_ignore_ascii_case(name).then_some(proto))
            .ok_or_else(|| ParseProtocolError {
                input: s.to_owned(),
                kind: ProtocolKind::Priv,
            })
    }
}

impl PrivProtocol {
    /// Localized key bytes the cipher consumes.
    pub fn key_len(self) -> usize {
        match self {
            // 8 for the DES key itself, 8 for the pre-IV
            Self::Des => 16,
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Bytes of msgPrivacyParameters on the wire. Eight for every
    /// cipher.
    pub fn salt_len(self) -> usize {
        8
    }

    /// The weakest digest whose localized key covers this cipher
    /// without extension.
    pub fn min_auth_protocol(self) -> AuthProtocol {
        match self {
            Self::Des | Self::Aes128 => AuthProtocol::Md5,
            Self::Aes192 => AuthProtocol::Sha224,
            Self::Aes256 => AuthProtocol::Sha256,
        }
    }
}

/// USM user registration.
///
/// Credentials for one user name. Localized keys are derived per remote
/// engine on first use and cached, so registration itself is cheap.
///
/// ```
/// use snmp_engine::v3::{AuthProtocol, PrivProtocol, UsmUserConfig};
///
/// // noAuthNoPriv: name only
/// let user = UsmUserConfig::new("readonly");
///
/// // authPriv
/// let user = UsmUserConfig::new("admin")
///     .auth(AuthProtocol::Sha256, "authpassword")
///     .privacy(PrivProtocol::Aes128, "privpassword");
/// ```
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsmUserConfig {
    /// USM user name.
    pub user_name: String,
    /// Authentication protocol (None for noAuthNoPriv).
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub auth_protocol: Option<AuthProtocol>,
    /// Authentication password.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub auth_password: Option<String>,
    /// Privacy protocol (None for noPriv).
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub priv_protocol: Option<PrivProtocol>,
    /// Privacy password.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub priv_password: Option<String>,
}

impl UsmUserConfig {
    /// Create a noAuthNoPriv user.
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            auth_protocol: None,
            auth_password: None,
            priv_protocol: None,
            priv_password: None,
        }
    }

    /// Add authentication (authNoPriv or authPriv).
    pub fn auth(mut self, protocol: AuthProtocol, password: impl Into<String>) -> Self {
        self.auth_protocol = Some(protocol);
        self.auth_password = Some(password.into());
        self
    }

    /// Add privacy (authPriv). Privacy requires authentication; this is
    /// validated when the user is registered.
    pub fn privacy(mut self, protocol: PrivProtocol, password: impl Into<String>) -> Self {
        self.priv_protocol = Some(protocol);
        self.priv_password = Some(password.into());
        self
    }

    /// The strongest security level this user's credentials support.
    pub fn security_level(&self) -> SecurityLevel {
        match (&self.auth_protocol, &self.priv_protocol) {
            (None, _) => SecurityLevel::NoAuthNoPriv,
            (Some(_), None) => SecurityLevel::AuthNoPriv,
            (Some(_), Some(_)) => SecurityLevel::AuthPriv,
        }
    }
}

impl fmt::Debug for UsmUserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsmUserConfig")
            .field("user_name", &self.user_name)
            .field("auth_protocol", &self.auth_protocol)
            .field("priv_protocol", &self.priv_protocol)
            .finish()
    }
}

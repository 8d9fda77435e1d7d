use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CryptoError;

/// Opaque session handle.
///
/// The low 24 bits index the session table, the high 8 bits carry the
/// generation of the slot at the time the session was created. Index 0 is
/// never issued, so the all-zero handle is always invalid.
///
/// Generations run 1..=255 and then wrap, so a handle is only guaranteed
/// stale for the next 254 reuses of its slot. After 255 reuses the slot
/// issues the same handle again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    /// The reserved handle. Lookups always fail, destroy is a no-op.
    pub const NULL: SessionId = SessionId(0);

    /// Largest slot index that fits in a handle.
    pub const MAX_INDEX: u32 = (1 << 24) - 1;

    pub fn new(index: u32, generation: u8) -> Self {
        debug_assert!(index <= Self::MAX_INDEX);
        SessionId((u32::from(generation) << 24) | (index & Self::MAX_INDEX))
    }

    pub fn from_raw(raw: u32) -> Self {
        SessionId(raw)
    }

    pub fn as_raw(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> usize {
        (self.0 & Self::MAX_INDEX) as usize
    }

    pub fn generation(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn is_null(&self) -> bool {
        self.index() == 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Every transform the engine knows how to run.
///
/// Block ciphers always run in CBC mode. Authentication algorithms are either
/// HMAC with a truncated tag, key-plus-data keyed hashes, or plain digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "des-cbc")]
    DesCbc,
    #[serde(rename = "3des-cbc")]
    TripleDesCbc,
    #[serde(rename = "blowfish-cbc")]
    BlowfishCbc,
    #[serde(rename = "cast5-cbc")]
    Cast5Cbc,
    #[serde(rename = "aes-cbc")]
    AesCbc,
    #[serde(rename = "hmac-md5-96")]
    HmacMd5,
    #[serde(rename = "hmac-sha1-96")]
    HmacSha1,
    #[serde(rename = "hmac-ripemd160-96")]
    HmacRipemd160,
    #[serde(rename = "hmac-sha2-256-128")]
    HmacSha256,
    #[serde(rename = "md5-kpdk")]
    Md5Kpdk,
    #[serde(rename = "sha1-kpdk")]
    Sha1Kpdk,
    #[serde(rename = "md5")]
    Md5,
    #[serde(rename = "sha1")]
    Sha1,
}

impl Algorithm {
    pub const ALL: [Algorithm; 13] = [
        Algorithm::DesCbc,
        Algorithm::TripleDesCbc,
        Algorithm::BlowfishCbc,
        Algorithm::Cast5Cbc,
        Algorithm::AesCbc,
        Algorithm::HmacMd5,
        Algorithm::HmacSha1,
        Algorithm::HmacRipemd160,
        Algorithm::HmacSha256,
        Algorithm::Md5Kpdk,
        Algorithm::Sha1Kpdk,
        Algorithm::Md5,
        Algorithm::Sha1,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::DesCbc => "des-cbc",
            Algorithm::TripleDesCbc => "3des-cbc",
            Algorithm::BlowfishCbc => "blowfish-cbc",
            Algorithm::Cast5Cbc => "cast5-cbc",
            Algorithm::AesCbc => "aes-cbc",
            Algorithm::HmacMd5 => "hmac-md5-96",
            Algorithm::HmacSha1 => "hmac-sha1-96",
            Algorithm::HmacRipemd160 => "hmac-ripemd160-96",
            Algorithm::HmacSha256 => "hmac-sha2-256-128",
            Algorithm::Md5Kpdk => "md5-kpdk",
            Algorithm::Sha1Kpdk => "sha1-kpdk",
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
        }
    }

    /// True for the CBC block ciphers, false for authentication algorithms.
    pub fn is_cipher(&self) -> bool {
        matches!(
            self,
            Algorithm::DesCbc
                | Algorithm::TripleDesCbc
                | Algorithm::BlowfishCbc
                | Algorithm::Cast5Cbc
                | Algorithm::AesCbc
        )
    }

    /// True when session creation needs key material.
    pub fn is_keyed(&self) -> bool {
        !matches!(self, Algorithm::Md5 | Algorithm::Sha1)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Algorithm::ALL
            .iter()
            .copied()
            .find(|alg| alg.name() == wanted)
            .ok_or_else(|| CryptoError::UnsupportedAlgorithm(s.to_string()))
    }
}

//! Algorithm registry: block-cipher and hash capabilities behind the closed
//! [`Algorithm`] enum.
//!
//! The primitives themselves come from the RustCrypto crates. This module only
//! adapts them to two object-safe traits so that session records can hold any
//! supported algorithm:
//!
//! - [`KeySchedule`]: an expanded cipher key that encrypts/decrypts one block in place
//! - [`HashContext`]: a cloneable streaming hash state

use cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use digest::{Digest, FixedOutputReset};
use swcr_core::{Algorithm, CryptoError, CryptoResult};

/// Largest cipher block handled by the engine (AES).
pub const MAX_BLOCK_LEN: usize = 16;

/// Input block size shared by MD5, SHA-1, RIPEMD-160 and SHA-256; the width of
/// the HMAC pads.
pub const HMAC_BLOCK_LEN: usize = 64;

/// An expanded cipher key. Implementations zero their round keys on drop.
pub trait KeySchedule: Send {
    fn block_size(&self) -> usize;

    /// Encrypt `block` in place. `block.len()` must equal [`Self::block_size`].
    fn encrypt_block(&self, block: &mut [u8]);

    /// Decrypt `block` in place. `block.len()` must equal [`Self::block_size`].
    fn decrypt_block(&self, block: &mut [u8]);
}

struct Schedule<C>(C);

impl<C> KeySchedule for Schedule<C>
where
    C: BlockEncrypt + BlockDecrypt + Send,
{
    fn block_size(&self) -> usize {
        C::block_size()
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        self.0.encrypt_block(GenericArray::from_mut_slice(block));
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        self.0.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// A streaming hash state.
pub trait HashContext: Send {
    fn update(&mut self, data: &[u8]);

    /// Return the digest and leave the context unkeyed.
    fn finalize(&mut self) -> Vec<u8>;

    fn box_clone(&self) -> Box<dyn HashContext>;

    /// Overwrite the state in place with a fresh, unkeyed context.
    fn wipe(&mut self);
}

/// Wiped on drop, so per-request clones of keyed state do not linger.
struct Context<D: Default>(D);

impl<D> HashContext for Context<D>
where
    D: Digest + FixedOutputReset + Default + Clone + Send + 'static,
{
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    fn finalize(&mut self) -> Vec<u8> {
        let out = Digest::finalize_reset(&mut self.0).to_vec();
        self.wipe();
        out
    }

    fn box_clone(&self) -> Box<dyn HashContext> {
        Box::new(Context(self.0.clone()))
    }

    fn wipe(&mut self) {
        self.0 = D::default();
    }
}

impl<D: Default> Drop for Context<D> {
    fn drop(&mut self) {
        self.0 = D::default();
    }
}

/// Capability record of a CBC block cipher.
pub struct CipherSpec {
    pub block_size: usize,
    pub min_key_len: usize,
    pub max_key_len: usize,
    build: fn(&[u8]) -> CryptoResult<Box<dyn KeySchedule>>,
}

impl CipherSpec {
    /// Run the key-schedule constructor.
    pub fn key_schedule(&self, key: &[u8]) -> CryptoResult<Box<dyn KeySchedule>> {
        if key.len() < self.min_key_len || key.len() > self.max_key_len {
            return Err(CryptoError::invalid(format!(
                "key length {} outside {}..={}",
                key.len(),
                self.min_key_len,
                self.max_key_len
            )));
        }
        (self.build)(key)
    }
}

impl std::fmt::Debug for CipherSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSpec")
            .field("block_size", &self.block_size)
            .field("min_key_len", &self.min_key_len)
            .field("max_key_len", &self.max_key_len)
            .finish()
    }
}

/// Capability record of a hash function.
pub struct HashSpec {
    pub digest_size: usize,
    pub block_size: usize,
    init: fn() -> Box<dyn HashContext>,
}

impl HashSpec {
    pub fn init(&self) -> Box<dyn HashContext> {
        (self.init)()
    }

    /// One-shot digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut ctx = self.init();
        ctx.update(data);
        ctx.finalize()
    }
}

impl std::fmt::Debug for HashSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashSpec")
            .field("digest_size", &self.digest_size)
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// How an authentication algorithm uses its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// `H(key ^ opad || H(key ^ ipad || msg))`, truncated
    Hmac,
    /// `H(key || msg)`
    KeyPlusData,
    /// `H(msg)`
    Digest,
}

/// Capability record of an authentication algorithm.
#[derive(Debug)]
pub struct AuthSpec {
    pub hash: &'static HashSpec,
    pub mode: AuthMode,
    /// Bytes of the result written to the buffer.
    pub output_size: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum Capability {
    Cipher(&'static CipherSpec),
    Auth(&'static AuthSpec),
}

fn build<C>(key: &[u8]) -> CryptoResult<Box<dyn KeySchedule>>
where
    C: KeyInit + BlockEncrypt + BlockDecrypt + Send + 'static,
{
    let cipher = C::new_from_slice(key)
        .map_err(|_| CryptoError::invalid(format!("key length {} rejected", key.len())))?;
    Ok(Box::new(Schedule(cipher)))
}

fn build_aes(key: &[u8]) -> CryptoResult<Box<dyn KeySchedule>> {
    match key.len() {
        16 => build::<aes::Aes128>(key),
        24 => build::<aes::Aes192>(key),
        32 => build::<aes::Aes256>(key),
        n => Err(CryptoError::invalid(format!("AES key length {n} must be 16, 24 or 32"))),
    }
}

fn init<D>() -> Box<dyn HashContext>
where
    D: Digest + FixedOutputReset + Default + Clone + Send + 'static,
{
    Box::new(Context(D::default()))
}

static DES: CipherSpec = CipherSpec {
    block_size: 8,
    min_key_len: 8,
    max_key_len: 8,
    build: build::<des::Des>,
};

static TRIPLE_DES: CipherSpec = CipherSpec {
    block_size: 8,
    min_key_len: 24,
    max_key_len: 24,
    build: build::<des::TdesEde3>,
};

static BLOWFISH: CipherSpec = CipherSpec {
    block_size: 8,
    min_key_len: 4,
    max_key_len: 56,
    build: build::<blowfish::Blowfish>,
};

static CAST5: CipherSpec = CipherSpec {
    block_size: 8,
    min_key_len: 5,
    max_key_len: 16,
    build: build::<cast5::Cast5>,
};

static AES: CipherSpec = CipherSpec {
    block_size: 16,
    min_key_len: 16,
    max_key_len: 32,
    build: build_aes,
};

pub static MD5: HashSpec = HashSpec {
    digest_size: 16,
    block_size: HMAC_BLOCK_LEN,
    init: init::<md5::Md5>,
};

pub static SHA1: HashSpec = HashSpec {
    digest_size: 20,
    block_size: HMAC_BLOCK_LEN,
    init: init::<sha1::Sha1>,
};

pub static RIPEMD160: HashSpec = HashSpec {
    digest_size: 20,
    block_size: HMAC_BLOCK_LEN,
    init: init::<ripemd::Ripemd160>,
};

pub static SHA256: HashSpec = HashSpec {
    digest_size: 32,
    block_size: HMAC_BLOCK_LEN,
    init: init::<sha2::Sha256>,
};

static HMAC_MD5_96: AuthSpec = AuthSpec {
    hash: &MD5,
    mode: AuthMode::Hmac,
    output_size: 12,
};

static HMAC_SHA1_96: AuthSpec = AuthSpec {
    hash: &SHA1,
    mode: AuthMode::Hmac,
    output_size: 12,
};

static HMAC_RIPEMD160_96: AuthSpec = AuthSpec {
    hash: &RIPEMD160,
    mode: AuthMode::Hmac,
    output_size: 12,
};

static HMAC_SHA2_256_128: AuthSpec = AuthSpec {
    hash: &SHA256,
    mode: AuthMode::Hmac,
    output_size: 16,
};

static MD5_KPDK: AuthSpec = AuthSpec {
    hash: &MD5,
    mode: AuthMode::KeyPlusData,
    output_size: 16,
};

static SHA1_KPDK: AuthSpec = AuthSpec {
    hash: &SHA1,
    mode: AuthMode::KeyPlusData,
    output_size: 20,
};

static MD5_DIGEST: AuthSpec = AuthSpec {
    hash: &MD5,
    mode: AuthMode::Digest,
    output_size: 16,
};

static SHA1_DIGEST: AuthSpec = AuthSpec {
    hash: &SHA1,
    mode: AuthMode::Digest,
    output_size: 20,
};

/// Look up the capability record of `alg`.
pub fn capability(alg: Algorithm) -> Capability {
    match alg {
        Algorithm::DesCbc => Capability::Cipher(&DES),
        Algorithm::TripleDesCbc => Capability::Cipher(&TRIPLE_DES),
        Algorithm::BlowfishCbc => Capability::Cipher(&BLOWFISH),
        Algorithm::Cast5Cbc => Capability::Cipher(&CAST5),
        Algorithm::AesCbc => Capability::Cipher(&AES),
        Algorithm::HmacMd5 => Capability::Auth(&HMAC_MD5_96),
        Algorithm::HmacSha1 => Capability::Auth(&HMAC_SHA1_96),
        Algorithm::HmacRipemd160 => Capability::Auth(&HMAC_RIPEMD160_96),
        Algorithm::HmacSha256 => Capability::Auth(&HMAC_SHA2_256_128),
        Algorithm::Md5Kpdk => Capability::Auth(&MD5_KPDK),
        Algorithm::Sha1Kpdk => Capability::Auth(&SHA1_KPDK),
        Algorithm::Md5 => Capability::Auth(&MD5_DIGEST),
        Algorithm::Sha1 => Capability::Auth(&SHA1_DIGEST),
    }
}

pub fn cipher_spec(alg: Algorithm) -> Option<&'static CipherSpec> {
    match capability(alg) {
        Capability::Cipher(spec) => Some(spec),
        Capability::Auth(_) => None,
    }
}

pub fn auth_spec(alg: Algorithm) -> Option<&'static AuthSpec> {
    match capability(alg) {
        Capability::Auth(spec) => Some(spec),
        Capability::Cipher(_) => None,
    }
}

//! Request and descriptor types handed to the dispatcher.

use bitflags::bitflags;
use swcr_core::{Algorithm, CryptoResult, SessionId};
use zeroize::Zeroizing;

use crate::auth::Tag;
use crate::buffer::CryptoBuffer;
use crate::session::SessionInit;

bitflags! {
    /// Per-descriptor behaviour switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DescFlags: u32 {
        /// Encrypt (cipher descriptors); absent means decrypt.
        const ENCRYPT = 0x01;
        /// The IV for this call is supplied in [`Descriptor::iv`].
        const IV_EXPLICIT = 0x02;
        /// The IV is already in the buffer; do not write it at `inject`.
        const IV_PRESENT = 0x04;
    }
}

/// One transform step of a request.
#[derive(Clone)]
pub struct Descriptor {
    pub algorithm: Algorithm,
    /// Offset of the operand data.
    pub skip: usize,
    /// Operand length; a multiple of the block size for ciphers.
    pub length: usize,
    /// Where the IV is read/written, or where the tag is written.
    pub inject: usize,
    pub flags: DescFlags,
    /// Explicit IV, used when `IV_EXPLICIT` is set.
    pub iv: Option<Vec<u8>>,
    /// Key retained by the caller so the session can be recreated.
    pub key: Option<Zeroizing<Vec<u8>>>,
}

impl Descriptor {
    fn new(algorithm: Algorithm, skip: usize, length: usize, inject: usize, flags: DescFlags) -> Self {
        Self {
            algorithm,
            skip,
            length,
            inject,
            flags,
            iv: None,
            key: None,
        }
    }

    pub fn encrypt(algorithm: Algorithm, skip: usize, length: usize, inject: usize) -> Self {
        Self::new(algorithm, skip, length, inject, DescFlags::ENCRYPT)
    }

    pub fn decrypt(algorithm: Algorithm, skip: usize, length: usize, inject: usize) -> Self {
        Self::new(algorithm, skip, length, inject, DescFlags::empty())
    }

    /// Authenticate `[skip, skip + length)` and write the tag at `inject`.
    pub fn auth(algorithm: Algorithm, skip: usize, length: usize, inject: usize) -> Self {
        Self::new(algorithm, skip, length, inject, DescFlags::empty())
    }

    pub fn with_iv(mut self, iv: &[u8]) -> Self {
        self.iv = Some(iv.to_vec());
        self.flags |= DescFlags::IV_EXPLICIT;
        self
    }

    pub fn iv_present(mut self) -> Self {
        self.flags |= DescFlags::IV_PRESENT;
        self
    }

    pub fn with_key(mut self, key: &[u8]) -> Self {
        self.key = Some(Zeroizing::new(key.to_vec()));
        self
    }

    pub fn is_encrypt(&self) -> bool {
        self.flags.contains(DescFlags::ENCRYPT)
    }

    /// The session step this descriptor would need, when it carries enough
    /// key material to build one.
    pub fn session_init(&self) -> Option<SessionInit> {
        match &self.key {
            Some(key) => Some(SessionInit::new(self.algorithm, key)),
            None if !self.algorithm.is_keyed() => Some(SessionInit::unkeyed(self.algorithm)),
            None => None,
        }
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("algorithm", &self.algorithm)
            .field("skip", &self.skip)
            .field("length", &self.length)
            .field("inject", &self.inject)
            .field("flags", &self.flags)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A tag produced by an authentication descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagOutput {
    pub algorithm: Algorithm,
    /// Buffer offset the tag was written to.
    pub inject: usize,
    pub tag: Tag,
}

/// Outcome handed to the completion callback.
#[derive(Debug)]
pub struct Completion {
    /// The session the request ran against; differs from the submitted
    /// handle after a migration.
    pub session: SessionId,
    pub result: CryptoResult<()>,
    pub buffer: CryptoBuffer,
    pub tags: Vec<TagOutput>,
}

impl Completion {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub type Callback = Box<dyn FnOnce(Completion) + Send>;

/// A batch of descriptors over one buffer, run against one session.
pub struct Request {
    pub session: SessionId,
    pub descriptors: Vec<Descriptor>,
    pub buffer: CryptoBuffer,
    pub callback: Callback,
}

impl Request {
    pub fn new<F>(session: SessionId, buffer: impl Into<CryptoBuffer>, callback: F) -> Self
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        Self {
            session,
            descriptors: Vec::new(),
            buffer: buffer.into(),
            callback: Box::new(callback),
        }
    }

    pub fn descriptor(mut self, desc: Descriptor) -> Self {
        self.descriptors.push(desc);
        self
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("session", &self.session)
            .field("descriptors", &self.descriptors)
            .field("buffer_len", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

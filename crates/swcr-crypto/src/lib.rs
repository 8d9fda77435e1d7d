//! swcr-crypto: software symmetric-transform engine
//!
//! Sessions bind an ordered chain of algorithms to pre-expanded key material.
//! Requests carry descriptors that say which byte ranges of a buffer to
//! encrypt, decrypt or authenticate, and where IVs and tags live.
//!
//! ```text
//! Engine
//!   ├── SessionStore   generation-checked slot table, one mutex
//!   │   └── SessionRecord per algorithm
//!   │       ├── CipherState  key schedule + chaining IV   (cbc)
//!   │       └── AuthState    primed inner/outer contexts  (auth)
//!   └── dispatch       descriptor loop, stale-handle migration, callback
//! ```
//!
//! Buffers are either one contiguous `Vec<u8>` or a [`SegmentChain`] of
//! segments; every transform produces identical bytes for both.

pub mod auth;
pub mod buffer;
pub mod cbc;
pub mod dispatch;
pub mod hex;
pub mod request;
pub mod session;
pub mod xform;

pub use auth::{authenticate, Tag};
pub use buffer::{CryptoBuffer, SegmentChain};
pub use dispatch::{Engine, EngineStats};
pub use request::{Completion, DescFlags, Descriptor, Request, TagOutput};
pub use session::{SessionInit, SessionStore};

/// Largest cipher block handled by the engine (AES)
pub const MAX_BLOCK_SIZE: usize = xform::MAX_BLOCK_LEN;

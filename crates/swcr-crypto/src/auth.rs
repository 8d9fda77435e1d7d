//! Keyed-hash authentication: HMAC, key-plus-data and plain digests.
//!
//! HMAC sessions keep the inner and outer contexts already primed with the
//! padded key, so a request only hashes the message and the inner digest.

use swcr_core::CryptoResult;
use tracing::trace;
use zeroize::Zeroizing;

use crate::buffer::CryptoBuffer;
use crate::hex;
use crate::request::Descriptor;
use crate::session::AuthState;
use crate::xform::AuthMode;

/// An authentication result, already truncated to the algorithm's output size.
#[derive(Clone, PartialEq, Eq)]
pub struct Tag(Vec<u8>);

impl Tag {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tag({})", self.to_hex())
    }
}

impl AsRef<[u8]> for Tag {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Authenticate `[skip, skip + length)` of `buf` and write the tag at `inject`.
///
/// The session's contexts are cloned, never advanced, so the same state
/// serves any number of requests. The clones are reset by `finalize` and wiped
/// again on drop. Segment boundaries do not affect the result.
pub fn authenticate(state: &AuthState, desc: &Descriptor, buf: &mut CryptoBuffer) -> CryptoResult<Tag> {
    let spec = state.spec();
    buf.check_range(desc.skip, desc.length, "auth")?;
    buf.check_range(desc.inject, spec.output_size, "tag")?;

    let mut ctx = state.inner()?.box_clone();
    buf.apply(desc.skip, desc.length, |piece| ctx.update(piece))?;
    let mut digest = Zeroizing::new(ctx.finalize());

    if spec.mode == AuthMode::Hmac {
        let mut outer = state.outer()?.box_clone();
        outer.update(&digest);
        digest = Zeroizing::new(outer.finalize());
    }

    let tag = Tag(digest[..spec.output_size].to_vec());
    buf.copy_back(desc.inject, tag.as_bytes())?;
    trace!(
        algorithm = %desc.algorithm,
        skip = desc.skip,
        length = desc.length,
        inject = desc.inject,
        "auth"
    );
    Ok(tag)
}

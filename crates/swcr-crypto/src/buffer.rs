//! Request buffers: one contiguous region or a chain of segments.
//!
//! Transforms address both through logical byte offsets. The chain variant
//! keeps its segments as independently allocated vectors; zero-length
//! segments are legal and skipped by every walker.

use swcr_core::{CryptoError, CryptoResult};

/// A logical byte range split across independently allocated segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentChain {
    segments: Vec<Vec<u8>>,
}

/// Position of a logical offset inside a [`SegmentChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPos {
    pub segment: usize,
    pub offset: usize,
}

impl SegmentChain {
    pub fn new(segments: Vec<Vec<u8>>) -> Self {
        Self { segments }
    }

    /// Split `data` at the given ascending logical offsets.
    ///
    /// Repeated offsets produce zero-length segments.
    pub fn from_splits(data: &[u8], splits: &[usize]) -> Self {
        let mut segments = Vec::with_capacity(splits.len() + 1);
        let mut start = 0;
        for &split in splits {
            let end = split.clamp(start, data.len());
            segments.push(data[start..end].to_vec());
            start = end;
        }
        segments.push(data[start..].to_vec());
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    pub fn segment_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.segments[index]
    }

    pub fn into_segments(self) -> Vec<Vec<u8>> {
        self.segments
    }

    /// Concatenate all segments.
    pub fn to_vec(&self) -> Vec<u8> {
        self.segments.concat()
    }

    /// Find the segment holding logical byte `offset`.
    ///
    /// Zero-length segments never hold a byte, so the returned segment always
    /// has at least one byte at the returned offset.
    pub fn locate(&self, mut offset: usize) -> Option<ChainPos> {
        for (segment, seg) in self.segments.iter().enumerate() {
            if offset < seg.len() {
                return Some(ChainPos { segment, offset });
            }
            offset -= seg.len();
        }
        None
    }

    /// Bytes left in the segment at `pos`.
    pub fn remaining_in_segment(&self, pos: ChainPos) -> usize {
        self.segments[pos.segment].len() - pos.offset
    }

    /// Move `pos` past exhausted and zero-length segments. Returns false when
    /// the end of the chain is reached.
    pub fn normalize(&self, pos: &mut ChainPos) -> bool {
        while pos.segment < self.segments.len() && pos.offset >= self.segments[pos.segment].len() {
            pos.segment += 1;
            pos.offset = 0;
        }
        pos.segment < self.segments.len()
    }

    /// Copy `out.len()` bytes starting at `pos` into `out`, advancing `pos`.
    pub fn read_at(&self, pos: &mut ChainPos, out: &mut [u8]) {
        let mut done = 0;
        while done < out.len() && self.normalize(pos) {
            let seg = &self.segments[pos.segment];
            let n = (seg.len() - pos.offset).min(out.len() - done);
            out[done..done + n].copy_from_slice(&seg[pos.offset..pos.offset + n]);
            done += n;
            pos.offset += n;
        }
    }

    /// Copy `data` into the chain starting at `pos`, advancing `pos`.
    pub fn write_at(&mut self, pos: &mut ChainPos, data: &[u8]) {
        let mut done = 0;
        while done < data.len() && self.normalize(pos) {
            let seg = &mut self.segments[pos.segment];
            let n = (seg.len() - pos.offset).min(data.len() - done);
            seg[pos.offset..pos.offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
            pos.offset += n;
        }
    }
}

/// The buffer a request operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoBuffer {
    Contiguous(Vec<u8>),
    Chain(SegmentChain),
}

impl CryptoBuffer {
    pub fn len(&self) -> usize {
        match self {
            CryptoBuffer::Contiguous(data) => data.len(),
            CryptoBuffer::Chain(chain) => chain.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail with `InvalidArgument` unless `[offset, offset + len)` lies inside
    /// the buffer.
    pub fn check_range(&self, offset: usize, len: usize, what: &str) -> CryptoResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(CryptoError::invalid(format!(
                "{what} range {offset}+{len} exceeds buffer of {} bytes",
                self.len()
            ))),
        }
    }

    /// Copy bytes at `offset` into `out`.
    pub fn copy_data(&self, offset: usize, out: &mut [u8]) -> CryptoResult<()> {
        self.check_range(offset, out.len(), "read")?;
        match self {
            CryptoBuffer::Contiguous(data) => {
                out.copy_from_slice(&data[offset..offset + out.len()]);
            }
            CryptoBuffer::Chain(chain) => {
                if let Some(mut pos) = chain.locate(offset) {
                    chain.read_at(&mut pos, out);
                }
            }
        }
        Ok(())
    }

    /// Overwrite bytes at `offset` with `data`.
    pub fn copy_back(&mut self, offset: usize, data: &[u8]) -> CryptoResult<()> {
        self.check_range(offset, data.len(), "write")?;
        match self {
            CryptoBuffer::Contiguous(buf) => {
                buf[offset..offset + data.len()].copy_from_slice(data);
            }
            CryptoBuffer::Chain(chain) => {
                if let Some(mut pos) = chain.locate(offset) {
                    chain.write_at(&mut pos, data);
                }
            }
        }
        Ok(())
    }

    /// Feed the bytes of `[offset, offset + len)` to `f`, one call per
    /// contiguous piece.
    pub fn apply<F>(&self, offset: usize, len: usize, mut f: F) -> CryptoResult<()>
    where
        F: FnMut(&[u8]),
    {
        self.check_range(offset, len, "apply")?;
        if len == 0 {
            return Ok(());
        }
        match self {
            CryptoBuffer::Contiguous(data) => f(&data[offset..offset + len]),
            CryptoBuffer::Chain(chain) => {
                let Some(mut pos) = chain.locate(offset) else {
                    return Ok(());
                };
                let mut left = len;
                while left > 0 && chain.normalize(&mut pos) {
                    let seg = &chain.segments()[pos.segment];
                    let n = (seg.len() - pos.offset).min(left);
                    f(&seg[pos.offset..pos.offset + n]);
                    pos.offset += n;
                    left -= n;
                }
            }
        }
        Ok(())
    }

    /// Flatten into one vector.
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            CryptoBuffer::Contiguous(data) => data.clone(),
            CryptoBuffer::Chain(chain) => chain.to_vec(),
        }
    }
}

impl From<Vec<u8>> for CryptoBuffer {
    fn from(data: Vec<u8>) -> Self {
        CryptoBuffer::Contiguous(data)
    }
}

impl From<SegmentChain> for CryptoBuffer {
    fn from(chain: SegmentChain) -> Self {
        CryptoBuffer::Chain(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> SegmentChain {
        SegmentChain::new(vec![b"abc".to_vec(), Vec::new(), b"de".to_vec(), b"fghij".to_vec()])
    }

    #[test]
    fn from_splits_preserves_content() {
        let data = b"0123456789";
        let c = SegmentChain::from_splits(data, &[3, 3, 7]);
        assert_eq!(c.segments().len(), 4);
        assert!(c.segments()[1].is_empty());
        assert_eq!(c.to_vec(), data);
    }

    #[test]
    fn locate_skips_empty_segments() {
        let c = chain();
        assert_eq!(c.locate(0), Some(ChainPos { segment: 0, offset: 0 }));
        assert_eq!(c.locate(3), Some(ChainPos { segment: 2, offset: 0 }));
        assert_eq!(c.locate(6), Some(ChainPos { segment: 3, offset: 1 }));
        assert_eq!(c.locate(10), None);
    }

    #[test]
    fn copy_data_across_segments() {
        let buf = CryptoBuffer::Chain(chain());
        let mut out = [0u8; 5];
        buf.copy_data(2, &mut out).unwrap();
        assert_eq!(&out, b"cdefg");
    }

    #[test]
    fn copy_back_across_segments() {
        let mut buf = CryptoBuffer::Chain(chain());
        buf.copy_back(1, b"XYZW").unwrap();
        assert_eq!(buf.to_vec(), b"aXYZWfghij");
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut buf = CryptoBuffer::Contiguous(vec![0u8; 4]);
        let mut out = [0u8; 2];
        assert!(buf.copy_data(3, &mut out).is_err());
        assert!(buf.copy_back(usize::MAX, b"x").is_err());
        assert!(buf.apply(5, 0, |_| {}).is_err());
    }

    #[test]
    fn apply_visits_each_piece() {
        let buf = CryptoBuffer::Chain(chain());
        let mut pieces = Vec::new();
        buf.apply(1, 8, |p| pieces.push(p.to_vec())).unwrap();
        assert_eq!(pieces, vec![b"bc".to_vec(), b"de".to_vec(), b"fghi".to_vec()]);
    }

    #[test]
    fn apply_contiguous_is_one_call() {
        let buf = CryptoBuffer::from(b"hello".to_vec());
        let mut calls = 0;
        buf.apply(0, 5, |_| calls += 1).unwrap();
        assert_eq!(calls, 1);
    }
}

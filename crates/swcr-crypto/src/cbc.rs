//! CBC encryption/decryption over contiguous and chained buffers.
//!
//! The session's IV is the chaining value carried across calls: after an
//! encrypt it holds the last ciphertext block produced, after a decrypt the
//! last ciphertext block consumed.
//!
//! Decryption runs in place, so each block needs the *original* ciphertext of
//! its predecessor. Contiguous buffers are walked from the last block to the
//! first, which leaves every predecessor untouched until it is needed. Chains
//! are only walked forward and carry the previous ciphertext block instead.
//! Blocks straddling a segment boundary are assembled in a scratch block,
//! transformed there and scattered back.

use swcr_core::{CryptoError, CryptoResult};
use tracing::trace;
use zeroize::Zeroize;

use crate::buffer::{ChainPos, CryptoBuffer, SegmentChain};
use crate::request::{DescFlags, Descriptor};
use crate::session::CipherState;
use crate::xform::{KeySchedule, MAX_BLOCK_LEN};

/// Run one cipher descriptor against `buf`, updating the session IV.
///
/// All argument checks happen before the buffer or `state` is touched.
pub fn transform(state: &mut CipherState, desc: &Descriptor, buf: &mut CryptoBuffer) -> CryptoResult<()> {
    let bs = state.block_size();
    let explicit = desc.flags.contains(DescFlags::IV_EXPLICIT);
    let present = desc.flags.contains(DescFlags::IV_PRESENT);
    let encrypt = desc.is_encrypt();

    if desc.length % bs != 0 {
        return Err(CryptoError::invalid(format!(
            "cipher length {} is not a multiple of block size {bs}",
            desc.length
        )));
    }
    buf.check_range(desc.skip, desc.length, "cipher")?;
    let explicit_iv = if explicit {
        match desc.iv.as_deref() {
            Some(iv) if iv.len() == bs => Some(iv),
            Some(iv) => {
                return Err(CryptoError::invalid(format!(
                    "explicit IV length {} does not match block size {bs}",
                    iv.len()
                )))
            }
            None => return Err(CryptoError::invalid("IV_EXPLICIT set without an IV")),
        }
    } else {
        None
    };
    // Encrypt writes the IV unless it is already present; decrypt reads it
    // from the buffer unless it is explicit or present.
    let iv_in_buffer = !present && (encrypt || !explicit);
    if iv_in_buffer {
        buf.check_range(desc.inject, bs, "IV")?;
    }
    let schedule = state.schedule()?;

    let mut iv_block = [0u8; MAX_BLOCK_LEN];
    let iv = &mut iv_block[..bs];
    match explicit_iv {
        Some(explicit) => iv.copy_from_slice(explicit),
        None if !encrypt && iv_in_buffer => buf.copy_data(desc.inject, iv)?,
        None => iv.copy_from_slice(state.iv()),
    }
    if encrypt && iv_in_buffer {
        buf.copy_back(desc.inject, iv)?;
    }

    trace!(
        algorithm = %desc.algorithm,
        encrypt,
        skip = desc.skip,
        length = desc.length,
        "cbc"
    );

    match (buf, encrypt) {
        (CryptoBuffer::Contiguous(data), true) => {
            encrypt_contiguous(schedule, iv, &mut data[desc.skip..desc.skip + desc.length])
        }
        (CryptoBuffer::Contiguous(data), false) => {
            decrypt_contiguous(schedule, iv, &mut data[desc.skip..desc.skip + desc.length])
        }
        (CryptoBuffer::Chain(chain), true) => encrypt_chain(schedule, iv, chain, desc.skip, desc.length),
        (CryptoBuffer::Chain(chain), false) => decrypt_chain(schedule, iv, chain, desc.skip, desc.length),
    }

    state.set_iv(iv);
    iv_block.zeroize();
    Ok(())
}

fn xor_into(block: &mut [u8], with: &[u8]) {
    block.iter_mut().zip(with).for_each(|(b, w)| *b ^= w);
}

/// On return `iv` holds the last ciphertext block.
fn encrypt_contiguous(schedule: &dyn KeySchedule, iv: &mut [u8], data: &mut [u8]) {
    for block in data.chunks_exact_mut(iv.len()) {
        xor_into(block, iv);
        schedule.encrypt_block(block);
        iv.copy_from_slice(block);
    }
}

/// Last block first, so every predecessor is still ciphertext when it is
/// XORed in. On return `iv` holds the last input ciphertext block.
fn decrypt_contiguous(schedule: &dyn KeySchedule, iv: &mut [u8], data: &mut [u8]) {
    let bs = iv.len();
    let blocks = data.len() / bs;
    if blocks == 0 {
        return;
    }
    let mut last = [0u8; MAX_BLOCK_LEN];
    last[..bs].copy_from_slice(&data[(blocks - 1) * bs..]);

    for i in (0..blocks).rev() {
        let (head, tail) = data.split_at_mut(i * bs);
        let block = &mut tail[..bs];
        schedule.decrypt_block(block);
        if i == 0 {
            xor_into(block, iv);
        } else {
            xor_into(block, &head[(i - 1) * bs..]);
        }
    }
    iv.copy_from_slice(&last[..bs]);
}

/// Apply `f` to every block of `[skip, skip + len)` of `chain`, in order.
///
/// Blocks lying inside one segment are passed in place. Blocks crossing a
/// boundary are gathered into a scratch block, passed, and scattered back.
fn for_each_chain_block<F>(chain: &mut SegmentChain, skip: usize, len: usize, bs: usize, mut f: F)
where
    F: FnMut(&mut [u8]),
{
    if len == 0 {
        return;
    }
    let Some(mut pos) = chain.locate(skip) else {
        return;
    };
    let mut scratch = [0u8; MAX_BLOCK_LEN];
    let mut left = len;
    while left > 0 && chain.normalize(&mut pos) {
        if chain.remaining_in_segment(pos) >= bs {
            let seg = chain.segment_mut(pos.segment);
            f(&mut seg[pos.offset..pos.offset + bs]);
            pos.offset += bs;
        } else {
            let start: ChainPos = pos;
            let block = &mut scratch[..bs];
            chain.read_at(&mut pos, block);
            f(block);
            let mut back = start;
            chain.write_at(&mut back, block);
        }
        left -= bs;
    }
    scratch.zeroize();
}

fn encrypt_chain(schedule: &dyn KeySchedule, iv: &mut [u8], chain: &mut SegmentChain, skip: usize, len: usize) {
    for_each_chain_block(chain, skip, len, iv.len(), |block| {
        xor_into(block, iv);
        schedule.encrypt_block(block);
        iv.copy_from_slice(block);
    });
}

/// Forward walk with a two-slot carry: `iv` holds the previous ciphertext
/// block, `current` the block being consumed before it is overwritten.
fn decrypt_chain(schedule: &dyn KeySchedule, iv: &mut [u8], chain: &mut SegmentChain, skip: usize, len: usize) {
    let bs = iv.len();
    let mut current = [0u8; MAX_BLOCK_LEN];
    for_each_chain_block(chain, skip, len, bs, |block| {
        current[..bs].copy_from_slice(block);
        schedule.decrypt_block(block);
        xor_into(block, iv);
        iv.copy_from_slice(&current[..bs]);
    });
    current.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex;
    use crate::xform;
    use proptest::prelude::*;
    use swcr_core::Algorithm;

    fn state(alg: Algorithm, key: &[u8], iv: &[u8]) -> CipherState {
        CipherState::with_iv(xform::cipher_spec(alg).unwrap(), key, iv).unwrap()
    }

    fn run(state: &mut CipherState, desc: &Descriptor, buf: CryptoBuffer) -> Vec<u8> {
        let mut buf = buf;
        transform(state, desc, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn aes_cbc_nist_sp800_38a_f21() {
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let pt = hex::decode(
            "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51\
             30c81c46a35ce411e5fbc1191a0a52eff69f2445df4f9b17ad2b417be66c3710",
        )
        .unwrap();
        let expected = "7649abac8119b246cee98e9b12e9197d5086cb9b507219ee95db113a917678b2\
                        73bed6b8e3c1743b7116e69e222295163ff1caa1681fac09120eca307586e1a7";

        let mut st = state(Algorithm::AesCbc, &key, &iv);
        let desc = Descriptor::encrypt(Algorithm::AesCbc, 0, 64, 0).iv_present();
        let ct = run(&mut st, &desc, CryptoBuffer::Contiguous(pt.clone()));
        assert_eq!(hex::encode(&ct), expected);
        assert_eq!(hex::encode(st.iv()), "3ff1caa1681fac09120eca307586e1a7");

        let mut st = state(Algorithm::AesCbc, &key, &iv);
        let desc = Descriptor::decrypt(Algorithm::AesCbc, 0, 64, 0).iv_present();
        let back = run(&mut st, &desc, CryptoBuffer::Contiguous(ct));
        assert_eq!(back, pt);
        assert_eq!(hex::encode(st.iv()), "3ff1caa1681fac09120eca307586e1a7");
    }

    #[test]
    fn iv_is_written_at_inject_and_read_back() {
        let key = [3u8; 24];
        let iv = [0x11u8; 8];
        // [8-byte IV slot][16 bytes payload]
        let mut plain = vec![0u8; 8];
        plain.extend_from_slice(b"sixteen byte msg");

        let mut enc = state(Algorithm::TripleDesCbc, &key, &iv);
        let desc = Descriptor::encrypt(Algorithm::TripleDesCbc, 8, 16, 0);
        let packet = run(&mut enc, &desc, CryptoBuffer::Contiguous(plain.clone()));
        assert_eq!(&packet[..8], &iv);

        // Decrypt with a session whose IV is unrelated: the IV comes from the packet.
        let mut dec = state(Algorithm::TripleDesCbc, &key, &[0xEE; 8]);
        let desc = Descriptor::decrypt(Algorithm::TripleDesCbc, 8, 16, 0);
        let out = run(&mut dec, &desc, CryptoBuffer::Contiguous(packet));
        assert_eq!(&out[8..], b"sixteen byte msg");
    }

    #[test]
    fn explicit_iv_pins_the_session() {
        let key = [9u8; 16];
        let mut st = state(Algorithm::Cast5Cbc, &key, &[0u8; 8]);
        let desc = Descriptor::encrypt(Algorithm::Cast5Cbc, 0, 0, 0)
            .with_iv(&[0x42; 8])
            .iv_present();
        run(&mut st, &desc, CryptoBuffer::Contiguous(Vec::new()));
        assert_eq!(st.iv(), &[0x42; 8], "zero-length call still installs the explicit IV");
    }

    #[test]
    fn session_iv_chains_across_calls() {
        let key = [5u8; 16];
        let data: Vec<u8> = (0u8..48).collect();

        let mut whole = state(Algorithm::AesCbc, &key, &[1u8; 16]);
        let one_shot = run(
            &mut whole,
            &Descriptor::encrypt(Algorithm::AesCbc, 0, 48, 0).iv_present(),
            CryptoBuffer::Contiguous(data.clone()),
        );

        let mut split = state(Algorithm::AesCbc, &key, &[1u8; 16]);
        let mut two_shot = run(
            &mut split,
            &Descriptor::encrypt(Algorithm::AesCbc, 0, 16, 0).iv_present(),
            CryptoBuffer::Contiguous(data[..16].to_vec()),
        );
        two_shot.extend(run(
            &mut split,
            &Descriptor::encrypt(Algorithm::AesCbc, 0, 32, 0).iv_present(),
            CryptoBuffer::Contiguous(data[16..].to_vec()),
        ));
        assert_eq!(one_shot, two_shot);
        assert_eq!(whole.iv(), split.iv());
    }

    #[test]
    fn misaligned_length_leaves_state_untouched() {
        let mut st = state(Algorithm::DesCbc, &[1u8; 8], &[7u8; 8]);
        let mut buf = CryptoBuffer::Contiguous(vec![0xAB; 20]);
        let desc = Descriptor::encrypt(Algorithm::DesCbc, 8, 12, 0);
        let err = transform(&mut st, &desc, &mut buf).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidArgument(_)));
        assert_eq!(st.iv(), &[7u8; 8]);
        assert_eq!(buf.to_vec(), vec![0xAB; 20]);
    }

    #[test]
    fn out_of_range_is_rejected_before_mutation() {
        let mut st = state(Algorithm::DesCbc, &[1u8; 8], &[7u8; 8]);
        let mut buf = CryptoBuffer::Contiguous(vec![0xAB; 16]);
        // Data range fine, IV slot past the end.
        let desc = Descriptor::encrypt(Algorithm::DesCbc, 0, 16, 12);
        assert!(transform(&mut st, &desc, &mut buf).is_err());
        assert_eq!(buf.to_vec(), vec![0xAB; 16]);
        assert_eq!(st.iv(), &[7u8; 8]);

        let desc = Descriptor::decrypt(Algorithm::DesCbc, 8, 16, 0).iv_present();
        assert!(transform(&mut st, &desc, &mut buf).is_err());
    }

    #[test]
    fn explicit_iv_of_wrong_size_is_rejected() {
        let mut st = state(Algorithm::AesCbc, &[1u8; 16], &[0u8; 16]);
        let mut buf = CryptoBuffer::Contiguous(vec![0u8; 16]);
        let desc = Descriptor::encrypt(Algorithm::AesCbc, 0, 16, 0).with_iv(&[0u8; 8]);
        assert!(transform(&mut st, &desc, &mut buf).is_err());
    }

    #[test]
    fn straddling_blocks_match_contiguous() {
        let key = b"blowfish key";
        let data: Vec<u8> = (0u8..40).collect();
        let desc = Descriptor::encrypt(Algorithm::BlowfishCbc, 0, 40, 0).iv_present();

        let mut flat = state(Algorithm::BlowfishCbc, key, &[2u8; 8]);
        let expected = run(&mut flat, &desc, CryptoBuffer::Contiguous(data.clone()));

        for split in [7usize, 8, 9, 15, 17] {
            let mut st = state(Algorithm::BlowfishCbc, key, &[2u8; 8]);
            let chain = SegmentChain::from_splits(&data, &[split, split, split + 3]);
            let ct = run(&mut st, &desc, CryptoBuffer::Chain(chain));
            assert_eq!(ct, expected, "split at {split}");
            assert_eq!(st.iv(), flat.iv());
        }
    }

    fn any_cipher() -> impl Strategy<Value = (Algorithm, Vec<u8>)> {
        prop_oneof![
            Just((Algorithm::DesCbc, vec![0x13u8; 8])),
            Just((Algorithm::TripleDesCbc, (0u8..24).collect::<Vec<u8>>())),
            Just((Algorithm::BlowfishCbc, b"0123456789".to_vec())),
            Just((Algorithm::Cast5Cbc, vec![0x5Au8; 16])),
            Just((Algorithm::AesCbc, vec![0xC3u8; 32])),
        ]
    }

    #[test]
    fn every_split_pair_matches_contiguous() {
        let alg = Algorithm::DesCbc;
        let key = [0x3cu8; 8];
        let iv = [0x96u8; 8];
        let data: Vec<u8> = (0u8..24).map(|b| b.wrapping_mul(37)).collect();
        let enc = Descriptor::encrypt(alg, 0, 24, 0).iv_present();
        let dec = Descriptor::decrypt(alg, 0, 24, 0).iv_present();

        let mut flat = state(alg, &key, &iv);
        let ct = run(&mut flat, &enc, CryptoBuffer::Contiguous(data.clone()));

        for i in 0..=data.len() {
            for j in i..=data.len() {
                let mut st = state(alg, &key, &iv);
                let chain = SegmentChain::from_splits(&data, &[i, j]);
                assert_eq!(run(&mut st, &enc, CryptoBuffer::Chain(chain)), ct, "encrypt split {i},{j}");
                assert_eq!(st.iv(), flat.iv());

                let mut st = state(alg, &key, &iv);
                let chain = SegmentChain::from_splits(&ct, &[i, j]);
                assert_eq!(run(&mut st, &dec, CryptoBuffer::Chain(chain)), data, "decrypt split {i},{j}");
                assert_eq!(st.iv(), &ct[16..]);
            }
        }
    }

    proptest! {
        #[test]
        fn chain_and_contiguous_agree(
            (alg, key) in any_cipher(),
            blocks in 0usize..6,
            seed in any::<u8>(),
            splits in proptest::collection::vec(0usize..100, 0..6),
        ) {
            let bs = xform::cipher_spec(alg).unwrap().block_size;
            let len = blocks * bs;
            let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect();
            let mut splits: Vec<usize> = splits.into_iter().map(|s| s % (len + 1)).collect();
            splits.sort_unstable();
            let iv = vec![seed; bs];

            let enc = Descriptor::encrypt(alg, 0, len, 0).iv_present();
            let mut flat = state(alg, &key, &iv);
            let ct_flat = run(&mut flat, &enc, CryptoBuffer::Contiguous(data.clone()));
            let mut chained = state(alg, &key, &iv);
            let ct_chain = run(&mut chained, &enc, CryptoBuffer::Chain(SegmentChain::from_splits(&data, &splits)));
            prop_assert_eq!(&ct_flat, &ct_chain);
            prop_assert_eq!(flat.iv(), chained.iv());

            let dec = Descriptor::decrypt(alg, 0, len, 0).iv_present();
            let mut flat = state(alg, &key, &iv);
            let pt_flat = run(&mut flat, &dec, CryptoBuffer::Contiguous(ct_flat.clone()));
            let mut chained = state(alg, &key, &iv);
            let pt_chain = run(&mut chained, &dec, CryptoBuffer::Chain(SegmentChain::from_splits(&ct_flat, &splits)));
            prop_assert_eq!(&pt_flat, &data);
            prop_assert_eq!(&pt_chain, &data);
            prop_assert_eq!(flat.iv(), chained.iv());
        }
    }
}

//! Known-answer vectors run through a live engine.

use anyhow::{Context, Result};
use swcr_core::Algorithm;
use swcr_crypto::{hex, CryptoBuffer, Descriptor, Engine, SessionInit};

pub struct Vector {
    pub name: &'static str,
    pub algorithm: Algorithm,
    pub key: &'static str,
    /// CBC initialisation vector; empty for authentication vectors.
    pub iv: &'static str,
    /// Hex-encoded message.
    pub input: &'static str,
    pub expected: &'static str,
}

pub const VECTORS: &[Vector] = &[
    Vector {
        name: "des-cbc single block",
        algorithm: Algorithm::DesCbc,
        key: "133457799bbcdff1",
        iv: "0000000000000000",
        input: "0123456789abcdef",
        expected: "85e813540f0ab405",
    },
    Vector {
        name: "3des-cbc degenerate key",
        algorithm: Algorithm::TripleDesCbc,
        key: "133457799bbcdff1133457799bbcdff1133457799bbcdff1",
        iv: "0000000000000000",
        input: "0123456789abcdef",
        expected: "85e813540f0ab405",
    },
    Vector {
        name: "blowfish-cbc zero key",
        algorithm: Algorithm::BlowfishCbc,
        key: "0000000000000000",
        iv: "0000000000000000",
        input: "0000000000000000",
        expected: "4ef997456198dd78",
    },
    Vector {
        name: "cast5-cbc rfc2144 128-bit",
        algorithm: Algorithm::Cast5Cbc,
        key: "0123456712345678234567893456789a",
        iv: "0000000000000000",
        input: "0123456789abcdef",
        expected: "238b4fe5847e44b2",
    },
    Vector {
        name: "aes-cbc sp800-38a f.2.1",
        algorithm: Algorithm::AesCbc,
        key: "2b7e151628aed2a6abf7158809cf4f3c",
        iv: "000102030405060708090a0b0c0d0e0f",
        input: "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51",
        expected: "7649abac8119b246cee98e9b12e9197d5086cb9b507219ee95db113a917678b2",
    },
    Vector {
        name: "hmac-md5-96 rfc2202 #2",
        algorithm: Algorithm::HmacMd5,
        key: "4a656665",
        iv: "",
        input: "7768617420646f2079612077616e7420666f72206e6f7468696e673f",
        expected: "750c783e6ab0b503eaa86e31",
    },
    Vector {
        name: "hmac-sha1-96 rfc2202 #2",
        algorithm: Algorithm::HmacSha1,
        key: "4a656665",
        iv: "",
        input: "7768617420646f2079612077616e7420666f72206e6f7468696e673f",
        expected: "effcdf6ae5eb2fa2d27416d5",
    },
    Vector {
        name: "hmac-ripemd160-96 rfc2286 #2",
        algorithm: Algorithm::HmacRipemd160,
        key: "4a656665",
        iv: "",
        input: "7768617420646f2079612077616e7420666f72206e6f7468696e673f",
        expected: "dda6c0213a485a9e24f47420",
    },
    Vector {
        name: "hmac-sha2-256-128 rfc4231 #1",
        algorithm: Algorithm::HmacSha256,
        key: "0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b",
        iv: "",
        input: "4869205468657265",
        expected: "b0344c61d8db38535ca8afceaf0bf12b",
    },
    Vector {
        name: "md5 abc",
        algorithm: Algorithm::Md5,
        key: "",
        iv: "",
        input: "616263",
        expected: "900150983cd24fb0d6963f7d28e17f72",
    },
    Vector {
        name: "sha1 abc",
        algorithm: Algorithm::Sha1,
        key: "",
        iv: "",
        input: "616263",
        expected: "a9993e364706816aba3e25717850c26c9cd0d89d",
    },
];

/// Run one vector on its own session. Returns the hex output.
pub fn run(engine: &Engine, v: &Vector) -> Result<String> {
    let key = hex::decode(v.key).map_err(anyhow::Error::msg)?;
    let id = engine
        .create_session(&[SessionInit::new(v.algorithm, &key)])
        .with_context(|| format!("creating {} session", v.algorithm))?;

    let input = hex::decode(v.input).map_err(anyhow::Error::msg)?;

    let completion = if v.algorithm.is_cipher() {
        let iv = hex::decode(v.iv).map_err(anyhow::Error::msg)?;
        let data = input;
        let desc = Descriptor::encrypt(v.algorithm, 0, data.len(), 0)
            .with_iv(&iv)
            .iv_present();
        engine.dispatch(id, &[desc], CryptoBuffer::Contiguous(data))
    } else {
        let len = input.len();
        let mut data = input;
        data.resize(len + 32, 0);
        let desc = Descriptor::auth(v.algorithm, 0, len, len);
        engine.dispatch(id, &[desc], CryptoBuffer::Contiguous(data))
    };
    engine.destroy_session(id);
    completion.result.with_context(|| format!("running {}", v.name))?;

    Ok(match completion.tags.first() {
        Some(out) => out.tag.to_hex(),
        None => hex::encode(&completion.buffer.to_vec()),
    })
}

//! Payload generators.
//!
//! A generator fills object buffers deterministically from
//! `(seed, id, cycle)` and can verify a read-back buffer using nothing but
//! the buffer and a scratch area: the reconstruction inputs are embedded in
//! the first bytes of every object, never kept as reference copies. The
//! cycle counter keeps rewrites of the same id from producing identical
//! bytes.

mod prng;
mod sha;

use anyhow::{bail, Result};
use std::collections::HashMap;
use thiserror::Error;

pub use prng::PrngGenerator;
pub use sha::ShaGenerator;

/// Object header: stream seed (8 bytes LE) then object id (8 bytes LE).
pub const HEADER_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("object of {0} bytes is too small for the {HEADER_LEN}-byte header")]
    TooSmall(usize),
    #[error("object id mismatch: header says {found}, expected {expected}")]
    IdMismatch { expected: u64, found: u64 },
    #[error("payload mismatch at byte {offset}: expected {expected}, found {found}")]
    Mismatch {
        offset: usize,
        expected: String,
        found: String,
    },
}

pub trait Generator: Send {
    /// Fill `out` with the object for `(id, cycle)`. `out.len()` is the
    /// object size.
    fn generate(&self, id: u64, cycle: u64, out: &mut [u8]);

    /// Check `buf` against the bytes its embedded header implies,
    /// regenerating into `scratch` (same length as `buf`).
    fn verify(&self, id: u64, buf: &[u8], scratch: &mut [u8]) -> Result<(), VerifyError>;
}

/// Construct a generator by its work-order kind name.
pub fn create(
    kind: &str,
    seed: u64,
    _config: &HashMap<String, String>,
) -> Result<Box<dyn Generator>> {
    match kind {
        "prng" => Ok(Box::new(PrngGenerator::new(seed))),
        "sha" => Ok(Box::new(ShaGenerator::new(seed))),
        other => bail!("unknown generator kind: {}", other),
    }
}

/// Derive the per-object keystream seed. Splitmix finalizer over the mixed
/// inputs so adjacent ids and cycles land far apart.
pub(crate) fn stream_seed(seed: u64, id: u64, cycle: u64) -> u64 {
    let mut x = seed
        ^ id.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ cycle.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

pub(crate) fn write_header(stream: u64, id: u64, out: &mut [u8]) {
    out[0..8].copy_from_slice(&stream.to_le_bytes());
    out[8..16].copy_from_slice(&id.to_le_bytes());
}

pub(crate) fn parse_header(buf: &[u8]) -> Result<(u64, u64), VerifyError> {
    if buf.len() < HEADER_LEN {
        return Err(VerifyError::TooSmall(buf.len()));
    }
    let stream = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let id = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    Ok((stream, id))
}

/// Shared verify skeleton: parse the header, check the id, regenerate the
/// body into `scratch` with `fill`, and compare byte-for-byte.
pub(crate) fn verify_with(
    expected_id: u64,
    buf: &[u8],
    scratch: &mut [u8],
    fill: impl Fn(u64, &mut [u8]),
) -> Result<(), VerifyError> {
    let (stream, found_id) = parse_header(buf)?;
    if found_id != expected_id {
        return Err(VerifyError::IdMismatch {
            expected: expected_id,
            found: found_id,
        });
    }
    let scratch = &mut scratch[..buf.len()];
    write_header(stream, found_id, scratch);
    fill(stream, &mut scratch[HEADER_LEN..]);
    if let Some(offset) = buf.iter().zip(scratch.iter()).position(|(a, b)| a != b) {
        return Err(VerifyError::Mismatch {
            offset,
            expected: hex::encode([scratch[offset]]),
            found: hex::encode([buf[offset]]),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generators() -> Vec<(&'static str, Box<dyn Generator>)> {
        vec![
            ("prng", create("prng", 1234, &HashMap::new()).unwrap()),
            ("sha", create("sha", 1234, &HashMap::new()).unwrap()),
        ]
    }

    #[test]
    fn generate_then_verify_succeeds() {
        for (name, g) in generators() {
            let mut buf = vec![0u8; 512];
            let mut scratch = vec![0u8; 512];
            g.generate(7, 0, &mut buf);
            g.verify(7, &buf, &mut scratch)
                .unwrap_or_else(|e| panic!("{}: {}", name, e));
        }
    }

    #[test]
    fn corruption_is_detected() {
        for (name, g) in generators() {
            let mut buf = vec![0u8; 256];
            let mut scratch = vec![0u8; 256];
            g.generate(3, 1, &mut buf);
            buf[200] ^= 0xff;
            let err = g.verify(3, &buf, &mut scratch).unwrap_err();
            assert!(matches!(err, VerifyError::Mismatch { offset: 200, .. }), "{}", name);
        }
    }

    #[test]
    fn wrong_id_is_detected() {
        for (name, g) in generators() {
            let mut buf = vec![0u8; 128];
            let mut scratch = vec![0u8; 128];
            g.generate(3, 0, &mut buf);
            let err = g.verify(4, &buf, &mut scratch).unwrap_err();
            assert!(
                matches!(err, VerifyError::IdMismatch { expected: 4, found: 3 }),
                "{}",
                name
            );
        }
    }

    #[test]
    fn cycles_produce_distinct_bytes() {
        for (name, g) in generators() {
            let mut first = vec![0u8; 128];
            let mut second = vec![0u8; 128];
            g.generate(9, 0, &mut first);
            g.generate(9, 1, &mut second);
            assert_ne!(first, second, "{}: rewrite must differ from original", name);
        }
    }

    #[test]
    fn undersized_object_rejected() {
        let g = create("prng", 0, &HashMap::new()).unwrap();
        let buf = vec![0u8; 8];
        let mut scratch = vec![0u8; 8];
        assert!(matches!(
            g.verify(0, &buf, &mut scratch),
            Err(VerifyError::TooSmall(8))
        ));
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(create("zeroes", 0, &HashMap::new()).is_err());
    }
}

//! Signatures for username lookup queries.

/// Signs a lookup query string.
pub trait QuerySigner: Send + Sync {
    fn sign(&self, input: &str) -> i64;
}

pub fn crc32(data: &[u8]) -> u32 {
    zlib_rs::crc32::crc32(0, data)
}

/// Absolute value of the signed CRC-32 of the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Signer;

impl QuerySigner for Crc32Signer {
    fn sign(&self, input: &str) -> i64 {
        (crc32(input.as_bytes()) as i32).unsigned_abs() as i64
    }
}

/// Signature of the lookup query for `name`, sent at `now_ms`.
pub fn lookup_signature(signer: &dyn QuerySigner, name: &str, now_ms: i64) -> i64 {
    signer.sign(&format!("{}{}{{}}", name, now_ms))
}

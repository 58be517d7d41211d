//! External identifier and secret generation
//!
//! Externally visible identifiers are 32-char lowercase hex strings derived
//! from 32 random bytes concatenated with a nanosecond timestamp, then
//! MD5-hashed. They carry no ordering and leak nothing about row ids.

use md5::{Digest, Md5};
use rand::RngCore;

const SECRET_LENGTH: usize = 12;
const SECRET_CHARSET: &[u8] = b"1234567890abcdefghijklmnopqrstuvwxyzQWERTYUIOPASDFGHJKLZXCVBNM";

/// Fill a buffer of `length` bytes from the OS rng
pub fn random(length: usize) -> Vec<u8> {
    let mut buf = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// MD5 of `length` random bytes, lowercase hex
pub fn random_md5(length: usize) -> String {
    let mut hasher = Md5::new();
    hasher.update(random(length));
    hex::encode(hasher.finalize())
}

/// Generate a new 32-char external identifier
pub fn uid() -> String {
    let mut input = random(32);
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| chrono::Utc::now().timestamp_micros());
    input.extend_from_slice(nanos.to_string().as_bytes());

    let mut hasher = Md5::new();
    hasher.update(&input);
    hex::encode(hasher.finalize())
}

/// Generate a new application secret
pub fn secret() -> String {
    let mut rng = rand::thread_rng();
    (0..SECRET_LENGTH)
        .map(|_| {
            let index = (rng.next_u32() as usize) % SECRET_CHARSET.len();
            SECRET_CHARSET[index] as char
        })
        .collect()
}

//! UID utilities
//!
//! Tracker objects are identified by 11 character UIDs: one ASCII letter
//! followed by ten ASCII letters or digits.

use rand::Rng;

/// UID length in characters
pub const UID_LENGTH: usize = 11;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a new random UID
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let mut uid = String::with_capacity(UID_LENGTH);
    uid.push(LETTERS[rng.gen_range(0..LETTERS.len())] as char);
    for _ in 1..UID_LENGTH {
        uid.push(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char);
    }
    uid
}

/// Check whether a string is a well-formed UID
pub fn is_valid(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == UID_LENGTH
        && bytes[0].is_ascii_alphabetic()
        && bytes.iter().all(|b| b.is_ascii_alphanumeric())
}

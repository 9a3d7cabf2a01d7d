//! Join codes for battles and groups.
//!
//! Codes are short uppercase strings drawn from an alphabet without the
//! easily confused characters (no I, O, 0, 1). Uniqueness is not checked
//! here: the unique column rejects a colliding insert and the caller draws
//! again.

use spacetimedb::rand::Rng;

pub const CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Bounds on the configurable code length
pub const CODE_MIN_LEN: u32 = 4;
pub const CODE_MAX_LEN: u32 = 12;

/// Draw a random code of `len` characters.
pub fn generate_code<R: Rng>(rng: &mut R, len: u32) -> String {
    let alphabet = CODE_ALPHABET.as_bytes();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Canonical form for storage and lookup (codes are case-insensitive).
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Could this code ever have been issued? Checks the alphabet and the
/// length bounds only; the configured length can change after codes exist.
pub fn is_well_formed_code(code: &str) -> bool {
    let len = code.chars().count() as u32;
    (CODE_MIN_LEN..=CODE_MAX_LEN).contains(&len) && code.chars().all(|c| CODE_ALPHABET.contains(c))
}

//! Utility functions and helpers.

pub mod http;
#[cfg(test)]
pub(crate) mod testing;
pub mod url;

use rand::Rng;

/// Characters upstream ids are made of.
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random lowercase alphanumeric id.
pub fn generate_id(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

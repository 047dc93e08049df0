//! Pipe transport (C7): the framed byte-stream connection between the
//! controller and the elevated companion process.

pub mod child;
pub mod framing;
pub mod transport;

pub use child::ElevatedChild;
pub use framing::Frame;
pub use transport::{DuplexChannel, PipeTransport};

use rand::RngCore;

/// Number of random bytes in a freshly generated handshake secret.
const SECRET_LEN: usize = 32;

/// Generates a fresh per-session handshake secret, hex-encoded for
/// safe transport as a process argv element (`spec.md` 6's
/// `-elevated <pipe> <secret> <pid>`).
#[must_use]
pub fn generate_secret_hex() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex-encoded secret back into raw bytes for use with
/// [`PipeTransport::handshake`].
#[must_use]
pub fn decode_secret_hex(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok().and_then(|s| u8::from_str_radix(s, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hex_round_trips() {
        let hex = generate_secret_hex();
        assert_eq!(hex.len(), SECRET_LEN * 2);
        let bytes = decode_secret_hex(&hex);
        assert_eq!(bytes.len(), SECRET_LEN);
    }

    #[test]
    fn two_generated_secrets_differ() {
        assert_ne!(generate_secret_hex(), generate_secret_hex());
    }
}

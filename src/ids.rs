//! Document identifier handling.
//!
//! Documents are keyed by ULIDs: 26-character Crockford-base32 strings
//! whose first 48 bits are a millisecond timestamp, so lexicographic
//! order matches creation order. The relational store keeps the ULID
//! string verbatim as the primary key. The vector store only accepts
//! UUID-shaped point ids, so [`to_vector_id`] re-encodes the same 128
//! bits as hyphenated hex on the way in.
//!
//! The mapping never fails: anything that is not a well-formed ULID is
//! passed through unchanged and left for the vector store's own
//! validation to reject.

use uuid::Uuid;

/// Generate a fresh document id (ULID, 26 chars, uppercase).
pub fn new_doc_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Convert a document id into the UUID text form the vector store requires.
///
/// * A 36-character string with hyphens at the UUID separator positions is
///   returned unchanged.
/// * A 26-character string is decoded as Crockford base32 (case-insensitive,
///   accepting the `O→0` and `I/L→1` substitutions) and re-encoded as a
///   hyphenated hex UUID.
/// * Everything else (wrong length, invalid character) is returned
///   unchanged.
pub fn to_vector_id(id: &str) -> String {
    let bytes = id.as_bytes();

    if bytes.len() == 36
        && bytes[8] == b'-'
        && bytes[13] == b'-'
        && bytes[18] == b'-'
        && bytes[23] == b'-'
    {
        return id.to_string();
    }

    if bytes.len() != 26 {
        return id.to_string();
    }

    match decode_ulid(bytes) {
        Some(bits) => Uuid::from_u128(bits).hyphenated().to_string(),
        None => id.to_string(),
    }
}

/// Decode 26 Crockford-base32 characters into the underlying 128 bits.
///
/// The first character contributes only its low 3 bits (26 × 5 = 130 bits,
/// of which 128 are significant).
fn decode_ulid(bytes: &[u8]) -> Option<u128> {
    let mut acc: u128 = 0;
    for &b in bytes {
        let v = decode_char(b)?;
        acc = acc.wrapping_shl(5) | u128::from(v);
    }
    Some(acc)
}

/// Crockford's base32 alphabet, case-insensitive, with the conventional
/// substitutions for easily confused letters. `U` is not in the alphabet.
fn decode_char(b: u8) -> Option<u8> {
    let v = match b {
        b'0'..=b'9' => b - b'0',
        b'A'..=b'H' => b - b'A' + 10,
        b'a'..=b'h' => b - b'a' + 10,
        b'J' | b'j' => 18,
        b'K' | b'k' => 19,
        b'M' | b'm' => 20,
        b'N' | b'n' => 21,
        b'P' | b'p' => 22,
        b'Q' | b'q' => 23,
        b'R' | b'r' => 24,
        b'S' | b's' => 25,
        b'T' | b't' => 26,
        b'V' | b'v' => 27,
        b'W' | b'w' => 28,
        b'X' | b'x' => 29,
        b'Y' | b'y' => 30,
        b'Z' | b'z' => 31,
        b'O' | b'o' => 0,
        b'I' | b'i' | b'L' | b'l' => 1,
        _ => return None,
    };
    Some(v)
}

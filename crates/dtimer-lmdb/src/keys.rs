//! Key encoding for the LMDB schedule store
//!
//! Scores are stored big-endian with the sign bit flipped so that the
//! lexicographic order LMDB sorts by equals numeric order, negative
//! scores included.
//!
//! Layouts (`\0` separates a structure name from the rest of the key):
//! - set entry:  `name \0 score(8) member`
//! - set member: `name \0 member` -> `score(8)`
//! - hash field: `name \0 field`

const SIGN_BIT: u64 = 1 << 63;

/// Encode a score so byte order matches numeric order
pub fn encode_score(score: i64) -> [u8; 8] {
    ((score as u64) ^ SIGN_BIT).to_be_bytes()
}

/// Decode a score written by [`encode_score`]
pub fn decode_score(bytes: &[u8]) -> Option<i64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64)
}

/// Prefix shared by every key belonging to structure `name`
pub fn name_prefix(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 1);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key
}

/// Key of a set entry in score order
pub fn entry_key(set: &str, score: i64, member: &str) -> Vec<u8> {
    let mut key = name_prefix(set);
    key.extend_from_slice(&encode_score(score));
    key.extend_from_slice(member.as_bytes());
    key
}

/// Split the part of an entry key after the name prefix into score and member
pub fn split_entry(rest: &[u8]) -> Option<(i64, &[u8])> {
    if rest.len() < 8 {
        return None;
    }
    let (score, member) = rest.split_at(8);
    Some((decode_score(score)?, member))
}

/// Key of a set member or hash field
pub fn field_key(name: &str, field: &str) -> Vec<u8> {
    let mut key = name_prefix(name);
    key.extend_from_slice(field.as_bytes());
    key
}

/// Database names inside the LMDB environment
pub mod db_names {
    pub const SET_ENTRIES: &str = "set_entries";
    pub const SET_SCORES: &str = "set_scores";
    pub const HASHES: &str = "hashes";
    pub const VALUES: &str = "values";
}

//! Vnet id generation.
//!
//! Vnet ids are derived from the persisted record's surrogate id, so they are
//! unique as long as ids are. Ids that would not fit the controller's length
//! limit are refused rather than truncated, since truncation would map two
//! record ids onto one vnet.

use crate::error::NetworkError;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Leading letter used when a prefix is empty or starts with a digit
const LEADING_LETTER: char = 'v';

/// Derives vnet ids of the form `<prefix><base36 id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnetIdEncoder {
    prefix: String,
    max_len: usize,
}

impl VnetIdEncoder {
    /// Non-alphanumeric characters are stripped from `prefix` and the rest
    /// lowercased. A prefix that is empty or starts with a digit gets a
    /// leading letter, so every id starts with a letter.
    pub fn new(prefix: &str, max_len: usize) -> Self {
        let mut prefix: String = prefix
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if !prefix.starts_with(|c: char| c.is_ascii_alphabetic()) {
            prefix.insert(0, LEADING_LETTER);
        }
        Self { prefix, max_len }
    }

    /// Sanitized prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Vnet id for a record id
    ///
    /// Fails with [`NetworkError::Configuration`] when the id does not fit in
    /// the maximum length.
    pub fn encode(&self, id: u64) -> Result<String, NetworkError> {
        let name = format!("{}{}", self.prefix, to_base36(id));
        if name.len() > self.max_len {
            return Err(NetworkError::Configuration(format!(
                "vnet id {} for record {} exceeds {} characters; raise SDN_VNET_MAX_LEN or shorten SDN_VNET_ID_PREFIX",
                name, id, self.max_len
            )));
        }
        Ok(name)
    }

    /// Number of record ids (starting at 1) that encode within the maximum length
    pub fn capacity(&self) -> u64 {
        let digits = self.max_len.saturating_sub(self.prefix.len());
        if digits == 0 {
            return 0;
        }
        u32::try_from(digits)
            .ok()
            .and_then(|d| 36u64.checked_pow(d))
            .map_or(u64::MAX, |n| n - 1)
    }
}

/// Lowercase base-36 representation
pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(9), "9");
        assert_eq!(to_base36(10), "a");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1295), "zz");
    }

    #[test]
    fn test_encode_with_prefix() {
        let encoder = VnetIdEncoder::new("s", 8);
        assert_eq!(encoder.encode(1).unwrap(), "s1");
        assert_eq!(encoder.encode(36).unwrap(), "s10");
        // deterministic
        assert_eq!(encoder.encode(123_456).unwrap(), encoder.encode(123_456).unwrap());
    }

    #[test]
    fn test_prefix_is_sanitized() {
        let encoder = VnetIdEncoder::new("Stu-dent_", 16);
        assert_eq!(encoder.prefix(), "student");
        assert_eq!(encoder.encode(11).unwrap(), "studentb");
    }

    #[test]
    fn test_names_start_with_letter_and_stay_distinct() {
        let encoder = VnetIdEncoder::new("", 8);
        assert_eq!(encoder.encode(5).unwrap(), "v5");
        assert_eq!(encoder.encode(10).unwrap(), "va");
        // 1121 is "v5" in base 36
        assert_ne!(encoder.encode(1121).unwrap(), encoder.encode(5).unwrap());
        assert_eq!(VnetIdEncoder::new("9lab", 8).encode(1).unwrap(), "v9lab1");
    }

    #[test]
    fn test_overlong_id_is_refused() {
        let encoder = VnetIdEncoder::new("student", 8);
        assert_eq!(encoder.encode(35).unwrap(), "studentz");
        // would truncate to the name of record 1
        assert!(matches!(encoder.encode(36), Err(NetworkError::Configuration(_))));
        assert!(encoder.encode(u64::MAX).is_err());
    }

    #[test]
    fn test_capacity_counts_ids_from_one() {
        assert_eq!(VnetIdEncoder::new("s", 3).capacity(), 1295);
        assert_eq!(VnetIdEncoder::new("student", 8).capacity(), 35);
        assert_eq!(VnetIdEncoder::new("student", 7).capacity(), 0);
        assert_eq!(VnetIdEncoder::new("", 2).capacity(), 35);
        assert_eq!(VnetIdEncoder::new("s", 64).capacity(), u64::MAX);

        // every id up to capacity encodes, the next one does not
        let encoder = VnetIdEncoder::new("s", 3);
        assert!(encoder.encode(encoder.capacity()).is_ok());
        assert!(encoder.encode(encoder.capacity() + 1).is_err());
    }
}

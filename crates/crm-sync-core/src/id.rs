//! Canonicalized record identifiers.
//!
//! A record key is opaque to the engine: a 15-character case-sensitive form,
//! or an 18-character form whose last three characters are a checksum of the
//! first 15. `Id` always stores (and compares on) the canonical 18-char form
//! so that a 15-char and an 18-char spelling of the same record compare equal
//! and hash identically.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::IdError;

const CHECKSUM_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ012345";

/// A canonicalized 18-character record identifier.
#[derive(Debug, Clone, Eq)]
pub struct Id {
    canonical: String,
}

impl Id {
    /// Parse a 15- or 18-character key, canonicalizing it to 18 characters.
    ///
    /// Fails unless the input matches `[A-Za-z0-9]{15}` or `[A-Za-z0-9]{18}`.
    pub fn from_string(s: &str) -> Result<Self, IdError> {
        let len = s.chars().count();
        if (len != 15 && len != 18) || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IdError::InvalidFormat(s.to_string()));
        }
        let body: String = s.chars().take(15).collect();
        let canonical = format!("{}{}", body, checksum_suffix(&body));
        Ok(Id { canonical })
    }

    /// The canonical 18-character form.
    pub fn as_18(&self) -> &str {
        &self.canonical
    }

    /// The first three characters, identifying the record's object type.
    pub fn prefix(&self) -> &str {
        &self.canonical[0..3]
    }
}

fn checksum_suffix(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut suffix = String::with_capacity(3);
    for chunk in chars.chunks(5) {
        let mut bitmap: u8 = 0;
        for (i, c) in chunk.iter().enumerate() {
            if c.is_ascii_uppercase() {
                bitmap |= 1 << i;
            }
        }
        suffix.push(CHECKSUM_ALPHABET[bitmap as usize] as char);
    }
    suffix
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl PartialEq<str> for Id {
    fn eq(&self, other: &str) -> bool {
        match Id::from_string(other) {
            Ok(other_id) => self.canonical == other_id.canonical,
            Err(_) => false,
        }
    }
}

impl PartialEq<&str> for Id {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<String> for Id {
    fn eq(&self, other: &String) -> bool {
        self == other.as_str()
    }
}

impl PartialEq<Id> for str {
    fn eq(&self, other: &Id) -> bool {
        other == self
    }
}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl std::str::FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::from_string(s)
    }
}

impl TryFrom<&str> for Id {
    type Error = IdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Id::from_string(s)
    }
}

impl TryFrom<String> for Id {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Id::from_string(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_real_id_pairs() {
        let known_good: &[(&str, &str)] = &[
            ("01Q36000000RXX5", "01Q36000000RXX5EAO"),
            ("005360000016xkG", "005360000016xkGAAQ"),
            ("01I36000002zD9R", "01I36000002zD9REAU"),
            ("0013600001ohPTp", "0013600001ohPTpAAM"),
            ("0033600001gyv5B", "0033600001gyv5BAAQ"),
        ];

        for (id15, id18) in known_good {
            let id = Id::from_string(id15).unwrap();
            assert_eq!(id.as_18(), *id18);
            assert_eq!(&id, *id18);
            assert_eq!(*id18, id);

            let from_18 = Id::from_string(id18).unwrap();
            assert_eq!(id, from_18);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Id::from_string("test").is_err());
        assert!(Id::from_string("12345678901234").is_err()); // 14 chars
        assert!(Id::from_string("not-alphanumeric!!").is_err());
    }

    #[test]
    fn round_trips_through_18_char_form() {
        let id = Id::from_string("001000000000000").unwrap();
        let again = Id::from_string(id.as_18()).unwrap();
        assert_eq!(again.as_18(), id.as_18());
    }

    #[test]
    fn prefix_is_first_three_characters() {
        let id = Id::from_string("001000000000000").unwrap();
        assert_eq!(id.prefix(), "001");
    }

    #[test]
    fn hashes_match_for_equivalent_forms() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        for i in 1..=400 {
            let id = Id::from_string(&format!("001000000000{:03}", i)).unwrap();
            assert!(!set.contains(&id));
            set.insert(id.clone());
            assert!(set.contains(&id));
        }
    }
}

//! Identifier and credential generation
//!
//! Upstream requests carry fresh random ids and registered identities need
//! synthetic credentials. Everything random goes through [`IdGenerator`] so
//! tests can inject a deterministic implementation.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

const FIRST_NAMES: &[&str] = &[
    "james", "john", "robert", "michael", "david", "william", "richard", "joseph", "thomas",
    "charles", "mary", "patricia", "jennifer", "linda", "elizabeth", "barbara", "susan",
    "jessica", "sarah", "karen",
];

const LAST_NAMES: &[&str] = &[
    "smith", "johnson", "williams", "brown", "jones", "garcia", "miller", "davis",
    "rodriguez", "martinez", "hernandez", "lopez", "gonzalez", "wilson", "anderson", "thomas",
    "taylor", "moore", "jackson", "martin",
];

const PASSWORD_CHARS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

/// Source of identifiers and synthetic credentials
pub trait IdGenerator: Send + Sync {
    /// Fresh identifier for an upstream request or message
    fn new_id(&self) -> String;

    /// Fresh password for a registered identity
    fn new_credential(&self) -> String;

    /// Fresh email address for a registered identity
    fn new_email(&self) -> String;
}

/// Default generator: UUIDv4 ids, random names and passwords
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn new_credential(&self) -> String {
        let mut rng = rand::rng();
        let length = 16 + rng.random_range(0..5);
        (0..length)
            .map(|_| PASSWORD_CHARS[rng.random_range(0..PASSWORD_CHARS.len())] as char)
            .collect()
    }

    fn new_email(&self) -> String {
        let mut rng = rand::rng();
        let first = FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())];
        let last = LAST_NAMES[rng.random_range(0..LAST_NAMES.len())];
        let num = rng.random_range(0..9999);
        match rng.random_range(0..3) {
            0 => format!("{}.{}{}@gmail.com", first, last, num),
            1 => format!("{}_{}{}@gmail.com", first, last, num),
            _ => format!("{}{}{}@gmail.com", first, last, num),
        }
    }
}

/// Deterministic generator producing `{prefix}-{n}` ids
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn new_id(&self) -> String {
        format!("{}-{}", self.prefix, self.next())
    }

    fn new_credential(&self) -> String {
        format!("{}-password-{}", self.prefix, self.next())
    }

    fn new_email(&self) -> String {
        format!("{}.user{}@example.com", self.prefix, self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_are_unique_uuids() {
        let generator = RandomIdGenerator;
        let a = generator.new_id();
        let b = generator.new_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_random_password_shape() {
        let generator = RandomIdGenerator;
        for _ in 0..50 {
            let password = generator.new_credential();
            assert!((16..=20).contains(&password.len()), "len {}", password.len());
            assert!(password.bytes().all(|b| PASSWORD_CHARS.contains(&b)));
        }
    }

    #[test]
    fn test_random_email_shape() {
        let generator = RandomIdGenerator;
        for _ in 0..50 {
            let email = generator.new_email();
            assert!(email.ends_with("@gmail.com"));
            let local = email.trim_end_matches("@gmail.com");
            assert!(FIRST_NAMES.iter().any(|first| local.starts_with(first)));
        }
    }

    #[test]
    fn test_sequential_generator() {
        let generator = SequentialIdGenerator::new("test");
        assert_eq!(generator.new_id(), "test-1");
        assert_eq!(generator.new_id(), "test-2");
        assert_eq!(generator.new_credential(), "test-password-3");
        assert_eq!(generator.new_email(), "test.user4@example.com");
    }
}

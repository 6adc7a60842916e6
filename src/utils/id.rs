//! Trace-correlation id generation.
//!
//! Used when a request has no valid span so log lines can still be grouped.

use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Process-wide generator, seeded once from OS entropy.
pub static TRACE_ID_GENERATOR: Lazy<RandomIdGenerator> = Lazy::new(RandomIdGenerator::new);

/// Source of unique identifiers.
pub trait IdGenerator: Send + Sync {
    /// Returns a new id as 32 lowercase hex characters.
    fn new_id(&self) -> String;
}

/// 128-bit random ids from a mutex-guarded, entropy-seeded RNG.
pub struct RandomIdGenerator {
    rng: Mutex<StdRng>,
}

impl RandomIdGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIdGenerator {
    fn new_id(&self) -> String {
        let mut bytes = [0u8; 16];
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_id_format() {
        let id = TRACE_ID_GENERATOR.new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn test_id_is_hex_of_random_bytes() {
        let id = RandomIdGenerator::new().new_id();
        let bytes = hex::decode(&id).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(hex::encode(bytes), id);
    }

    #[test]
    fn test_concurrent_ids_are_distinct() {
        let generator = Arc::new(RandomIdGenerator::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..256).map(|_| generator.new_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert_eq!(id.len(), 32);
                assert!(seen.insert(id), "duplicate id generated");
            }
        }
        assert_eq!(seen.len(), 16 * 256);
    }
}

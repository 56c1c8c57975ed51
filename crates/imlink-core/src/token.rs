//! Node identity tokens.

use rand::Rng;

/// Produces opaque identity tokens. The connector calls it once per process.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 16 random bytes, hex encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 16] = rng.gen();
        hex::encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_hex_and_distinct() {
        let gen = RandomTokenGenerator;
        let a = gen.generate();
        let b = gen.generate();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}

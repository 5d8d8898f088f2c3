use thiserror::Error;
use xxhash_rust::xxh64::Xxh64;

/// Fixed seed; fingerprints must match across processes.
const SEED: u64 = 0;

#[derive(Debug, Error)]
#[error("hash write failed: {0}")]
pub struct HashError(pub String);

/// Stateful 64-bit string fingerprint. Not shared between tasks.
pub trait Hasher: Send {
    fn reset(&mut self);
    fn write(&mut self, s: &str) -> Result<usize, HashError>;
    fn sum(&self) -> u64;
}

pub struct XxHasher {
    state: Xxh64,
}

impl Default for XxHasher {
    fn default() -> Self {
        Self {
            state: Xxh64::new(SEED),
        }
    }
}

impl Hasher for XxHasher {
    fn reset(&mut self) {
        self.state.reset(SEED);
    }

    fn write(&mut self, s: &str) -> Result<usize, HashError> {
        self.state.update(s.as_bytes());
        Ok(s.len())
    }

    fn sum(&self) -> u64 {
        self.state.digest()
    }
}

/// Reset, hash `line` and render the sum as 16 lowercase hex digits.
pub fn fingerprint<H: Hasher + ?Sized>(hasher: &mut H, line: &str) -> Result<String, HashError> {
    hasher.reset();
    hasher.write(line)?;
    Ok(format!("{:016x}", hasher.sum()))
}

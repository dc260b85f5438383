use std::ops::Range;

use rand::{Rng, RngCore};
use rand_pcg::Pcg64Mcg;
use sha2::{Digest, Sha256};

/// Seeded stream generator: the same seed string reproduces the same stream on
/// every platform.
#[derive(Clone, Debug)]
pub struct SeedRng {
    seed: String,
    inner: Pcg64Mcg,
}

fn lane(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

impl SeedRng {
    pub fn from_seed_str(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let lo = lane(&digest[0..8]);
        let hi = lane(&digest[8..16]);
        let state = ((hi as u128) << 64) | lo as u128;
        SeedRng {
            seed: seed.to_string(),
            inner: Pcg64Mcg::new(state),
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Uniform in [0, 1), from the top 53 bits of the next output.
    pub fn next_f64(&mut self) -> f64 {
        (self.inner.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    pub fn gen_index(&mut self, range: Range<usize>) -> usize {
        assert!(range.start < range.end, "empty range {range:?}");
        // Sampled as u64 so the draw does not depend on the platform's usize.
        let span = (range.end - range.start) as u64;
        range.start + self.inner.gen_range(0..span) as usize
    }

    /// An independent stream for a sub-task, derived from this generator's seed.
    pub fn derive(&self, label: &str) -> SeedRng {
        SeedRng::from_seed_str(&format!("{}:{label}", self.seed))
    }
}

impl RngCore for SeedRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

//! Deterministic noise source for stimulus frames.
//!
//! `Mulberry32` is a 32-bit state generator: two instances built from the same
//! seed yield the same stream, and it has no global state, so every noise frame
//! of a session can be regenerated from `(base seed, frame index)` alone.

use rand::{RngCore, SeedableRng};

/// Seed stride between successive frames of one interval
pub const FRAME_SEED_STRIDE: u32 = 29;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    #[inline]
    fn step(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Uniform sample in [0, 1)
    #[inline]
    pub fn next_unit(&mut self) -> f64 {
        self.step() as f64 / 4_294_967_296.0
    }

    /// Uniform sample in [-1, 1), the zero-mean deviate used for luminance noise
    #[inline]
    pub fn next_signed(&mut self) -> f64 {
        (self.next_unit() - 0.5) * 2.0
    }
}

impl RngCore for Mulberry32 {
    fn next_u32(&mut self) -> u32 {
        self.step()
    }

    fn next_u64(&mut self) -> u64 {
        let lo = self.step() as u64;
        let hi = self.step() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        let mut chunks = dst.chunks_exact_mut(4);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.step().to_le_bytes());
        }
        let rest = chunks.into_remainder();
        if !rest.is_empty() {
            let bytes = self.step().to_le_bytes();
            rest.copy_from_slice(&bytes[..rest.len()]);
        }
    }
}

impl SeedableRng for Mulberry32 {
    type Seed = [u8; 4];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u32::from_le_bytes(seed))
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state as u32)
    }
}

/// Seed for frame `frame_index` of an interval whose noise starts at `seed_base`
pub fn frame_seed(seed_base: u32, frame_index: u32) -> u32 {
    seed_base.wrapping_add(frame_index.wrapping_mul(FRAME_SEED_STRIDE))
}

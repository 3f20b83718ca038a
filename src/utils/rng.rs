//! Simple random number generator for reproducibility.
//!
//! This module provides a lightweight xorshift-based PRNG used for weight
//! initialization, so a seed fully determines a freshly built network.

/// Simple RNG for reproducibility without external crates.
///
/// Uses xorshift algorithm for fast, deterministic random number generation.
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state }
    }

    /// Basic xorshift to generate u32.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }

    /// Convert to [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.next_u32() as f32 / u32::MAX as f32
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Standard-normal sample scaled to `N(mean, sigma²)` (Box–Muller).
    pub fn gen_normal_f32(&mut self, mean: f32, sigma: f32) -> f32 {
        // Keep u1 away from zero so ln(u1) stays finite.
        let u1 = self.next_f32().max(f32::MIN_POSITIVE);
        let u2 = self.next_f32();
        let radius = (-2.0 * u1.ln()).sqrt();
        mean + sigma * radius * (2.0 * std::f32::consts::PI * u2).cos()
    }
}

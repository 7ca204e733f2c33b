use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

const TABLE_SIZE: usize = 256;
const PERSISTENCE: f64 = 0.5;
const LACUNARITY: f64 = 2.0;

/// Seeded 1-D gradient noise with fractal octaves.
///
/// `sample` is continuous in `t`, stays within [-1, 1] and depends only on the
/// seed, the octave count and `t`. Each octave doubles the frequency and halves
/// the amplitude, so more octaves add finer local variation.
#[derive(Clone, Debug)]
pub struct NoiseSource {
    seed: u64,
    octaves: u32,
    perm: Vec<u8>,
    gradients: Vec<f64>,
}

impl NoiseSource {
    pub fn new(seed: u64, octaves: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut perm: Vec<u8> = (0..=u8::MAX).collect();
        perm.shuffle(&mut rng);
        let gradients = (0..TABLE_SIZE).map(|_| rng.gen_range(-1.0..=1.0)).collect();

        Self { seed, octaves: octaves.max(1), perm, gradients }
    }

    /// Noise with a freshly drawn seed.
    pub fn random(octaves: u32) -> Self {
        Self::new(rand::random(), octaves)
    }

    pub fn seed(&self) -> u64 { self.seed }
    pub fn octaves(&self) -> u32 { self.octaves }

    pub fn sample(&self, t: f64) -> f64 {
        let mut total = 0.0;
        let mut norm = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        for _ in 0..self.octaves {
            total += self.gradient(t * frequency) * amplitude;
            norm += amplitude;
            amplitude *= PERSISTENCE;
            frequency *= LACUNARITY;
        }
        (total / norm).clamp(-1.0, 1.0)
    }

    fn gradient(&self, x: f64) -> f64 {
        let cell = x.floor();
        let frac = x - cell;
        let i0 = (cell as i64).rem_euclid(TABLE_SIZE as i64) as usize;
        let i1 = (i0 + 1) % TABLE_SIZE;
        let g0 = self.gradients[self.perm[i0] as usize];
        let g1 = self.gradients[self.perm[i1] as usize];

        // 1-D gradient noise peaks at |g| / 2, so scale by two to span [-1, 1]
        let a = g0 * frac;
        let b = g1 * (frac - 1.0);
        (a + (b - a) * fade(frac)) * 2.0
    }
}

fn fade(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_is_repeatable() {
        let a = NoiseSource::new(42, 4);
        let b = NoiseSource::new(42, 4);
        for i in 0..200 {
            let t = i as f64 * 0.173;
            assert_eq!(a.sample(t), b.sample(t));
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = NoiseSource::new(1, 2);
        let b = NoiseSource::new(2, 2);
        let differs = (0..50).any(|i| {
            let t = 0.37 + i as f64 * 0.5;
            (a.sample(t) - b.sample(t)).abs() > 1e-9
        });
        assert!(differs);
    }

    #[test]
    fn test_output_is_bounded() {
        let noise = NoiseSource::new(7, 4);
        for i in -500..500 {
            let v = noise.sample(i as f64 * 0.031);
            assert!((-1.0..=1.0).contains(&v), "sample {v} out of range");
        }
    }

    #[test]
    fn test_small_step_gives_small_change() {
        let noise = NoiseSource::new(99, 4);
        let mut t = 0.0;
        while t < 20.0 {
            let delta = (noise.sample(t + 1e-4) - noise.sample(t)).abs();
            assert!(delta < 0.02, "jump of {delta} at t={t}");
            t += 0.05;
        }
    }

    #[test]
    fn test_octaves_clamped_to_one() {
        let noise = NoiseSource::new(3, 0);
        assert_eq!(noise.octaves(), 1);
        assert_eq!(noise.seed(), 3);
    }

    #[test]
    fn test_negative_domain_is_continuous() {
        let noise = NoiseSource::new(11, 2);
        let left = noise.sample(-1e-6);
        let right = noise.sample(1e-6);
        assert!((left - right).abs() < 1e-3);
    }
}

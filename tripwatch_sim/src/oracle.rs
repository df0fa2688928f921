//! Ground truth oracle for simulation.
//!
//! The Oracle knows where the vehicle really is and turns that into the
//! noisy GPS fixes the engine gets to see:
//! - True position along a straight-line route
//! - Gaussian position noise (metres) from a seeded RNG

use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tripwatch_core::Coordinate;

/// Metres per degree of latitude (close enough for GPS noise).
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Default GPS noise standard deviation in metres.
pub const DEFAULT_POSITION_NOISE_M: f64 = 5.0;

/// The Oracle - maintains the vehicle's true position and generates fixes.
pub struct Oracle {
    /// RNG for GPS noise (separate stream from network faults)
    rng: ChaCha8Rng,

    /// True vehicle position
    truth: Coordinate,

    noise: Normal<f64>,
    noise_std_m: f64,
}

impl Oracle {
    /// Creates an oracle with the vehicle parked at `start`.
    pub fn new(rng: ChaCha8Rng, start: Coordinate) -> Self {
        Self {
            rng,
            truth: start,
            noise: Normal::new(0.0, DEFAULT_POSITION_NOISE_M)
                .unwrap_or_else(|_| unreachable!("constant standard deviation is valid")),
            noise_std_m: DEFAULT_POSITION_NOISE_M,
        }
    }

    /// Sets the position noise standard deviation. Invalid values are ignored.
    pub fn set_position_noise(&mut self, std_m: f64) {
        match Normal::new(0.0, std_m) {
            Ok(noise) => {
                self.noise = noise;
                self.noise_std_m = std_m;
            }
            Err(err) => tracing::warn!(std_m, error = %err, "Ignoring invalid GPS noise"),
        }
    }

    pub fn position_noise(&self) -> f64 {
        self.noise_std_m
    }

    /// True position of the vehicle.
    pub fn position(&self) -> Coordinate {
        self.truth
    }

    pub fn move_to(&mut self, to: Coordinate) {
        self.truth = to;
    }

    /// Waypoints from the current position to `to`, ending exactly at `to`.
    pub fn route(&self, to: Coordinate, steps: usize) -> Vec<Coordinate> {
        let steps = steps.max(1);
        let from = self.truth;
        (1..=steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                Coordinate::new(
                    from.latitude + (to.latitude - from.latitude) * t,
                    from.longitude + (to.longitude - from.longitude) * t,
                )
            })
            .collect()
    }

    /// A noisy GPS fix around the true position.
    pub fn gps_fix(&mut self) -> Coordinate {
        let north_m = self.noise.sample(&mut self.rng);
        let east_m = self.noise.sample(&mut self.rng);

        let lat = self.truth.latitude + north_m / METRES_PER_DEGREE;
        let lon = self.truth.longitude
            + east_m / (METRES_PER_DEGREE * self.truth.latitude.to_radians().cos());
        Coordinate::new(lat, lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const DEPOT: Coordinate = Coordinate {
        latitude: 52.52,
        longitude: 13.405,
    };

    fn oracle(seed: u64) -> Oracle {
        Oracle::new(ChaCha8Rng::seed_from_u64(seed), DEPOT)
    }

    #[test]
    fn test_zero_noise_fix_is_truth() {
        let mut oracle = oracle(1);
        oracle.set_position_noise(0.0);
        assert_eq!(oracle.gps_fix(), DEPOT);
    }

    #[test]
    fn test_noisy_fix_stays_near_truth() {
        let mut oracle = oracle(1);
        for _ in 0..200 {
            let fix = oracle.gps_fix();
            assert!(fix.distance_m(&DEPOT) < 40.0);
        }
    }

    #[test]
    fn test_same_seed_same_fixes() {
        let mut a = oracle(9);
        let mut b = oracle(9);
        for _ in 0..10 {
            assert_eq!(a.gps_fix(), b.gps_fix());
        }
    }

    #[test]
    fn test_route_ends_at_target() {
        let oracle = oracle(1);
        let target = Coordinate::new(52.78, 13.79);
        let route = oracle.route(target, 8);
        assert_eq!(route.len(), 8);
        assert_eq!(route.last(), Some(&target));
    }

    #[test]
    fn test_invalid_noise_is_ignored() {
        let mut oracle = oracle(1);
        oracle.set_position_noise(-3.0);
        assert_eq!(oracle.position_noise(), DEFAULT_POSITION_NOISE_M);
    }
}

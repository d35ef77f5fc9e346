//! Sensor sources
//!
//! The scheduler only sees `SensorSource`. Hardware drivers implement it on
//! the device; host builds use the seeded simulator.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::CHANNEL_COUNT;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("sensor {channel} not responding")]
    NotResponding { channel: &'static str },

    #[error("reading out of range on {channel}: {value}")]
    OutOfRange { channel: &'static str, value: f32 },
}

/// Reads one value per channel, in `CHANNEL_LAYOUT` order
pub trait SensorSource {
    fn read(&mut self, tick: u64) -> Result<[f32; CHANNEL_COUNT], SensorError>;
}

/// Deterministic physiological signal generator
///
/// Same seed, same sequence of readings.
pub struct SimulatedSensor {
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SensorSource for SimulatedSensor {
    fn read(&mut self, tick: u64) -> Result<[f32; CHANNEL_COUNT], SensorError> {
        let t = tick as f32;

        // slow arousal cycle drives heart rate and conductance together
        let arousal = (t / 45.0).sin() * 0.5 + 0.5;

        let heart_rate = 62.0 + 30.0 * arousal + self.rng.gen_range(-2.0f32..2.0);
        let conductance = 2.0 + 6.0 * arousal + self.rng.gen_range(-0.2f32..0.2);
        let skin_temp = 33.5 - 0.6 * arousal + self.rng.gen_range(-0.05f32..0.05);
        let motion = self.rng.gen_range(0.0f32..0.15) + if tick % 97 < 5 { 0.8 } else { 0.0 };

        Ok([heart_rate, conductance, skin_temp, motion])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_sensor_is_deterministic() {
        let mut a = SimulatedSensor::new(7);
        let mut b = SimulatedSensor::new(7);

        for tick in 0..50 {
            assert_eq!(a.read(tick).unwrap(), b.read(tick).unwrap());
        }
    }

    #[test]
    fn test_simulated_readings_are_plausible() {
        let mut sensor = SimulatedSensor::new(1);

        for tick in 0..500 {
            let [hr, eda, temp, motion] = sensor.read(tick).unwrap();
            assert!((55.0..100.0).contains(&hr));
            assert!((1.5..8.5).contains(&eda));
            assert!((32.5..34.0).contains(&temp));
            assert!((0.0..1.0).contains(&motion));
        }
    }
}

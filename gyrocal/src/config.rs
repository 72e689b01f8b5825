use std::{fmt, time::Duration};

/// Number of gyroscope instances the board can carry.
pub const MAX_GYROS: usize = 3;

/// Slot whose sample count paces the accumulation loop and whose mean is
/// checked against a late raw reading.
pub const REFERENCE_SLOT: usize = 0;

/// Number of progress notices emitted over one sample window.
const PROGRESS_STEPS: u32 = 20;

/// Tunables for one calibration run
#[derive(Clone, Debug)]
pub struct CalibrationConfig {
  /// How many gyroscope slots to probe, starting from slot 0
  pub slot_count: usize,
  /// Samples collected from the reference slot before the window closes
  pub target_samples: u32,
  /// Longest a single wait for new samples may block
  pub poll_timeout: Duration,
  /// Timed-out waits tolerated before the run is declared a sensor fault
  pub max_poll_errors: u32,
  /// Largest allowed per-axis difference between the reference mean and its
  /// last raw sample, in radians/second
  pub max_offset: f64,
  /// Time given to the operator to let go of the vehicle
  pub settle_time: Duration,
}

impl Default for CalibrationConfig {
  fn default() -> Self {
    Self {
      slot_count: MAX_GYROS,
      target_samples: 5000,
      poll_timeout: Duration::from_millis(1000),
      max_poll_errors: 1000,
      max_offset: 0.01,
      settle_time: Duration::from_secs(2),
    }
  }
}

impl CalibrationConfig {
  /// Reference sample counts at which a progress notice is emitted are the
  /// multiples of this.
  pub fn progress_step(&self) -> u32 {
    (self.target_samples / PROGRESS_STEPS).max(1)
  }

  /// Longest the sample window may stay open, the same budget the timeout
  /// counter allows.
  pub fn sampling_deadline(&self) -> Duration {
    self
      .poll_timeout
      .saturating_mul(self.max_poll_errors.saturating_add(1))
  }

  /// Fewest samples a slot needs for its offset to be committed.
  pub fn min_committed_samples(&self) -> u32 {
    self.target_samples / 2
  }

  /// Rejects configurations the pipeline cannot run with.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.slot_count <= REFERENCE_SLOT {
      return Err(ConfigError::NoReferenceSlot);
    }

    if self.slot_count > MAX_GYROS {
      return Err(ConfigError::TooManySlots(self.slot_count));
    }

    if self.target_samples == 0 {
      return Err(ConfigError::EmptyWindow);
    }

    if !(self.max_offset.is_finite() && self.max_offset > 0.0) {
      return Err(ConfigError::InvalidTolerance(self.max_offset));
    }

    Ok(())
  }
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
  NoReferenceSlot,
  TooManySlots(usize),
  EmptyWindow,
  InvalidTolerance(f64),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NoReferenceSlot => {
        write!(f, "slot count must include reference slot {REFERENCE_SLOT}")
      }
      Self::TooManySlots(count) => {
        write!(f, "{count} slots requested but only {MAX_GYROS} are supported")
      }
      Self::EmptyWindow => write!(f, "target sample count must be non-zero"),
      Self::InvalidTolerance(tolerance) => {
        write!(f, "offset tolerance {tolerance} must be finite and positive")
      }
    }
  }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_reports_progress_every_five_percent() {
    let config = CalibrationConfig::default();
    assert_eq!(config.progress_step(), 250);
    assert_eq!(config.min_committed_samples(), 2500);
    assert_eq!(config.sampling_deadline(), Duration::from_secs(1001));
    assert_eq!(config.validate(), Ok(()));
  }

  #[test]
  fn tiny_window_still_has_a_progress_step() {
    let config = CalibrationConfig {
      target_samples: 7,
      ..Default::default()
    };
    assert_eq!(config.progress_step(), 1);
  }

  #[test]
  fn rejects_unusable_configs() {
    let base = CalibrationConfig::default();

    let config = CalibrationConfig { slot_count: 0, ..base.clone() };
    assert_eq!(config.validate(), Err(ConfigError::NoReferenceSlot));

    let config = CalibrationConfig { slot_count: 4, ..base.clone() };
    assert_eq!(config.validate(), Err(ConfigError::TooManySlots(4)));

    let config = CalibrationConfig { target_samples: 0, ..base.clone() };
    assert_eq!(config.validate(), Err(ConfigError::EmptyWindow));

    let config = CalibrationConfig { max_offset: -1.0, ..base };
    assert!(config.validate().is_err());
  }
}

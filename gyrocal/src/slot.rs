use common::comm::gyro::{DeviceId, GyroCalibration, Vector};

/// Calibration state of one gyroscope slot for the duration of a run.
///
/// `offset` holds the running sum of accumulated samples until
/// [`SensorSlot::finalize`] turns it into their mean.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorSlot {
  pub index: usize,
  /// Set when the device opened during reset, `None` if the slot is empty.
  pub device_id: Option<DeviceId>,
  pub offset: Vector,
  pub sample_count: u32,
  finalized: bool,
}

impl SensorSlot {
  pub fn new(index: usize) -> Self {
    SensorSlot {
      index,
      device_id: None,
      offset: Vector::ZERO,
      sample_count: 0,
      finalized: false,
    }
  }

  pub fn is_present(&self) -> bool {
    self.device_id.is_some()
  }

  /// Adds one sample to the running sum. Samples past `target` are dropped;
  /// returns whether the sample was counted.
  pub fn accumulate(&mut self, rate: Vector, target: u32) -> bool {
    if self.finalized || self.sample_count >= target {
      return false;
    }

    self.offset += rate;
    self.sample_count += 1;
    true
  }

  /// Turns the running sum into the mean offset. A slot that never received a
  /// sample keeps a zero offset.
  pub fn finalize(&mut self) {
    if self.finalized {
      return;
    }

    if self.sample_count > 0 {
      self.offset = self.offset / f64::from(self.sample_count);
    }

    self.finalized = true;
  }

  /// The calibration to push to the driver once finalized.
  pub fn calibration(&self) -> GyroCalibration {
    GyroCalibration::from_offset(self.offset)
  }
}

use common::comm::gyro::{DeviceId, GyroCalibration};
use std::fmt;

#[derive(Debug)]
pub enum DriverError {
  /// Nothing answers in the requested slot.
  NotPresent(usize),
  /// The driver refused the command.
  Rejected(&'static str),
}

impl fmt::Display for DriverError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DriverError::NotPresent(slot) => write!(f, "no gyro in slot {slot}"),
      DriverError::Rejected(reason) => {
        write!(f, "driver rejected command: {reason}")
      }
    }
  }
}

impl std::error::Error for DriverError {}

/// An open gyroscope driver. Dropping the handle closes it.
pub trait GyroDevice {
  /// Hardware identifier of the device behind this handle
  fn device_id(&self) -> DeviceId;

  /// Replaces the offset and scale the driver applies to raw readings.
  fn apply(&mut self, calibration: &GyroCalibration) -> Result<(), DriverError>;

  /// Sets the driver back to zero offset and unit scale so that it reports
  /// raw readings.
  fn reset(&mut self) -> Result<(), DriverError> {
    self.apply(&GyroCalibration::identity())
  }
}

/// Opens the gyroscope in each slot of the board.
pub trait GyroBus {
  type Device: GyroDevice;

  /// Opens the device in `slot`, failing if none is fitted.
  fn open(&mut self, slot: usize) -> Result<Self::Device, DriverError>;

  /// The 96-bit unique identifier of the flight computer's MCU.
  fn mcu_unique_id(&self) -> [u32; 3];

  /// Identifier recorded as `CAL_BOARD_ID`. Only the last word of the MCU id
  /// is kept, which is not globally unique but is unique among a fleet.
  fn board_id(&self) -> u32 {
    self.mcu_unique_id()[2]
  }
}

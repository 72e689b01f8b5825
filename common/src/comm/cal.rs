use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the sensor family calibrated by the routine, as it appears in
/// operator-facing text.
pub const SENSOR_NAME: &str = "gyro";

/// How urgently a notice should be surfaced to the operator.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  /// Routine status, such as progress.
  Info,

  /// Something went wrong, fatal or not.
  Critical,
}

/// A message emitted while a calibration runs, keyed by stage.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalMessage {
  /// The calibration routine has begun.
  Started,

  /// The vehicle must not move until the routine finishes.
  HoldStill,

  /// Percentage of the sample window collected so far.
  Progress(u8),

  /// The calibration of the device in the given slot could not be reset.
  FailedReset(usize),

  /// The sample bus stopped delivering data.
  FailedSensor,

  /// The new calibration could not be applied to the device in the given
  /// slot.
  FailedApply(usize),

  /// The parameters could not be saved to nonvolatile storage.
  FailedSaveParams,

  /// The calibration finished and was saved.
  Done,

  /// The calibration did not finish.
  Failed,

  /// Free-form text that does not belong to a specific stage.
  Text(String),
}

impl fmt::Display for CalMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Started => write!(f, "[cal] calibration started: {SENSOR_NAME}"),
      Self::HoldStill => write!(f, "[cal] HOLD STILL"),
      Self::Progress(percent) => write!(f, "[cal] {SENSOR_NAME} progress <{percent}>"),
      Self::FailedReset(slot) => {
        write!(f, "[cal] calibration failed: to reset, sensor {slot}")
      }
      Self::FailedSensor => write!(f, "[cal] calibration failed: reading sensor"),
      Self::FailedApply(slot) => write!(
        f,
        "[cal] calibration failed: to apply calibration, sensor {slot}"
      ),
      Self::FailedSaveParams => {
        write!(f, "[cal] calibration failed: failed to save parameters")
      }
      Self::Done => write!(f, "[cal] calibration done: {SENSOR_NAME}"),
      Self::Failed => write!(f, "[cal] calibration failed: {SENSOR_NAME}"),
      Self::Text(text) => write!(f, "[cal] {text}"),
    }
  }
}

/// A message along with its severity and when it was emitted, as sent to the
/// ground.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Notice {
  /// How urgently the message should be shown.
  pub severity: Severity,

  /// The message itself.
  pub message: CalMessage,

  /// Unix timestamp in seconds.
  pub timestamp: f64,
}

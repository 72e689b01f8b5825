/// Sensor-frame types for gyroscope samples and calibrations.
pub mod gyro;

/// Notices emitted by a calibration run, and how they are rendered.
pub mod cal;

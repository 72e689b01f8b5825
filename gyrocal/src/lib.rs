//! Bias calibration for the gyroscope array on the flight computer.
//!
//! The routine zeroes each gyroscope's calibration, averages a window of
//! stationary samples per instance, checks the reference instance against a
//! late raw reading, and commits accepted offsets to the parameter store and
//! the live drivers. Everything it touches outside of its own state goes
//! through the ports in [`driver`], [`sensors`], [`params`], and [`notify`].

pub mod config;
pub mod driver;
pub mod notify;
pub mod params;
pub mod sensors;
pub mod sim;
pub mod slot;
pub mod state;

#[cfg(test)]
mod mocks;

pub use config::CalibrationConfig;
pub use state::{do_gyro_calibration, CalError, CalResult};

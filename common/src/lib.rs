#![warn(missing_docs)]

//! Common consists of the types shared between the gyroscope calibration
//! routine running on the flight computer and whatever listens to it on the
//! ground. The calibration notices sent across the network are all stored
//! here, along with the sensor-frame types they refer to.

/// All structs and definitions related to communication between the
/// calibration routine and the outside world.
pub mod comm;

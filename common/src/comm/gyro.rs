use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};
use std::{
  fmt,
  ops::{Add, AddAssign, Div, Sub},
};

/// Represents a vector in the sensor frame
#[derive(
  Deserialize, Serialize, Clone, Copy, MaxSize, Debug, PartialEq, Default,
)]
pub struct Vector {
  /// The x component.
  pub x: f64,

  /// The y component.
  pub y: f64,

  /// The z component.
  pub z: f64,
}

impl Vector {
  /// The zero vector.
  pub const ZERO: Vector = Vector::new(0.0, 0.0, 0.0);

  /// A vector with every component set to one.
  pub const ONE: Vector = Vector::new(1.0, 1.0, 1.0);

  /// Constructs a vector from its components.
  pub const fn new(x: f64, y: f64, z: f64) -> Self {
    Vector { x, y, z }
  }

  /// True only if every component is neither infinite nor NaN.
  pub fn is_finite(&self) -> bool {
    self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
  }

  /// The components as an `[x, y, z]` array.
  pub fn to_array(self) -> [f64; 3] {
    [self.x, self.y, self.z]
  }
}

impl Add for Vector {
  type Output = Vector;

  fn add(self, rhs: Vector) -> Vector {
    Vector::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
  }
}

impl AddAssign for Vector {
  fn add_assign(&mut self, rhs: Vector) {
    self.x += rhs.x;
    self.y += rhs.y;
    self.z += rhs.z;
  }
}

impl Sub for Vector {
  type Output = Vector;

  fn sub(self, rhs: Vector) -> Vector {
    Vector::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
  }
}

impl Div<f64> for Vector {
  type Output = Vector;

  fn div(self, rhs: f64) -> Vector {
    Vector::new(self.x / rhs, self.y / rhs, self.z / rhs)
  }
}

impl fmt::Display for Vector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({:.6}, {:.6}, {:.6})", self.x, self.y, self.z)
  }
}

/// in units of radians/second
pub type Gyroscope = Vector;

/// A single reading published by one gyroscope instance.
#[derive(
  Deserialize, Serialize, Clone, Copy, MaxSize, Debug, PartialEq, Default,
)]
pub struct GyroSample {
  /// Angular rate as reported by the driver, after its current calibration.
  pub rate: Gyroscope,

  /// Seconds since the publisher started.
  pub timestamp: f64,
}

impl GyroSample {
  /// Constructs a sample with a zero timestamp.
  pub fn new(rate: Gyroscope) -> Self {
    GyroSample {
      rate,
      timestamp: 0.0,
    }
  }
}

/// Offset and scale applied by a gyroscope driver to every raw reading.
///
/// The driver reports `(raw - offset) * scale` on each axis.
#[derive(Deserialize, Serialize, Clone, Copy, MaxSize, Debug, PartialEq)]
pub struct GyroCalibration {
  /// Per-axis bias subtracted from raw readings.
  pub offset: Vector,

  /// Per-axis scale factor. Bias calibration always leaves this at one.
  pub scale: Vector,
}

impl GyroCalibration {
  /// Zero offset, unit scale. The state a device is reset to before sampling.
  pub const fn identity() -> Self {
    GyroCalibration {
      offset: Vector::ZERO,
      scale: Vector::ONE,
    }
  }

  /// A calibration carrying the given offset with unit scale.
  pub const fn from_offset(offset: Vector) -> Self {
    GyroCalibration {
      offset,
      scale: Vector::ONE,
    }
  }

  /// Applies this calibration to a raw reading.
  pub fn correct(&self, raw: Vector) -> Vector {
    let shifted = raw - self.offset;

    Vector::new(
      shifted.x * self.scale.x,
      shifted.y * self.scale.y,
      shifted.z * self.scale.z,
    )
  }
}

impl Default for GyroCalibration {
  fn default() -> Self {
    GyroCalibration::identity()
  }
}

/// Opaque hardware identifier reported by a gyroscope driver.
#[derive(
  Deserialize, Serialize, Clone, Copy, MaxSize, Debug, PartialEq, Eq, Hash,
)]
pub struct DeviceId(pub u32);

impl DeviceId {
  /// The identifier reinterpreted as the signed integer the parameter store
  /// keeps it as.
  pub fn as_param(&self) -> i32 {
    self.0 as i32
  }
}

impl fmt::Display for DeviceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:#010x}", self.0)
  }
}

use crate::config::MAX_GYROS;
use serde::{Deserialize, Serialize};
use std::{
  collections::BTreeMap,
  fmt,
  fs,
  io,
  path::{Path, PathBuf},
};

/// Parameter recording which board the calibration was taken on.
pub const BOARD_ID_PARAM: &str = "CAL_BOARD_ID";

/// A typed parameter value.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
  Int(i32),
  Float(f32),
}

impl ParamValue {
  fn same_type(&self, other: &ParamValue) -> bool {
    matches!(
      (self, other),
      (ParamValue::Int(_), ParamValue::Int(_))
        | (ParamValue::Float(_), ParamValue::Float(_))
    )
  }
}

impl fmt::Display for ParamValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ParamValue::Int(value) => write!(f, "{value}"),
      ParamValue::Float(value) => write!(f, "{value:.6}"),
    }
  }
}

/// The per-slot calibration parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamField {
  XOffset,
  YOffset,
  ZOffset,
  DeviceId,
}

impl ParamField {
  pub const ALL: [ParamField; 4] = [
    ParamField::XOffset,
    ParamField::YOffset,
    ParamField::ZOffset,
    ParamField::DeviceId,
  ];

  fn suffix(&self) -> &'static str {
    match self {
      ParamField::XOffset => "XOFF",
      ParamField::YOffset => "YOFF",
      ParamField::ZOffset => "ZOFF",
      ParamField::DeviceId => "ID",
    }
  }

  fn default_value(&self) -> ParamValue {
    match self {
      ParamField::DeviceId => ParamValue::Int(0),
      _ => ParamValue::Float(0.0),
    }
  }
}

/// Name of the parameter holding `field` for the gyroscope in `slot`, such as
/// `CAL_GYRO0_XOFF`.
pub fn param_key(slot: usize, field: ParamField) -> String {
  format!("CAL_GYRO{slot}_{}", field.suffix())
}

#[derive(Debug)]
pub enum ParamError {
  /// No parameter with this name is declared.
  Unknown(String),
  /// The value does not match the declared type of the parameter.
  TypeMismatch(String),
  Io(io::Error),
  Serialization(serde_json::Error),
}

impl fmt::Display for ParamError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ParamError::Unknown(name) => write!(f, "unknown parameter {name}"),
      ParamError::TypeMismatch(name) => {
        write!(f, "wrong value type for parameter {name}")
      }
      ParamError::Io(e) => write!(f, "IO error: {e}"),
      ParamError::Serialization(e) => write!(f, "Serialization error: {e}"),
    }
  }
}

impl std::error::Error for ParamError {}

impl From<io::Error> for ParamError {
  fn from(err: io::Error) -> Self {
    ParamError::Io(err)
  }
}

impl From<serde_json::Error> for ParamError {
  fn from(err: serde_json::Error) -> Self {
    ParamError::Serialization(err)
  }
}

/// Key/value configuration the calibration reads and writes.
pub trait ParamStore {
  fn get(&self, name: &str) -> Option<ParamValue>;

  /// Sets a declared parameter in memory. Nothing is durable until `save`.
  fn set(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError>;

  /// Writes every parameter to nonvolatile storage.
  fn save(&mut self) -> Result<(), ParamError>;
}

/// Every parameter the calibration may write, with its default value.
pub fn declared_params() -> BTreeMap<String, ParamValue> {
  let mut params = BTreeMap::new();
  params.insert(BOARD_ID_PARAM.to_owned(), ParamValue::Int(0));

  for slot in 0..MAX_GYROS {
    for field in ParamField::ALL {
      params.insert(param_key(slot, field), field.default_value());
    }
  }

  params
}

/// Parameter store kept as a JSON object on disk.
///
/// Only declared parameters can be set. Values found on disk override the
/// defaults; unknown names on disk are dropped on the next save.
pub struct JsonParamStore {
  path: PathBuf,
  values: BTreeMap<String, ParamValue>,
}

impl JsonParamStore {
  /// Loads the store at `path`, starting from defaults if the file does not
  /// exist yet.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ParamError> {
    let path = path.as_ref().to_path_buf();
    let mut values = declared_params();

    match fs::read(&path) {
      Ok(bytes) => {
        let stored: BTreeMap<String, ParamValue> =
          serde_json::from_slice(&bytes)?;

        for (name, value) in stored {
          if let Some(slot) = values.get_mut(&name) {
            if slot.same_type(&value) {
              *slot = value;
            }
          }
        }
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }

    Ok(JsonParamStore { path, values })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl ParamStore for JsonParamStore {
  fn get(&self, name: &str) -> Option<ParamValue> {
    self.values.get(name).copied()
  }

  fn set(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    let current = self
      .values
      .get_mut(name)
      .ok_or_else(|| ParamError::Unknown(name.to_owned()))?;

    if !current.same_type(&value) {
      return Err(ParamError::TypeMismatch(name.to_owned()));
    }

    *current = value;
    Ok(())
  }

  fn save(&mut self) -> Result<(), ParamError> {
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
      }
    }

    let json = serde_json::to_vec_pretty(&self.values)?;

    // write beside the target then rename so a crash never leaves half a file
    let staging = self.path.with_extension("json.tmp");
    fs::write(&staging, json)?;
    fs::rename(&staging, &self.path)?;

    Ok(())
  }
}

//! A bench rig of simulated gyroscopes, for running the calibration without
//! flight hardware.
//!
//! Each fitted gyroscope gets a worker thread that publishes
//! `calibration.correct(bias + noise)` into a [`SensorHub`] at a fixed rate,
//! so a calibration applied through the [`SimBus`] shows up in the samples
//! that follow it.

use crate::{
  config::MAX_GYROS,
  driver::{DriverError, GyroBus, GyroDevice},
  sensors::{Publisher, SensorHub},
};
use common::comm::gyro::{DeviceId, GyroCalibration, GyroSample, Vector};
use jeflog::warn;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
  },
  thread,
  time::{Duration, Instant},
};

/// A simulated gyroscope fitted in one slot of the rig.
#[derive(Clone, Debug)]
pub struct SimGyro {
  pub device_id: DeviceId,
  /// Constant rate the sensor reports while stationary, in radians/second
  pub bias: Vector,
  /// Half-width of the uniform noise added to every axis of every sample
  pub noise: f64,
  /// Time between samples
  pub period: Duration,
  /// Whether reset and apply commands to this device fail
  pub faulty: bool,
}

impl SimGyro {
  pub fn new(device_id: u32, bias: Vector) -> Self {
    Self {
      device_id: DeviceId(device_id),
      bias,
      noise: 0.0005,
      period: Duration::from_millis(1),
      faulty: false,
    }
  }
}

/// Layout of the rig. `gyros[s]` is `None` when slot `s` is empty.
#[derive(Clone, Debug)]
pub struct SimConfig {
  pub gyros: Vec<Option<SimGyro>>,
  pub mcu_unique_id: [u32; 3],
  pub seed: u64,
}

impl Default for SimConfig {
  fn default() -> Self {
    Self {
      gyros: vec![
        Some(SimGyro::new(0x0021_0009, Vector::new(0.0123, -0.0045, 0.0071))),
        Some(SimGyro::new(0x0022_0011, Vector::new(-0.0031, 0.0088, -0.0012))),
        Some(SimGyro::new(0x0023_0019, Vector::new(0.0004, 0.0021, 0.0153))),
      ],
      mcu_unique_id: [0x3230_5111, 0x0036_0043, 0x0042_1337],
      seed: 4573,
    }
  }
}

impl SimConfig {
  /// Removes the gyroscope fitted in `slot`, if any.
  pub fn without(mut self, slot: usize) -> Self {
    if let Some(gyro) = self.gyros.get_mut(slot) {
      *gyro = None;
    }

    self
  }
}

/// A running rig. Dropping it stops every sensor worker.
pub struct SimRig {
  pub bus: SimBus,
  pub hub: SensorHub,
  workers: Vec<SensorHandle>,
}

impl SimRig {
  pub fn start(config: SimConfig) -> Self {
    let slots = config.gyros.len().max(MAX_GYROS);
    let mut hub = SensorHub::new(slots);

    let calibrations: Vec<_> = (0..slots)
      .map(|_| Arc::new(Mutex::new(GyroCalibration::identity())))
      .collect();

    let workers = config
      .gyros
      .iter()
      .enumerate()
      .filter_map(|(slot, gyro)| {
        let gyro = gyro.clone()?;
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(slot as u64));

        Some(spawn_gyro(
          gyro,
          rng,
          calibrations[slot].clone(),
          hub.publisher(slot),
        ))
      })
      .collect();

    SimRig {
      bus: SimBus {
        gyros: config.gyros,
        calibrations,
        mcu_unique_id: config.mcu_unique_id,
      },
      hub,
      workers,
    }
  }

  pub fn running_workers(&self) -> usize {
    self.workers.len()
  }
}

fn spawn_gyro(
  gyro: SimGyro,
  mut rng: StdRng,
  calibration: Arc<Mutex<GyroCalibration>>,
  publisher: Publisher,
) -> SensorHandle {
  let started = Instant::now();
  let noise = gyro.noise.abs();

  SensorHandle::new(gyro.period, move || {
    let Ok(calibration) = calibration.lock().map(|calibration| *calibration)
    else {
      return;
    };

    let raw = gyro.bias
      + Vector::new(
        rng.gen_range(-noise..=noise),
        rng.gen_range(-noise..=noise),
        rng.gen_range(-noise..=noise),
      );

    publisher.publish(GyroSample {
      rate: calibration.correct(raw),
      timestamp: started.elapsed().as_secs_f64(),
    });
  })
}

/// Runs `read` on its own thread every `period` until dropped.
struct SensorHandle {
  running: Arc<AtomicBool>,
  thread: Option<thread::JoinHandle<()>>,
}

impl SensorHandle {
  fn new<F>(period: Duration, mut read: F) -> Self
  where
    F: FnMut() + Send + 'static,
  {
    let running = Arc::new(AtomicBool::new(true));
    let thread = {
      let running = running.clone();
      thread::spawn(move || {
        while running.load(Ordering::Relaxed) {
          read();
          thread::sleep(period);
        }
      })
    };

    SensorHandle {
      running,
      thread: Some(thread),
    }
  }
}

impl Drop for SensorHandle {
  fn drop(&mut self) {
    self.running.store(false, Ordering::Relaxed);

    if let Some(thread) = self.thread.take() {
      if thread.join().is_err() {
        warn!("Simulated gyro worker panicked.");
      }
    }
  }
}

/// Device side of the rig.
pub struct SimBus {
  gyros: Vec<Option<SimGyro>>,
  calibrations: Vec<Arc<Mutex<GyroCalibration>>>,
  mcu_unique_id: [u32; 3],
}

impl SimBus {
  /// The calibration the driver in `slot` currently applies.
  pub fn calibration(&self, slot: usize) -> Option<GyroCalibration> {
    let calibration = self.calibrations.get(slot)?.lock().ok()?;
    Some(*calibration)
  }
}

impl GyroBus for SimBus {
  type Device = SimDevice;

  fn open(&mut self, slot: usize) -> Result<SimDevice, DriverError> {
    let gyro = self
      .gyros
      .get(slot)
      .and_then(Option::as_ref)
      .ok_or(DriverError::NotPresent(slot))?;

    Ok(SimDevice {
      device_id: gyro.device_id,
      faulty: gyro.faulty,
      calibration: self.calibrations[slot].clone(),
    })
  }

  fn mcu_unique_id(&self) -> [u32; 3] {
    self.mcu_unique_id
  }
}

pub struct SimDevice {
  device_id: DeviceId,
  faulty: bool,
  calibration: Arc<Mutex<GyroCalibration>>,
}

impl GyroDevice for SimDevice {
  fn device_id(&self) -> DeviceId {
    self.device_id
  }

  fn apply(&mut self, calibration: &GyroCalibration) -> Result<(), DriverError> {
    if self.faulty {
      return Err(DriverError::Rejected("simulated device fault"));
    }

    let mut current = self
      .calibration
      .lock()
      .map_err(|_| DriverError::Rejected("calibration lock poisoned"))?;
    *current = *calibration;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sensors::{SampleSource, Subscription, Wake};

  #[test]
  fn empty_slots_do_not_open() {
    let mut rig = SimRig::start(SimConfig::default().without(1));

    assert_eq!(rig.running_workers(), 2);
    assert!(matches!(rig.bus.open(1), Err(DriverError::NotPresent(1))));
    assert!(matches!(rig.bus.open(5), Err(DriverError::NotPresent(5))));
    assert!(rig.bus.open(2).is_ok());
  }

  #[test]
  fn applied_calibration_shows_up_in_samples() {
    let config = SimConfig {
      gyros: vec![Some(SimGyro {
        noise: 0.0,
        ..SimGyro::new(1, Vector::new(0.5, -0.25, 0.125))
      })],
      ..Default::default()
    };
    let mut rig = SimRig::start(config);

    let bias = Vector::new(0.5, -0.25, 0.125);
    rig
      .bus
      .open(0)
      .and_then(|mut gyro| gyro.apply(&GyroCalibration::from_offset(bias)))
      .expect("simulated gyro accepts calibration");
    assert_eq!(rig.bus.calibration(0).map(|c| c.offset), Some(bias));

    let mut subscription = rig.hub.subscribe(0);
    let timeout = Duration::from_secs(1);

    // skip anything published before the new calibration took effect
    for _ in 0..3 {
      assert_eq!(rig.hub.wait_any(&[], timeout), Wake::Ready);
      subscription.read_latest();
    }
    assert_eq!(rig.hub.wait_any(&[], timeout), Wake::Ready);

    let sample = subscription.read_latest().expect("gyro published");
    assert!(sample.rate.x.abs() < 1e-12);
    assert!(sample.rate.y.abs() < 1e-12);
    assert!(sample.rate.z.abs() < 1e-12);
  }

  #[test]
  fn faulty_device_rejects_commands() {
    let mut config = SimConfig::default();
    if let Some(Some(gyro)) = config.gyros.get_mut(2) {
      gyro.faulty = true;
    }
    let mut rig = SimRig::start(config);

    let mut gyro = rig.bus.open(2).expect("slot 2 is fitted");
    assert!(gyro.reset().is_err());
  }
}

use crate::{
  config::{CalibrationConfig, ConfigError, REFERENCE_SLOT},
  driver::{GyroBus, GyroDevice},
  notify::Notifier,
  params::{
    param_key,
    ParamError,
    ParamField,
    ParamStore,
    ParamValue,
    BOARD_ID_PARAM,
  },
  sensors::{SampleSource, Subscription, Wake},
  slot::SensorSlot,
};
use common::comm::{
  cal::CalMessage,
  gyro::{GyroSample, Vector},
};
use jeflog::{fail, pass, task, warn};
use std::{fmt, thread, time::Instant};

pub type CalResult = Result<(), CalError>;

/// Why a calibration run failed. Every variant has already been reported to
/// the notifier by the time it is returned.
#[derive(Debug)]
pub enum CalError {
  InvalidConfig(ConfigError),
  /// The reference gyroscope could not be opened, so nothing can pace the
  /// sample window.
  ReferenceMissing,
  /// The sample bus went quiet for longer than the fault budget allows.
  SensorFault { timeouts: u32 },
  /// A slot's mean offset is NaN or infinite.
  NonFinite { slot: usize, offset: Vector },
  /// The reference mean disagrees with its last raw sample, which means the
  /// vehicle moved or the sensor is noisy.
  OutOfTolerance { difference: Vector },
  /// At least one offset parameter could not be set.
  ParamWrite,
  /// The parameters could not be saved.
  Persist(ParamError),
}

impl fmt::Display for CalError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidConfig(e) => write!(f, "invalid configuration: {e}"),
      Self::ReferenceMissing => {
        write!(f, "reference gyro {REFERENCE_SLOT} is not present")
      }
      Self::SensorFault { timeouts } => {
        write!(f, "no gyro data after {timeouts} timed-out waits")
      }
      Self::NonFinite { slot, offset } => {
        write!(f, "gyro {slot} offset {offset} is not finite")
      }
      Self::OutOfTolerance { difference } => {
        write!(f, "last sample differs from mean offset by {difference}")
      }
      Self::ParamWrite => write!(f, "failed to set offset parameters"),
      Self::Persist(e) => write!(f, "failed to save parameters: {e}"),
    }
  }
}

impl std::error::Error for CalError {}

impl From<ConfigError> for CalError {
  fn from(value: ConfigError) -> Self {
    Self::InvalidConfig(value)
  }
}

/// Stages of one calibration run. `Failed` may follow any stage and nothing
/// follows it.
#[derive(Debug)]
enum State {
  /// Open every gyroscope and zero its calibration.
  Reset,

  /// Average samples until the reference slot has a full window.
  Sampling,

  /// Check the means against the last raw reference sample.
  Validating { snapshot: GyroSample },

  /// Write offsets to the parameter store and the live drivers.
  Committing,

  /// Save the parameters to nonvolatile storage.
  Persisting,

  Done,

  Failed(CalError),
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Reset => write!(f, "Reset"),
      Self::Sampling => write!(f, "Sampling"),
      Self::Validating { snapshot } => {
        write!(f, "Validating(snapshot = {})", snapshot.rate)
      }
      Self::Committing => write!(f, "Committing"),
      Self::Persisting => write!(f, "Persisting"),
      Self::Done => write!(f, "Done"),
      Self::Failed(error) => write!(f, "Failed({error})"),
    }
  }
}

/// Everything a run borrows or owns while it executes.
struct Run<'a, B, S, P, N> {
  bus: &'a mut B,
  source: &'a mut S,
  params: &'a mut P,
  notifier: &'a mut N,
  config: &'a CalibrationConfig,
  slots: Vec<SensorSlot>,
}

/// Calibrates the bias of every gyroscope on the board.
///
/// Blocks until the run completes or fails. The outcome is reported to
/// `notifier` as it happens, ending with exactly one `Done` or `Failed`
/// notice; the returned error only says why for the caller's logs.
pub fn do_gyro_calibration<B, S, P, N>(
  bus: &mut B,
  source: &mut S,
  params: &mut P,
  notifier: &mut N,
  config: &CalibrationConfig,
) -> CalResult
where
  B: GyroBus,
  S: SampleSource,
  P: ParamStore,
  N: Notifier,
{
  notifier.info(&CalMessage::Started);

  if let Err(error) = config.validate() {
    fail!("Refusing to calibrate: {error}");
    notifier.info(&CalMessage::Failed);
    return Err(error.into());
  }

  notifier.info(&CalMessage::HoldStill);
  thread::sleep(config.settle_time);

  let mut run = Run {
    bus,
    source,
    params,
    notifier,
    config,
    slots: (0..config.slot_count).map(SensorSlot::new).collect(),
  };

  let mut state = State::Reset;

  let result = loop {
    state = match state {
      State::Done => break Ok(()),
      State::Failed(error) => break Err(error),
      state => run.next(state),
    };

    pass!("Transitioned to state: {state}");
  };

  match &result {
    Ok(()) => run.notifier.info(&CalMessage::Done),
    Err(error) => {
      fail!("Gyro calibration failed: {error}");
      run.notifier.info(&CalMessage::Failed);
    }
  }

  result
}

impl<'a, B, S, P, N> Run<'a, B, S, P, N>
where
  B: GyroBus,
  S: SampleSource,
  P: ParamStore,
  N: Notifier,
{
  fn next(&mut self, state: State) -> State {
    match state {
      State::Reset => self.reset(),
      State::Sampling => self.sample(),
      State::Validating { snapshot } => self.validate(snapshot),
      State::Committing => self.commit(),
      State::Persisting => self.persist(),
      terminal @ (State::Done | State::Failed(_)) => terminal,
    }
  }

  fn reset(&mut self) -> State {
    // bookkeeping only, a failure here has no bearing on the calibration
    let board_id = self.bus.board_id();
    let value = ParamValue::Int(board_id as i32);
    if let Err(error) = self.params.set(BOARD_ID_PARAM, value) {
      warn!("Failed to record board id {board_id:#010x}: {error}");
    }

    for slot in &mut self.slots {
      let mut device = match self.bus.open(slot.index) {
        Ok(device) => device,
        Err(error) => {
          task!("Skipping gyro {}: {error}", slot.index);
          continue;
        }
      };

      let device_id = device.device_id();
      slot.device_id = Some(device_id);

      // a slot that keeps its old calibration averages corrected readings,
      // which only degrades that slot's estimate
      match device.reset() {
        Ok(()) => pass!("Reset calibration of gyro {} ({device_id}).", slot.index),
        Err(error) => {
          fail!("Failed to reset calibration of gyro {}: {error}", slot.index);
          self.notifier.critical(&CalMessage::FailedReset(slot.index));
        }
      }
    }

    if !self.slots[REFERENCE_SLOT].is_present() {
      self.notifier.critical(&CalMessage::FailedSensor);
      return State::Failed(CalError::ReferenceMissing);
    }

    State::Sampling
  }

  fn sample(&mut self) -> State {
    let target = self.config.target_samples;
    let progress_step = self.config.progress_step();

    // every return below drops these, which unsubscribes
    let mut subscriptions: Vec<S::Subscription> = (0..self.slots.len())
      .map(|slot| self.source.subscribe(slot))
      .collect();

    let mut poll_errors = 0;
    let mut snapshot = None;

    // other slots keep waking the loop while the reference is silent, so the
    // fault budget is also enforced as wall time
    let deadline = Instant::now().checked_add(self.config.sampling_deadline());

    // the reference slot paces the window; the others are counted as they
    // come
    while self.slots[REFERENCE_SLOT].sample_count < target {
      if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        fail!(
          "Reference gyro collected only {} of {target} samples in time.",
          self.slots[REFERENCE_SLOT].sample_count
        );
        self.notifier.critical(&CalMessage::FailedSensor);
        return State::Failed(CalError::SensorFault {
          timeouts: poll_errors,
        });
      }

      match self.source.wait_any(&subscriptions, self.config.poll_timeout) {
        Wake::TimedOut => {
          poll_errors += 1;

          if poll_errors > self.config.max_poll_errors {
            fail!("Gave up on gyro data after {poll_errors} timed-out waits.");
            self.notifier.critical(&CalMessage::FailedSensor);
            return State::Failed(CalError::SensorFault {
              timeouts: poll_errors,
            });
          }
        }
        Wake::Ready => {
          for (slot, subscription) in
            self.slots.iter_mut().zip(subscriptions.iter_mut())
          {
            if !subscription.has_new() {
              continue;
            }

            let Some(sample) = subscription.read_latest() else {
              continue;
            };

            if !slot.is_present() || !slot.accumulate(sample.rate, target) {
              continue;
            }

            if slot.index == REFERENCE_SLOT {
              snapshot = Some(sample);

              if slot.sample_count % progress_step == 0 {
                let percent =
                  u64::from(slot.sample_count) * 100 / u64::from(target);
                self.notifier.info(&CalMessage::Progress(percent as u8));
              }
            }
          }
        }
      }
    }

    drop(subscriptions);

    for slot in &mut self.slots {
      slot.finalize();

      if slot.is_present() {
        task!(
          "Gyro {} mean offset {} over {} samples.",
          slot.index,
          slot.offset,
          slot.sample_count
        );
      }
    }

    match snapshot {
      Some(snapshot) => State::Validating { snapshot },
      None => {
        self.notifier.critical(&CalMessage::FailedSensor);
        State::Failed(CalError::SensorFault {
          timeouts: poll_errors,
        })
      }
    }
  }

  fn validate(&mut self, snapshot: GyroSample) -> State {
    let min_samples = self.config.min_committed_samples();

    // sparse slots are skipped by commit, so a bad sample there is harmless
    if let Some(slot) = self.slots.iter().find(|slot| {
      let checked = slot.index == REFERENCE_SLOT
        || (slot.is_present() && slot.sample_count >= min_samples);
      checked && !slot.offset.is_finite()
    }) {
      let error = CalError::NonFinite {
        slot: slot.index,
        offset: slot.offset,
      };

      self.notifier.critical(&CalMessage::Text(format!(
        "calibration failed: gyro {} offset is not finite",
        slot.index
      )));
      return State::Failed(error);
    }

    let mean = self.slots[REFERENCE_SLOT].offset;
    let difference = snapshot.rate - mean;

    let out_of_tolerance = difference
      .to_array()
      .iter()
      .any(|axis| axis.abs() > self.config.max_offset);

    if out_of_tolerance {
      self.notifier.critical(&CalMessage::Text(
        "calibration failed: offset out of tolerance".to_owned(),
      ));
      return State::Failed(CalError::OutOfTolerance { difference });
    }

    State::Committing
  }

  fn commit(&mut self) -> State {
    let min_samples = self.config.min_committed_samples();
    let mut failed = false;

    for slot in &self.slots {
      let Some(device_id) = slot.device_id else {
        continue;
      };

      if slot.sample_count < min_samples {
        warn!(
          "Gyro {} only collected {} samples, keeping its previous calibration.",
          slot.index, slot.sample_count
        );
        continue;
      }

      let offset = slot.offset;
      let writes = [
        (ParamField::XOffset, ParamValue::Float(offset.x as f32)),
        (ParamField::YOffset, ParamValue::Float(offset.y as f32)),
        (ParamField::ZOffset, ParamValue::Float(offset.z as f32)),
        (ParamField::DeviceId, ParamValue::Int(device_id.as_param())),
      ];

      // attempt every write so one bad key does not hide the rest
      for (field, value) in writes {
        let name = param_key(slot.index, field);

        if let Err(error) = self.params.set(&name, value) {
          fail!("Failed to set {name} to {value}: {error}");
          failed = true;
        }
      }

      let mut device = match self.bus.open(slot.index) {
        Ok(device) => device,
        Err(error) => {
          fail!("Failed to reopen gyro {}: {error}", slot.index);
          failed = true;
          continue;
        }
      };

      match device.apply(&slot.calibration()) {
        Ok(()) => pass!("Applied offset {offset} to gyro {}.", slot.index),
        Err(error) => {
          fail!("Failed to apply calibration to gyro {}: {error}", slot.index);
          self.notifier.critical(&CalMessage::FailedApply(slot.index));
        }
      }
    }

    if failed {
      self.notifier.critical(&CalMessage::Text(
        "ERROR: failed to set offset params".to_owned(),
      ));
      return State::Failed(CalError::ParamWrite);
    }

    State::Persisting
  }

  fn persist(&mut self) -> State {
    match self.params.save() {
      Ok(()) => State::Done,
      Err(error) => {
        fail!("Failed to save parameters: {error}");
        self.notifier.critical(&CalMessage::FailedSaveParams);
        State::Failed(CalError::Persist(error))
      }
    }
  }
}

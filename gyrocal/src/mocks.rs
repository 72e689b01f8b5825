use crate::{
  driver::{DriverError, GyroBus, GyroDevice},
  notify::Notifier,
  params::{declared_params, ParamError, ParamStore, ParamValue},
  sensors::{SampleSource, Subscription, Wake},
};
use common::comm::{
  cal::{CalMessage, Severity},
  gyro::{DeviceId, GyroCalibration, GyroSample, Vector},
};
use std::{
  collections::{HashMap, HashSet, VecDeque},
  sync::{Arc, Mutex, Weak},
  time::Duration,
};

pub const MCU_UNIQUE_ID: [u32; 3] = [0x3230_5111, 0x0036_0043, 0x0042_1337];

pub fn mock_device_id(slot: usize) -> DeviceId {
  DeviceId(0x0021_0000 | slot as u32)
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
  Opened(usize),
  Reset(usize),
  Applied(usize, GyroCalibration),
  Closed(usize),
}

#[derive(Clone)]
pub struct MockBus {
  pub present: Vec<bool>,
  pub fail_reset: HashSet<usize>,
  pub fail_apply: HashSet<usize>,
  /// Slots that open once and then disappear.
  pub vanish: HashSet<usize>,
  opened: HashSet<usize>,
  events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl MockBus {
  pub fn new(present: &[bool]) -> Self {
    Self {
      present: present.to_vec(),
      fail_reset: HashSet::new(),
      fail_apply: HashSet::new(),
      vanish: HashSet::new(),
      opened: HashSet::new(),
      events: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn events(&self) -> Vec<DeviceEvent> {
    self.events.lock().unwrap().clone()
  }

  pub fn applied(&self) -> Vec<(usize, GyroCalibration)> {
    self
      .events()
      .into_iter()
      .filter_map(|event| match event {
        DeviceEvent::Applied(slot, calibration) => Some((slot, calibration)),
        _ => None,
      })
      .collect()
  }

  pub fn open_handles(&self) -> i64 {
    self.events().iter().fold(0, |open, event| match event {
      DeviceEvent::Opened(_) => open + 1,
      DeviceEvent::Closed(_) => open - 1,
      _ => open,
    })
  }
}

impl GyroBus for MockBus {
  type Device = MockDevice;

  fn open(&mut self, slot: usize) -> Result<MockDevice, DriverError> {
    let fitted = self.present.get(slot).copied().unwrap_or(false);
    let vanished = self.vanish.contains(&slot) && self.opened.contains(&slot);

    if !fitted || vanished {
      return Err(DriverError::NotPresent(slot));
    }

    self.opened.insert(slot);
    self.events.lock().unwrap().push(DeviceEvent::Opened(slot));

    Ok(MockDevice {
      slot,
      fail_reset: self.fail_reset.contains(&slot),
      fail_apply: self.fail_apply.contains(&slot),
      events: self.events.clone(),
    })
  }

  fn mcu_unique_id(&self) -> [u32; 3] {
    MCU_UNIQUE_ID
  }
}

pub struct MockDevice {
  slot: usize,
  fail_reset: bool,
  fail_apply: bool,
  events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl GyroDevice for MockDevice {
  fn device_id(&self) -> DeviceId {
    mock_device_id(self.slot)
  }

  fn apply(&mut self, calibration: &GyroCalibration) -> Result<(), DriverError> {
    if self.fail_apply {
      return Err(DriverError::Rejected("apply"));
    }

    let event = DeviceEvent::Applied(self.slot, *calibration);
    self.events.lock().unwrap().push(event);
    Ok(())
  }

  fn reset(&mut self) -> Result<(), DriverError> {
    if self.fail_reset {
      return Err(DriverError::Rejected("reset"));
    }

    self.events.lock().unwrap().push(DeviceEvent::Reset(self.slot));
    Ok(())
  }
}

impl Drop for MockDevice {
  fn drop(&mut self) {
    self.events.lock().unwrap().push(DeviceEvent::Closed(self.slot));
  }
}

/// One wake of the scripted bus.
#[derive(Clone, Debug)]
pub enum Tick {
  /// Each listed slot publishes one sample.
  Publish(Vec<(usize, Vector)>),
  /// Nothing arrives before the timeout.
  Silence,
}

/// Sample bus that replays a fixed script, one tick per `wait_any`. Once the
/// script runs out every wait times out, unless an endless tick is set.
pub struct ScriptedSource {
  script: VecDeque<Tick>,
  endless: Option<Tick>,
  mailboxes: Vec<(usize, Weak<Mutex<Option<GyroSample>>>)>,
  pub waits: u32,
  pub silent_time: Duration,
}

impl ScriptedSource {
  pub fn new(script: Vec<Tick>) -> Self {
    Self {
      script: script.into(),
      endless: None,
      mailboxes: Vec::new(),
      waits: 0,
      silent_time: Duration::ZERO,
    }
  }

  /// Tick `i` publishes `streams[s][i]` for every slot `s` whose stream is
  /// long enough.
  pub fn from_streams(streams: &[(usize, Vec<Vector>)]) -> Self {
    let ticks = streams.iter().map(|(_, samples)| samples.len()).max();

    let script = (0..ticks.unwrap_or(0))
      .map(|i| {
        Tick::Publish(
          streams
            .iter()
            .filter_map(|(slot, samples)| samples.get(i).map(|v| (*slot, *v)))
            .collect(),
        )
      })
      .collect();

    Self::new(script)
  }

  /// Every listed slot publishes `count` copies of the same reading.
  pub fn stationary(slots: &[(usize, Vector, usize)]) -> Self {
    let streams: Vec<_> = slots
      .iter()
      .map(|(slot, rate, count)| (*slot, vec![*rate; *count]))
      .collect();

    Self::from_streams(&streams)
  }

  /// Repeats `tick` forever once the script runs out.
  pub fn then_forever(mut self, tick: Tick) -> Self {
    self.endless = Some(tick);
    self
  }

  pub fn live_subscriptions(&self) -> usize {
    self
      .mailboxes
      .iter()
      .filter(|(_, mailbox)| mailbox.strong_count() > 0)
      .count()
  }
}

impl SampleSource for ScriptedSource {
  type Subscription = MockSubscription;

  fn subscribe(&mut self, slot: usize) -> MockSubscription {
    let pending = Arc::new(Mutex::new(None));
    self.mailboxes.push((slot, Arc::downgrade(&pending)));

    MockSubscription {
      pending,
      last: None,
    }
  }

  fn wait_any(
    &mut self,
    _subscriptions: &[MockSubscription],
    timeout: Duration,
  ) -> Wake {
    self.waits += 1;

    let tick = self.script.pop_front().or_else(|| self.endless.clone());

    match tick {
      Some(Tick::Publish(samples)) => {
        for (slot, rate) in samples {
          for (_, mailbox) in self.mailboxes.iter().filter(|(s, _)| *s == slot) {
            if let Some(mailbox) = mailbox.upgrade() {
              *mailbox.lock().unwrap() = Some(GyroSample::new(rate));
            }
          }
        }

        Wake::Ready
      }
      Some(Tick::Silence) | None => {
        self.silent_time += timeout;
        Wake::TimedOut
      }
    }
  }
}

pub struct MockSubscription {
  pending: Arc<Mutex<Option<GyroSample>>>,
  last: Option<GyroSample>,
}

impl Subscription for MockSubscription {
  fn has_new(&mut self) -> bool {
    self.pending.lock().unwrap().is_some()
  }

  fn read_latest(&mut self) -> Option<GyroSample> {
    if let Some(sample) = self.pending.lock().unwrap().take() {
      self.last = Some(sample);
    }

    self.last
  }
}

pub struct MockParams {
  pub values: HashMap<String, ParamValue>,
  pub fail_set: HashSet<String>,
  pub fail_save: bool,
  /// Every name passed to `set`, in order, whether or not it succeeded.
  pub writes: Vec<String>,
  pub saves: u32,
}

impl MockParams {
  pub fn new() -> Self {
    Self {
      values: declared_params().into_iter().collect(),
      fail_set: HashSet::new(),
      fail_save: false,
      writes: Vec::new(),
      saves: 0,
    }
  }

  pub fn float(&self, name: &str) -> f32 {
    match self.values.get(name) {
      Some(ParamValue::Float(value)) => *value,
      other => panic!("{name} is not a float parameter: {other:?}"),
    }
  }

  pub fn wrote_gyro(&self, slot: usize) -> bool {
    let prefix = format!("CAL_GYRO{slot}_");
    self.writes.iter().any(|name| name.starts_with(&prefix))
  }
}

impl ParamStore for MockParams {
  fn get(&self, name: &str) -> Option<ParamValue> {
    self.values.get(name).copied()
  }

  fn set(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.writes.push(name.to_owned());

    if self.fail_set.contains(name) || !self.values.contains_key(name) {
      return Err(ParamError::Unknown(name.to_owned()));
    }

    self.values.insert(name.to_owned(), value);
    Ok(())
  }

  fn save(&mut self) -> Result<(), ParamError> {
    if self.fail_save {
      return Err(ParamError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "flash write failed",
      )));
    }

    self.saves += 1;
    Ok(())
  }
}

#[derive(Default)]
pub struct RecordingNotifier {
  pub notices: Vec<(Severity, CalMessage)>,
}

impl RecordingNotifier {
  pub fn last(&self) -> Option<&CalMessage> {
    self.notices.last().map(|(_, message)| message)
  }

  pub fn criticals(&self) -> Vec<CalMessage> {
    self
      .notices
      .iter()
      .filter(|(severity, _)| *severity == Severity::Critical)
      .map(|(_, message)| message.clone())
      .collect()
  }

  pub fn progress(&self) -> Vec<u8> {
    self
      .notices
      .iter()
      .filter_map(|(_, message)| match message {
        CalMessage::Progress(percent) => Some(*percent),
        _ => None,
      })
      .collect()
  }
}

impl Notifier for RecordingNotifier {
  fn info(&mut self, message: &CalMessage) {
    self.notices.push((Severity::Info, message.clone()));
  }

  fn critical(&mut self, message: &CalMessage) {
    self.notices.push((Severity::Critical, message.clone()));
  }
}

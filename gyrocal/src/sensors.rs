use common::comm::gyro::GyroSample;
use std::{
  sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
    Arc, Mutex,
  },
  time::Duration,
};

/// Outcome of waiting on a set of subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
  /// At least one subscription may have a new sample.
  Ready,
  /// Nothing was published before the timeout elapsed.
  TimedOut,
}

/// A subscription to one gyroscope's sample stream. Dropping it unsubscribes.
pub trait Subscription {
  /// Whether a sample has been published since the last `read_latest`.
  fn has_new(&mut self) -> bool;

  /// Takes the most recently published sample, marking it as seen. Returns
  /// `None` if nothing has ever been published.
  fn read_latest(&mut self) -> Option<GyroSample>;
}

/// The sensor data bus the calibration samples from.
pub trait SampleSource {
  type Subscription: Subscription;

  /// Subscribes to the samples of `slot`. Slots with no publisher can still be
  /// subscribed to; they simply never have anything new.
  fn subscribe(&mut self, slot: usize) -> Self::Subscription;

  /// Blocks until something is published to any of `subscriptions` or until
  /// `timeout` elapses.
  fn wait_any(
    &mut self,
    subscriptions: &[Self::Subscription],
    timeout: Duration,
  ) -> Wake;
}

#[derive(Default)]
struct Latest {
  sample: Option<GyroSample>,
  generation: u64,
}

#[derive(Default)]
struct Topic {
  latest: Mutex<Latest>,
  subscribers: AtomicUsize,
}

/// In-process sample bus. Every slot has a topic holding its latest sample;
/// publishers ring a shared doorbell so a single receiver can wait on all
/// slots at once.
pub struct SensorHub {
  topics: Vec<Arc<Topic>>,
  doorbell_tx: Sender<usize>,
  doorbell_rx: Receiver<usize>,
}

impl SensorHub {
  pub fn new(slots: usize) -> Self {
    let (doorbell_tx, doorbell_rx) = mpsc::channel();

    SensorHub {
      topics: (0..slots).map(|_| Arc::default()).collect(),
      doorbell_tx,
      doorbell_rx,
    }
  }

  fn topic(&mut self, slot: usize) -> Arc<Topic> {
    if slot >= self.topics.len() {
      self.topics.resize_with(slot + 1, Arc::default);
    }

    self.topics[slot].clone()
  }

  /// Creates a handle through which a sensor worker publishes samples for
  /// `slot`.
  pub fn publisher(&mut self, slot: usize) -> Publisher {
    Publisher {
      slot,
      topic: self.topic(slot),
      doorbell: self.doorbell_tx.clone(),
    }
  }

  /// Number of live subscriptions to `slot`.
  pub fn subscriber_count(&self, slot: usize) -> usize {
    self
      .topics
      .get(slot)
      .map(|topic| topic.subscribers.load(Ordering::Acquire))
      .unwrap_or(0)
  }
}

impl SampleSource for SensorHub {
  type Subscription = HubSubscription;

  fn subscribe(&mut self, slot: usize) -> HubSubscription {
    let topic = self.topic(slot);
    topic.subscribers.fetch_add(1, Ordering::AcqRel);

    // only samples published after subscribing count as new
    let seen = topic
      .latest
      .lock()
      .map(|latest| latest.generation)
      .unwrap_or(0);

    HubSubscription { topic, seen }
  }

  /// Wakes on a publish to any topic with a live subscriber, not only the
  /// ones in `_subscriptions`. Callers filter with `has_new`.
  fn wait_any(
    &mut self,
    _subscriptions: &[HubSubscription],
    timeout: Duration,
  ) -> Wake {
    match self.doorbell_rx.recv_timeout(timeout) {
      Ok(_) => {
        // one wake drains every ring queued so far
        while self.doorbell_rx.try_recv().is_ok() {}
        Wake::Ready
      }
      Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
      // the hub holds a sender itself, so this is unreachable in practice
      Err(RecvTimeoutError::Disconnected) => Wake::TimedOut,
    }
  }
}

/// Publishing end of one slot's topic.
#[derive(Clone)]
pub struct Publisher {
  slot: usize,
  topic: Arc<Topic>,
  doorbell: Sender<usize>,
}

impl Publisher {
  pub fn publish(&self, sample: GyroSample) {
    if let Ok(mut latest) = self.topic.latest.lock() {
      latest.sample = Some(sample);
      latest.generation += 1;
    }

    if self.topic.subscribers.load(Ordering::Acquire) > 0 {
      // the hub only goes away at shutdown
      let _ = self.doorbell.send(self.slot);
    }
  }
}

pub struct HubSubscription {
  topic: Arc<Topic>,
  seen: u64,
}

impl Subscription for HubSubscription {
  fn has_new(&mut self) -> bool {
    self
      .topic
      .latest
      .lock()
      .map(|latest| latest.generation != self.seen)
      .unwrap_or(false)
  }

  fn read_latest(&mut self) -> Option<GyroSample> {
    let latest = self.topic.latest.lock().ok()?;
    self.seen = latest.generation;
    latest.sample
  }
}

impl Drop for HubSubscription {
  fn drop(&mut self) {
    self.topic.subscribers.fetch_sub(1, Ordering::AcqRel);
  }
}

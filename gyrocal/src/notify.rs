use common::comm::cal::{CalMessage, Notice, Severity};
use jeflog::{fail, pass, task, warn};
use std::{
  io,
  net::{SocketAddr, ToSocketAddrs, UdpSocket},
  time::{SystemTime, UNIX_EPOCH},
};

/// Largest encoded notice. Free-form text is short, so this is generous.
const NOTICE_BUFFER_SIZE: usize = 512;

/// Where calibration notices go.
pub trait Notifier {
  fn info(&mut self, message: &CalMessage);

  fn critical(&mut self, message: &CalMessage);
}

/// Prints notices to the console.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn info(&mut self, message: &CalMessage) {
    log_notice(Severity::Info, message);
  }

  fn critical(&mut self, message: &CalMessage) {
    log_notice(Severity::Critical, message);
  }
}

fn log_notice(severity: Severity, message: &CalMessage) {
  match (severity, message) {
    (Severity::Critical, _) => fail!("{message}"),
    (_, CalMessage::Done) => pass!("{message}"),
    (_, CalMessage::Failed) => fail!("{message}"),
    (_, CalMessage::HoldStill) => warn!("{message}"),
    _ => task!("{message}"),
  }
}

/// Sends every notice to a ground station as a postcard-encoded [`Notice`],
/// echoing it to the console as well.
pub struct UdpNotifier {
  socket: UdpSocket,
  ground: SocketAddr,
}

impl UdpNotifier {
  pub fn new(ground: impl ToSocketAddrs) -> io::Result<Self> {
    let ground = ground
      .to_socket_addrs()?
      .find(|address| address.is_ipv4())
      .ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no IPv4 address for ground")
      })?;

    let socket = UdpSocket::bind(("0.0.0.0", 0))?;

    Ok(UdpNotifier { socket, ground })
  }

  fn send(&mut self, severity: Severity, message: &CalMessage) {
    log_notice(severity, message);

    let notice = Notice {
      severity,
      message: message.clone(),
      timestamp: unix_timestamp(),
    };

    let mut buffer = [0; NOTICE_BUFFER_SIZE];

    let packet = match postcard::to_slice(&notice, &mut buffer) {
      Ok(packet) => packet,
      Err(error) => {
        warn!("Failed to serialize calibration notice: {error}");
        return;
      }
    };

    if let Err(error) = self.socket.send_to(packet, self.ground) {
      warn!("Failed to send calibration notice to {}: {error}", self.ground);
    }
  }
}

impl Notifier for UdpNotifier {
  fn info(&mut self, message: &CalMessage) {
    self.send(Severity::Info, message);
  }

  fn critical(&mut self, message: &CalMessage) {
    self.send(Severity::Critical, message);
  }
}

fn unix_timestamp() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_secs_f64())
    .unwrap_or(0.0)
}

//! Event records read from the controller's host buffer.
//!
//! The device exposes a batch of fixed 8-byte records. Byte 0 carries the
//! validity sentinel in its low two bits together with the high halves of the
//! contact minor/major axes, byte 1 is the event id, and the remaining six
//! bytes are interpreted per event id. A batch is terminated by the first
//! record whose sentinel does not match; anything after that point is
//! undefined and ignored.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::fmt::warn;
use crate::reg::*;
use crate::{bus::Transport, Error, Ftm4};

/// One raw 8-byte event slot, with typed views constructed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
  bytes: [u8; EVENT_LEN],
}

/// Finger contact fields of an enter/motion/leave pointer event.
///
/// Coordinates are 12-bit on the wire and widened to `u16` here. The contact
/// ellipse axes are 6-bit values split across two fields: the low nibble
/// lives in the payload, the high two bits share byte 0 with the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FingerEvent {
  pub touch_id: u8,
  pub touch_type: u8,
  pub x: u16,
  pub y: u16,
  pub z: u8,
  pub minor: u8,
  pub major: u8,
}

/// Error or status report payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReportEvent {
  pub report_type: u8,
  pub info: [u8; 4],
}

/// Classified event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  ControllerReady,
  Enter(FingerEvent),
  Motion(FingerEvent),
  Leave(FingerEvent),
  Status(ReportEvent),
  Error(ReportEvent),
  Other(u8),
}

impl EventRecord {
  pub(crate) fn from_bytes(raw: &[u8]) -> Self {
    let mut bytes = [0u8; EVENT_LEN];
    bytes.copy_from_slice(&raw[..EVENT_LEN]);
    Self { bytes }
  }

  /// Whether the validity sentinel matches. Records past the first invalid
  /// one must not be interpreted.
  pub fn is_valid(&self) -> bool {
    self.bytes[0] & 0x3 == EVENT_MAGIC
  }

  pub fn id(&self) -> u8 {
    self.bytes[1]
  }

  pub fn kind(&self) -> EventKind {
    match self.id() {
      EVT_CONTROLLER_READY => EventKind::ControllerReady,
      EVT_ENTER_POINTER => EventKind::Enter(self.finger()),
      EVT_MOTION_POINTER => EventKind::Motion(self.finger()),
      EVT_LEAVE_POINTER => EventKind::Leave(self.finger()),
      EVT_STATUS_REPORT => EventKind::Status(self.report()),
      EVT_ERROR_REPORT => EventKind::Error(self.report()),
      id => EventKind::Other(id),
    }
  }

  fn finger(&self) -> FingerEvent {
    let b = &self.bytes;
    let major_high = (b[0] >> 2) & 0x3;
    let minor_high = (b[0] >> 4) & 0x3;
    FingerEvent {
      touch_type: b[2] & 0xF,
      touch_id: b[2] >> 4,
      x: u16::from(b[3]) | (u16::from(b[4] & 0xF) << 8),
      y: u16::from(b[4] >> 4) | (u16::from(b[5]) << 4),
      z: b[6],
      minor: (b[7] & 0xF) | (minor_high << 4),
      major: (b[7] >> 4) | (major_high << 4),
    }
  }

  fn report(&self) -> ReportEvent {
    let b = &self.bytes;
    ReportEvent { report_type: b[2], info: [b[3], b[4], b[5], b[6]] }
  }
}

impl<B, E, P, R, D> Ftm4<B, P, R, D>
where
  B: Transport<Error = E>,
  P: Wait + InputPin,
  R: OutputPin,
  D: DelayNs,
{
  /// Fetch the event batch and return the number of valid records.
  ///
  /// Scanning stops at the first record with a mismatched sentinel. Error
  /// reports are surfaced as structured diagnostics; all of them are
  /// non-fatal today, so processing continues with the rest of the batch.
  pub(crate) async fn read_all_events(&mut self) -> Result<usize, Error<E>> {
    let tx = [Opcode::ReadAllEvents.into()];
    self.read_response(&tx, EVENT_BATCH * EVENT_LEN).await?;

    let mut count = 0;
    while count < EVENT_BATCH {
      let event = self.event_at(count);
      if !event.is_valid() {
        break;
      }
      if let EventKind::Error(report) = event.kind() {
        warn!(
          "touchpad error report: type={=u8:x} info={=u32:x}",
          report.report_type,
          u32::from_be_bytes(report.info)
        );
      }
      count += 1;
    }
    Ok(count)
  }

  /// Typed view of slot `index` of the last fetched batch.
  pub(crate) fn event_at(&self, index: usize) -> EventRecord {
    EventRecord::from_bytes(&self.scratch[index * EVENT_LEN..])
  }

  /// Check the batch for a command-echo status report matching `cmd`.
  ///
  /// The device echoes back the first bytes of an executed command; only up
  /// to four bytes fit in the report.
  pub(crate) async fn check_command_echo(&mut self, cmd: &[u8]) -> Result<(), Error<E>> {
    let count = self.read_all_events().await?;
    for i in 0..count {
      if let EventKind::Status(report) = self.event_at(i).kind() {
        let n = cmd.len().min(4);
        if report.report_type == STATUS_CMD_ECHO && report.info[..n] == cmd[..n] {
          return Ok(());
        }
      }
    }
    Err(Error::CommandPending)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mock::*;

  #[test]
  fn finger_decode_unpacks_split_axes() {
    // x = 0x123, y = 0x456, minor = 0x15, major = 0x2A
    let raw = [
      EVENT_MAGIC | (0x2 << 2) | (0x1 << 4),
      EVT_ENTER_POINTER,
      0x71, // touch_id 7, touch_type 1
      0x23,
      0x61, // x high nibble 1, y low nibble 6
      0x45,
      200,
      0xA5, // minor low 5, major low A
    ];
    let event = EventRecord::from_bytes(&raw);
    assert!(event.is_valid());
    let finger = match event.kind() {
      EventKind::Enter(f) => f,
      other => panic!("unexpected kind {:?}", other),
    };
    assert_eq!(finger.touch_id, 7);
    assert_eq!(finger.touch_type, 1);
    assert_eq!(finger.x, 0x123);
    assert_eq!(finger.y, 0x456);
    assert_eq!(finger.z, 200);
    assert_eq!(finger.minor, 0x15);
    assert_eq!(finger.major, 0x2A);
  }

  #[test]
  fn invalid_magic_terminates_batch() {
    let mut batch = [0u8; EVENT_BATCH * EVENT_LEN];
    batch[..EVENT_LEN].copy_from_slice(&finger_record(EVT_ENTER_POINTER, 1, 100, 50, 10));
    batch[EVENT_LEN..2 * EVENT_LEN].copy_from_slice(&finger_record(EVT_LEAVE_POINTER, 3, 0, 0, 0));
    // third record: bad sentinel, followed by garbage that must be ignored
    batch[2 * EVENT_LEN] = 0x00;
    batch[3 * EVENT_LEN..4 * EVENT_LEN].copy_from_slice(&finger_record(EVT_ENTER_POINTER, 2, 7, 7, 7));

    let script = [Xfer { tx: &[0x87], rx: &batch, fail: false }];
    let mut tp = mock_driver(&script);
    let count = block_on(tp.read_all_events()).unwrap();
    assert_eq!(count, 2);
  }

  #[test]
  fn error_reports_are_nonfatal() {
    let mut batch = [0u8; EVENT_BATCH * EVENT_LEN];
    batch[..EVENT_LEN].copy_from_slice(&[EVENT_MAGIC, EVT_ERROR_REPORT, 0x21, 1, 2, 3, 4, 0]);
    batch[EVENT_LEN..2 * EVENT_LEN].copy_from_slice(&finger_record(EVT_MOTION_POINTER, 0, 5, 5, 5));

    let script = [Xfer { tx: &[0x87], rx: &batch, fail: false }];
    let mut tp = mock_driver(&script);
    assert_eq!(block_on(tp.read_all_events()).unwrap(), 2);
  }

  #[test]
  fn bus_failure_is_propagated() {
    let script = [Xfer { tx: &[0x87], rx: &[], fail: true }];
    let mut tp = mock_driver(&script);
    assert!(matches!(block_on(tp.read_all_events()), Err(Error::Bus(_))));
  }

  #[test]
  fn command_echo_matches_prefix() {
    let cmd = [0xC2, 0x00, 0x03];
    let mut batch = [0u8; EVENT_BATCH * EVENT_LEN];
    batch[..EVENT_LEN].copy_from_slice(&[EVENT_MAGIC, EVT_STATUS_REPORT, STATUS_CMD_ECHO, 0xC2, 0x00, 0x03, 0x00, 0]);

    let script = [Xfer { tx: &[0x87], rx: &batch, fail: false }];
    let mut tp = mock_driver(&script);
    block_on(tp.check_command_echo(&cmd)).unwrap();
  }

  #[test]
  fn missing_echo_reports_pending() {
    let batch = [0u8; EVENT_BATCH * EVENT_LEN];
    let script = [Xfer { tx: &[0x87], rx: &batch, fail: false }];
    let mut tp = mock_driver(&script);
    assert!(matches!(block_on(tp.check_command_echo(&[0xC2, 0x00, 0x03])), Err(Error::CommandPending)));
  }
}

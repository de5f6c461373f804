//! Touch report assembly from finger pointer events.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::event::{EventKind, EventRecord, FingerEvent};
use crate::reg::TOUCH_TYPE_INVALID;
use crate::{bus::Transport, Config, Error, Ftm4, SystemState};

/// Maximum number of finger slots in one report.
pub const MAX_FINGERS: usize = 5;

/// Timestamps are reported in units of 100 microseconds.
pub const TIMESTAMP_UNIT_US: u32 = 100;

/// One finger slot of a [`TouchReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Finger {
  pub id: u8,
  pub tip: bool,
  pub inrange: bool,
  pub x: u16,
  pub y: u16,
  /// 10-bit pressure.
  pub pressure: u16,
  /// 12-bit contact width.
  pub width: u16,
  /// 12-bit contact height.
  pub height: u16,
}

/// Finished touch report handed to the platform sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchReport {
  pub id: u8,
  pub button: bool,
  pub count: u8,
  /// Monotonic timestamp in [`TIMESTAMP_UNIT_US`] units.
  pub timestamp: u16,
  pub fingers: [Finger; MAX_FINGERS],
}

impl Default for TouchReport {
  fn default() -> Self {
    Self { id: 0x1, button: false, count: 0, timestamp: 0, fingers: [Finger::default(); MAX_FINGERS] }
  }
}

/// Platform sink receiving finished touch reports.
pub trait ReportSink {
  fn report(&mut self, report: &TouchReport);
}

/// Map a finger pointer event into report slot `index`.
///
/// Returns the index of the next free slot, i.e. `index + 1` when a finger
/// was added. Fingers beyond the report capacity are silently dropped, as
/// are slots the device marks with an invalid touch type. A leave event only
/// carries the contact id, never coordinates.
fn parse_finger(report: &mut TouchReport, event: &EventRecord, index: usize, config: &Config) -> usize {
  if index >= MAX_FINGERS {
    return index;
  }

  let fill = |slot: &mut Finger, finger: FingerEvent| {
    slot.tip = true;
    slot.inrange = true;
    slot.id = finger.touch_id;
    // z is an 8-bit value, pressure is 10 bits.
    slot.pressure = u16::from(finger.z) << 2;
    // the device reports 6-bit axes, width/height are 12 bits
    slot.width = u16::from(finger.minor) << 6;
    slot.height = u16::from(finger.major) << 6;
    slot.x = config.logical_max_x - finger.x;
    slot.y = config.logical_max_y - finger.y;
  };

  match event.kind() {
    EventKind::Enter(finger) | EventKind::Motion(finger) => {
      if finger.touch_type == TOUCH_TYPE_INVALID {
        return index;
      }
      fill(&mut report.fingers[index], finger);
    }
    EventKind::Leave(finger) => {
      if finger.touch_type == TOUCH_TYPE_INVALID {
        return index;
      }
      report.fingers[index].id = finger.touch_id;
    }
    _ => return index,
  }
  index + 1
}

impl<B, E, P, R, D> Ftm4<B, P, R, D>
where
  B: Transport<Error = E>,
  P: Wait + InputPin,
  R: OutputPin,
  D: DelayNs,
{
  /// Build a touch report from the pending events and hand it to `sink`.
  ///
  /// Reads the host buffer header first to pick up a dome switch change,
  /// then drains the event batch. When neither a finger event nor a dome
  /// switch change occurred the call is a no-op, so the host is not flooded
  /// with empty reports.
  pub(crate) async fn write_hid_report<S: ReportSink>(&mut self, sink: &mut S) -> Result<(), Error<E>> {
    let header = self.read_host_buffer_header().await?;

    let mut dome_switch_changed = false;
    if header.dome_switch_changed {
      // The level from the device is inverted: 0 = pressed, 1 = released.
      let level = if header.dome_switch_level { SystemState::empty() } else { SystemState::DOME_SWITCH_LEVEL };
      self.state.set_bits(level, SystemState::DOME_SWITCH_LEVEL);
      dome_switch_changed = true;
    }

    let count = self.read_all_events().await?;

    let mut report = TouchReport::default();
    let mut fingers = 0;
    for i in 0..count {
      let event = self.event_at(i);
      match event.kind() {
        EventKind::Enter(_) | EventKind::Motion(_) | EventKind::Leave(_) => {
          fingers = parse_finger(&mut report, &event, fingers, &self.config);
        }
        _ => {}
      }
    }

    if fingers == 0 && !dome_switch_changed {
      // nothing changed
      return Ok(());
    }

    report.button = self.state.contains(SystemState::DOME_SWITCH_LEVEL);
    report.count = fingers as u8;
    report.timestamp = (self.irq_timestamp / TIMESTAMP_UNIT_US) as u16;
    sink.report(&report);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mock::*;
  use crate::reg::*;

  #[test]
  fn enter_then_leave_maps_two_slots() {
    let header = [0x00, 0x00, 0x00, 0x00]; // dome switch unchanged
    let mut batch = [0u8; EVENT_BATCH * EVENT_LEN];
    batch[..EVENT_LEN].copy_from_slice(&finger_record(EVT_ENTER_POINTER, 0, 100, 50, 10));
    batch[EVENT_LEN..2 * EVENT_LEN].copy_from_slice(&finger_record(EVT_LEAVE_POINTER, 3, 0, 0, 0));

    let script = [
      Xfer { tx: &[0xB7, 0x00, 0x00], rx: &header, fail: false },
      Xfer { tx: &[0x87], rx: &batch, fail: false },
    ];
    let mut tp = mock_driver(&script);
    tp.irq_timestamp = 123_400;
    let mut sink = CapturedReports::default();
    block_on(tp.write_hid_report(&mut sink)).unwrap();

    let report = sink.last.expect("report emitted");
    assert_eq!(report.count, 2);
    assert!(report.fingers[0].tip);
    assert!(report.fingers[0].inrange);
    assert_eq!(report.fingers[0].x, tp.config.logical_max_x - 100);
    assert_eq!(report.fingers[0].y, tp.config.logical_max_y - 50);
    assert_eq!(report.fingers[0].pressure, 10 << 2);
    // leave carries only the id
    assert_eq!(report.fingers[1].id, 3);
    assert!(!report.fingers[1].tip);
    assert_eq!(report.timestamp, (123_400 / crate::TIMESTAMP_UNIT_US) as u16);
  }

  #[test]
  fn no_events_and_no_dome_change_is_a_noop() {
    let header = [0x00, 0x00, 0x00, 0x00];
    let batch = [0u8; EVENT_BATCH * EVENT_LEN];
    let script = [
      Xfer { tx: &[0xB7, 0x00, 0x00], rx: &header, fail: false },
      Xfer { tx: &[0x87], rx: &batch, fail: false },
    ];
    let mut tp = mock_driver(&script);
    let mut sink = CapturedReports::default();
    block_on(tp.write_hid_report(&mut sink)).unwrap();
    assert!(sink.last.is_none());
  }

  #[test]
  fn dome_switch_level_is_inverted_into_button() {
    // flags bit 2 = dome switch changed, byte 2 bit 0 = raw level (0 = pressed)
    let header = [0x04, 0x00, 0x00, 0x00];
    let batch = [0u8; EVENT_BATCH * EVENT_LEN];
    let script = [
      Xfer { tx: &[0xB7, 0x00, 0x00], rx: &header, fail: false },
      Xfer { tx: &[0x87], rx: &batch, fail: false },
    ];
    let mut tp = mock_driver(&script);
    let mut sink = CapturedReports::default();
    block_on(tp.write_hid_report(&mut sink)).unwrap();
    let report = sink.last.expect("dome change alone emits a report");
    assert!(report.button);
    assert_eq!(report.count, 0);
  }

  #[test]
  fn fingers_beyond_capacity_are_dropped() {
    let header = [0x00, 0x00, 0x00, 0x00];
    let mut batch = [0u8; EVENT_BATCH * EVENT_LEN];
    for i in 0..7 {
      batch[i * EVENT_LEN..(i + 1) * EVENT_LEN]
        .copy_from_slice(&finger_record(EVT_ENTER_POINTER, i as u8, 10 + i as u16, 10, 1));
    }
    let script = [
      Xfer { tx: &[0xB7, 0x00, 0x00], rx: &header, fail: false },
      Xfer { tx: &[0x87], rx: &batch, fail: false },
    ];
    let mut tp = mock_driver(&script);
    let mut sink = CapturedReports::default();
    block_on(tp.write_hid_report(&mut sink)).unwrap();
    assert_eq!(sink.last.expect("report").count, MAX_FINGERS as u8);
  }

  #[test]
  fn invalid_touch_type_consumes_no_slot() {
    let mut report = TouchReport::default();
    let mut raw = finger_record(EVT_ENTER_POINTER, 1, 5, 5, 5);
    raw[2] = (1 << 4) | TOUCH_TYPE_INVALID;
    let event = EventRecord::from_bytes(&raw);
    let config = Config::default();
    assert_eq!(parse_finger(&mut report, &event, 0, &config), 0);
  }
}

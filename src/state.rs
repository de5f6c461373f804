//! System state bookkeeping and the mode-change state machine.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::fmt::debug;
use crate::reg::*;
use crate::{bus::Transport, Error, Ftm4};

/// Bitmask of the independent mode flags the driver tracks.
///
/// The in-memory copy always equals the device's last acknowledged
/// configuration: [`Ftm4::update_system_state`] only commits bits after the
/// corresponding command has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemState(u8);

impl SystemState {
  /// Raw heatmap frames are printed on the debug console instead of being
  /// streamed out. Local flag, never sent to the device.
  pub const DEBUG: Self = Self(1 << 0);
  /// Heatmap capture enabled.
  pub const HEAT_MAP: Self = Self(1 << 1);
  /// Dome switch reporting enabled.
  pub const DOME_SWITCH: Self = Self(1 << 2);
  /// Active (scanning) mode.
  pub const ACTIVE: Self = Self(1 << 3);
  /// Last dome switch level, already un-inverted (set = pressed).
  pub const DOME_SWITCH_LEVEL: Self = Self(1 << 4);

  pub const fn empty() -> Self {
    Self(0)
  }

  pub const fn contains(self, flags: Self) -> bool {
    self.0 & flags.0 == flags.0
  }

  pub(crate) const fn masked(self, mask: Self) -> u8 {
    self.0 & mask.0
  }

  /// Replace the bits selected by `mask` with those from `value`.
  pub(crate) fn set_bits(&mut self, value: Self, mask: Self) {
    self.0 = (self.0 & !mask.0) | (value.0 & mask.0);
  }
}

impl core::ops::BitOr for SystemState {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

impl core::ops::Not for SystemState {
  type Output = Self;

  fn not(self) -> Self {
    Self(!self.0)
  }
}

impl<B, E, P, R, D> Ftm4<B, P, R, D>
where
  B: Transport<Error = E>,
  P: Wait + InputPin,
  R: OutputPin,
  D: DelayNs,
{
  /// Current mode flags as last acknowledged by the device.
  pub fn system_state(&self) -> SystemState {
    self.state
  }

  /// Transition the flags selected by `mask` to their values in `target`.
  ///
  /// Bits outside `mask` are preserved. Each flag group is diffed against
  /// the current state and its device command is only emitted when the
  /// group actually changed; an unchanged group costs no bus traffic. A
  /// failing command aborts the whole update without committing the failing
  /// group, but groups committed earlier in the same call stay committed.
  pub(crate) async fn update_system_state(&mut self, target: SystemState, mask: SystemState) -> Result<(), Error<E>> {
    let mut target = target;
    target.set_bits(self.state, !mask);
    let mut need_locked_scan = false;

    let group = SystemState::DEBUG;
    if target.masked(group) != self.state.masked(group) {
      self.state.set_bits(target, group);
    }

    let group = SystemState::HEAT_MAP | SystemState::DOME_SWITCH;
    if target.masked(group) != self.state.masked(group) {
      let mut bits = 0u8;
      if target.contains(SystemState::HEAT_MAP) {
        bits |= FEATURE_BIT_HEAT_MAP;
        need_locked_scan = true;
      }
      if target.contains(SystemState::DOME_SWITCH) {
        bits |= FEATURE_BIT_DOME_SWITCH;
      }
      self.command(&[Opcode::FeatureSelect.into(), FEATURE_TOUCH_MODES, bits]).await?;
      self.state.set_bits(target, group);
    }

    let group = SystemState::ACTIVE;
    if target.masked(group) != self.state.masked(group) {
      let enable = target.contains(SystemState::ACTIVE) as u8;
      debug!("multi-touch scan: {=u8}", enable);
      self.command(&[Opcode::ScanModeSelect.into(), SCAN_MODE_ACTIVE, enable]).await?;
      self.state.set_bits(target, group);
    }

    // Heatmap capture needs a fixed scan rate; the default adaptive mode
    // would drop scan cycles.
    if need_locked_scan {
      self.command(&[Opcode::ScanModeSelect.into(), SCAN_MODE_LOCKED, 0x00]).await?;
    }
    Ok(())
  }

  /// Enter active scanning with the dome switch reported, acknowledge any
  /// stale host buffer content, and enable the touch interrupt.
  pub async fn start_scan(&mut self) -> Result<(), Error<E>> {
    let state = SystemState::ACTIVE | SystemState::DOME_SWITCH;
    self.update_system_state(state, state).await?;
    self.send_ack().await?;
    self.enable_interrupt(true).await
  }

  /// Leave active scanning and mute the touch interrupt.
  pub async fn stop_scan(&mut self) -> Result<(), Error<E>> {
    let ret = self.update_system_state(SystemState::empty(), SystemState::ACTIVE).await;
    self.enable_interrupt(false).await?;
    ret
  }

  /// Gate event generation on the device side. The caller is responsible
  /// for masking/unmasking its own interrupt line accordingly.
  pub async fn enable_interrupt(&mut self, enable: bool) -> Result<(), Error<E>> {
    self.command(&[Opcode::SystemCommand.into(), SYSCMD_INTERRUPT, enable as u8]).await
  }

  /// Acknowledge the host buffer so the device re-arms its interrupt line.
  pub(crate) async fn send_ack(&mut self) -> Result<(), Error<E>> {
    self.command(&[Opcode::HostBufferAck.into()]).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mock::*;

  #[test]
  fn unchanged_state_is_silent() {
    let script = [
      Xfer { tx: &[0xC1, 0x05, 0x02], rx: &[], fail: false },
      Xfer { tx: &[0xC0, 0x00, 0x01], rx: &[], fail: false },
    ];
    let mut tp = mock_driver(&script);
    let target = SystemState::ACTIVE | SystemState::DOME_SWITCH;
    block_on(tp.update_system_state(target, target)).unwrap();
    // Second call with the same target: no commands at all.
    block_on(tp.update_system_state(target, target)).unwrap();
    assert_eq!(tp.system_state(), target);
  }

  #[test]
  fn heat_map_enable_chases_locked_scan_mode() {
    let script = [
      Xfer { tx: &[0xC1, 0x05, 0x03], rx: &[], fail: false },
      Xfer { tx: &[0xC0, 0x00, 0x01], rx: &[], fail: false },
      Xfer { tx: &[0xC0, 0x03, 0x00], rx: &[], fail: false },
    ];
    let mut tp = mock_driver(&script);
    let target = SystemState::HEAT_MAP | SystemState::DOME_SWITCH | SystemState::ACTIVE;
    block_on(tp.update_system_state(target, target)).unwrap();
    assert!(tp.system_state().contains(SystemState::HEAT_MAP));
  }

  #[test]
  fn heat_map_disable_sends_no_locked_scan_mode() {
    let script = [
      Xfer { tx: &[0xC1, 0x05, 0x03], rx: &[], fail: false },
      Xfer { tx: &[0xC0, 0x00, 0x01], rx: &[], fail: false },
      Xfer { tx: &[0xC0, 0x03, 0x00], rx: &[], fail: false },
      // disable: only the feature select, no locked-scan chase
      Xfer { tx: &[0xC1, 0x05, 0x02], rx: &[], fail: false },
    ];
    let mut tp = mock_driver(&script);
    let on = SystemState::HEAT_MAP | SystemState::DOME_SWITCH | SystemState::ACTIVE;
    block_on(tp.update_system_state(on, on)).unwrap();
    block_on(tp.update_system_state(SystemState::empty(), SystemState::HEAT_MAP)).unwrap();
    assert!(!tp.system_state().contains(SystemState::HEAT_MAP));
    assert!(tp.system_state().contains(SystemState::ACTIVE));
  }

  #[test]
  fn failed_group_is_not_committed() {
    let script = [Xfer { tx: &[0xC1, 0x05, 0x02], rx: &[], fail: true }];
    let mut tp = mock_driver(&script);
    let target = SystemState::DOME_SWITCH | SystemState::ACTIVE;
    let result = block_on(tp.update_system_state(target, target));
    assert!(matches!(result, Err(Error::Bus(_))));
    // The dome switch group failed before commit; the active group was
    // never attempted.
    assert_eq!(tp.system_state(), SystemState::empty());
  }

  #[test]
  fn bits_outside_mask_are_preserved() {
    let script = [Xfer { tx: &[0xC0, 0x00, 0x01], rx: &[], fail: false }];
    let mut tp = mock_driver(&script);
    tp.state.set_bits(SystemState::DOME_SWITCH_LEVEL, SystemState::DOME_SWITCH_LEVEL);
    block_on(tp.update_system_state(SystemState::ACTIVE, SystemState::ACTIVE)).unwrap();
    assert!(tp.system_state().contains(SystemState::DOME_SWITCH_LEVEL));
    assert!(tp.system_state().contains(SystemState::ACTIVE));
  }
}

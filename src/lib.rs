#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, `no_std` driver for ST FingerTipS FTM4-class touch controllers
//! behind a SPI host interface.
//!
//! The controller reports touch activity as batches of fixed-size event
//! records and can additionally stream raw capacitance heatmap frames. This
//! crate owns the whole host side of that protocol:
//!
//! - Event parsing and HID-style touch report assembly, handed to a
//!   platform [`ReportSink`]
//! - Scan mode and feature selection through a small diff-based state
//!   machine, so mode changes cost the minimum amount of bus traffic
//! - Double-buffered heatmap capture with resumable packet streaming over an
//!   [`IsoSink`] (typically an isochronous USB endpoint)
//! - The full firmware update sequence: erase, staged DMA writes and panel
//!   reinitialization
//! - `embedded-hal` / `embedded-hal-async` 1.0 traits throughout, so the
//!   driver works across MCU families
//!
//! The driving task owns the [`Ftm4`] context; the touch interrupt handler
//! only records a timestamp and wakes the task. A typical loop:
//!
//! ```no_run
//! use ftm4::{Config, Ftm4, ReportSink, SpiTransport};
//!
//! async fn run<S, P, R, D, K>(spi: S, irq: P, reset: R, delay: D, mut sink: K) -> !
//! where
//!   S: embedded_hal_async::spi::SpiDevice<u8>,
//!   P: embedded_hal_async::digital::Wait + embedded_hal::digital::InputPin,
//!   R: embedded_hal::digital::OutputPin,
//!   D: embedded_hal_async::delay::DelayNs,
//!   K: ReportSink,
//! {
//!   let mut touchpad = Ftm4::new(SpiTransport::new(spi), irq, reset, delay, Config::default());
//!   touchpad.init().await.unwrap();
//!   loop {
//!     touchpad.wait_for_touch().await.unwrap();
//!     let timestamp_us = 0; // from the interrupt handler
//!     touchpad.service(timestamp_us, &mut sink).await.unwrap();
//!   }
//! }
//! ```

mod bus;
mod event;
mod flash;
mod fmt;
mod heatmap;
mod host_data;
mod reg;
mod report;
mod state;

#[cfg(test)]
mod mock;

pub use bus::{SpiTransport, Transport};
pub use event::{EventKind, EventRecord, FingerEvent, ReportEvent};
pub use heatmap::IsoSink;
pub use host_data::{SystemInfo, TouchpadInfo};
pub use report::{Finger, ReportSink, TouchReport, MAX_FINGERS, TIMESTAMP_UNIT_US};
pub use state::SystemState;

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::fmt::info;
use crate::heatmap::FrameBuffers;
use crate::reg::SCRATCH_LEN;

const RESET_RETRIES: u32 = 100;
const RESET_POLL_MS: u32 = 10;

/// Driver error, generic over the bus error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// Transport failure, propagated verbatim.
  Bus(E),
  /// A bounded polling loop exhausted its retry budget.
  Timeout,
  /// Invalid argument from the caller (alignment, length, range).
  InvalidParam,
  /// Device data failed validation (header magic, unknown firmware).
  InvalidHeader,
  /// The device has not confirmed the last command yet.
  CommandPending,
  /// A captured heatmap frame was all zeroes and was dropped.
  EmptyFrame,
}

/// Wire encoding of one heatmap pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PixelFormat {
  /// One byte per pixel, copied verbatim.
  Byte,
  /// Two little-endian bytes per pixel, downscaled to 8 bits.
  Word { significant_bits: u8 },
}

/// Board-specific parameters of the attached panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
  /// Reported X coordinates run from this value down to zero.
  pub logical_max_x: u16,
  /// Reported Y coordinates run from this value down to zero.
  pub logical_max_y: u16,
  pub pixel_format: PixelFormat,
  /// Heatmap pixels below this value are squashed to zero.
  pub heatmap_threshold: u8,
}

impl Config {
  pub const fn new() -> Self {
    Self {
      logical_max_x: 2644,
      logical_max_y: 1440,
      pixel_format: PixelFormat::Word { significant_bits: 10 },
      heatmap_threshold: 10,
    }
  }

  pub const fn with_logical_max(mut self, x: u16, y: u16) -> Self {
    self.logical_max_x = x;
    self.logical_max_y = y;
    self
  }

  pub const fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
    self.pixel_format = pixel_format;
    self
  }

  pub const fn with_heatmap_threshold(mut self, threshold: u8) -> Self {
    self.heatmap_threshold = threshold;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new()
  }
}

/// Host power state relayed to the touchpad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerEvent {
  On,
  Off,
}

/// Driver context for one FTM4 touch controller.
///
/// Owned by a single driving task; every bus transaction, frame capture and
/// packet transmit happens on that task. See the crate docs for the loop.
pub struct Ftm4<B, P, R, D> {
  bus: B,
  irq: P,
  reset: R,
  delay: D,
  config: Config,
  state: SystemState,
  info: Option<SystemInfo>,
  irq_timestamp: u32,
  scratch: [u8; SCRATCH_LEN],
  frames: FrameBuffers,
}

impl<B, E, P, R, D> Ftm4<B, P, R, D>
where
  B: Transport<Error = E>,
  P: Wait + InputPin,
  R: OutputPin,
  D: DelayNs,
{
  pub fn new(bus: B, irq: P, reset: R, delay: D, config: Config) -> Self {
    Self {
      bus,
      irq,
      reset,
      delay,
      config,
      state: SystemState::empty(),
      info: None,
      irq_timestamp: 0,
      scratch: [0; SCRATCH_LEN],
      frames: FrameBuffers::new(),
    }
  }

  /// Consume the driver and return the bus and pins.
  pub fn release(self) -> (B, P, R) {
    (self.bus, self.irq, self.reset)
  }

  /// Bring the controller up: hardware reset, identification, scan start.
  ///
  /// On boot the firmware stages its system info block on its own, so no
  /// reload is requested here.
  pub async fn init(&mut self) -> Result<(), Error<E>> {
    self.reset_controller().await?;
    self.read_system_info(false).await?;
    self.state = SystemState::empty();
    self.start_scan().await
  }

  /// Pulse the reset line and wait for the controller-ready event.
  pub(crate) async fn reset_controller(&mut self) -> Result<(), Error<E>> {
    self.reset.set_low().map_err(|_| unreachable!())?;
    self.delay.delay_ms(RESET_POLL_MS).await;
    self.reset.set_high().map_err(|_| unreachable!())?;

    for _ in 0..RESET_RETRIES {
      let count = self.read_all_events().await?;
      for i in 0..count {
        if matches!(self.event_at(i).kind(), EventKind::ControllerReady) {
          info!("touchpad ready");
          return Ok(());
        }
      }
      self.delay.delay_ms(RESET_POLL_MS).await;
    }
    Err(Error::Timeout)
  }

  /// Suspend until the touch interrupt line goes low.
  pub async fn wait_for_touch(&mut self) -> Result<(), Error<E>> {
    self.irq.wait_for_low().await.map_err(|_| unreachable!())
  }

  /// Driving-task body: drain the device for as long as the interrupt line
  /// stays asserted.
  ///
  /// `timestamp_us` is the time the interrupt fired, captured by the
  /// handler; it ends up in the touch reports built from this batch.
  pub async fn service<S: ReportSink>(&mut self, timestamp_us: u32, sink: &mut S) -> Result<(), Error<E>> {
    self.irq_timestamp = timestamp_us;
    while self.irq.is_low().map_err(|_| unreachable!())? {
      self.read_report(sink).await?;
    }
    Ok(())
  }

  /// Handle one interrupt cycle: capture a heatmap frame or build a touch
  /// report, then acknowledge the host buffer.
  async fn read_report<S: ReportSink>(&mut self, sink: &mut S) -> Result<(), Error<E>> {
    let ret = if self.state.contains(SystemState::HEAT_MAP) {
      if self.frames.can_capture() {
        match self.capture_frame().await {
          Ok(()) => {
            self.frames.finish_capture();
            if self.state.contains(SystemState::DEBUG) {
              self.print_frame();
              self.frames.advance_read();
            }
            Ok(())
          }
          // an all-zero frame is not worth a slot
          Err(Error::EmptyFrame) => Ok(()),
          Err(e) => Err(e),
        }
      } else {
        Ok(())
      }
    } else {
      self.write_hid_report(sink).await
    };
    // The ack re-arms the device interrupt line, so it goes out even after
    // a failed report.
    self.send_ack().await?;
    ret
  }

  /// Relay a host power transition to the touchpad.
  pub async fn power_event(&mut self, event: PowerEvent) -> Result<(), Error<E>> {
    match event {
      PowerEvent::On => self.start_scan().await,
      PowerEvent::Off => self.stop_scan().await,
    }
  }

  /// Re-read the identification block from the device. Console entry point.
  pub async fn version(&mut self) -> Result<SystemInfo, Error<E>> {
    self.read_system_info(true).await
  }
}

//! Raw heatmap capture and the double-buffered streaming pipeline.
//!
//! Frames are captured from the device into one of two slots while the other
//! slot drains towards the stream sink in packet-sized pieces. The capture
//! side stalls when it is a full frame ahead of the sender, so a slot is
//! never overwritten mid-transmit.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::fmt::{info, warn};
use crate::reg::*;
use crate::{bus::Transport, Error, Ftm4, PixelFormat, SystemState};

/// A streamed frame: one flags byte followed by the scaled pixels.
pub(crate) const FRAME_LEN: usize = 1 + HEAT_MAP_PIXELS;

/// First packet of a frame.
const HEADER_FLAG_NEW_FRAME: u8 = 1 << 0;

const SEND_RETRIES: u32 = 16;
const SEND_RETRY_MS: u32 = 100;

/// Stream sink for heatmap packets, typically an isochronous USB endpoint.
///
/// `write` may accept fewer bytes than offered; the pipeline resumes from
/// where it left off on the next call. `flush` marks the end of a packet.
pub trait IsoSink {
  type Error;

  fn write(&mut self, data: &[u8], flush: bool) -> Result<usize, Self::Error>;
}

/// Double-buffered frame storage plus transmit cursor.
///
/// `write_index` and `read_index` are free-running wrapping counters; their
/// difference is the number of captured frames not yet fully sent.
pub(crate) struct FrameBuffers {
  frames: [[u8; FRAME_LEN]; 2],
  write_index: u32,
  read_index: u32,
  tx_offset: usize,
  packet_index: u8,
}

impl FrameBuffers {
  pub(crate) const fn new() -> Self {
    Self { frames: [[0; FRAME_LEN]; 2], write_index: 0, read_index: 0, tx_offset: 0, packet_index: 0 }
  }

  /// With two slots, capture may run at most one frame ahead of transmit.
  pub(crate) fn can_capture(&self) -> bool {
    self.write_index.wrapping_sub(self.read_index) <= 1
  }

  fn pending(&self) -> bool {
    self.write_index != self.read_index
  }

  fn write_slot(&mut self) -> &mut [u8; FRAME_LEN] {
    &mut self.frames[(self.write_index & 1) as usize]
  }

  fn read_slot(&self) -> &[u8; FRAME_LEN] {
    &self.frames[(self.read_index & 1) as usize]
  }

  pub(crate) fn finish_capture(&mut self) {
    self.write_index = self.write_index.wrapping_add(1);
  }

  pub(crate) fn advance_read(&mut self) {
    self.read_index = self.read_index.wrapping_add(1);
  }

  /// Push the next piece of the current frame into `sink`.
  ///
  /// Returns `false` on a retriable failure (sink error or a header that
  /// did not fit); the transmit cursor only moves for bytes the sink
  /// actually took, so a later call resumes cleanly.
  fn send_packet<S: IsoSink>(&mut self, sink: &mut S) -> bool {
    let mut flags = 0;
    if self.tx_offset == 0 {
      flags |= HEADER_FLAG_NEW_FRAME;
    }
    let header = [self.packet_index, flags];
    match sink.write(&header, false) {
      Ok(n) if n == header.len() => {}
      _ => return false,
    }
    self.packet_index = self.packet_index.wrapping_add(1);

    let frame = &self.frames[(self.read_index & 1) as usize];
    match sink.write(&frame[self.tx_offset..], true) {
      Ok(n) => {
        self.tx_offset += n;
        if self.tx_offset == FRAME_LEN {
          self.tx_offset = 0;
          self.advance_read();
        }
        true
      }
      Err(_) => false,
    }
  }
}

/// Scale 16-bit little-endian pixels down to 8 bits.
///
/// Negative values clamp to zero, values past 8 significant bits saturate at
/// 255, and anything below `threshold` is squashed to keep the stream
/// compressible. Returns `false` when every output pixel ended up zero.
fn convert_word_pixels(src: &[u8], dest: &mut [u8], significant_bits: u8, threshold: u8) -> bool {
  let shift = significant_bits.saturating_sub(8);
  let mut max_value = 0u8;
  for (i, out) in dest.iter_mut().enumerate() {
    let v = i16::from_le_bytes([src[2 * i], src[2 * i + 1]]);
    let v = (v.max(0) as u16 >> shift).min(255) as u8;
    let v = if v < threshold { 0 } else { v };
    *out = v;
    max_value |= v;
  }
  max_value != 0
}

impl<B, E, P, R, D> Ftm4<B, P, R, D>
where
  B: Transport<Error = E>,
  P: Wait + InputPin,
  R: OutputPin,
  D: DelayNs,
{
  fn heat_map_addr(&self) -> Result<u16, Error<E>> {
    match self.info {
      Some(info) if info.release_info >= 3 => Ok(HEAT_MAP_ADDR_V3),
      Some(info) if info.release_info == 1 => Ok(HEAT_MAP_ADDR_V1),
      _ => Err(Error::InvalidHeader),
    }
  }

  /// Whether a captured frame is waiting to be streamed.
  pub fn frame_pending(&self) -> bool {
    self.frames.pending()
  }

  /// Read one raw frame into the current write slot.
  ///
  /// An all-zero frame after thresholding is reported as
  /// [`Error::EmptyFrame`] and the slot is not committed.
  pub(crate) async fn capture_frame(&mut self) -> Result<(), Error<E>> {
    let addr = self.heat_map_addr()?;
    let tx = [Opcode::ReadSpiHostBuffer.into(), (addr >> 8) as u8, addr as u8];

    match self.config.pixel_format {
      PixelFormat::Byte => {
        self.read_response(&tx, HEAT_MAP_PIXELS).await?;
        let frame = self.frames.write_slot();
        // TODO: set the button bit here once the dome switch level is
        // latched per frame.
        frame[0] = 0;
        frame[1..].copy_from_slice(&self.scratch[..HEAT_MAP_PIXELS]);
      }
      PixelFormat::Word { significant_bits } => {
        self.read_response(&tx, HEAT_MAP_PIXELS * 2).await?;
        let threshold = self.config.heatmap_threshold;
        let frame = self.frames.write_slot();
        frame[0] = 0;
        if !convert_word_pixels(&self.scratch[..HEAT_MAP_PIXELS * 2], &mut frame[1..], significant_bits, threshold) {
          return Err(Error::EmptyFrame);
        }
      }
    }
    Ok(())
  }

  /// Stream the next piece of the pending frame to `sink`.
  ///
  /// Returns `Ok(false)` when there is nothing to send (no pending frame,
  /// or frames are being consumed by the debug renderer). A sink that keeps
  /// refusing data exhausts the retry budget and yields [`Error::Timeout`].
  pub async fn stream_packet<S: IsoSink>(&mut self, sink: &mut S) -> Result<bool, Error<E>> {
    if self.state.contains(SystemState::DEBUG) || !self.frames.pending() {
      return Ok(false);
    }
    for _ in 0..SEND_RETRIES {
      if self.frames.send_packet(sink) {
        return Ok(true);
      }
      warn!("heatmap packet refused, retrying");
      self.delay.delay_ms(SEND_RETRY_MS).await;
    }
    Err(Error::Timeout)
  }

  /// Render the pending frame as ASCII art on the debug console.
  ///
  /// Frames arrive at panel scan rate; only every 37th is printed to keep
  /// the console readable (roughly four frames per second).
  pub(crate) fn print_frame(&self) {
    if !self.frames.pending() {
      return;
    }
    if self.frames.read_index % 37 != 0 {
      return;
    }
    let frame = self.frames.read_slot();
    info!("==============");
    for row in 0..HEAT_MAP_ROWS {
      let mut line = [b' '; HEAT_MAP_COLS];
      for (col, cell) in line.iter_mut().enumerate() {
        // mirror X so the printout matches the physical orientation
        let v = frame[1 + row * HEAT_MAP_COLS + (HEAT_MAP_COLS - col - 1)];
        if v > 0 {
          *cell = b'0' + (u16::from(v) * 10 / 256) as u8;
        }
      }
      info!("{=[u8]:a}", line.as_slice());
    }
    info!("==============");
  }

  /// Switch heatmap streaming on or off. Maps the stream transport's
  /// interface selection (e.g. a USB alternate setting).
  pub async fn set_streaming(&mut self, enable: bool) -> Result<(), Error<E>> {
    if enable {
      let state = SystemState::HEAT_MAP | SystemState::DOME_SWITCH | SystemState::ACTIVE;
      self.update_system_state(state, state).await
    } else {
      self.update_system_state(SystemState::empty(), SystemState::HEAT_MAP).await
    }
  }

  /// Console entry point: capture frames but render them locally instead of
  /// streaming them out.
  pub async fn debug_stream_enable(&mut self) -> Result<(), Error<E>> {
    self.state.set_bits(SystemState::DEBUG, SystemState::DEBUG);
    let state = SystemState::HEAT_MAP | SystemState::DOME_SWITCH | SystemState::ACTIVE;
    self.update_system_state(state, state).await
  }

  /// Console entry point: back to normal reporting.
  pub async fn debug_stream_disable(&mut self) -> Result<(), Error<E>> {
    self.state.set_bits(SystemState::empty(), SystemState::DEBUG);
    self.update_system_state(SystemState::empty(), SystemState::HEAT_MAP).await
  }
}

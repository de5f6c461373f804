//! Firmware update path: raw hardware register access, flash erase and the
//! staged DMA write sequence.
//!
//! The update host streams the image in chunk-aligned blocks. Each block is
//! staged into controller RAM in 32-byte transactions, then committed to
//! flash by the DMA engine one group at a time. The factory calibration
//! section of the image is never rewritten.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::fmt::{debug, info};
use crate::reg::*;
use crate::{bus::Transport, Error, Ftm4};

const PANEL_INIT_RETRIES: u32 = 50;
const PANEL_INIT_POLL_MS: u32 = 100;

impl<B, E, P, R, D> Ftm4<B, P, R, D>
where
  B: Transport<Error = E>,
  P: Wait + InputPin,
  R: OutputPin,
  D: DelayNs,
{
  async fn write_hw_reg8(&mut self, addr: u32, value: u8) -> Result<(), Error<E>> {
    let a = addr.to_be_bytes();
    self.command(&[Opcode::WriteHwReg.into(), a[0], a[1], a[2], a[3], value]).await
  }

  async fn write_hw_reg32(&mut self, addr: u32, value: u32) -> Result<(), Error<E>> {
    let a = addr.to_be_bytes();
    let v = value.to_le_bytes();
    self.command(&[Opcode::WriteHwReg.into(), a[0], a[1], a[2], a[3], v[0], v[1], v[2], v[3]]).await
  }

  /// Poll the busy bit of the status register `reg` (low byte of a
  /// `0x200000xx` address) until it clears.
  ///
  /// Individual failed reads are retried; only budget exhaustion is an
  /// error. Erase and DMA commits take up to several seconds.
  async fn wait_for_flash_ready(&mut self, reg: u8) -> Result<(), Error<E>> {
    let a = REG_STATUS_BASE.to_be_bytes();
    let tx = [Opcode::ReadHwReg.into(), a[0], a[1], a[2], reg];
    for _ in 0..FLASH_READY_RETRIES {
      if let Ok(rx) = self.read_response(&tx, 1).await {
        if rx[0] & FLASH_STATUS_BUSY == 0 {
          return Ok(());
        }
      }
      self.delay.delay_ms(FLASH_READY_POLL_MS).await;
    }
    Err(Error::Timeout)
  }

  async fn erase_flash(&mut self) -> Result<(), Error<E>> {
    self.write_hw_reg8(REG_FLASH_ERASE_UNLOCK, FLASH_ERASE_UNLOCK_VALUE).await?;
    self.write_hw_reg32(REG_FLASH_ERASE_MASK, ERASE_ALL_BUT_CX).await?;
    self.write_hw_reg8(REG_FLASH_ERASE_CODE, 0x00).await?;
    self.write_hw_reg8(REG_FLASH_ERASE_START, FLASH_ERASE_START_VALUE).await?;
    self.wait_for_flash_ready(REG_FLASH_ERASE_START as u8).await
  }

  /// Halt the controller CPU, unlock the flash and erase everything except
  /// the factory calibration pages.
  async fn prepare_for_update(&mut self) -> Result<(), Error<E>> {
    self.write_hw_reg8(REG_HOLD_CPU, HOLD_CPU_VALUE).await?;
    self.write_hw_reg8(REG_FLASH_UNLOCK, FLASH_UNLOCK_VALUE).await?;
    self.erase_flash().await
  }

  async fn start_flash_dma(&mut self) -> Result<(), Error<E>> {
    self.write_hw_reg8(REG_FLASH_DMA_TRIGGER, FLASH_DMA_TRIGGER_VALUE).await?;
    self.wait_for_flash_ready(REG_FLASH_DMA_TRIGGER as u8).await
  }

  async fn write_one_chunk(&mut self, addr: u32, chunk: &[u8]) -> Result<(), Error<E>> {
    let mut tx = [0u8; 5 + DMA_CHUNK_SIZE];
    tx[0] = Opcode::WriteHwReg.into();
    tx[1..5].copy_from_slice(&addr.to_be_bytes());
    tx[5..5 + chunk.len()].copy_from_slice(chunk);
    self.command(&tx[..5 + chunk.len()]).await
  }

  /// Stage `data` into controller RAM and commit it to flash at byte
  /// `offset`, one write-buffer-sized group per DMA run.
  async fn write_flash(&mut self, offset: usize, data: &[u8]) -> Result<(), Error<E>> {
    let mut word_offset = (offset >> 2) as u16;
    let mut remaining = data;
    while !remaining.is_empty() {
      let group_len = remaining.len().min(FLASH_BUFFER_SIZE);
      let (group, rest) = remaining.split_at(group_len);

      let mut staged = 0u32;
      for chunk in group.chunks(DMA_CHUNK_SIZE) {
        self.write_one_chunk(CHUNK_STAGING_BASE + staged, chunk).await?;
        staged += chunk.len() as u32;
      }

      // DMA length is in 4-byte flash words, minus one per the register
      // encoding.
      let words = (group_len / 4 - 1) as u16;
      let a = REG_FLASH_DMA_CONFIG.to_be_bytes();
      let wo = word_offset.to_le_bytes();
      let w = words.to_le_bytes();
      let cfg = [Opcode::WriteHwReg.into(), a[0], a[1], a[2], a[3], 0x00, 0x00, wo[0], wo[1], w[0], w[1], 0x00];
      self.command(&cfg).await?;
      self.start_flash_dma().await?;

      word_offset = word_offset.wrapping_add((FLASH_BUFFER_SIZE / 4) as u16);
      remaining = rest;
    }
    Ok(())
  }

  /// One block of a firmware update, as handed down by the update host.
  ///
  /// `offset == 0` stops scanning and erases the flash first; reaching the
  /// end of the image triggers the full reinitialization sequence. Blocks
  /// inside the factory calibration range are acknowledged but discarded.
  pub async fn update_write(&mut self, offset: usize, data: &[u8]) -> Result<(), Error<E>> {
    // The DMA length register counts 4-byte flash words; a block that is not
    // a word multiple cannot be committed.
    if offset % DMA_CHUNK_SIZE != 0 || data.len() % 4 != 0 || offset + data.len() > FLASH_IMAGE_SIZE {
      return Err(Error::InvalidParam);
    }

    if offset == 0 {
      info!("ftm4: firmware update started");
      self.stop_scan().await?;
      self.prepare_for_update().await?;
    }

    if !(FLASH_OFFSET_CX..FLASH_OFFSET_CONFIG).contains(&offset) {
      self.write_flash(offset, data).await?;
    }

    if offset + data.len() == FLASH_IMAGE_SIZE {
      info!("ftm4: firmware update complete");
      self.full_initialize().await?;
    }
    Ok(())
  }

  /// Full panel initialization: recalibrates the panel and rewrites the
  /// device's saved tuning, then brings the driver back up.
  pub(crate) async fn full_initialize(&mut self) -> Result<(), Error<E>> {
    debug!("ftm4: full panel initialization");
    self.stop_scan().await?;
    self.reset_controller().await?;

    let cmd = [Opcode::SystemCommand.into(), SYSCMD_PANEL_INIT, PANEL_INIT_FULL];
    self.command(&cmd).await?;

    // The command takes seconds; the device confirms completion with a
    // command echo in the event stream.
    let mut confirmed = false;
    for _ in 0..PANEL_INIT_RETRIES {
      self.delay.delay_ms(PANEL_INIT_POLL_MS).await;
      match self.check_command_echo(&cmd).await {
        Ok(()) => {
          confirmed = true;
          break;
        }
        Err(Error::CommandPending) => continue,
        Err(e) => return Err(e),
      }
    }
    if !confirmed {
      return Err(Error::Timeout);
    }
    self.init().await
  }

  /// Recalibrate the panel. Console/debug entry point.
  pub async fn calibrate(&mut self) -> Result<(), Error<E>> {
    self.full_initialize().await
  }

  /// Debug command surface of the update protocol. The only defined command
  /// today is a full recalibration.
  pub async fn debug_command(&mut self, param: &[u8]) -> Result<(), Error<E>> {
    if param.len() != 1 {
      return Err(Error::InvalidParam);
    }
    match param[0] {
      DEBUG_CMD_CALIBRATE => self.full_initialize().await,
      _ => Err(Error::InvalidParam),
    }
  }
}

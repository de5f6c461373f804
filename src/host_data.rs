//! Host data memory: staged configuration blocks the firmware publishes on
//! request, fronted by a small header that tells which block is currently
//! loaded and how many times it has been (re)loaded.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::fmt::info;
use crate::reg::*;
use crate::{bus::Transport, Error, Ftm4};

const LOAD_RETRIES: u32 = 5;
const LOAD_POLL_MS: u32 = 10;

/// First word of the SPI host buffer. Most flag bits describe content the
/// driver reads anyway; only the dome switch bits are interpreted here.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HostBufferHeader {
  pub dome_switch_changed: bool,
  /// Raw level as the device reports it: 0 = pressed, 1 = released.
  pub dome_switch_level: bool,
}

impl TryFrom<[u8; 4]> for HostBufferHeader {
  type Error = core::convert::Infallible;

  fn try_from(raw: [u8; 4]) -> Result<Self, Self::Error> {
    let bits = u32::from_le_bytes(raw);
    Ok(Self { dome_switch_changed: bits & (1 << 2) != 0, dome_switch_level: bits & (1 << 16) != 0 })
  }
}

/// First word of host data memory.
///
/// `count` is bumped by the firmware every time a block is loaded, which is
/// the only way to tell a completed reload from a stale header.
#[derive(Debug, Clone, Copy)]
#[packbits::pack(u32)]
pub(crate) struct HostDataHeader {
  pub magic: u8,
  pub mem_id: u8,
  pub count: u16,
}

impl HostDataHeader {
  fn matches(&self, mem_id: u8) -> bool {
    self.magic == HEADER_MAGIC && self.mem_id == mem_id
  }
}

/// Identification block parsed out of the SYSTEM_INFO host data memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemInfo {
  pub chip_version: u16,
  pub chip_id: u16,
  pub fw_version: u16,
  pub release_info: u16,
  pub fw_crc: u32,
  pub resolution_x: u16,
  pub resolution_y: u16,
  pub tx_lines: u16,
  pub rx_lines: u16,
}

impl SystemInfo {
  fn parse(raw: &[u8]) -> Result<Self, ()> {
    if raw[0] != HEADER_MAGIC || raw[1] != MEM_ID_SYSTEM_INFO {
      return Err(());
    }
    let u16_le = |o: usize| u16::from_le_bytes([raw[o], raw[o + 1]]);
    Ok(Self {
      chip_version: u16_le(4),
      // the chip id reads naturally in big-endian (0x3936 = "96")
      chip_id: u16::from_be_bytes([raw[6], raw[7]]),
      fw_version: u16_le(8),
      release_info: u16_le(10),
      fw_crc: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
      resolution_x: u16_le(32),
      resolution_y: u16_le(34),
      tx_lines: u16_le(36),
      rx_lines: u16_le(38),
    })
  }
}

/// Identification summary reported to the update host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchpadInfo {
  pub vendor: u16,
  pub id: u16,
  pub fw_version: u16,
  pub fw_checksum: u32,
}

impl<B, E, P, R, D> Ftm4<B, P, R, D>
where
  B: Transport<Error = E>,
  P: Wait + InputPin,
  R: OutputPin,
  D: DelayNs,
{
  pub(crate) async fn read_host_buffer_header(&mut self) -> Result<HostBufferHeader, Error<E>> {
    let tx = [Opcode::ReadSpiHostBuffer.into(), 0x00, 0x00];
    self.read_typed::<4, _>(&tx).await
  }

  async fn read_data_header(&mut self) -> Result<HostDataHeader, Error<E>> {
    let tx = [Opcode::ReadHostDataMemory.into(), 0x00, 0x00];
    self.read_typed::<4, _>(&tx).await
  }

  /// Make the firmware stage host data block `mem_id`.
  ///
  /// Returns immediately when the header already names the block. Otherwise
  /// the reload command is issued and the header is polled until both the
  /// block id matches and the revision count moved, which distinguishes a
  /// finished reload from the header the firmware had published before.
  pub(crate) async fn load_host_data(&mut self, mem_id: u8) -> Result<(), Error<E>> {
    let header = self.read_data_header().await?;
    if header.matches(mem_id) {
      return Ok(());
    }
    let stale_count = header.count;

    self.command(&[Opcode::SystemCommand.into(), SYSCMD_LOAD_HOST_DATA, mem_id]).await?;
    for _ in 0..LOAD_RETRIES {
      self.delay.delay_ms(LOAD_POLL_MS).await;
      let header = self.read_data_header().await?;
      if header.matches(mem_id) && header.count != stale_count {
        return Ok(());
      }
    }
    Err(Error::Timeout)
  }

  /// Fetch and cache the SYSTEM_INFO block.
  ///
  /// With `reload` set the firmware is asked to restage the block first;
  /// without it the block already sitting in host data memory is read,
  /// which is all that is needed right after boot.
  pub async fn read_system_info(&mut self, reload: bool) -> Result<SystemInfo, Error<E>> {
    if reload {
      self.load_host_data(MEM_ID_SYSTEM_INFO).await?;
    }
    let tx = [Opcode::ReadHostDataMemory.into(), 0x00, 0x00];
    let raw = self.read_response(&tx, SYSTEM_INFO_LEN).await?;
    let info = SystemInfo::parse(raw).map_err(|_| Error::InvalidHeader)?;
    info!(
      "ftm4: chip {=u16:x} v{=u16:x} fw {=u16:x} rel {=u16:x} crc {=u32:x} res {=u16}x{=u16}",
      info.chip_id,
      info.chip_version,
      info.fw_version,
      info.release_info,
      info.fw_crc,
      info.resolution_x,
      info.resolution_y
    );
    self.info = Some(info);
    Ok(info)
  }

  /// Identification for the update host. A device with corrupted firmware
  /// cannot serve its info block; report the well-known chip id with a zero
  /// firmware version so the host still offers an update.
  pub async fn touchpad_info(&mut self) -> TouchpadInfo {
    match self.read_system_info(true).await {
      Ok(info) => TouchpadInfo {
        vendor: VENDOR_ID_ST,
        id: info.chip_id,
        fw_version: info.release_info,
        fw_checksum: info.fw_crc,
      },
      Err(_) => TouchpadInfo { vendor: VENDOR_ID_ST, id: 0x3936, fw_version: 0, fw_checksum: 0 },
    }
  }
}

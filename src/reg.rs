/******************************************************************************
 * ST FingerTipS FTM4 - host interface opcodes, hardware registers and flash  *
 * geometry. The flash register addresses and bit meanings are fixed by the   *
 * part and must not be changed.                                              *
 ******************************************************************************/

/// Number of pad bytes the device clocks out before response data.
pub(crate) const DUMMY_BYTES: usize = 1;

/// Scratch buffer size, sized for the largest transaction (a raw 16-bit
/// heatmap frame).
pub(crate) const SCRATCH_LEN: usize = 512;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Opcode {
  /// Fetch the fixed-size event batch.
  ReadAllEvents = 0x87,
  /// Read from the host buffer at a 16-bit offset.
  ReadSpiHostBuffer = 0xB7,
  /// Read from host data memory at a 16-bit offset.
  ReadHostDataMemory = 0xB6,
  /// Select scan mode (argument: mode, parameter).
  ScanModeSelect = 0xC0,
  /// Select feature bits (argument: feature id, bitmask).
  FeatureSelect = 0xC1,
  /// System command (argument: command id, parameter).
  SystemCommand = 0xC2,
  /// Acknowledge the host buffer, re-arming the interrupt line.
  HostBufferAck = 0xCA,
  /// Write a 32-bit addressed hardware register.
  WriteHwReg = 0xFA,
  /// Read a 32-bit addressed hardware register.
  ReadHwReg = 0xFB,
}

impl From<Opcode> for u8 {
  #[inline]
  fn from(op: Opcode) -> Self {
    op as u8
  }
}

// Scan modes (ScanModeSelect argument 0).
pub(crate) const SCAN_MODE_ACTIVE: u8 = 0x00;
pub(crate) const SCAN_MODE_LOCKED: u8 = 0x03;

// Feature select ids (FeatureSelect argument 0).
pub(crate) const FEATURE_TOUCH_MODES: u8 = 0x05;
pub(crate) const FEATURE_BIT_HEAT_MAP: u8 = 1 << 0;
pub(crate) const FEATURE_BIT_DOME_SWITCH: u8 = 1 << 1;

// System command ids (SystemCommand argument 0).
pub(crate) const SYSCMD_PANEL_INIT: u8 = 0x00;
pub(crate) const SYSCMD_INTERRUPT: u8 = 0x01;
pub(crate) const SYSCMD_LOAD_HOST_DATA: u8 = 0x06;
/// Parameter of [`SYSCMD_PANEL_INIT`] requesting a full panel initialization.
pub(crate) const PANEL_INIT_FULL: u8 = 0x03;

// Event records.
pub(crate) const EVENT_LEN: usize = 8;
pub(crate) const EVENT_BATCH: usize = 32;
/// Validity sentinel carried in the low two bits of every event record.
pub(crate) const EVENT_MAGIC: u8 = 0x3;

pub(crate) const EVT_CONTROLLER_READY: u8 = 0x03;
pub(crate) const EVT_ENTER_POINTER: u8 = 0x04;
pub(crate) const EVT_MOTION_POINTER: u8 = 0x05;
pub(crate) const EVT_LEAVE_POINTER: u8 = 0x06;
pub(crate) const EVT_ERROR_REPORT: u8 = 0x0F;
pub(crate) const EVT_STATUS_REPORT: u8 = 0x16;

/// Status report type confirming execution of a previously issued command.
pub(crate) const STATUS_CMD_ECHO: u8 = 0x01;
/// Touch type marking a contact slot as not carrying a finger.
pub(crate) const TOUCH_TYPE_INVALID: u8 = 0xF;

// Host data memory.
pub(crate) const HEADER_MAGIC: u8 = 0xA5;
pub(crate) const MEM_ID_SYSTEM_INFO: u8 = 0x01;
pub(crate) const SYSTEM_INFO_LEN: usize = 40;
/// ST vendor id reported through the update protocol.
pub(crate) const VENDOR_ID_ST: u16 = 0x0483;

// Flash programming. Hardware register map of the FTM4 internal bus; the
// addresses come from ST reference code and are device-exact.
pub(crate) const REG_HOLD_CPU: u32 = 0x2000_0024;
pub(crate) const REG_FLASH_UNLOCK: u32 = 0x2000_0025;
pub(crate) const REG_FLASH_ERASE_UNLOCK: u32 = 0x2000_00DE;
pub(crate) const REG_FLASH_ERASE_MASK: u32 = 0x2000_0128;
pub(crate) const REG_FLASH_ERASE_CODE: u32 = 0x2000_006B;
pub(crate) const REG_FLASH_ERASE_START: u32 = 0x2000_006A;
pub(crate) const REG_FLASH_DMA_TRIGGER: u32 = 0x2000_0071;
pub(crate) const REG_FLASH_DMA_CONFIG: u32 = 0x2000_0072;
/// Base of the status register window polled by `wait_for_flash_ready`.
pub(crate) const REG_STATUS_BASE: u32 = 0x2000_0000;
/// Staging RAM the DMA engine copies to flash.
pub(crate) const CHUNK_STAGING_BASE: u32 = 0x0010_0000;

pub(crate) const HOLD_CPU_VALUE: u8 = 0x01;
pub(crate) const FLASH_UNLOCK_VALUE: u8 = 0x20;
pub(crate) const FLASH_ERASE_UNLOCK_VALUE: u8 = 0x03;
/// Erase every flash page except the CX (factory calibration) pages.
pub(crate) const ERASE_ALL_BUT_CX: u32 = 0xFFFF_FF83;
pub(crate) const FLASH_ERASE_START_VALUE: u8 = 0xA0;
pub(crate) const FLASH_DMA_TRIGGER_VALUE: u8 = 0xC0;
pub(crate) const FLASH_STATUS_BUSY: u8 = 0x80;

pub(crate) const FLASH_READY_RETRIES: u32 = 200;
pub(crate) const FLASH_READY_POLL_MS: u32 = 50;

/// Largest payload of a single chunk-staging transaction.
pub(crate) const DMA_CHUNK_SIZE: usize = 32;
/// On-device flash write buffer; chunks are grouped up to this size before a
/// DMA commit.
pub(crate) const FLASH_BUFFER_SIZE: usize = 64 * 1024;
/// Total firmware image size as seen by the external updater.
pub(crate) const FLASH_IMAGE_SIZE: usize = 128 * 1024;
/// Protected factory calibration range; never rewritten by an update.
pub(crate) const FLASH_OFFSET_CX: usize = 0x1C000;
pub(crate) const FLASH_OFFSET_CONFIG: usize = 0x1F000;

// Heatmap.
pub(crate) const HEAT_MAP_ROWS: usize = 16;
pub(crate) const HEAT_MAP_COLS: usize = 16;
pub(crate) const HEAT_MAP_PIXELS: usize = HEAT_MAP_ROWS * HEAT_MAP_COLS;
/// Host buffer offset of the heatmap frame for firmware revision >= 3.
pub(crate) const HEAT_MAP_ADDR_V3: u16 = 0x0120;
/// Host buffer offset of the heatmap frame for firmware revision 1.
pub(crate) const HEAT_MAP_ADDR_V1: u16 = 0x0020;

/// Debug command id: trigger a full panel calibration.
pub(crate) const DEBUG_CMD_CALIBRATE: u8 = 0x00;

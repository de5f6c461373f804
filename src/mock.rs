//! Scripted transport, inert pins and a polling executor for host tests.

use core::convert::Infallible;
use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::bus::Transport;
use crate::reg::EVENT_MAGIC;
use crate::report::{ReportSink, TouchReport};
use crate::{Config, Ftm4};

/// One expected transaction: the exact command bytes, the response to
/// return, and whether the bus should fail instead.
#[derive(Debug, Clone, Copy)]
pub struct Xfer<'a> {
  pub tx: &'a [u8],
  pub rx: &'a [u8],
  pub fail: bool,
}

/// Transport that replays a fixed script, asserting every command byte.
pub struct MockBus<'a> {
  script: &'a [Xfer<'a>],
  pos: usize,
}

impl MockBus<'_> {
  /// Script steps not yet consumed.
  pub fn remaining(&self) -> usize {
    self.script.len() - self.pos
  }
}

impl Transport for MockBus<'_> {
  type Error = u8;

  async fn transact(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), u8> {
    let Some(step) = self.script.get(self.pos) else {
      panic!("unexpected transaction {}: tx = {:02x?}", self.pos, tx);
    };
    assert_eq!(tx, step.tx, "transaction {}", self.pos);
    self.pos += 1;
    if step.fail {
      return Err(0xEE);
    }
    let n = rx.len().min(step.rx.len());
    rx[..n].copy_from_slice(&step.rx[..n]);
    rx[n..].fill(0);
    Ok(())
  }
}

/// GPIO stand-in usable as interrupt input or reset output.
pub struct Pin(pub bool);

impl ErrorType for Pin {
  type Error = Infallible;
}

impl InputPin for Pin {
  fn is_high(&mut self) -> Result<bool, Infallible> {
    Ok(self.0)
  }

  fn is_low(&mut self) -> Result<bool, Infallible> {
    Ok(!self.0)
  }
}

impl OutputPin for Pin {
  fn set_low(&mut self) -> Result<(), Infallible> {
    self.0 = false;
    Ok(())
  }

  fn set_high(&mut self) -> Result<(), Infallible> {
    self.0 = true;
    Ok(())
  }
}

impl Wait for Pin {
  async fn wait_for_high(&mut self) -> Result<(), Infallible> {
    Ok(())
  }

  async fn wait_for_low(&mut self) -> Result<(), Infallible> {
    Ok(())
  }

  async fn wait_for_rising_edge(&mut self) -> Result<(), Infallible> {
    Ok(())
  }

  async fn wait_for_falling_edge(&mut self) -> Result<(), Infallible> {
    Ok(())
  }

  async fn wait_for_any_edge(&mut self) -> Result<(), Infallible> {
    Ok(())
  }
}

/// Delay provider that returns immediately, so retry loops run at full
/// speed under test.
pub struct NoDelay;

impl DelayNs for NoDelay {
  async fn delay_ns(&mut self, _ns: u32) {}
}

/// Sink that keeps the most recent touch report.
#[derive(Default)]
pub struct CapturedReports {
  pub last: Option<TouchReport>,
}

impl ReportSink for CapturedReports {
  fn report(&mut self, report: &TouchReport) {
    self.last = Some(*report);
  }
}

/// Driver over a scripted bus. The interrupt line idles high (inactive).
pub fn mock_driver<'a>(script: &'a [Xfer<'a>]) -> Ftm4<MockBus<'a>, Pin, Pin, NoDelay> {
  Ftm4::new(MockBus { script, pos: 0 }, Pin(true), Pin(true), NoDelay, Config::default())
}

/// Wire encoding of a finger pointer event (touch type 0, all axes zero).
pub fn finger_record(id: u8, touch_id: u8, x: u16, y: u16, z: u8) -> [u8; 8] {
  [
    EVENT_MAGIC,
    id,
    touch_id << 4,
    x as u8,
    ((x >> 8) & 0xF) as u8 | ((y & 0xF) << 4) as u8,
    (y >> 4) as u8,
    z,
    0,
  ]
}

/// Poll a future to completion with a no-op waker. Nothing in the mocks
/// ever returns `Pending`, so this never spins.
pub fn block_on<F: Future>(fut: F) -> F::Output {
  static VTABLE: RawWakerVTable = RawWakerVTable::new(|p| RawWaker::new(p, &VTABLE), |_| {}, |_| {}, |_| {});
  let waker = unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) };
  let mut cx = Context::from_waker(&waker);
  let mut fut = pin!(fut);
  loop {
    if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
      return out;
    }
  }
}

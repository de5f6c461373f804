use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::{Operation, SpiDevice};

use crate::reg::DUMMY_BYTES;
use crate::{Error, Ftm4};

/// Request/response transaction primitive.
///
/// Every command the driver issues goes through this single seam; no other
/// component touches the physical bus. A failure is propagated verbatim to
/// the caller, the transport never retries.
pub trait Transport {
  type Error;

  /// Send `tx` and read the response into `rx`. `rx` may be empty for
  /// write-only commands.
  async fn transact(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;
}

/// [`Transport`] implementation for a SPI-attached controller.
///
/// The part clocks out a fixed number of pad bytes before response data;
/// those are consumed here so callers only ever see payload bytes.
pub struct SpiTransport<S> {
  spi: S,
}

impl<S> SpiTransport<S> {
  pub fn new(spi: S) -> Self {
    Self { spi }
  }

  /// Consume the transport and return the SPI device.
  pub fn release(self) -> S {
    self.spi
  }
}

impl<S, E> Transport for SpiTransport<S>
where
  S: SpiDevice<u8, Error = E>,
{
  type Error = E;

  async fn transact(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), E> {
    if rx.is_empty() {
      return self.spi.write(tx).await;
    }
    let mut pad = [0u8; DUMMY_BYTES];
    self
      .spi
      .transaction(&mut [Operation::Write(tx), Operation::Read(&mut pad), Operation::Read(rx)])
      .await
  }
}

impl<B, E, P, R, D> Ftm4<B, P, R, D>
where
  B: Transport<Error = E>,
  P: Wait + InputPin,
  R: OutputPin,
  D: DelayNs,
{
  /// Issue a write-only command.
  pub(crate) async fn command(&mut self, tx: &[u8]) -> Result<(), Error<E>> {
    self.bus.transact(tx, &mut []).await.map_err(Error::Bus)
  }

  /// Issue a command and read `len` response bytes into the scratch buffer.
  pub(crate) async fn read_response(&mut self, tx: &[u8], len: usize) -> Result<&[u8], Error<E>> {
    let rx = &mut self.scratch[..len];
    self.bus.transact(tx, rx).await.map_err(Error::Bus)?;
    Ok(&self.scratch[..len])
  }

  // Typed helper, mirrored on the packed register views.
  pub(crate) async fn read_typed<const N: usize, T: TryFrom<[u8; N]>>(&mut self, tx: &[u8]) -> Result<T, Error<E>> {
    let mut b = [0u8; N];
    self.bus.transact(tx, &mut b).await.map_err(Error::Bus)?;
    T::try_from(b).map_err(|_| Error::InvalidHeader)
  }
}

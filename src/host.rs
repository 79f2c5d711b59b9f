//! Blocking host adapter for `embedded-hal` SPI buses.
//!
//! The driver itself only produces packets; something still has to clock
//! them over the wire. Hosts with their own event loop do that themselves,
//! everyone else can wrap bus and chip-select here and run each job to
//! completion.

use crate::driver::Driver;
use crate::Error as DriverError;
use core::fmt::{self, Debug};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// The error type of the blocking adapter.
///
/// Wraps bus and chip-select failures and carries driver-side job errors
/// through.
pub enum Error<SPI: Transfer<u8>, GPIO: OutputPin> {
    /// An SPI transfer failed.
    Spi(SPI::Error),

    /// The chip-select line could not be set.
    Gpio(GPIO::Error),

    /// The job itself failed; see [`DriverError`].
    Driver(DriverError),
}

impl<SPI: Transfer<u8>, GPIO: OutputPin> Debug for Error<SPI, GPIO>
where
    SPI::Error: Debug,
    GPIO::Error: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::Gpio(gpio) => write!(f, "Error::Gpio({:?})", gpio),
            Error::Driver(driver) => write!(f, "Error::Driver({:?})", driver),
        }
    }
}

/// Owns the SPI master and chip-select line and pumps the driver.
///
/// # Type Parameters
///
/// * **`SPI`**: The SPI master the flash chip is attached to.
/// * **`CS`**: The **C**hip-**S**elect line attached to the `\CS` pin of
///   the flash chip.
#[derive(Debug)]
pub struct Host<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI: Transfer<u8>, CS: OutputPin> Host<SPI, CS> {
    /// Wraps a bus and chip-select pin.
    ///
    /// The SPI master must already be configured for the flash chip; CS is
    /// driven low for the duration of each packet.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Host { spi, cs }
    }

    /// Returns the SPI and chip select objects so they can be used elsewhere.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn transact(&mut self, bytes: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        // If the SPI transfer fails, make sure to disable CS anyways
        self.cs.set_low().map_err(Error::Gpio)?;
        let spi_result = self.spi.transfer(bytes).map(|_| ()).map_err(Error::Spi);
        self.cs.set_high().map_err(Error::Gpio)?;
        spi_result
    }

    /// Runs the staged job to completion.
    ///
    /// Alternates worker calls and bus transfers until the driver goes
    /// idle. A job the flash never finishes (stuck WIP bit) spins here
    /// forever; apply an outer watchdog if that matters.
    pub fn run(&mut self, drv: &mut Driver<'_>) -> Result<(), Error<SPI, CS>> {
        while drv.busy() {
            drv.worker();
            if drv.spi_len() > 0 {
                self.transact(drv.spi_packet())?;
            }
        }
        match drv.last_error() {
            Some(error) => Err(Error::Driver(error)),
            None => Ok(()),
        }
    }
}

//! Circular-buffer queues on external SPI NOR flash.
//!
//! This crate journals fixed-size records into one or more logical queues
//! sharing a single SPI NOR part. Each queue owns a contiguous run of
//! sectors; records are appended page by page, and when a queue fills up the
//! sector holding its oldest record is erased round-robin. Queue metadata
//! (record counts, oldest/newest ids, the next free page) is not stored
//! anywhere — it is rebuilt by scanning the flash after power-up.
//!
//! The driver never touches the bus. It is a cooperative state machine:
//! every call to [`Driver::worker`] either leaves one SPI packet in the
//! shared buffer (the host clocks it out full-duplex and writes the response
//! back into the same buffer before the next call) or completes the staged
//! job and goes idle. This keeps the crate independent of any particular SPI
//! peripheral or scheduler; an `embedded-hal` convenience wrapper is
//! provided in [`host`] for hosts that are happy to block.
//!
//! ```no_run
//! use spi_flash_ring::{Driver, Queue};
//!
//! let mut queues = [Queue::empty(); 2];
//! let mut spi_buf = [0u8; 266];
//! let mut drv = Driver::new(0, &mut queues, &mut spi_buf).unwrap();
//! let q = drv.create_queue(0x4711_4711, 244, 32).unwrap();
//! drv.mount().unwrap();
//! while drv.busy() {
//!     drv.worker();
//!     let n = drv.spi_len();
//!     if n > 0 {
//!         // transfer drv.spi_packet() over the bus, response in place
//!     }
//! }
//! # let _ = q;
//! ```

#![doc(html_root_url = "https://docs.rs/spi-flash-ring/0.1.0")]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
mod log;

pub mod device;
pub mod host;

mod driver;
mod queue;
mod record;
mod util;

#[cfg(test)]
mod sim;

pub use crate::device::{FlashType, Status, FLASH_TYPES};
pub use crate::driver::Driver;
pub use crate::queue::Queue;
pub use crate::record::{Header, CMD_OVERHEAD};

use core::fmt;

/// The error type used by this library.
///
/// Job-staging calls return these directly. [`Driver::worker`] cannot return
/// anything (it runs on the host's schedule), so a failure discovered
/// mid-job terminates the job and is left in [`Driver::last_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The flash-type index passed at construction is not in [`FLASH_TYPES`].
    UnknownFlashType,
    /// A buffer cannot hold the packet a job needs. At construction this
    /// means the SPI buffer is smaller than one page plus command overhead;
    /// for reads it means the requested length does not fit the SPI buffer.
    BufferTooSmall,
    /// A job is already in flight; poll [`Driver::busy`] first.
    Busy,
    /// All queue-table slots are occupied.
    NoFreeSlot,
    /// The queue's sector range would extend past the end of the flash.
    FlashFull,
    /// No queue has been registered yet, there is nothing to mount.
    NoQueue,
    /// The queue id does not address a table slot.
    QueueNotFound,
    /// The queue has no valid metadata; run [`Driver::mount`] first.
    NotReady,
    /// The payload does not fit one queue element.
    TooLarge,
    /// The queue holds no records.
    Empty,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownFlashType => f.write_str("flash type index out of range"),
            Error::BufferTooSmall => f.write_str("buffer too small for operation"),
            Error::Busy => f.write_str("a job is already in flight"),
            Error::NoFreeSlot => f.write_str("queue table is full"),
            Error::FlashFull => f.write_str("queue does not fit the flash"),
            Error::NoQueue => f.write_str("no queue registered"),
            Error::QueueNotFound => f.write_str("no such queue"),
            Error::NotReady => f.write_str("queue metadata not built, mount first"),
            Error::TooLarge => f.write_str("payload exceeds element size"),
            Error::Empty => f.write_str("queue holds no records"),
        }
    }
}

//! Byte transports for the instrument drivers
//!
//! The drivers never talk to a port directly. They go through [`Adapter`],
//! a blocking byte pipe with the four operations the PREVAC protocols need:
//! write a frame, read an exact number of bytes, ask how many bytes are
//! pending, and discard whatever is pending.
//!
//! Implementations:
//! - [`SerialAdapter`]: RS-232 through the `serialport` crate
//! - [`MockAdapter`]: in-memory transport for tests and dry runs

pub mod mock;
pub mod serial_adapter;

pub use mock::MockAdapter;
pub use serial_adapter::SerialAdapter;

use crate::error::AppResult;

/// Blocking request/response byte transport.
///
/// A transport is owned by exactly one driver. Reads block until `count`
/// bytes arrived or the transport timeout elapsed; on timeout the bytes
/// received so far are returned and the caller decides whether that is a
/// framing error.
pub trait Adapter {
    /// Write all bytes to the device.
    fn write(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Read up to `count` bytes, blocking until they arrive or the timeout hits.
    fn read(&mut self, count: usize) -> AppResult<Vec<u8>>;

    /// Number of received bytes not yet consumed.
    fn in_waiting(&mut self) -> AppResult<usize>;

    /// Discard all pending input.
    fn clear_internal(&mut self) -> AppResult<()>;
}

impl<A: Adapter + ?Sized> Adapter for Box<A> {
    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        (**self).write(bytes)
    }

    fn read(&mut self, count: usize) -> AppResult<Vec<u8>> {
        (**self).read(count)
    }

    fn in_waiting(&mut self) -> AppResult<usize> {
        (**self).in_waiting()
    }

    fn clear_internal(&mut self) -> AppResult<()> {
        (**self).clear_internal()
    }
}

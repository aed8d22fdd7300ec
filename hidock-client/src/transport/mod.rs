//! Byte-channel abstraction over the device's bulk endpoints.

pub mod mock;
#[cfg(feature = "usb")]
pub mod usb;

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;

pub use mock::MockTransport;
#[cfg(feature = "usb")]
pub use usb::UsbTransport;

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A duplex byte channel to one physical device.
///
/// The connection calls `open` and `claim_interface` exactly once per
/// session, then writes commands on the OUT endpoint and keeps one read
/// armed on the IN endpoint. Reads may return any fragment of the device's
/// output; reassembly happens above this layer.
pub trait Transport: Send + Sync + 'static {
    /// USB product id, used to derive the device model.
    fn product_id(&self) -> u16;

    fn open(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Selects the configuration and claims the command interface.
    fn claim_interface(&self) -> BoxFuture<'_, io::Result<()>>;

    fn write(&self, endpoint: u8, data: Bytes) -> BoxFuture<'_, io::Result<()>>;

    /// Reads up to `max_len` bytes. Dropping the future cancels the read.
    fn read(&self, endpoint: u8, max_len: usize) -> BoxFuture<'_, io::Result<Bytes>>;

    /// Returns whether the device is still attached and open.
    fn is_open(&self) -> bool;

    fn close(&self) -> BoxFuture<'_, io::Result<()>>;
}

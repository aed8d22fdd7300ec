//! Bulk USB transport backed by `nusb`.

use super::{BoxFuture, Transport};
use crate::error::ClientError;
use crate::model::DeviceModel;
use bytes::Bytes;
use hidock_protocol::VENDOR_ID;
use nusb::transfer::RequestBuffer;
use nusb::{Device, DeviceInfo, Interface};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Direction bit for IN endpoint addresses.
const ENDPOINT_IN_BIT: u8 = 0x80;

/// Lists attached recorders with a known product id.
pub fn find_devices() -> io::Result<Vec<DeviceInfo>> {
    Ok(nusb::list_devices()?
        .filter(|d| {
            d.vendor_id() == VENDOR_ID
                && DeviceModel::from_product_id(d.product_id()) != DeviceModel::Unknown
        })
        .collect())
}

/// Transport over the recorder's bulk endpoints.
pub struct UsbTransport {
    info: DeviceInfo,
    device: Mutex<Option<Device>>,
    interface: Mutex<Option<Interface>>,
    open: AtomicBool,
}

impl UsbTransport {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            device: Mutex::new(None),
            interface: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    /// Picks the first attached recorder.
    pub fn first() -> Result<Self, ClientError> {
        let info = find_devices()?
            .into_iter()
            .next()
            .ok_or(ClientError::DeviceNotFound)?;
        info!(
            "Found {} on bus {} addr {}",
            DeviceModel::from_product_id(info.product_id()),
            info.bus_number(),
            info.device_address()
        );
        Ok(Self::new(info))
    }

    fn interface(&self) -> io::Result<Interface> {
        self.interface
            .lock()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "interface not claimed"))
    }

    fn still_attached(&self) -> bool {
        match nusb::list_devices() {
            Ok(mut devices) => devices.any(|d| {
                d.bus_number() == self.info.bus_number()
                    && d.device_address() == self.info.device_address()
            }),
            Err(_) => false,
        }
    }
}

impl Transport for UsbTransport {
    fn product_id(&self) -> u16 {
        self.info.product_id()
    }

    fn open(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let device = self.info.open()?;
            *self.device.lock() = Some(device);
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn claim_interface(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let device = self
                .device
                .lock()
                .clone()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device not open"))?;
            device.set_configuration(1)?;
            let interface = device.detach_and_claim_interface(0)?;
            interface.set_alt_setting(0)?;
            debug!("Interface 0 claimed");
            *self.interface.lock() = Some(interface);
            Ok(())
        })
    }

    fn write(&self, endpoint: u8, data: Bytes) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let interface = self.interface()?;
            interface
                .bulk_out(endpoint, data.to_vec())
                .await
                .into_result()
                .map_err(io::Error::other)?;
            Ok(())
        })
    }

    fn read(&self, endpoint: u8, max_len: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(async move {
            let interface = self.interface()?;
            let data = interface
                .bulk_in(ENDPOINT_IN_BIT | endpoint, RequestBuffer::new(max_len))
                .await
                .into_result()
                .map_err(io::Error::other)?;
            Ok(Bytes::from(data))
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.still_attached()
    }

    fn close(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.open.store(false, Ordering::SeqCst);
            self.interface.lock().take();
            self.device.lock().take();
            Ok(())
        })
    }
}

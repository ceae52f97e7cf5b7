// SPDX-License-Identifier: Apache-2.0
//
// USB printer session over rusb bulk endpoints.
//
// The device is matched by vendor/product id (and optional serial), the
// printer interface is claimed, and bulk OUT carries command bytes while
// bulk IN (when the device has one) carries unsolicited status bytes.
// rusb calls block, so every libusb touch runs under `spawn_blocking`;
// the handle is `Arc`-shared with the blocking closures.

use std::sync::Arc;
use std::time::Duration;

use rusb::{Device, DeviceHandle, GlobalContext};
use tracing::{debug, info, warn};

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::DeviceStatus;

use crate::parse_status_byte;

/// USB printer interface class.
const USB_CLASS_PRINTER: u8 = 7;

/// Bulk OUT chunk size.
const BULK_CHUNK: usize = 16 * 1024;

/// Timeout for one bulk OUT transfer attempt.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for one status read; short because polls must not block.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Consecutive write timeouts tolerated before the job fails.
const MAX_WRITE_TIMEOUTS: u32 = 6;

/// An open session to one USB label printer.
pub struct UsbSession {
    handle: Arc<DeviceHandle<GlobalContext>>,
    interface: u8,
    endpoint_out: u8,
    endpoint_in: Option<u8>,
    label: String,
}

impl std::fmt::Debug for UsbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbSession")
            .field("label", &self.label)
            .field("interface", &self.interface)
            .field("endpoint_out", &self.endpoint_out)
            .field("endpoint_in", &self.endpoint_in)
            .finish()
    }
}

impl UsbSession {
    /// Find, open and claim the printer matching the given ids.
    pub async fn open(vendor_id: u16, product_id: u16, serial: Option<&str>) -> Result<Self> {
        let serial = serial.map(String::from);
        let label = format!("usb://{vendor_id:04x}:{product_id:04x}");

        let session = tokio::task::spawn_blocking(move || {
            open_blocking(vendor_id, product_id, serial.as_deref())
        })
        .await
        .map_err(|e| EtikettError::Transport(format!("usb open task: {e}")))??;

        info!(device = %label, "USB printer session opened");
        Ok(session)
    }

    /// Write the full buffer via bulk OUT, retrying partial transfers.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let handle = Arc::clone(&self.handle);
        let endpoint = self.endpoint_out;
        let data = bytes.to_vec();
        let label = self.label.clone();

        let sent = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut sent = 0;
            let mut timeouts = 0u32;
            while sent < data.len() {
                let end = (sent + BULK_CHUNK).min(data.len());
                match handle.write_bulk(endpoint, &data[sent..end], WRITE_TIMEOUT) {
                    Ok(n) => {
                        sent += n;
                        timeouts = 0;
                    }
                    Err(rusb::Error::Timeout) => {
                        timeouts += 1;
                        if timeouts >= MAX_WRITE_TIMEOUTS {
                            return Err(EtikettError::Transport(format!(
                                "{label}: bulk write stalled at byte {sent}"
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(EtikettError::Transport(format!(
                            "{label}: bulk write at byte {sent}: {e}"
                        )));
                    }
                }
            }
            Ok(sent)
        })
        .await
        .map_err(|e| EtikettError::Transport(format!("usb write task: {e}")))??;

        debug!(device = %self.label, sent, "bulk write complete");
        Ok(sent)
    }

    /// Read one status byte from bulk IN if the device offers one.
    ///
    /// Devices without an IN endpoint report `Ready` — delivery relies on
    /// write timeouts for backpressure there.
    pub async fn poll(&mut self) -> Result<DeviceStatus> {
        let Some(endpoint) = self.endpoint_in else {
            return Ok(DeviceStatus::Ready);
        };

        let handle = Arc::clone(&self.handle);
        let status = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8];
            match handle.read_bulk(endpoint, &mut buf, POLL_TIMEOUT) {
                Ok(0) | Err(rusb::Error::Timeout) => DeviceStatus::Ready,
                Ok(n) => parse_status_byte(buf[n - 1]),
                Err(rusb::Error::NoDevice) => DeviceStatus::Offline,
                Err(e) => {
                    warn!(error = %e, "status read failed — treating device as offline");
                    DeviceStatus::Offline
                }
            }
        })
        .await
        .map_err(|e| EtikettError::Transport(format!("usb poll task: {e}")))?;

        Ok(status)
    }

    /// Release the claimed interface.
    pub async fn close(&mut self) -> Result<()> {
        let handle = Arc::clone(&self.handle);
        let interface = self.interface;
        let label = self.label.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = handle.release_interface(interface) {
                warn!(device = %label, error = %e, "release interface failed");
            }
        })
        .await
        .map_err(|e| EtikettError::Transport(format!("usb close task: {e}")))?;

        debug!(device = %self.label, "USB session closed");
        Ok(())
    }
}

/// Blocking half of device open: scan, match, claim, resolve endpoints.
fn open_blocking(
    vendor_id: u16,
    product_id: u16,
    serial: Option<&str>,
) -> Result<UsbSession> {
    let devices = rusb::devices()
        .map_err(|e| EtikettError::Transport(format!("enumerate usb devices: {e}")))?;

    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if descriptor.vendor_id() != vendor_id || descriptor.product_id() != product_id {
            continue;
        }

        let handle = device
            .open()
            .map_err(|e| EtikettError::Transport(format!("open usb device: {e}")))?;

        if let Some(want) = serial {
            let got = descriptor
                .serial_number_string_index()
                .and_then(|_| handle.read_serial_number_string_ascii(&descriptor).ok());
            if got.as_deref() != Some(want) {
                continue;
            }
        }

        return claim_printer_interface(&device, handle, vendor_id, product_id);
    }

    Err(EtikettError::Transport(format!(
        "no usb device {vendor_id:04x}:{product_id:04x} found"
    )))
}

/// Claim the printer-class interface and resolve its bulk endpoints.
fn claim_printer_interface(
    device: &Device<GlobalContext>,
    handle: DeviceHandle<GlobalContext>,
    vendor_id: u16,
    product_id: u16,
) -> Result<UsbSession> {
    let config = device
        .active_config_descriptor()
        .map_err(|e| EtikettError::Transport(format!("read config descriptor: {e}")))?;

    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.class_code() != USB_CLASS_PRINTER {
                continue;
            }

            let mut endpoint_out = None;
            let mut endpoint_in = None;
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != rusb::TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    rusb::Direction::Out => endpoint_out = Some(endpoint.address()),
                    rusb::Direction::In => endpoint_in = Some(endpoint.address()),
                }
            }

            let Some(endpoint_out) = endpoint_out else {
                continue;
            };

            let number = descriptor.interface_number();
            if handle.kernel_driver_active(number).unwrap_or(false) {
                handle
                    .detach_kernel_driver(number)
                    .map_err(|e| EtikettError::Transport(format!("detach kernel driver: {e}")))?;
            }
            handle
                .claim_interface(number)
                .map_err(|e| EtikettError::Transport(format!("claim interface {number}: {e}")))?;

            return Ok(UsbSession {
                handle: Arc::new(handle),
                interface: number,
                endpoint_out,
                endpoint_in,
                label: format!("usb://{vendor_id:04x}:{product_id:04x}"),
            });
        }
    }

    Err(EtikettError::Transport(format!(
        "usb device {vendor_id:04x}:{product_id:04x} has no printer interface"
    )))
}

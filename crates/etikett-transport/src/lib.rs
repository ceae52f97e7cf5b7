// SPDX-License-Identifier: Apache-2.0
//
// Etikett Transport — byte-level sessions to physical printers.
//
// A session moves one job's command stream to one printer over a raw TCP
// socket (JetDirect-style) or USB bulk endpoints, and exposes coarse
// status for backpressure.  Sessions are exclusively owned by the
// printer's job processor; only one exists per printer at a time because
// only one job per printer is ever active.
//
// The [`Transport`] trait is the seam the job processor is generic over:
// production code opens a [`TransportSession`], tests drive the processor
// with a scripted session.

pub mod network;
pub mod usb;

pub use network::NetworkSession;
pub use usb::UsbSession;

use std::future::Future;

use etikett_core::error::Result;
use etikett_core::types::{DeviceAddress, DeviceStatus};

/// Byte-level session to one printer.
pub trait Transport: Send {
    /// Deliver `bytes` in full, chunked to the transport's maximum
    /// payload.  Partial writes are retried until the whole buffer is
    /// accepted or a hard I/O error occurs.  Returns the byte count
    /// written (always `bytes.len()` on success).
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Non-blocking status poll.  Never waits for the device; absence of
    /// status news reads as `Ready`.
    fn poll(&mut self) -> impl Future<Output = Result<DeviceStatus>> + Send;

    /// Close the session, flushing anything buffered.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// An open session to one printer, one variant per connection kind.
#[derive(Debug)]
pub enum TransportSession {
    Network(NetworkSession),
    Usb(UsbSession),
}

/// Open a session for the printer's configured address.
pub async fn open(address: &DeviceAddress) -> Result<TransportSession> {
    match address {
        DeviceAddress::Network { host, port } => Ok(TransportSession::Network(
            NetworkSession::open(host, *port).await?,
        )),
        DeviceAddress::Usb {
            vendor_id,
            product_id,
            serial,
        } => Ok(TransportSession::Usb(
            UsbSession::open(*vendor_id, *product_id, serial.as_deref()).await?,
        )),
    }
}

impl Transport for TransportSession {
    async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        match self {
            Self::Network(s) => s.write(bytes).await,
            Self::Usb(s) => s.write(bytes).await,
        }
    }

    async fn poll(&mut self) -> Result<DeviceStatus> {
        match self {
            Self::Network(s) => s.poll().await,
            Self::Usb(s) => s.poll().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Network(s) => s.close().await,
            Self::Usb(s) => s.close().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Status byte parsing
// ---------------------------------------------------------------------------

/// Status flag: device is printing/buffering.
pub const STATUS_BUSY: u8 = 0x01;

/// Status flag: out of labels.
pub const STATUS_OUT_OF_MEDIA: u8 = 0x02;

/// Status flag: cover or head latch open.
pub const STATUS_COVER_OPEN: u8 = 0x04;

/// Status flag: hard device error.
pub const STATUS_ERROR: u8 = 0x08;

/// Decode an unsolicited printer status byte.
///
/// Label printers report status as a flag byte on the read channel
/// (LabelWriter-style).  Error outranks cover-open outranks media-out
/// outranks busy; a zero byte means ready.
pub fn parse_status_byte(byte: u8) -> DeviceStatus {
    if byte & STATUS_ERROR != 0 {
        DeviceStatus::Offline
    } else if byte & STATUS_COVER_OPEN != 0 {
        DeviceStatus::CoverOpen
    } else if byte & STATUS_OUT_OF_MEDIA != 0 {
        DeviceStatus::OutOfMedia
    } else if byte & STATUS_BUSY != 0 {
        DeviceStatus::Busy
    } else {
        DeviceStatus::Ready
    }
}

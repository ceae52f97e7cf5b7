// SPDX-License-Identifier: Apache-2.0
//
// Core domain types for the Etikett label-print daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a configured printer.
///
/// Printers are addressed by *name* in IPP resource paths; the uuid is the
/// stable identity surviving renames and is what job records reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrinterId(pub Uuid);

impl PrinterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PrinterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PrinterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Queued, waiting to be processed.
    Pending,
    /// Currently being rendered/delivered to the printer.
    Processing,
    /// Successfully printed.
    Completed,
    /// Processing failed — see the job's error field.
    Aborted,
    /// Cancelled before or during processing.
    Canceled,
}

impl JobState {
    /// IPP `job-state` enum value (RFC 8011 §5.3.7).
    pub fn ipp_enum_value(&self) -> i32 {
        match self {
            Self::Pending => 3,
            Self::Processing => 5,
            Self::Canceled => 7,
            Self::Aborted => 8,
            Self::Completed => 9,
        }
    }

    /// IPP `job-state-reasons` keyword for this state.
    pub fn ipp_reason_keyword(&self) -> &'static str {
        match self {
            Self::Pending => "none",
            Self::Processing => "job-printing",
            Self::Completed => "job-completed-successfully",
            Self::Canceled => "job-canceled-by-user",
            Self::Aborted => "aborted-by-system",
        }
    }

    /// Whether the state is terminal (job will never process again).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Canceled)
    }
}

/// Current state of a printer, as reported in `printer-state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterState {
    /// Ready to accept the next job.
    Idle,
    /// A job is being delivered to the hardware.
    Processing,
    /// Hardware reported a blocking condition; jobs queue until it clears.
    Stopped,
}

impl PrinterState {
    /// IPP `printer-state` enum value (RFC 8011 §5.4.11).
    pub fn ipp_enum_value(&self) -> i32 {
        match self {
            Self::Idle => 3,
            Self::Processing => 4,
            Self::Stopped => 5,
        }
    }
}

/// Coarse device status reported by a transport poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// Device is accepting data.
    Ready,
    /// Device is printing/buffering; delivery should pause briefly.
    Busy,
    /// Out of labels/media.
    OutOfMedia,
    /// Cover or head latch is open.
    CoverOpen,
    /// Device is gone (unplugged, connection dropped).
    Offline,
}

impl DeviceStatus {
    /// Whether delivery should wait rather than fail.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Busy | Self::OutOfMedia | Self::CoverOpen)
    }
}

/// `printer-state-reasons` keywords surfaced to IPP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateReason {
    MediaEmpty,
    CoverOpen,
    Offline,
    Other,
}

impl StateReason {
    /// IPP keyword for this reason.
    pub fn ipp_keyword(&self) -> &'static str {
        match self {
            Self::MediaEmpty => "media-empty",
            Self::CoverOpen => "cover-open",
            Self::Offline => "offline",
            Self::Other => "other",
        }
    }

    /// Map a blocking/terminal device status to the reason keyword the
    /// dispatcher surfaces.  `Ready` and `Busy` carry no reason.
    pub fn from_status(status: DeviceStatus) -> Option<Self> {
        match status {
            DeviceStatus::Ready | DeviceStatus::Busy => None,
            DeviceStatus::OutOfMedia => Some(Self::MediaEmpty),
            DeviceStatus::CoverOpen => Some(Self::CoverOpen),
            DeviceStatus::Offline => Some(Self::Offline),
        }
    }
}

impl std::fmt::Display for StateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ipp_keyword())
    }
}

/// The printer families Etikett ships drivers for.
///
/// A closed set: adding a family means adding a variant (and a driver),
/// never branching on type codes at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Zebra Programming Language (ZPL II) printers.
    Zpl,
    /// Eltron Programming Language (EPL2) printers.
    Epl2,
    /// DYMO LabelWriter printers.
    Dymo,
}

impl DriverKind {
    /// The stable keyword used in configuration files and logs.
    pub fn as_keyword(&self) -> &'static str {
        match self {
            Self::Zpl => "zpl",
            Self::Epl2 => "epl2",
            Self::Dymo => "dymo",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "zpl" => Some(Self::Zpl),
            "epl2" => Some(Self::Epl2),
            "dymo" => Some(Self::Dymo),
            _ => None,
        }
    }
}

/// How to reach a physical printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceAddress {
    /// Raw TCP socket (JetDirect-style, default port 9100).
    Network { host: String, port: u16 },
    /// USB bulk endpoints, matched by vendor/product id and optional serial.
    Usb {
        vendor_id: u16,
        product_id: u16,
        serial: Option<String>,
    },
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network { host, port } => write!(f, "socket://{host}:{port}"),
            Self::Usb {
                vendor_id,
                product_id,
                serial,
            } => match serial {
                Some(sn) => write!(f, "usb://{vendor_id:04x}:{product_id:04x}?serial={sn}"),
                None => write!(f, "usb://{vendor_id:04x}:{product_id:04x}"),
            },
        }
    }
}

/// Standard label media sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelMedia {
    /// 1.125 x 3.5 in address label.
    Address,
    /// 1.4 x 3.5 in large address label.
    LargeAddress,
    /// 2.125 x 4 in shipping label.
    Shipping,
    /// 2 x 3 in multipurpose label.
    TwoByThree,
    /// 4 x 6 in shipping/index label.
    FourBySix,
    Custom { width_mm: u32, height_mm: u32 },
}

impl LabelMedia {
    /// Dimensions in millimetres (width, height).
    pub fn dimensions_mm(&self) -> (u32, u32) {
        match self {
            Self::Address => (29, 89),
            Self::LargeAddress => (36, 89),
            Self::Shipping => (54, 102),
            Self::TwoByThree => (51, 76),
            Self::FourBySix => (102, 152),
            Self::Custom {
                width_mm,
                height_mm,
            } => (*width_mm, *height_mm),
        }
    }

    /// IPP `media` keyword (PWG 5101.1 self-describing names).
    pub fn ipp_media_keyword(&self) -> &'static str {
        match self {
            Self::Address => "oe_address-label_1.125x3.5in",
            Self::LargeAddress => "oe_large-address-label_1.4x3.5in",
            Self::Shipping => "oe_shipping-label_2.125x4in",
            Self::TwoByThree => "oe_multipurpose-label_2x3in",
            Self::FourBySix => "na_index-4x6_4x6in",
            Self::Custom { .. } => "custom",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "oe_address-label_1.125x3.5in" => Some(Self::Address),
            "oe_large-address-label_1.4x3.5in" => Some(Self::LargeAddress),
            "oe_shipping-label_2.125x4in" => Some(Self::Shipping),
            "oe_multipurpose-label_2x3in" => Some(Self::TwoByThree),
            "na_index-4x6_4x6in" => Some(Self::FourBySix),
            _ => None,
        }
    }

    /// All standard sizes, for capability listings.
    pub fn standard_sizes() -> &'static [LabelMedia] {
        &[
            Self::Address,
            Self::LargeAddress,
            Self::Shipping,
            Self::TwoByThree,
            Self::FourBySix,
        ]
    }
}

/// Label orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Portrait,
    Landscape,
    ReversePortrait,
    ReverseLandscape,
}

impl Orientation {
    /// IPP `orientation-requested` enum value (RFC 8011 §5.2.10).
    pub fn ipp_enum_value(&self) -> i32 {
        match self {
            Self::Portrait => 3,
            Self::Landscape => 4,
            Self::ReversePortrait => 5,
            Self::ReverseLandscape => 6,
        }
    }

    pub fn from_ipp_enum(v: i32) -> Option<Self> {
        match v {
            3 => Some(Self::Portrait),
            4 => Some(Self::Landscape),
            5 => Some(Self::ReversePortrait),
            6 => Some(Self::ReverseLandscape),
            _ => None,
        }
    }
}

/// Supported input document formats.
///
/// Drivers consume decoded raster; `Raw` bypasses the driver entirely and
/// streams printer-native bytes as submitted (the escape hatch for clients
/// that render their own command streams).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Png,
    Jpeg,
    Raw,
}

impl DocumentFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Raw => "application/octet-stream",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/png" => Some(Self::Png),
            "image/jpeg" => Some(Self::Jpeg),
            "application/octet-stream" => Some(Self::Raw),
            _ => None,
        }
    }
}

/// Requested attributes for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttributes {
    pub media: LabelMedia,
    pub copies: u32,
    pub orientation: Orientation,
    /// Print darkness 0-100; drivers map it onto their native scale.
    pub darkness: u8,
}

impl Default for JobAttributes {
    fn default() -> Self {
        Self {
            media: LabelMedia::Address,
            copies: 1,
            orientation: Orientation::Portrait,
            darkness: 50,
        }
    }
}

/// Capabilities a driver exposes for its printer family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub make_and_model: String,
    pub media_supported: Vec<LabelMedia>,
    /// Print resolution in dots per inch.
    pub resolution_dpi: u32,
    /// Maximum printable width in dots at that resolution.
    pub max_width_dots: u32,
    pub formats_supported: Vec<DocumentFormat>,
}

/// A configured printer, owned by the registry for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Printer {
    pub id: PrinterId,
    pub name: String,
    pub uri: String,
    pub driver: DriverKind,
    pub address: DeviceAddress,
    pub state: PrinterState,
    pub reasons: Vec<StateReason>,
    pub default_media: LabelMedia,
    pub capabilities: DriverCapabilities,
    /// Admin-settable description attributes (Set-Printer-Attributes).
    pub location: Option<String>,
    pub info: Option<String>,
    pub geo_location: Option<String>,
    pub organization: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of one job as stored/queried.  Job ids are per-printer,
/// monotonically increasing, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i32,
    pub printer: PrinterId,
    pub user: String,
    pub name: String,
    pub format: DocumentFormat,
    /// SHA-256 of the document bytes, hex-encoded.
    pub document_hash: String,
    pub document_len: u64,
    pub attributes: JobAttributes,
    pub state: JobState,
    pub error_message: Option<String>,
    /// Set on Cancel-Job for a Processing job; observed cooperatively by
    /// the processor at page boundaries.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// SPDX-License-Identifier: Apache-2.0
//
// Etikett Driver — per-family conversion of raster pages into
// printer-native command streams.
//
// Each supported printer family is one variant of the closed [`Driver`]
// enum.  The job processor only ever calls through the [`LabelDriver`]
// capability interface; the variant is selected once when a printer is
// configured, from its declared [`DriverKind`].  Adding a family means
// adding a variant and a module here — call sites never branch on type
// codes.
//
// A rendered page is a finite sequence of [`CommandChunk`]s bracketed by
// page markers.  Rendering consumes driver-internal state (registered
// label geometry, page counters), so a page cannot be re-rendered; retry
// is handled at the job level by resubmission.

pub mod raster;

mod dymo;
mod epl2;
mod zpl;

pub use dymo::DymoDriver;
pub use epl2::Epl2Driver;
pub use zpl::ZplDriver;

use etikett_core::error::Result;
use etikett_core::types::{DriverCapabilities, DriverKind, JobAttributes};

use crate::raster::RasterPage;

/// Upper bound on one data chunk handed to the transport.
///
/// Kept below typical USB bulk-transfer and socket buffer sizes so the
/// processor can interleave status polls between writes.
pub const MAX_CHUNK_BYTES: usize = 8 * 1024;

/// One element of a driver command stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandChunk {
    /// Printer-native bytes to deliver in order.
    Data(Vec<u8>),
    /// Structural marker: rendering of page `n` (0-based) begins.
    PageStart(u32),
    /// Structural marker: page `n` is complete.  The processor's
    /// cancellation checkpoint.
    PageEnd(u32),
}

impl CommandChunk {
    /// Payload length; markers carry no bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Data(bytes) => bytes.len(),
            Self::PageStart(_) | Self::PageEnd(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split a command buffer into bounded data chunks.
fn push_data(chunks: &mut Vec<CommandChunk>, bytes: Vec<u8>) {
    if bytes.len() <= MAX_CHUNK_BYTES {
        if !bytes.is_empty() {
            chunks.push(CommandChunk::Data(bytes));
        }
        return;
    }
    for piece in bytes.chunks(MAX_CHUNK_BYTES) {
        chunks.push(CommandChunk::Data(piece.to_vec()));
    }
}

/// The capability interface the job processor drives.
pub trait LabelDriver {
    /// Static capabilities of this printer family.
    fn identify(&self) -> DriverCapabilities;

    /// Produce the leading command bytes for a job (darkness, geometry
    /// registration).  Called exactly once, before any page.
    fn start_job(&mut self, attrs: &JobAttributes) -> Result<Vec<u8>>;

    /// Render one raster page into a finite chunk sequence bracketed by
    /// `PageStart`/`PageEnd` markers.  Consumes internal per-job state;
    /// a page cannot be rendered twice.
    fn render_page(&mut self, page: &RasterPage) -> Result<Vec<CommandChunk>>;

    /// Produce the trailing command bytes for a job.  Called exactly
    /// once, after the last page.
    fn end_job(&mut self) -> Result<Vec<u8>>;
}

/// The closed set of supported printer families.
#[derive(Debug)]
pub enum Driver {
    Zpl(ZplDriver),
    Epl2(Epl2Driver),
    Dymo(DymoDriver),
}

impl Driver {
    /// Instantiate the driver for a printer's configured family.
    pub fn for_kind(kind: DriverKind) -> Self {
        match kind {
            DriverKind::Zpl => Self::Zpl(ZplDriver::new()),
            DriverKind::Epl2 => Self::Epl2(Epl2Driver::new()),
            DriverKind::Dymo => Self::Dymo(DymoDriver::new()),
        }
    }

    /// Capabilities without instantiating per-job state, for registry use.
    pub fn capabilities(kind: DriverKind) -> DriverCapabilities {
        Self::for_kind(kind).identify()
    }
}

impl LabelDriver for Driver {
    fn identify(&self) -> DriverCapabilities {
        match self {
            Self::Zpl(d) => d.identify(),
            Self::Epl2(d) => d.identify(),
            Self::Dymo(d) => d.identify(),
        }
    }

    fn start_job(&mut self, attrs: &JobAttributes) -> Result<Vec<u8>> {
        match self {
            Self::Zpl(d) => d.start_job(attrs),
            Self::Epl2(d) => d.start_job(attrs),
            Self::Dymo(d) => d.start_job(attrs),
        }
    }

    fn render_page(&mut self, page: &RasterPage) -> Result<Vec<CommandChunk>> {
        match self {
            Self::Zpl(d) => d.render_page(page),
            Self::Epl2(d) => d.render_page(page),
            Self::Dymo(d) => d.render_page(page),
        }
    }

    fn end_job(&mut self) -> Result<Vec<u8>> {
        match self {
            Self::Zpl(d) => d.end_job(),
            Self::Epl2(d) => d.end_job(),
            Self::Dymo(d) => d.end_job(),
        }
    }
}

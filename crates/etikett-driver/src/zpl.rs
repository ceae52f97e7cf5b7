// SPDX-License-Identifier: Apache-2.0
//
// ZPL II driver for Zebra thermal label printers.
//
// Each page becomes one label format: a `^GFA` ASCII-hex graphic field
// inside `^XA`/`^XZ` brackets, with `^PQ` for copies.  Darkness maps the
// job's 0-100 scale onto ZPL's 0-30 `~SD` scale.

use etikett_core::error::Result;
use etikett_core::types::{DocumentFormat, DriverCapabilities, JobAttributes, LabelMedia};

use crate::raster::RasterPage;
use crate::{push_data, CommandChunk, LabelDriver};

/// 203 dpi head, 4.09 in printable width.
const ZPL_DPI: u32 = 203;
const ZPL_MAX_WIDTH_DOTS: u32 = 832;

#[derive(Debug, Default)]
pub struct ZplDriver {
    attrs: JobAttributes,
    /// Pages rendered so far; also the 0-based index of the next page.
    pages: u32,
    /// Running count of graphic bytes emitted, reported at end of job.
    graphic_bytes: usize,
}

impl ZplDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelDriver for ZplDriver {
    fn identify(&self) -> DriverCapabilities {
        DriverCapabilities {
            make_and_model: "Zebra ZPL Label Printer".into(),
            media_supported: LabelMedia::standard_sizes().to_vec(),
            resolution_dpi: ZPL_DPI,
            max_width_dots: ZPL_MAX_WIDTH_DOTS,
            formats_supported: vec![
                DocumentFormat::Png,
                DocumentFormat::Jpeg,
                DocumentFormat::Raw,
            ],
        }
    }

    fn start_job(&mut self, attrs: &JobAttributes) -> Result<Vec<u8>> {
        self.attrs = attrs.clone();
        self.pages = 0;
        self.graphic_bytes = 0;

        // ~SD: set darkness, 0-30.
        let darkness = (attrs.darkness as u32 * 30) / 100;
        Ok(format!("~SD{darkness:02}").into_bytes())
    }

    fn render_page(&mut self, page: &RasterPage) -> Result<Vec<CommandChunk>> {
        let index = self.pages;
        self.pages += 1;
        self.graphic_bytes += page.len();

        let total = page.len();
        let bpr = page.bytes_per_row;

        let mut chunks = vec![CommandChunk::PageStart(index)];

        // ^GFA,<total>,<total>,<bytes-per-row>, then hex rows.
        let header = format!("^XA^FO0,0^GFA,{total},{total},{bpr},");
        push_data(&mut chunks, header.into_bytes());

        // Hex data, one row per line so large labels stream in bounded
        // pieces.
        let mut hex = String::with_capacity(bpr * 2 + 1);
        let mut body = Vec::with_capacity(total * 2 + page.height as usize);
        for y in 0..page.height {
            hex.clear();
            for byte in page.row(y) {
                hex.push_str(&format!("{byte:02X}"));
            }
            hex.push('\n');
            body.extend_from_slice(hex.as_bytes());
        }
        push_data(&mut chunks, body);

        let trailer = format!("^FS^PQ{},0,1,Y^XZ", self.attrs.copies.max(1));
        push_data(&mut chunks, trailer.into_bytes());

        chunks.push(CommandChunk::PageEnd(index));
        Ok(chunks)
    }

    fn end_job(&mut self) -> Result<Vec<u8>> {
        tracing::debug!(
            pages = self.pages,
            graphic_bytes = self.graphic_bytes,
            "ZPL job rendered"
        );
        // No trailer needed: each label format is self-contained.
        Ok(Vec::new())
    }
}

// SPDX-License-Identifier: Apache-2.0
//
// EPL2 driver for Eltron/Zebra desktop label printers.
//
// Each page is one form: `N` (clear image buffer), `q`/`Q` geometry,
// `GW` direct graphic write, `P` to print.  EPL2 graphics are inverted
// relative to our raster convention: a 0 bit prints black, so packed
// rows are complemented before transmission.

use etikett_core::error::Result;
use etikett_core::types::{DocumentFormat, DriverCapabilities, JobAttributes, LabelMedia};

use crate::raster::RasterPage;
use crate::{push_data, CommandChunk, LabelDriver};

const EPL_DPI: u32 = 203;
const EPL_MAX_WIDTH_DOTS: u32 = 832;

/// Default gap between labels in dots (1/8 in at 203 dpi).
const LABEL_GAP_DOTS: u32 = 24;

#[derive(Debug, Default)]
pub struct Epl2Driver {
    attrs: JobAttributes,
    pages: u32,
}

impl Epl2Driver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelDriver for Epl2Driver {
    fn identify(&self) -> DriverCapabilities {
        DriverCapabilities {
            make_and_model: "Eltron EPL2 Label Printer".into(),
            media_supported: LabelMedia::standard_sizes().to_vec(),
            resolution_dpi: EPL_DPI,
            max_width_dots: EPL_MAX_WIDTH_DOTS,
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

        // D: density 0-15.  A stray partial line before the first command
        // is discarded by the leading newline.
        let density = (attrs.darkness as u32 * 15) / 100;
        Ok(format!("\r\nD{density}\r\n").into_bytes())
    }

    fn render_page(&mut self, page: &RasterPage) -> Result<Vec<CommandChunk>> {
        let index = self.pages;
        self.pages += 1;

        let mut chunks = vec![CommandChunk::PageStart(index)];

        let header = format!(
            "N\r\nq{}\r\nQ{},{}\r\nGW0,0,{},{},",
            page.width, page.height, LABEL_GAP_DOTS, page.bytes_per_row, page.height
        );
        push_data(&mut chunks, header.into_bytes());

        // GW takes raw binary rows, 0 = black.
        let mut body = Vec::with_capacity(page.len());
        for byte in &page.data {
            body.push(!byte);
        }
        push_data(&mut chunks, body);

        let trailer = format!("\r\nP{}\r\n", self.attrs.copies.max(1));
        push_data(&mut chunks, trailer.into_bytes());

        chunks.push(CommandChunk::PageEnd(index));
        Ok(chunks)
    }

    fn end_job(&mut self) -> Result<Vec<u8>> {
        tracing::debug!(pages = self.pages, "EPL2 job rendered");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_data(chunks: &[CommandChunk]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            if let CommandChunk::Data(bytes) = chunk {
                out.extend_from_slice(bytes);
            }
        }
        out
    }

    #[test]
    fn graphic_bytes_are_inverted() {
        let page = RasterPage {
            width: 8,
            height: 1,
            bytes_per_row: 1,
            data: vec![0xF0],
        };
        let mut driver = Epl2Driver::new();
        driver
            .start_job(&JobAttributes::default())
            .expect("start_job");
        let data = collect_data(&driver.render_page(&page).expect("render_page"));

        // The inverted graphic byte 0x0F must appear after the GW header.
        let header_end = data
            .windows(3)
            .position(|w| w == b"GW0")
            .expect("GW command present");
        assert!(data[header_end..].contains(&0x0Fu8));
        assert!(!data[header_end..].contains(&0xF0u8));
    }

    #[test]
    fn form_geometry_matches_page() {
        let page = RasterPage {
            width: 16,
            height: 3,
            bytes_per_row: 2,
            data: vec![0u8; 6],
        };
        let mut driver = Epl2Driver::new();
        driver
            .start_job(&JobAttributes::default())
            .expect("start_job");
        let data = collect_data(&driver.render_page(&page).expect("render_page"));
        let text = String::from_utf8_lossy(&data);

        assert!(text.contains("q16\r\n"));
        assert!(text.contains("Q3,24\r\n"));
        assert!(text.contains("GW0,0,2,3,"));
        assert!(text.ends_with("P1\r\n"));
    }

    #[test]
    fn density_maps_onto_epl_scale() {
        let mut driver = Epl2Driver::new();
        let mut attrs = JobAttributes::default();
        attrs.darkness = 100;
        let lead = driver.start_job(&attrs).expect("start_job");
        assert_eq!(lead, b"\r\nD15\r\n");
    }
}

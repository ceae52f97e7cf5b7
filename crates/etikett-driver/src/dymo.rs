// SPDX-License-Identifier: Apache-2.0
//
// DYMO LabelWriter driver.
//
// LabelWriters speak a byte-oriented ESC protocol: the label geometry is
// registered once per job (ESC D bytes-per-line, ESC L label length) and
// every subsequent row is a SYN byte followed by the packed row.  ESC E
// feeds to the next label, ESC @ resets at end of job.
//
// The registered geometry is per-job driver state: the first page fixes
// bytes-per-line and label length, later pages reuse them without
// re-registering.  This is what makes a page non-restartable here.

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{DocumentFormat, DriverCapabilities, JobAttributes, LabelMedia};

use crate::raster::RasterPage;
use crate::{push_data, CommandChunk, LabelDriver};

const DYMO_DPI: u32 = 300;
/// 2.25 in head at 300 dpi, rounded down to a byte boundary.
const DYMO_MAX_WIDTH_DOTS: u32 = 672;

/// Start-of-row marker.
const SYN: u8 = 0x16;
const ESC: u8 = 0x1B;

#[derive(Debug, Default)]
pub struct DymoDriver {
    attrs: JobAttributes,
    pages: u32,
    /// Geometry registered by the first page; later pages must match.
    registered: Option<(usize, u32)>,
}

impl DymoDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelDriver for DymoDriver {
    fn identify(&self) -> DriverCapabilities {
        DriverCapabilities {
            make_and_model: "DYMO LabelWriter".into(),
            media_supported: vec![
                LabelMedia::Address,
                LabelMedia::LargeAddress,
                LabelMedia::Shipping,
            ],
            resolution_dpi: DYMO_DPI,
            max_width_dots: DYMO_MAX_WIDTH_DOTS,
            formats_supported: vec![DocumentFormat::Png, DocumentFormat::Jpeg],
        }
    }

    fn start_job(&mut self, attrs: &JobAttributes) -> Result<Vec<u8>> {
        self.attrs = attrs.clone();
        self.pages = 0;
        self.registered = None;

        // ESC e: text quality; ESC i: normal print density band around
        // the 0-100 midpoint (c/d/e/g = light..darkest).
        let density_cmd = match attrs.darkness {
            0..=25 => b'c',
            26..=50 => b'e',
            51..=75 => b'd',
            _ => b'g',
        };
        Ok(vec![ESC, b'e', ESC, density_cmd])
    }

    fn render_page(&mut self, page: &RasterPage) -> Result<Vec<CommandChunk>> {
        let index = self.pages;
        self.pages += 1;

        let mut chunks = vec![CommandChunk::PageStart(index)];
        let mut out = Vec::with_capacity(page.len() + page.height as usize + 16);

        match self.registered {
            None => {
                // ESC D n: bytes per line.  ESC L nl nh: label length in
                // rows, little-endian.
                out.extend_from_slice(&[ESC, b'D', page.bytes_per_row as u8]);
                let rows = page.height as u16;
                out.extend_from_slice(&[ESC, b'L', (rows & 0xFF) as u8, (rows >> 8) as u8]);
                self.registered = Some((page.bytes_per_row, page.height));
            }
            Some((bpr, height)) => {
                if bpr != page.bytes_per_row || height != page.height {
                    return Err(EtikettError::Driver(format!(
                        "page {index} geometry {}x{} does not match registered label {bpr}x{height}",
                        page.bytes_per_row, page.height
                    )));
                }
            }
        }

        for _ in 0..self.attrs.copies.max(1) {
            for y in 0..page.height {
                out.push(SYN);
                out.extend_from_slice(page.row(y));
            }
            // ESC E: form feed to the next label.
            out.extend_from_slice(&[ESC, b'E']);
        }

        push_data(&mut chunks, out);
        chunks.push(CommandChunk::PageEnd(index));
        Ok(chunks)
    }

    fn end_job(&mut self) -> Result<Vec<u8>> {
        tracing::debug!(pages = self.pages, "DYMO job rendered");
        // ESC @: reset to defaults for the next job.
        Ok(vec![ESC, b'@'])
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

    fn page(height: u32) -> RasterPage {
        RasterPage {
            width: 16,
            height,
            bytes_per_row: 2,
            data: vec![0xAA; 2 * height as usize],
        }
    }

    #[test]
    fn first_page_registers_geometry() {
        let mut driver = DymoDriver::new();
        driver
            .start_job(&JobAttributes::default())
            .expect("start_job");
        let data = collect_data(&driver.render_page(&page(3)).expect("render_page"));

        assert_eq!(&data[0..3], &[ESC, b'D', 2]);
        assert_eq!(&data[3..7], &[ESC, b'L', 3, 0]);
        // Each row starts with SYN.
        assert_eq!(data[7], SYN);
    }

    #[test]
    fn second_page_reuses_registration() {
        let mut driver = DymoDriver::new();
        driver
            .start_job(&JobAttributes::default())
            .expect("start_job");
        driver.render_page(&page(3)).expect("page 0");
        let data = collect_data(&driver.render_page(&page(3)).expect("page 1"));

        // No ESC D re-registration: the stream starts straight at row data.
        assert_eq!(data[0], SYN);
    }

    #[test]
    fn mismatched_page_geometry_is_rejected() {
        let mut driver = DymoDriver::new();
        driver
            .start_job(&JobAttributes::default())
            .expect("start_job");
        driver.render_page(&page(3)).expect("page 0");
        let err = driver.render_page(&page(5)).expect_err("geometry mismatch");
        assert!(matches!(err, EtikettError::Driver(_)));
    }

    #[test]
    fn copies_repeat_the_label_with_form_feeds() {
        let mut driver = DymoDriver::new();
        let mut attrs = JobAttributes::default();
        attrs.copies = 2;
        driver.start_job(&attrs).expect("start_job");
        let data = collect_data(&driver.render_page(&page(2)).expect("render_page"));

        let feeds = data.windows(2).filter(|w| *w == [ESC, b'E']).count();
        assert_eq!(feeds, 2);
    }

    #[test]
    fn end_job_resets_the_printer() {
        let mut driver = DymoDriver::new();
        driver
            .start_job(&JobAttributes::default())
            .expect("start_job");
        assert_eq!(driver.end_job().expect("end_job"), vec![ESC, b'@']);
    }
}

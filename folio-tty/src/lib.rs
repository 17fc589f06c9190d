use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    terminal::{Clear, ClearType, WindowSize},
};
use folio_core::{Point, RenderImage};
use png::{BitDepth, ColorType, Encoder};

pub mod compose;
mod input;

pub use input::{EventMapper, PointerKind, UiEvent};

/// Maximum payload per kitty graphics escape.
const CHUNK_SIZE: usize = 4096;

/// Draws whole frames through the kitty graphics protocol. Every frame reuses
/// one image id, so the terminal replaces the previous frame in place.
pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    /// `image_id` must be non-zero; zero is coerced to 1. Hosts sharing a
    /// terminal with other kitty clients should pick distinct ids.
    pub fn new(writer: W, image_id: u32) -> Self {
        Self {
            writer,
            image_id: image_id.max(1),
        }
    }

    pub fn image_id(&self) -> u32 {
        self.image_id
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it over `params` cells at the
    /// cursor. An empty image removes the current frame instead.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        if image.is_empty() {
            return self.remove_frame();
        }
        let payload = BASE64.encode(encode_png(image)?);
        let mut chunks = payload.as_bytes().chunks(CHUNK_SIZE).peekable();
        let mut header = Some(format!(
            "a=T,f=100,C=1,q=2,i={},p=1,c={},r={},s={},v={},z=-1",
            self.image_id, params.columns, params.rows, image.width, image.height
        ));

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            match header.take() {
                Some(header) => write!(self.writer, "\u{1b}_G{header},m={more};")?,
                None => write!(self.writer, "\u{1b}_Gm={more},q=2;")?,
            }
            self.writer.write_all(chunk)?;
            self.writer.write_all(b"\x1b\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Deletes this renderer's image and its placements, leaving other
    /// clients' images alone.
    pub fn remove_frame(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,i={},q=2\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Ends a synchronized update; the terminal shows the buffered frame at
    /// once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        self.remove_frame()?;
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

fn encode_png(image: &RenderImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;
    Ok(buffer)
}

/// Maps terminal cells to pixels of the page area. The last row is kept for
/// the status line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGeometry {
    pub columns: u16,
    pub rows: u16,
    pub cell_width: f32,
    pub cell_height: f32,
}

impl CellGeometry {
    /// Terminals that do not report pixel sizes get a nominal 8x16 cell.
    pub fn from_window(window: &WindowSize) -> Self {
        let columns = window.columns.max(1);
        let rows = window.rows.max(2);
        let measured = |pixels: u16, cells: u16| {
            if pixels == 0 {
                None
            } else {
                Some(f32::from(pixels) / f32::from(cells))
            }
        };
        Self {
            columns,
            rows,
            cell_width: measured(window.width, columns).unwrap_or(8.0),
            cell_height: measured(window.height, rows).unwrap_or(16.0),
        }
    }

    pub fn image_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }

    /// Page area size in pixels.
    pub fn viewport(&self) -> (f32, f32) {
        (
            (f32::from(self.columns) * self.cell_width).floor(),
            (f32::from(self.image_rows()) * self.cell_height).floor(),
        )
    }

    /// Centre of a cell in page-area pixels.
    pub fn to_pixels(&self, column: u16, row: u16) -> Point {
        Point::new(
            (f32::from(column) + 0.5) * self.cell_width,
            (f32::from(row) + 0.5) * self.cell_height,
        )
    }

    pub fn line_height(&self) -> f32 {
        self.cell_height
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

// src/render.rs
//! Summary cards attached to the thread header.
//!
//! Each card lists up to eight bills: house rows on a light blue band, senate
//! rows on light gray, bill numbers in dark green (house) or navy (senate), and
//! the sponsor line coloured by party. Cards are laid out as SVG and rasterized
//! to PNG for upload; posted cards are moved into a dated archive folder.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use resvg::usvg;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bill::{BillRecord, ChamberType, Party};
use crate::config::CardFormat;
use crate::notify::MediaHandle;

pub const MAX_BILLS_PER_IMAGE: usize = 8;

const WIDTH: u32 = 1920;
const HEIGHT: u32 = 1080;
const PADDING: u32 = 40;
const TITLE_BAND: u32 = 90;
const TITLE_MAX_CHARS: usize = 110;

pub trait ImageRenderer: Send + Sync {
    /// Zero or more image files for `bills`. Callers treat errors as non-fatal.
    fn render(&self, bills: &[BillRecord]) -> Result<Vec<MediaHandle>>;
}

/// Splits `n` items into `ceil(n / max)` chunks whose sizes differ by at most one.
pub fn balanced_chunks<T>(items: &[T], max: usize) -> Vec<&[T]> {
    if items.is_empty() {
        return Vec::new();
    }
    let max = max.max(1);
    let parts = items.len().div_ceil(max);
    let base = items.len() / parts;
    let extra = items.len() % parts;

    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        out.push(&items[start..start + len]);
        start += len;
    }
    out
}

fn rgb((r, g, b): (u8, u8, u8)) -> String {
    format!("#{r:02X}{g:02X}{b:02X}")
}

fn row_background(c: &ChamberType) -> String {
    if c.is_house() {
        rgb((220, 230, 255))
    } else if c.is_senate() {
        rgb((245, 245, 245))
    } else {
        rgb((255, 255, 255))
    }
}

fn number_colour(c: &ChamberType) -> &'static str {
    if c.is_senate() {
        "#0A2A5E"
    } else {
        "#2F4F2F"
    }
}

fn party_colour(p: Party) -> &'static str {
    match p {
        Party::D => "#00AEF3",
        Party::R => "#E9141D",
        _ => "#646464",
    }
}

fn esc(s: &str) -> String {
    html_escape::encode_text(s).to_string()
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

static FONTS: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    Arc::new(db)
});

/// Rasterizes an SVG document to PNG bytes at its own size.
pub fn rasterize_png(svg: &str) -> Result<Vec<u8>> {
    let opt = usvg::Options {
        fontdb: FONTS.clone(),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(svg, &opt).context("parsing summary card")?;
    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .context("allocating summary card pixmap")?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
    pixmap.encode_png().context("encoding summary card")
}

/// Writes one card per chunk into `output_dir`, PNG unless told otherwise.
pub struct CardRenderer {
    output_dir: PathBuf,
    format: CardFormat,
}

impl CardRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: CardFormat::Png,
        }
    }

    pub fn with_format(mut self, format: CardFormat) -> Self {
        self.format = format;
        self
    }

    pub fn render_at(&self, bills: &[BillRecord], now: DateTime<Utc>) -> Result<Vec<MediaHandle>> {
        let chunks = balanced_chunks(bills, MAX_BILLS_PER_IMAGE);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating {}", self.output_dir.display()))?;

        let stamp = now.format("%Y%m%d-%H%M%S");
        let total = chunks.len();
        let mut out = Vec::with_capacity(total);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let svg = card_svg(chunk, now, i + 1, total);
            let (bytes, ext) = match self.format {
                CardFormat::Png => (rasterize_png(&svg)?, "png"),
                CardFormat::Svg => (svg.into_bytes(), "svg"),
            };
            let path = self
                .output_dir
                .join(format!("fedbillsummary-{stamp}-{}.{ext}", i + 1));
            std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
            tracing::debug!(stage = "render", path = %path.display(), bills = chunk.len(), "summary card written");
            out.push(MediaHandle::from_path(path));
        }
        Ok(out)
    }
}

impl ImageRenderer for CardRenderer {
    fn render(&self, bills: &[BillRecord]) -> Result<Vec<MediaHandle>> {
        self.render_at(bills, Utc::now())
    }
}

/// Moves posted cards into `root/YYYY-MM-DD/`. Files already gone are skipped.
/// Returns the new paths.
pub fn archive_media(media: &[MediaHandle], root: &Path, day: NaiveDate) -> Result<Vec<PathBuf>> {
    if media.is_empty() {
        return Ok(Vec::new());
    }
    let dir = root.join(day.format("%Y-%m-%d").to_string());
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut moved = Vec::with_capacity(media.len());
    for m in media {
        let Some(name) = m.path.file_name() else {
            continue;
        };
        if !m.path.exists() {
            tracing::warn!(stage = "archive", path = %m.path.display(), "card missing; not archived");
            continue;
        }
        let dest = dir.join(name);
        if std::fs::rename(&m.path, &dest).is_err() {
            // Different filesystem.
            std::fs::copy(&m.path, &dest)
                .with_context(|| format!("copying {} to {}", m.path.display(), dest.display()))?;
            std::fs::remove_file(&m.path)
                .with_context(|| format!("removing {}", m.path.display()))?;
        }
        moved.push(dest);
    }
    tracing::info!(stage = "archive", dir = %dir.display(), count = moved.len(), "cards archived");
    Ok(moved)
}

/// One card. `part` is 1-based.
pub fn card_svg(bills: &[BillRecord], now: DateTime<Utc>, part: usize, parts: usize) -> String {
    let mut title = format!("@FedBillAlert Summary - {}", now.format("%Y-%m-%d %H:%M UTC"));
    if parts > 1 {
        let _ = write!(title, " (Part {part} of {parts}: {} bills)", bills.len());
    } else {
        let _ = write!(title, " ({} bills)", bills.len());
    }

    let rows = bills.len().max(1) as u32;
    let row_h = ((HEIGHT - 2 * PADDING - TITLE_BAND) / rows).min(120);
    let font = (row_h * 28 / 120).max(18);

    let mut svg = String::with_capacity(4096);
    let _ = writeln!(
        svg,
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="Arial, Helvetica, sans-serif">"##
    );
    let _ = writeln!(svg, r##"<rect width="100%" height="100%" fill="#FFFFFF"/>"##);
    let _ = writeln!(
        svg,
        r##"<text x="{PADDING}" y="{}" font-size="40" font-weight="bold" fill="#000000">{}</text>"##,
        PADDING + 40,
        esc(&title)
    );

    for (i, rec) in bills.iter().enumerate() {
        let y = PADDING + TITLE_BAND + i as u32 * row_h;
        let chamber = rec.key.chamber_type();
        let _ = writeln!(
            svg,
            r##"<rect x="{}" y="{y}" width="{}" height="{}" fill="{}"/>"##,
            PADDING / 2,
            WIDTH - PADDING,
            row_h.saturating_sub(6),
            row_background(chamber)
        );
        let line1 = y + row_h * 2 / 5;
        let line2 = y + row_h * 4 / 5;
        let _ = writeln!(
            svg,
            r##"<text x="{PADDING}" y="{line1}" font-size="{font}"><tspan font-weight="bold" fill="{}">{}</tspan><tspan fill="#000000"> - {}</tspan></text>"##,
            number_colour(chamber),
            esc(&rec.key.display_number()),
            esc(&shorten(&rec.title, TITLE_MAX_CHARS))
        );
        let _ = writeln!(
            svg,
            r##"<text x="{PADDING}" y="{line2}" font-size="{font}" fill="{}">Sponsor: {}</text>"##,
            party_colour(rec.sponsor_party()),
            esc(&rec.sponsor_display())
        );
    }
    svg.push_str("</svg>\n");
    svg
}

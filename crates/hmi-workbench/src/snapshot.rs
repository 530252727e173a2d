//! Static preview rendering for layout candidates.
//!
//! Output is a self-contained SVG: deterministic for a given candidate
//! and viewport, no external assets, no timestamps. The content hash is
//! computed unconditionally so callers can diff against a previous
//! render without writing anything.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::candidate::Candidate;

/// Maximum sections listed on a preview.
const SECTION_LIMIT: usize = 8;

/// Fixed preview viewports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
}

pub const VIEWPORTS: [Viewport; 3] = [
    Viewport {
        name: "desktop",
        width: 1280,
        height: 800,
    },
    Viewport {
        name: "tablet",
        width: 1024,
        height: 768,
    },
    Viewport {
        name: "mobile",
        width: 390,
        height: 844,
    },
];

/// Looks up a viewport by name.
#[must_use]
pub fn viewport(name: &str) -> Option<Viewport> {
    VIEWPORTS.iter().copied().find(|entry| entry.name == name)
}

/// A rendered preview and its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRender {
    pub svg: String,
    /// SHA-256 hex of the SVG bytes.
    pub hash: String,
}

/// Renders one candidate/viewport preview.
#[must_use]
pub fn render_snapshot(candidate: &Candidate, viewport: Viewport) -> SnapshotRender {
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 {} {}\">",
        viewport.width, viewport.height
    );
    let _ = writeln!(
        svg,
        "  <rect x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" fill=\"#f8fafc\"/>",
        viewport.width, viewport.height
    );
    let _ = writeln!(
        svg,
        "  <text x=\"32\" y=\"48\" font-size=\"24\" font-weight=\"700\" fill=\"#1f2937\">{}</text>",
        escape_text(&candidate.preview.title)
    );
    let _ = writeln!(
        svg,
        "  <text x=\"32\" y=\"74\" font-size=\"14\" fill=\"#64748b\">{} · rank {} · overall {:.2}</text>",
        escape_text(candidate.id.as_str()),
        candidate.rank,
        candidate.metrics.overall
    );

    let row_height = 56u32;
    let row_width = viewport.width.saturating_sub(64);
    for (index, section) in candidate
        .preview
        .sections
        .iter()
        .take(SECTION_LIMIT)
        .enumerate()
    {
        let y = 100 + index as u32 * (row_height + 12);
        let _ = writeln!(
            svg,
            "  <rect x=\"32\" y=\"{y}\" width=\"{row_width}\" height=\"{row_height}\" rx=\"8\" fill=\"#ffffff\" stroke=\"#e2e8f0\"/>"
        );
        let _ = writeln!(
            svg,
            "  <text x=\"48\" y=\"{}\" font-size=\"16\" font-weight=\"600\" fill=\"#1f2937\">{}</text>",
            y + 24,
            escape_text(&section.title)
        );
        let _ = writeln!(
            svg,
            "  <text x=\"48\" y=\"{}\" font-size=\"13\" fill=\"#64748b\">{} widgets</text>",
            y + 44,
            section.widget_ids.len()
        );
    }
    let hidden = candidate.preview.sections.len().saturating_sub(SECTION_LIMIT);
    if hidden > 0 {
        let y = 100 + SECTION_LIMIT as u32 * (row_height + 12);
        let _ = writeln!(
            svg,
            "  <text x=\"32\" y=\"{y}\" font-size=\"13\" fill=\"#94a3b8\">+{hidden} more sections</text>"
        );
    }
    svg.push_str("</svg>\n");

    let digest = Sha256::digest(svg.as_bytes());
    let mut hash = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hash, "{byte:02x}");
    }
    SnapshotRender { svg, hash }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Static PDF inspection built on `lopdf`.
//!
//! One [`inspect`] pass walks the document and collects everything the
//! content and quality layers need: page geometry, the text layer, font
//! embedding state, image resolution estimates, fill/stroke color usage,
//! and text-positioning operands that land outside the page box.

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object};
use std::collections::BTreeSet;
use std::path::Path;

/// Inspection failures.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    /// The file is not a readable PDF.
    #[error("unreadable pdf: {0}")]
    Parse(#[from] lopdf::Error),

    /// The document is structurally incomplete.
    #[error("malformed pdf: {0}")]
    Malformed(String),
}

/// One font referenced by the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontInfo {
    /// Font name with any subset prefix stripped.
    pub base_name: String,
    /// Whether a font program is embedded for it.
    pub embedded: bool,
    /// Whether the name carried a subset prefix (`ABCDEF+`).
    pub subset: bool,
}

/// Per-page observations.
#[derive(Debug, Clone)]
pub struct PageInfo {
    /// 1-based page number.
    pub number: u32,
    /// Media box width in points.
    pub width_pt: f64,
    /// Media box height in points.
    pub height_pt: f64,
    /// Extracted text of this page.
    pub text: String,
    /// Font sizes selected via `Tf` on this page, in order.
    pub font_sizes: Vec<f64>,
    /// Estimated effective DPI of each raster image on the page
    /// (approximated as if the image spans the page width).
    pub image_dpis: Vec<f64>,
    /// Text-positioning operands that fall outside the page box.
    pub offpage_positions: Vec<(f64, f64)>,
}

/// Whole-document inspection result.
#[derive(Debug, Clone)]
pub struct PdfInspection {
    /// Total page count.
    pub page_count: u32,
    /// Per-page observations, in page order.
    pub pages: Vec<PageInfo>,
    /// Every font referenced anywhere in the document.
    pub fonts: Vec<FontInfo>,
    /// Image XObject references that could not be resolved, as
    /// `"page N: Name"` strings.
    pub unresolved_images: Vec<String>,
    /// RGB fill/stroke colors observed in content streams, as `#RRGGBB`.
    pub rgb_colors: BTreeSet<String>,
    /// CMYK fill/stroke colors observed in content streams.
    pub cmyk_colors: BTreeSet<String>,
}

impl PdfInspection {
    /// Concatenated text of every page.
    #[must_use]
    pub fn full_text(&self) -> String {
        let mut out = String::new();
        for page in &self.pages {
            out.push_str(&page.text);
            out.push('\n');
        }
        out
    }

    /// Names of fonts used, deduplicated, subset prefixes stripped.
    #[must_use]
    pub fn font_names(&self) -> BTreeSet<String> {
        self.fonts.iter().map(|f| f.base_name.clone()).collect()
    }
}

/// Inspect the PDF at `path`.
///
/// # Errors
///
/// [`PdfError::Parse`] when the file is not a PDF, [`PdfError::Malformed`]
/// when it has no pages.
pub fn inspect(path: &Path) -> Result<PdfInspection, PdfError> {
    let doc = Document::load(path)?;
    let page_map = doc.get_pages();
    if page_map.is_empty() {
        return Err(PdfError::Malformed("document has no pages".into()));
    }

    let mut pages = Vec::new();
    let mut fonts: Vec<FontInfo> = Vec::new();
    let mut unresolved_images = Vec::new();
    let mut rgb_colors = BTreeSet::new();
    let mut cmyk_colors = BTreeSet::new();

    for (&number, &page_id) in &page_map {
        let page_dict = doc.get_dictionary(page_id)?;
        let (width_pt, height_pt) = media_box(&doc, page_dict)
            .ok_or_else(|| PdfError::Malformed(format!("page {number} has no media box")))?;

        let text = doc.extract_text(&[number]).unwrap_or_default();

        // Resources: fonts and image XObjects.
        if let Some(resources) = resolve_dict(&doc, page_dict.get(b"Resources").ok()) {
            collect_fonts(&doc, resources, &mut fonts);
            collect_unresolved_images(&doc, resources, number, &mut unresolved_images);
        }

        // Content stream scan: colors, font sizes, off-page positions.
        let mut font_sizes = Vec::new();
        let mut offpage_positions = Vec::new();
        if let Ok(data) = doc.get_page_content(page_id) {
            if let Ok(content) = Content::decode(&data) {
                scan_operations(
                    &content,
                    width_pt,
                    height_pt,
                    &mut font_sizes,
                    &mut offpage_positions,
                    &mut rgb_colors,
                    &mut cmyk_colors,
                );
            }
        }

        let image_dpis = image_dpi_estimates(&doc, page_dict, width_pt);

        pages.push(PageInfo {
            number,
            width_pt,
            height_pt,
            text,
            font_sizes,
            image_dpis,
            offpage_positions,
        });
    }

    Ok(PdfInspection {
        page_count: pages.len() as u32,
        pages,
        fonts: dedup_fonts(fonts),
        unresolved_images,
        rgb_colors,
        cmyk_colors,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn number_of(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(n) => Some(f64::from(*n)),
        _ => None,
    }
}

/// Resolve an object that may be a direct value or an indirect reference.
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, object: Option<&'a Object>) -> Option<&'a Dictionary> {
    resolve(doc, object?)?.as_dict().ok()
}

/// Media box, following the `Parent` chain for inherited values.
fn media_box(doc: &Document, page: &Dictionary) -> Option<(f64, f64)> {
    let mut current = Some(page);
    let mut hops = 0;
    while let Some(dict) = current {
        if let Some(bounds) = dict
            .get(b"MediaBox")
            .ok()
            .and_then(|b| resolve(doc, b))
            .and_then(|b| b.as_array().ok())
        {
            let nums: Vec<f64> = bounds.iter().filter_map(number_of).collect();
            if nums.len() == 4 {
                return Some(((nums[2] - nums[0]).abs(), (nums[3] - nums[1]).abs()));
            }
        }
        current = dict
            .get(b"Parent")
            .ok()
            .and_then(|p| resolve(doc, p))
            .and_then(|p| p.as_dict().ok());
        hops += 1;
        if hops > 16 {
            break;
        }
    }
    None
}

fn collect_fonts(doc: &Document, resources: &Dictionary, out: &mut Vec<FontInfo>) {
    let Some(font_dict) = resolve_dict(doc, resources.get(b"Font").ok()) else {
        return;
    };
    for (_, font_ref) in font_dict.iter() {
        let Some(font) = resolve(doc, font_ref).and_then(|f| f.as_dict().ok()) else {
            continue;
        };
        let raw_name = font
            .get(b"BaseFont")
            .ok()
            .and_then(|n| n.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_else(|| "Unknown".into());
        let (base_name, subset) = strip_subset_prefix(&raw_name);

        // Type0 composite fonts keep their descriptor on the descendant.
        let descriptor = resolve_dict(doc, font.get(b"FontDescriptor").ok()).or_else(|| {
            let descendants = resolve(doc, font.get(b"DescendantFonts").ok()?)?
                .as_array()
                .ok()?;
            let first = resolve(doc, descendants.first()?)?.as_dict().ok()?;
            resolve_dict(doc, first.get(b"FontDescriptor").ok())
        });
        let embedded = descriptor.is_some_and(|d| {
            d.has(b"FontFile") || d.has(b"FontFile2") || d.has(b"FontFile3")
        });

        out.push(FontInfo {
            base_name,
            embedded,
            subset,
        });
    }
}

/// Split a `ABCDEF+Name` subset prefix off a base font name.
fn strip_subset_prefix(name: &str) -> (String, bool) {
    if let Some((prefix, rest)) = name.split_once('+') {
        if prefix.len() == 6 && prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return (rest.to_string(), true);
        }
    }
    (name.to_string(), false)
}

fn dedup_fonts(fonts: Vec<FontInfo>) -> Vec<FontInfo> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for font in fonts {
        if seen.insert(font.base_name.clone()) {
            out.push(font);
        }
    }
    out
}

fn collect_unresolved_images(
    doc: &Document,
    resources: &Dictionary,
    page: u32,
    out: &mut Vec<String>,
) {
    let Some(xobjects) = resolve_dict(doc, resources.get(b"XObject").ok()) else {
        return;
    };
    for (name, reference) in xobjects.iter() {
        if let Object::Reference(id) = reference {
            if doc.get_object(*id).is_err() {
                out.push(format!("page {page}: {}", String::from_utf8_lossy(name)));
            }
        }
    }
}

fn image_dpi_estimates(doc: &Document, page: &Dictionary, width_pt: f64) -> Vec<f64> {
    let mut dpis = Vec::new();
    let Some(resources) = resolve_dict(doc, page.get(b"Resources").ok()) else {
        return dpis;
    };
    let Some(xobjects) = resolve_dict(doc, resources.get(b"XObject").ok()) else {
        return dpis;
    };
    for (_, reference) in xobjects.iter() {
        let Some(object) = resolve(doc, reference) else {
            continue;
        };
        let Ok(stream) = object.as_stream() else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|s| s.as_name().ok())
            .map(|n| n == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let Some(px_width) = stream.dict.get(b"Width").ok().and_then(number_of) else {
            continue;
        };
        if width_pt > 0.0 {
            // Approximation: assume the image spans the page width.
            dpis.push(px_width * 72.0 / width_pt);
        }
    }
    dpis
}

#[allow(clippy::too_many_arguments)]
fn scan_operations(
    content: &Content,
    width_pt: f64,
    height_pt: f64,
    font_sizes: &mut Vec<f64>,
    offpage_positions: &mut Vec<(f64, f64)>,
    rgb_colors: &mut BTreeSet<String>,
    cmyk_colors: &mut BTreeSet<String>,
) {
    // Text cursor: `Tm` sets it absolutely, `Td`/`TD` translate it.
    let mut cursor = (0.0f64, 0.0f64);
    let mut in_text = false;
    for op in &content.operations {
        match op.operator.as_str() {
            "BT" => {
                in_text = true;
                cursor = (0.0, 0.0);
            }
            "ET" => in_text = false,
            "Tf" => {
                if let Some(size) = op.operands.get(1).and_then(number_of) {
                    font_sizes.push(size);
                }
            }
            "Td" | "TD" => {
                let dx = op.operands.first().and_then(number_of).unwrap_or(0.0);
                let dy = op.operands.get(1).and_then(number_of).unwrap_or(0.0);
                cursor = (cursor.0 + dx, cursor.1 + dy);
                if in_text && outside(cursor, width_pt, height_pt) {
                    offpage_positions.push(cursor);
                }
            }
            "Tm" => {
                let x = op.operands.get(4).and_then(number_of).unwrap_or(0.0);
                let y = op.operands.get(5).and_then(number_of).unwrap_or(0.0);
                cursor = (x, y);
                if in_text && outside(cursor, width_pt, height_pt) {
                    offpage_positions.push(cursor);
                }
            }
            "rg" | "RG" => {
                let channels: Vec<f64> = op.operands.iter().filter_map(number_of).collect();
                if channels.len() == 3 {
                    rgb_colors.insert(format!(
                        "#{:02X}{:02X}{:02X}",
                        (channels[0] * 255.0).round() as u8,
                        (channels[1] * 255.0).round() as u8,
                        (channels[2] * 255.0).round() as u8
                    ));
                }
            }
            "k" | "K" => {
                let channels: Vec<f64> = op.operands.iter().filter_map(number_of).collect();
                if channels.len() == 4 {
                    cmyk_colors.insert(format!(
                        "cmyk({:.2},{:.2},{:.2},{:.2})",
                        channels[0], channels[1], channels[2], channels[3]
                    ));
                }
            }
            _ => {}
        }
    }
}

fn outside(position: (f64, f64), width_pt: f64, height_pt: f64) -> bool {
    position.0 < 0.0 || position.0 > width_pt || position.1 < 0.0 || position.1 > height_pt
}

// ---------------------------------------------------------------------------
// Test document builder
// ---------------------------------------------------------------------------

/// Build a small single-page PDF for tests: Helvetica text plus an RGB fill
/// color. Returns the written path.
#[cfg(any(test, feature = "test-fixtures"))]
pub fn write_fixture_pdf(
    path: &Path,
    lines: &[&str],
    rgb: (f64, f64, f64),
) -> Result<(), PdfError> {
    use lopdf::content::Operation;
    use lopdf::dictionary;

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("rg", vec![rgb.0.into(), rgb.1.into(), rgb.2.into()]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 24.into()]),
        Operation::new("Td", vec![72.into(), 760.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("Td", vec![0.into(), (-28).into()]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(lopdf::Stream::new(
        dictionary! {},
        content
            .encode()
            .map_err(|e| PdfError::Malformed(e.to_string()))?,
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).map_err(|e| PdfError::Malformed(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspects_fixture_geometry_text_fonts_and_colors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.pdf");
        // Channel values chosen to be exactly representable in binary
        // floating point, so the hex rendering is deterministic.
        write_fixture_pdf(&path, &["Acme Corporation", "Quarterly Report"], (0.25, 0.5, 1.0))
            .unwrap();

        let inspection = inspect(&path).unwrap();
        assert_eq!(inspection.page_count, 1);
        let page = &inspection.pages[0];
        assert!((page.width_pt - 595.0).abs() < 0.01);
        assert!((page.height_pt - 842.0).abs() < 0.01);
        assert!(page.text.contains("Acme Corporation"));
        assert!(page.font_sizes.contains(&24.0));
        // Relative line advances must not register as off-page positions.
        assert!(page.offpage_positions.is_empty());

        assert!(inspection.font_names().contains("Helvetica"));
        // Standard-14 Helvetica carries no embedded font program.
        assert!(inspection.fonts.iter().any(|f| !f.embedded));
        assert!(inspection.rgb_colors.contains("#4080FF"));
    }

    #[test]
    fn subset_prefixes_are_stripped() {
        assert_eq!(
            strip_subset_prefix("ABCDEF+MaisonNeue"),
            ("MaisonNeue".into(), true)
        );
        assert_eq!(
            strip_subset_prefix("Helvetica"),
            ("Helvetica".into(), false)
        );
    }

    #[test]
    fn missing_file_is_a_parse_error() {
        let err = inspect(Path::new("/nonexistent/file.pdf")).unwrap_err();
        assert!(matches!(err, PdfError::Parse(_)));
    }
}

//! Watermark rendering.
//!
//! Every page of a fetched filing gets the authenticity overlay: a solid band
//! along the left edge with rotated repeat text, and a centered caption at the
//! bottom carrying a clickable locator for the published copy. Page geometry
//! is read from the source document and never altered; overlays are appended
//! as new content so the original operators survive untouched.

pub mod metrics;

use std::path::Path;

use lopdf::{
    content::{Content, Operation},
    dictionary, Dictionary, Document, Object, ObjectId, Stream,
};
use tracing::{debug, info, instrument};

use crate::{
    config::WatermarkConfig,
    error::{DocumentReadError, Result},
    types::PageGeometry,
};

use metrics::text_width;

const WATERMARK_FONT: &str = "TCWmk";
const CAPTION_PREFIX: &str = "This is a True Copy of the Court Records Online. Proofed @ ";

pub struct WatermarkRenderer {
    config: WatermarkConfig,
}

impl WatermarkRenderer {
    pub fn new(config: WatermarkConfig) -> Self {
        Self { config }
    }

    /// Caption printed at the bottom of each page.
    pub fn caption(&self, artifact_name: &str) -> String {
        format!(
            "{}{}/TrueCopy/{}",
            CAPTION_PREFIX, self.config.domain, artifact_name
        )
    }

    /// Absolute target of the caption hyperlink.
    pub fn link_target(&self, artifact_name: &str) -> String {
        format!("https://{}/TrueCopy/{}", self.config.domain, artifact_name)
    }

    /// Number of band text repetitions for a page of the given height.
    ///
    /// One repetition per `band_spacing` across the span between the
    /// vertical margins, plus one so the top margin edge is always reached.
    pub fn repeat_count(&self, page_height: f64) -> usize {
        let span = (page_height - self.config.margin_bottom - self.config.margin_top).max(0.0);
        (span / self.config.band_spacing).ceil() as usize + 1
    }

    /// Reads `input`, overlays every page and writes the result to `output`.
    ///
    /// Returns the geometry of each source page. The input file is never
    /// mutated.
    #[instrument(skip(self), fields(artifact = artifact_name))]
    pub async fn render(
        &self,
        input: &Path,
        output: &Path,
        artifact_name: &str,
    ) -> Result<Vec<PageGeometry>> {
        let mut doc = Document::load(input)
            .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;

        let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();
        if pages.is_empty() {
            return Err(DocumentReadError::NoPages.into());
        }

        let caption = self.caption(artifact_name);
        let link_target = self.link_target(artifact_name);
        let visible_url = format!("{}/TrueCopy/{}", self.config.domain, artifact_name);

        let mut geometries = Vec::with_capacity(pages.len());
        for (page_no, page_id) in pages {
            let (llx, lly, width, height) = page_media_box(&doc, page_id)
                .ok_or(DocumentReadError::MissingMediaBox(page_no))?;
            let geometry = PageGeometry {
                index: page_no - 1,
                width,
                height,
            };

            let original = collect_page_content(&doc, page_id)?;
            let overlay = self.overlay_operations(llx, lly, width, height, &caption);
            let overlay_bytes = Content { operations: overlay }
                .encode()
                .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;

            // Original content runs inside its own q/Q so leftover graphics
            // state cannot bleed into the overlay operators.
            let mut combined = Vec::with_capacity(original.len() + overlay_bytes.len() + 8);
            combined.extend_from_slice(b"q\n");
            combined.extend_from_slice(&original);
            combined.extend_from_slice(b"\nQ\n");
            combined.extend_from_slice(&overlay_bytes);

            let content_id = doc.add_object(Stream::new(Dictionary::new(), combined));
            set_page_contents(&mut doc, page_id, content_id)?;
            ensure_watermark_font(&mut doc, page_id)?;

            let link_rect = self.link_rect(llx, lly, width, &caption, &visible_url);
            let annot_id = doc.add_object(link_annotation(link_rect, &link_target));
            attach_annotation(&mut doc, page_id, annot_id)?;

            debug!(page = page_no, width, height, "page watermarked");
            geometries.push(geometry);
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;
        tokio::fs::write(output, &bytes).await?;

        info!(pages = geometries.len(), "watermark rendering complete");
        Ok(geometries)
    }

    /// Overlay operators for one page, each visual element in its own q/Q.
    fn overlay_operations(
        &self,
        llx: f64,
        lly: f64,
        width: f64,
        height: f64,
        caption: &str,
    ) -> Vec<Operation> {
        let cfg = &self.config;
        let mut ops = Vec::new();

        // Solid band along the left edge, full page height.
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "rg",
            vec![
                cfg.band_color[0].into(),
                cfg.band_color[1].into(),
                cfg.band_color[2].into(),
            ],
        ));
        ops.push(Operation::new(
            "re",
            vec![llx.into(), lly.into(), cfg.band_width.into(), height.into()],
        ));
        ops.push(Operation::new("f", vec![]));
        ops.push(Operation::new("Q", vec![]));

        // Rotated band text, repeated bottom margin to top margin.
        // Tm [0 1 -1 0 x y] rotates the baseline 90 degrees counterclockwise;
        // x centers the line of text within the band.
        let text_x = llx + (cfg.band_width + cfg.band_font_size * 0.7) / 2.0;
        for i in 0..self.repeat_count(height) {
            let y = lly + cfg.margin_bottom + i as f64 * cfg.band_spacing;
            ops.push(Operation::new("q", vec![]));
            ops.push(Operation::new("BT", vec![]));
            ops.push(Operation::new(
                "Tf",
                vec![WATERMARK_FONT.into(), cfg.band_font_size.into()],
            ));
            ops.push(Operation::new(
                "Tm",
                vec![
                    0.into(),
                    1.into(),
                    (-1).into(),
                    0.into(),
                    text_x.into(),
                    y.into(),
                ],
            ));
            ops.push(Operation::new(
                "Tj",
                vec![Object::string_literal(cfg.band_text.as_str())],
            ));
            ops.push(Operation::new("ET", vec![]));
            ops.push(Operation::new("Q", vec![]));
        }

        // Centered caption along the bottom edge.
        let caption_x = llx + (width - text_width(caption, cfg.caption_font_size)) / 2.0;
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![WATERMARK_FONT.into(), cfg.caption_font_size.into()],
        ));
        ops.push(Operation::new(
            "Td",
            vec![caption_x.into(), (lly + cfg.caption_baseline).into()],
        ));
        ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(caption)],
        ));
        ops.push(Operation::new("ET", vec![]));
        ops.push(Operation::new("Q", vec![]));

        ops
    }

    /// Clickable rectangle covering exactly the visible URL in the caption.
    fn link_rect(
        &self,
        llx: f64,
        lly: f64,
        width: f64,
        caption: &str,
        visible_url: &str,
    ) -> [f64; 4] {
        let cfg = &self.config;
        let caption_x = llx + (width - text_width(caption, cfg.caption_font_size)) / 2.0;
        let link_x = caption_x + text_width(CAPTION_PREFIX, cfg.caption_font_size);
        let link_w = text_width(visible_url, cfg.caption_font_size);
        let baseline = lly + cfg.caption_baseline;
        [
            link_x,
            baseline - 2.0,
            link_x + link_w,
            baseline + cfg.caption_font_size,
        ]
    }
}

/// Resolves the MediaBox for a page, following the Parent chain when the
/// attribute is inherited. Returns (llx, lly, width, height).
fn page_media_box(doc: &Document, page_id: ObjectId) -> Option<(f64, f64, f64, f64)> {
    let mut current = page_id;
    for _ in 0..32 {
        let dict = doc.get_object(current).ok()?.as_dict().ok()?;
        if let Ok(obj) = dict.get(b"MediaBox") {
            let resolved = match obj {
                Object::Reference(id) => doc.get_object(*id).ok()?,
                other => other,
            };
            let array = resolved.as_array().ok()?;
            if array.len() == 4 {
                let mut nums = [0.0f64; 4];
                for (i, item) in array.iter().enumerate() {
                    nums[i] = object_to_f64(item)?;
                }
                let (x1, y1, x2, y2) = (nums[0], nums[1], nums[2], nums[3]);
                if x2 > x1 && y2 > y1 {
                    return Some((x1, y1, x2 - x1, y2 - y1));
                }
            }
            return None;
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => current = *parent,
            _ => return None,
        }
    }
    None
}

fn object_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// Concatenated decoded content of every stream referenced by the page.
fn collect_page_content(doc: &Document, page_id: ObjectId) -> Result<Vec<u8>> {
    let dict = doc
        .get_object(page_id)
        .and_then(|o| o.as_dict())
        .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;

    let mut stream_ids = Vec::new();
    match dict.get(b"Contents") {
        Ok(Object::Reference(id)) => stream_ids.push(*id),
        Ok(Object::Array(items)) => {
            for item in items {
                if let Object::Reference(id) = item {
                    stream_ids.push(*id);
                }
            }
        }
        _ => {}
    }

    let mut content = Vec::new();
    for id in stream_ids {
        if let Ok(Object::Stream(stream)) = doc.get_object(id) {
            let bytes = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            if !content.is_empty() {
                content.push(b'\n');
            }
            content.extend_from_slice(&bytes);
        }
    }
    Ok(content)
}

fn set_page_contents(doc: &mut Document, page_id: ObjectId, content_id: ObjectId) -> Result<()> {
    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;
    page.set("Contents", Object::Reference(content_id));
    Ok(())
}

/// Registers the Helvetica watermark font in the page resources, whether the
/// Resources dictionary is inline, referenced or absent.
fn ensure_watermark_font(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let font_dict = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    };

    let resources = {
        let page = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;
        page.get(b"Resources").ok().cloned()
    };

    match resources {
        Some(Object::Reference(res_id)) => {
            let res = doc
                .get_object_mut(res_id)
                .and_then(|o| o.as_dict_mut())
                .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;
            insert_font(res, WATERMARK_FONT, font_dict);
        }
        Some(Object::Dictionary(mut res)) => {
            insert_font(&mut res, WATERMARK_FONT, font_dict);
            let page = doc
                .get_object_mut(page_id)
                .and_then(|o| o.as_dict_mut())
                .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;
            page.set("Resources", Object::Dictionary(res));
        }
        _ => {
            let mut res = Dictionary::new();
            insert_font(&mut res, WATERMARK_FONT, font_dict);
            let page = doc
                .get_object_mut(page_id)
                .and_then(|o| o.as_dict_mut())
                .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;
            page.set("Resources", Object::Dictionary(res));
        }
    }
    Ok(())
}

fn insert_font(resources: &mut Dictionary, name: &str, font_dict: Dictionary) {
    match resources.get_mut(b"Font") {
        Ok(Object::Dictionary(fonts)) => {
            fonts.set(name, Object::Dictionary(font_dict));
        }
        _ => {
            let mut fonts = Dictionary::new();
            fonts.set(name, Object::Dictionary(font_dict));
            resources.set("Font", Object::Dictionary(fonts));
        }
    }
}

fn link_annotation(rect: [f64; 4], target: &str) -> Object {
    Object::Dictionary(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Link",
        "Rect" => vec![
            rect[0].into(),
            rect[1].into(),
            rect[2].into(),
            rect[3].into(),
        ],
        "Border" => vec![0.into(), 0.into(), 0.into()],
        "A" => dictionary! {
            "Type" => "Action",
            "S" => "URI",
            "URI" => Object::string_literal(target),
        },
    })
}

fn attach_annotation(doc: &mut Document, page_id: ObjectId, annot_id: ObjectId) -> Result<()> {
    let existing = {
        let page = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;
        page.get(b"Annots").ok().cloned()
    };

    let mut annots = match existing {
        Some(Object::Array(items)) => items,
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    annots.push(Object::Reference(annot_id));

    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;
    page.set("Annots", Object::Array(annots));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatermarkConfig;

    fn renderer() -> WatermarkRenderer {
        WatermarkRenderer::new(WatermarkConfig::default())
    }

    #[test]
    fn repeat_count_covers_margin_to_margin() {
        let r = renderer();
        let cfg = WatermarkConfig::default();
        for height in [200.0, 612.0, 792.0, 842.0, 1684.0] {
            let count = r.repeat_count(height);
            assert!(count >= 1);
            // The last repetition must land at or beyond the top margin edge.
            let last_y = cfg.margin_bottom + (count - 1) as f64 * cfg.band_spacing;
            if height >= cfg.margin_bottom + cfg.margin_top {
                assert!(
                    last_y >= height - cfg.margin_top,
                    "height {}: last repeat at {} misses the top margin",
                    height,
                    last_y
                );
            }
        }
    }

    #[test]
    fn short_page_still_gets_one_repeat() {
        assert_eq!(renderer().repeat_count(10.0), 1);
    }

    #[test]
    fn caption_and_target_use_the_artifact_name() {
        let r = renderer();
        let caption = r.caption("DLHC010001092024-orderno-12345.pdf");
        assert_eq!(
            caption,
            "This is a True Copy of the Court Records Online. Proofed @ \
             courtrecords.example.org/TrueCopy/DLHC010001092024-orderno-12345.pdf"
        );
        assert_eq!(
            r.link_target("DLHC010001092024-orderno-12345.pdf"),
            "https://courtrecords.example.org/TrueCopy/DLHC010001092024-orderno-12345.pdf"
        );
    }

    #[test]
    fn link_rect_width_equals_measured_url_width() {
        let r = renderer();
        let caption = r.caption("c-orderno-1.pdf");
        let visible = "courtrecords.example.org/TrueCopy/c-orderno-1.pdf";
        let rect = r.link_rect(0.0, 0.0, 612.0, &caption, visible);
        let expected = text_width(visible, r.config.caption_font_size);
        assert!((rect[2] - rect[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn link_rect_starts_after_the_prefix() {
        let r = renderer();
        let caption = r.caption("c-orderno-1.pdf");
        let visible = "courtrecords.example.org/TrueCopy/c-orderno-1.pdf";
        let rect = r.link_rect(0.0, 0.0, 612.0, &caption, visible);
        let caption_x = (612.0 - text_width(&caption, r.config.caption_font_size)) / 2.0;
        let expected_x = caption_x + text_width(CAPTION_PREFIX, r.config.caption_font_size);
        assert!((rect[0] - expected_x).abs() < 1e-9);
    }

    #[tokio::test]
    async fn render_rejects_garbage_input() {
        let dir = std::env::temp_dir().join("truecopy-wm-garbage");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("garbage.pdf");
        std::fs::write(&input, b"not a pdf at all").unwrap();

        let result = renderer()
            .render(&input, &dir.join("out.pdf"), "a-orderno-1.pdf")
            .await;
        assert!(matches!(
            result,
            Err(crate::error::Error::DocumentRead(_))
        ));
    }
}

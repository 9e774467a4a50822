use chrono::NaiveDate;
use once_cell::sync::Lazy;
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};
use regex::Regex;
use tracing::warn;

use crate::studio::assets::ReferenceAsset;
use crate::studio::image::{EncodedImage, Thumbnail};
use crate::studio::session::GenerationResult;
use crate::studio::PRODUCT_NAME;
use crate::utils::formatting::html_to_plain;

// A4 portrait, in points.
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 40.0;

const PAIR_TOP: f32 = 730.0;
const PAIR_WIDTH: f32 = 250.0;
const PAIR_HEIGHT: f32 = 170.0;
const PAIR_IMAGE_SIDE: u32 = 1400;

const REFERENCE_THUMBNAIL_SIDE: u32 = 160;
const REFERENCE_BOX: f32 = 56.0;
const REFERENCE_GAP: f32 = 8.0;

const REPORT_LINE_CHARS: usize = 95;
const BODY_LEADING: f32 = 13.0;
const HEADING_LEADING: f32 = 18.0;
const REPORT_CUT_NOTICE: &str = "(The full report is in the chat.)";

const REGULAR_FONT: &[u8] = b"F1";
const BOLD_FONT: &[u8] = b"F2";

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z]*").expect("valid code fence regex"));
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)[^>]*>").expect("valid tag regex"));
static DROPPED_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)\s*>").expect("valid block regex")
});
static BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(h3|p|li)>(.*?)</(?:h3|p|li)>").expect("valid report block regex"));

const ALLOWED_REPORT_TAGS: &[&str] = &["h3", "p", "ul", "ol", "li", "b", "strong", "em", "i", "br"];

pub fn vision_file_name(project_id: &str) -> String {
    format!("{PRODUCT_NAME}-Vision-{project_id}.png")
}

pub fn blueprint_file_name(project_id: &str) -> String {
    format!("{PRODUCT_NAME}-Blueprint-{project_id}.pdf")
}

/// Reduces model-written report markup to the small tag set the blueprint and
/// chat renderers understand. Attributes are dropped and code fences removed.
pub fn sanitize_report_markup(markup: &str) -> String {
    let without_fences = CODE_FENCE_RE.replace_all(markup, "");
    let without_blocks = DROPPED_BLOCK_RE.replace_all(&without_fences, "");
    let cleaned = TAG_RE.replace_all(&without_blocks, |caps: &regex::Captures| {
        let closing = &caps[1];
        let tag = caps[2].to_ascii_lowercase();
        if ALLOWED_REPORT_TAGS.contains(&tag.as_str()) {
            format!("<{closing}{tag}>")
        } else {
            String::new()
        }
    });
    cleaned.trim().to_string()
}

/// One wrapped line of the strategy section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub text: String,
    pub heading: bool,
}

/// Flattens sanitized report markup into blocks: `<h3>` headings, `<li>`
/// bullets and `<p>` paragraphs. Markup without blocks becomes paragraphs
/// split on blank lines.
fn report_blocks(markup: &str) -> Vec<(String, bool)> {
    let sanitized = sanitize_report_markup(markup);
    let mut blocks: Vec<(String, bool)> = BLOCK_RE
        .captures_iter(&sanitized)
        .filter_map(|caps| {
            let text = html_to_plain(&caps[2]);
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                return None;
            }
            match &caps[1] {
                "h3" => Some((text, true)),
                "li" => Some((format!("- {text}"), false)),
                _ => Some((text, false)),
            }
        })
        .collect();
    if blocks.is_empty() {
        blocks = html_to_plain(&sanitized)
            .split("\n\n")
            .map(|paragraph| paragraph.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|paragraph| !paragraph.is_empty())
            .map(|paragraph| (paragraph, false))
            .collect();
    }
    blocks
}

fn wrap_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Report markup as wrapped lines for a column `max_chars` wide.
pub fn report_lines(markup: &str, max_chars: usize) -> Vec<ReportLine> {
    report_blocks(markup)
        .into_iter()
        .flat_map(|(text, heading)| {
            wrap_words(&text, max_chars)
                .into_iter()
                .map(move |line| ReportLine { text: line, heading })
        })
        .collect()
}

/// Maps text to the WinAnsi bytes the standard Helvetica fonts expect.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            ' '..='~' => ch as u8,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2026}' => 0x85,
            '\u{20AC}' => 0x80,
            '\u{A0}'..='\u{FF}' => ch as u32 as u8,
            _ => b'?',
        })
        .collect()
}

#[derive(Default)]
struct RefAllocator(i32);

impl RefAllocator {
    fn next(&mut self) -> Ref {
        self.0 += 1;
        Ref::new(self.0)
    }
}

struct PlacedImage {
    name: String,
    id: Ref,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

/// Page content plus the image objects it draws.
struct BlueprintPage {
    pdf: Pdf,
    refs: RefAllocator,
    content: Content,
    images: Vec<PlacedImage>,
}

impl BlueprintPage {
    fn text(&mut self, font: &[u8], size: f32, x: f32, y: f32, text: &str) {
        self.content
            .begin_text()
            .set_font(Name(font), size)
            .next_line(x, y)
            .show(Str(&win_ansi(text)))
            .end_text();
    }

    fn rule(&mut self, y: f32) {
        self.content
            .set_line_width(0.8)
            .move_to(MARGIN, y)
            .line_to(PAGE_WIDTH - MARGIN, y)
            .stroke();
    }

    /// Fits the JPEG into the box, centered, keeping its aspect ratio.
    fn image(&mut self, thumbnail: &Thumbnail, x: f32, y: f32, box_width: f32, box_height: f32) {
        let (pixel_width, pixel_height) = (thumbnail.width.max(1) as f32, thumbnail.height.max(1) as f32);
        let scale = (box_width / pixel_width).min(box_height / pixel_height);
        let (width, height) = (pixel_width * scale, pixel_height * scale);

        let id = self.refs.next();
        {
            let mut xobject = self.pdf.image_xobject(id, thumbnail.jpeg.bytes());
            xobject.filter(Filter::DctDecode);
            xobject.width(thumbnail.width as i32);
            xobject.height(thumbnail.height as i32);
            xobject.color_space().device_rgb();
            xobject.bits_per_component(8);
        }
        let name = format!("Im{}", self.images.len() + 1);
        self.images.push(PlacedImage {
            name,
            id,
            x: x + (box_width - width) / 2.0,
            y: y + (box_height - height) / 2.0,
            width,
            height,
        });
    }

    fn finish(mut self) -> Vec<u8> {
        for image in &self.images {
            self.content
                .save_state()
                .transform([image.width, 0.0, 0.0, image.height, image.x, image.y])
                .x_object(Name(image.name.as_bytes()))
                .restore_state();
        }

        let catalog_id = self.refs.next();
        let page_tree_id = self.refs.next();
        let page_id = self.refs.next();
        let content_id = self.refs.next();
        let regular_id = self.refs.next();
        let bold_id = self.refs.next();

        let mut pdf = self.pdf;
        pdf.catalog(catalog_id).pages(page_tree_id);
        pdf.pages(page_tree_id).kids([page_id]).count(1);
        {
            let mut page = pdf.page(page_id);
            page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
            page.parent(page_tree_id);
            page.contents(content_id);
            let mut resources = page.resources();
            resources
                .fonts()
                .pair(Name(REGULAR_FONT), regular_id)
                .pair(Name(BOLD_FONT), bold_id);
            let mut xobjects = resources.x_objects();
            for image in &self.images {
                xobjects.pair(Name(image.name.as_bytes()), image.id);
            }
        }
        pdf.type1_font(regular_id)
            .base_font(Name(b"Helvetica"))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
        pdf.type1_font(bold_id)
            .base_font(Name(b"Helvetica-Bold"))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
        pdf.stream(content_id, &self.content.finish());
        pdf.finish()
    }
}

fn draw_picture(page: &mut BlueprintPage, label: &str, image: &EncodedImage, x: f32) {
    page.text(BOLD_FONT, 9.0, x, PAIR_TOP + 6.0, label);
    match image.thumbnail(PAIR_IMAGE_SIDE) {
        Ok(thumbnail) => page.image(&thumbnail, x, PAIR_TOP - PAIR_HEIGHT, PAIR_WIDTH, PAIR_HEIGHT),
        Err(err) => {
            warn!("Blueprint {label} image could not be decoded: {err}");
            page.text(REGULAR_FONT, 9.0, x, PAIR_TOP - PAIR_HEIGHT / 2.0, "Image unavailable");
        }
    }
}

/// Draws the reference strip along the bottom edge. Returns how many
/// thumbnails were placed.
fn draw_reference_strip(page: &mut BlueprintPage, references: &[ReferenceAsset]) -> usize {
    let mut placed = 0;
    for reference in references {
        let thumbnail = match reference.image.thumbnail(REFERENCE_THUMBNAIL_SIDE) {
            Ok(thumbnail) => thumbnail,
            Err(err) => {
                warn!("Skipping reference {} in blueprint: {}", reference.id, err);
                continue;
            }
        };
        let x = MARGIN + placed as f32 * (REFERENCE_BOX + REFERENCE_GAP);
        page.image(&thumbnail, x, MARGIN + 10.0, REFERENCE_BOX, REFERENCE_BOX);
        page.text(REGULAR_FONT, 7.0, x, MARGIN, reference.kind.label());
        placed += 1;
    }
    if placed > 0 {
        page.text(BOLD_FONT, 11.0, MARGIN, MARGIN + REFERENCE_BOX + 18.0, "Reference Assets");
    }
    placed
}

/// Single-page PDF blueprint: title block, before/after pair, the strategy
/// report and a strip of reference thumbnails. Report text that does not fit
/// the page is cut with a pointer to the chat copy.
pub fn render_blueprint_pdf(
    project_id: &str,
    date: NaiveDate,
    result: &GenerationResult,
    references: &[ReferenceAsset],
) -> Vec<u8> {
    let mut page = BlueprintPage {
        pdf: Pdf::new(),
        refs: RefAllocator::default(),
        content: Content::new(),
        images: Vec::new(),
    };

    let location = match result.location.trim() {
        "" => "Global/Universal",
        value => value,
    };
    let title_y = PAGE_HEIGHT - MARGIN - 22.0;
    page.text(BOLD_FONT, 22.0, MARGIN, title_y, &format!("{PRODUCT_NAME} Design Blueprint"));
    page.text(
        REGULAR_FONT,
        10.0,
        MARGIN,
        title_y - 18.0,
        &format!(
            "Project #{project_id} | {} | {} | {} | {location}",
            date.format("%Y-%m-%d"),
            result.mode.label(),
            result.budget.label()
        ),
    );
    page.rule(title_y - 28.0);

    draw_picture(&mut page, "BEFORE", &result.before, MARGIN);
    draw_picture(&mut page, "AFTER", &result.image, PAGE_WIDTH - MARGIN - PAIR_WIDTH);

    let strip_used = draw_reference_strip(&mut page, references) > 0;
    let floor = if strip_used {
        MARGIN + REFERENCE_BOX + 36.0
    } else {
        MARGIN
    };

    let mut y = PAIR_TOP - PAIR_HEIGHT - 28.0;
    page.text(BOLD_FONT, 13.0, MARGIN, y, "Design Strategy");
    y -= 20.0;
    let lines = report_lines(&result.report, REPORT_LINE_CHARS);
    for (index, line) in lines.iter().enumerate() {
        let leading = if line.heading { HEADING_LEADING } else { BODY_LEADING };
        let is_last = index + 1 == lines.len();
        if !is_last && y - leading < floor {
            page.text(REGULAR_FONT, 9.0, MARGIN, y, REPORT_CUT_NOTICE);
            break;
        }
        if line.heading {
            page.text(BOLD_FONT, 11.0, MARGIN, y, &line.text);
        } else {
            page.text(REGULAR_FONT, 10.0, MARGIN, y, &line.text);
        }
        y -= leading;
    }

    page.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::assets::ReferenceKind;
    use crate::studio::image::tests::sample_png;
    use crate::studio::options::{BudgetIndex, DesignMode};

    fn result(report: &str) -> GenerationResult {
        let image = EncodedImage::from_upload(sample_png(4, 4)).unwrap();
        GenerationResult {
            before: image.clone(),
            image,
            report: report.to_string(),
            mode: DesignMode::StyleTransfer,
            budget: BudgetIndex::default(),
            location: String::new(),
            directive: "warmer".to_string(),
        }
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }

    fn occurrences(haystack: &[u8], needle: &str) -> usize {
        haystack
            .windows(needle.len())
            .filter(|window| *window == needle.as_bytes())
            .count()
    }

    #[test]
    fn file_names_carry_project_id() {
        assert_eq!(vision_file_name("AU1B2C3D"), "Aura-Vision-AU1B2C3D.png");
        assert_eq!(blueprint_file_name("AU1B2C3D"), "Aura-Blueprint-AU1B2C3D.pdf");
    }

    #[test]
    fn sanitize_keeps_report_tags_only() {
        let markup = "```html\n<h3 class=\"x\">The Vision</h3><script>alert(1)</script><div><p>Calm <b>oak</b></p></div>\n```";
        assert_eq!(
            sanitize_report_markup(markup),
            "<h3>The Vision</h3><p>Calm <b>oak</b></p>"
        );
    }

    #[test]
    fn report_lines_mark_headings_and_bullets() {
        let lines = report_lines(
            "<h3>The Vision</h3><p>Calm <b>oak</b> &amp; linen</p><ul><li>Sofa</li><li>Rug</li></ul>",
            80,
        );
        let rendered: Vec<(&str, bool)> = lines
            .iter()
            .map(|line| (line.text.as_str(), line.heading))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("The Vision", true),
                ("Calm oak & linen", false),
                ("- Sofa", false),
                ("- Rug", false),
            ]
        );
    }

    #[test]
    fn report_lines_wrap_plain_text() {
        let lines = report_lines("alpha beta gamma delta", 11);
        let texts: Vec<&str> = lines.iter().map(|line| line.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha beta", "gamma delta"]);
        assert!(lines.iter().all(|line| !line.heading));
    }

    #[test]
    fn win_ansi_maps_typography_and_replaces_the_rest() {
        assert_eq!(win_ansi("caf\u{e9} \u{2013} \u{201C}ok\u{201D}"), b"caf\xe9 \x96 \x93ok\x94".to_vec());
        assert_eq!(win_ansi("\u{6728}"), b"?".to_vec());
    }

    #[test]
    fn blueprint_is_one_page_pdf_with_images_report_and_references() {
        let references = vec![
            ReferenceAsset {
                id: "r1".to_string(),
                image: EncodedImage::from_upload(sample_png(400, 200)).unwrap(),
                kind: ReferenceKind::Element,
            },
            ReferenceAsset {
                id: "r2".to_string(),
                image: EncodedImage::from_model_output(Some("image/png"), b"broken".to_vec())
                    .unwrap(),
                kind: ReferenceKind::Style,
            },
        ];
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let pdf = render_blueprint_pdf(
            "AU000001",
            date,
            &result("<h3>The Vision</h3><p>Light</p>"),
            &references,
        );

        assert!(pdf.starts_with(b"%PDF-"));
        assert!(contains(&pdf, "/Count 1"));
        assert!(contains(&pdf, "Aura Design Blueprint"));
        assert!(contains(&pdf, "Project #AU000001 | 2026-03-14"));
        assert!(contains(&pdf, "Global/Universal"));
        assert!(contains(&pdf, "The Vision"));
        assert!(contains(&pdf, "Reference Assets"));
        assert!(contains(&pdf, "element"));
        assert!(!contains(&pdf, "(style)"));
        // before, after and the one decodable reference
        assert_eq!(occurrences(&pdf, "/DCTDecode"), 3);
    }

    #[test]
    fn blueprint_without_references_omits_strip() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let pdf = render_blueprint_pdf("AU000002", date, &result("<p>ok</p>"), &[]);
        assert!(!contains(&pdf, "Reference Assets"));
        assert_eq!(occurrences(&pdf, "/DCTDecode"), 2);
    }

    #[test]
    fn long_report_is_cut_to_one_page() {
        let report: String = (0..200).map(|n| format!("<p>Paragraph number {n}</p>")).collect();
        let date = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let pdf = render_blueprint_pdf("AU000003", date, &result(&report), &[]);
        assert!(contains(&pdf, "The full report is in the chat."));
        assert!(contains(&pdf, "Paragraph number 0"));
        assert!(!contains(&pdf, "Paragraph number 199"));
        assert!(contains(&pdf, "/Count 1"));
    }
}

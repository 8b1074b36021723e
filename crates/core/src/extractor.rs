use crate::error::ExtractionError;
use crate::models::DocumentFormat;
use lopdf::Document;
use regex::{Captures, Regex};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

const DOCX_BODY_PART: &str = "word/document.xml";

pub trait Extractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Reads every page through lopdf. Pages without a text layer are skipped rather than failing
/// the whole document; a document with no readable page at all is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let document =
            Document::load(path).map_err(|error| ExtractionError::Pdf(error.to_string()))?;

        let mut text = String::new();
        let mut readable_pages = 0usize;
        for page_no in document.get_pages().into_keys() {
            match document.extract_text(&[page_no]) {
                Ok(page_text) if !page_text.trim().is_empty() => {
                    readable_pages += 1;
                    text.push_str(&page_text);
                }
                Ok(_) => warn!(page = page_no, path = %path.display(), "skipping pdf page without text layer"),
                Err(error) => warn!(
                    page = page_no,
                    path = %path.display(),
                    error = %error,
                    "skipping pdf page with unreadable text layer"
                ),
            }
        }

        if readable_pages == 0 {
            return Err(ExtractionError::NoText(path.display().to_string()));
        }

        debug!(pages = readable_pages, chars = text.len(), "extracted pdf text");
        Ok(text)
    }
}

/// Paragraph text from the main body part of a Word package, one line per paragraph.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let file = File::open(path)?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|error| ExtractionError::Docx(error.to_string()))?;

        let mut xml = String::new();
        archive
            .by_name(DOCX_BODY_PART)
            .map_err(|error| ExtractionError::Docx(format!("{DOCX_BODY_PART}: {error}")))?
            .read_to_string(&mut xml)
            .map_err(|error| ExtractionError::Docx(format!("{DOCX_BODY_PART}: {error}")))?;

        let paragraphs = docx_paragraphs(&xml)?;
        debug!(paragraphs = paragraphs.len(), "extracted docx text");
        Ok(paragraphs.join("\n"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8(bytes)?)
    }
}

pub fn extract_text(path: &Path, format: DocumentFormat) -> Result<String, ExtractionError> {
    match format {
        DocumentFormat::Pdf => PdfExtractor.extract(path),
        DocumentFormat::Docx => DocxExtractor.extract(path),
        DocumentFormat::Text => PlainTextExtractor.extract(path),
    }
}

fn docx_paragraphs(xml: &str) -> Result<Vec<String>, ExtractionError> {
    let paragraph_re = compile(r"(?s)<w:p(?:\s[^>]*)?/>|<w:p(?:\s[^>]*)?>(.*?)</w:p>")?;
    let run_re = compile(
        r"(?s)<w:t(?:\s[^>]*)?/>|<w:t(?:\s[^>]*)?>(?P<text>.*?)</w:t>|<w:(?P<brk>tab|br|cr)(?:\s[^>]*)?/>",
    )?;
    let entity_re = compile(r"&(#x[0-9A-Fa-f]+|#[0-9]+|lt|gt|amp|quot|apos);")?;

    let paragraphs = paragraph_re
        .captures_iter(xml)
        .map(|paragraph| {
            let body = paragraph.get(1).map(|m| m.as_str()).unwrap_or_default();
            let mut text = String::new();
            for run in run_re.captures_iter(body) {
                if let Some(content) = run.name("text") {
                    text.push_str(&decode_entities(&entity_re, content.as_str()));
                } else if let Some(brk) = run.name("brk") {
                    text.push(if brk.as_str() == "tab" { '\t' } else { '\n' });
                }
            }
            text
        })
        .collect();

    Ok(paragraphs)
}

fn decode_entities(entity_re: &Regex, raw: &str) -> String {
    entity_re
        .replace_all(raw, |captures: &Captures| {
            let entity = &captures[1];
            match entity {
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "amp" => "&".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                numeric => {
                    let code = match numeric.strip_prefix("#x") {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => numeric.trim_start_matches('#').parse().ok(),
                    };
                    code.and_then(char::from_u32)
                        .map(String::from)
                        .unwrap_or_else(|| captures[0].to_string())
                }
            }
        })
        .into_owned()
}

fn compile(pattern: &str) -> Result<Regex, ExtractionError> {
    Regex::new(pattern).map_err(|error| ExtractionError::Docx(error.to_string()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::io::Write;
    use std::path::Path;

    /// Writes a PDF with one page per entry; `None` produces a page without any text operator.
    pub fn write_pdf(path: &Path, pages: &[Option<&str>]) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids = Vec::new();
        for page in pages {
            let operations = match page {
                Some(text) => vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
                None => Vec::new(),
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }

    pub fn write_docx(path: &Path, document_xml: &str) -> Result<(), Box<dyn std::error::Error>> {
        let file = std::fs::File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", options)?;
        zip.write_all(br#"<?xml version="1.0" encoding="UTF-8"?><Types/>"#)?;
        zip.start_file("word/document.xml", options)?;
        zip.write_all(document_xml.as_bytes())?;
        zip.finish()?;
        Ok(())
    }

    pub fn docx_body(paragraphs: &[&str]) -> String {
        let body = paragraphs
            .iter()
            .map(|text| format!(r#"<w:p w:rsidR="00A1"><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#))
            .collect::<String>();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
        )
    }
}

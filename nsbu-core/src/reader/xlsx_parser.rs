//! XLSX reader producing the normalized cell grid
//!
//! Only the parts of SpreadsheetML the extractor relies on are parsed: shared
//! strings (plain and rich), number formats, bold fonts and alignment indent
//! from `cellXfs`, cached formula results and hyperlinks.

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::BufReader;
use zip::ZipArchive;

use super::parser_utils::{parse_cell_range, parse_cell_ref, read_text_node};
use super::{Cell, CellValue, Scalar, Sheet, WorkbookReader};

/// Worksheet part path of a workbook relationship target, which is usually
/// relative to `xl/`
fn sheet_part_path(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        absolute.to_string()
    } else if target.starts_with("xl/") {
        target.to_string()
    } else {
        format!("xl/{}", target)
    }
}

/// Read a relationships part into `Id -> Target`
fn read_relationships(
    archive: &mut ZipArchive<impl std::io::Read + std::io::Seek>,
    path: &str,
) -> Result<HashMap<String, String>> {
    let mut rels = HashMap::new();
    let rels_xml = archive
        .by_name(path)
        .with_context(|| format!("Failed to find {}", path))?;
    let mut reader = Reader::from_reader(BufReader::new(rels_xml));
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                if e.name().as_ref() == b"Relationship" {
                    let mut id = String::new();
                    let mut target = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"Id" => id = attr.unescape_value()?.to_string(),
                            b"Target" => target = attr.unescape_value()?.to_string(),
                            _ => {}
                        }
                    }
                    rels.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Style attributes of a `cellXfs` entry that the extractor uses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStyle {
    pub num_fmt: String,
    pub bold: bool,
    pub indent: u8,
}

/// Shared string table entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedString {
    pub text: String,
    /// Made of more than one formatted run
    pub rich: bool,
}

pub struct XlsxReader<'a, R: std::io::Read + std::io::Seek> {
    archive: &'a mut ZipArchive<R>,
    shared_strings: Vec<SharedString>,
    styles: Vec<CellStyle>,
}

impl<'a, R: std::io::Read + std::io::Seek> XlsxReader<'a, R> {
    pub fn new(archive: &'a mut ZipArchive<R>) -> Result<Self> {
        let shared_strings = extract_shared_strings(archive).unwrap_or_default();
        let styles = parse_styles(archive).unwrap_or_default();
        Ok(Self {
            archive,
            shared_strings,
            styles,
        })
    }
}

impl<'a, R: std::io::Read + std::io::Seek> WorkbookReader for XlsxReader<'a, R> {
    fn read_sheets(&mut self) -> Result<Vec<Sheet>> {
        let entries = self.get_sheet_entries()?;
        let rels = read_relationships(self.archive, "xl/_rels/workbook.xml.rels")?;
        let mut sheets = Vec::with_capacity(entries.len());

        for entry in entries {
            let target = rels.get(&entry.rel_id).ok_or_else(|| {
                anyhow::anyhow!(
                    "Relationship '{}' not found for sheet '{}'",
                    entry.rel_id,
                    entry.name
                )
            })?;
            let path = sheet_part_path(target);
            let mut sheet = Sheet::new(entry.name);
            sheet.visible = !entry.hidden;
            sheet.cells = self
                .parse_sheet_xml(&path)
                .with_context(|| format!("Failed to parse {}", path))?;
            sheets.push(sheet);
        }

        Ok(sheets)
    }
}

/// `<sheet>` element of `xl/workbook.xml`
struct SheetEntry {
    name: String,
    rel_id: String,
    hidden: bool,
}

/// Hyperlink anchor found in a worksheet
struct HyperlinkRef {
    range: (u32, u32, u32, u32),
    rel_id: Option<String>,
    location: Option<String>,
}

impl<'a, R: std::io::Read + std::io::Seek> XlsxReader<'a, R> {
    /// Sheets in workbook order with their relationship id and hidden flag
    fn get_sheet_entries(&mut self) -> Result<Vec<SheetEntry>> {
        let mut entries = Vec::new();
        let workbook_xml = self
            .archive
            .by_name("xl/workbook.xml")
            .context("Failed to find xl/workbook.xml")?;
        let mut reader = Reader::from_reader(BufReader::new(workbook_xml));
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) => {
                    if e.name().as_ref() == b"sheet" {
                        let mut name = None;
                        let mut rel_id = String::new();
                        let mut hidden = false;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"name" => name = Some(attr.unescape_value()?.to_string()),
                                b"r:id" => rel_id = attr.unescape_value()?.to_string(),
                                b"state" => {
                                    let state = attr.unescape_value()?;
                                    hidden = state == "hidden" || state == "veryHidden";
                                }
                                _ => {}
                            }
                        }
                        if let Some(name) = name {
                            entries.push(SheetEntry {
                                name,
                                rel_id,
                                hidden,
                            });
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(entries)
    }

    fn parse_sheet_xml(&mut self, path: &str) -> Result<HashMap<(u32, u32), Cell>> {
        let mut cells = HashMap::new();
        let mut hyperlinks = Vec::new();

        {
            let sheet_xml = self.archive.by_name(path)?;
            let mut reader = Reader::from_reader(BufReader::new(sheet_xml));
            reader.config_mut().trim_text(true);

            let mut buf = Vec::new();
            let mut current_row = 0u32;
            let mut current_col = 0u32;

            loop {
                let event = reader.read_event_into(&mut buf)?;
                let is_start = matches!(event, Event::Start(_));
                match event {
                    Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                        b"row" => {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"r" {
                                    current_row =
                                        attr.unescape_value()?.parse::<u32>()?.saturating_sub(1);
                                }
                            }
                            current_col = 0;
                        }
                        b"c" => {
                            let mut r_attr = String::new();
                            let mut s_attr = None;
                            let mut t_attr = String::new();
                            for attr in e.attributes().flatten() {
                                match attr.key.as_ref() {
                                    b"r" => r_attr = attr.unescape_value()?.to_string(),
                                    b"s" => s_attr = Some(attr.unescape_value()?.parse::<usize>()?),
                                    b"t" => t_attr = attr.unescape_value()?.to_string(),
                                    _ => {}
                                }
                            }

                            let (row, col) = if !r_attr.is_empty() {
                                let (r, c) =
                                    parse_cell_ref(&r_attr).unwrap_or((current_row, current_col));
                                current_col = c + 1;
                                (r, c)
                            } else {
                                let c = current_col;
                                current_col += 1;
                                (current_row, c)
                            };

                            let style = s_attr.and_then(|idx| self.styles.get(idx));
                            let contents = if is_start {
                                parse_cell_contents(
                                    &mut reader,
                                    &t_attr,
                                    &self.shared_strings,
                                    style.map(|s| s.num_fmt.as_str()),
                                )?
                            } else {
                                CellContents::default()
                            };

                            let value = match contents.formula {
                                Some(f) => {
                                    let f = f.strip_prefix('=').unwrap_or(&f).to_string();
                                    CellValue::formula(f, contents.scalar)
                                }
                                None if contents.rich => match contents.scalar {
                                    Scalar::Text(t) => CellValue::RichText(t),
                                    other => CellValue::Plain(other),
                                },
                                None => CellValue::Plain(contents.scalar),
                            };

                            let cell = Cell {
                                row,
                                col,
                                value,
                                raw: contents.raw,
                                num_fmt: style.map(|s| s.num_fmt.clone()),
                                bold: style.is_some_and(|s| s.bold),
                                indent: style.map(|s| s.indent).unwrap_or(0),
                            };
                            cells.insert((row, col), cell);
                        }
                        b"hyperlink" => {
                            if let Some(link) = parse_hyperlink(e)? {
                                hyperlinks.push(link);
                            }
                        }
                        _ => {}
                    },
                    Event::Eof => break,
                    _ => {}
                }
                buf.clear();
            }
        }

        if !hyperlinks.is_empty() {
            let rels = sheet_rels_path(path)
                .and_then(|rels_path| read_relationships(self.archive, &rels_path).ok())
                .unwrap_or_default();
            apply_hyperlinks(&mut cells, &hyperlinks, &rels);
        }

        Ok(cells)
    }
}

fn parse_hyperlink(e: &BytesStart<'_>) -> Result<Option<HyperlinkRef>> {
    let mut range = None;
    let mut rel_id = None;
    let mut location = None;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"ref" => {
                let value = attr.unescape_value()?;
                range = parse_cell_range(&value)
                    .or_else(|| parse_cell_ref(&value).map(|(r, c)| (r, c, r, c)));
            }
            b"r:id" => rel_id = Some(attr.unescape_value()?.to_string()),
            b"location" => location = Some(attr.unescape_value()?.to_string()),
            _ => {}
        }
    }
    Ok(range.map(|range| HyperlinkRef {
        range,
        rel_id,
        location,
    }))
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`
fn sheet_rels_path(path: &str) -> Option<String> {
    let (dir, file) = path.rsplit_once('/')?;
    Some(format!("{}/_rels/{}.rels", dir, file))
}

/// Wrap text cells covered by a hyperlink anchor
fn apply_hyperlinks(
    cells: &mut HashMap<(u32, u32), Cell>,
    links: &[HyperlinkRef],
    rels: &HashMap<String, String>,
) {
    for link in links {
        let target = link
            .rel_id
            .as_ref()
            .and_then(|id| rels.get(id).cloned())
            .or_else(|| link.location.as_ref().map(|l| format!("#{}", l)));
        let (r0, c0, r1, c1) = link.range;
        for cell in cells.values_mut() {
            if cell.row < r0 || cell.row > r1 || cell.col < c0 || cell.col > c1 {
                continue;
            }
            let text = match &cell.value {
                CellValue::Plain(Scalar::Text(t)) | CellValue::RichText(t) => t.clone(),
                _ => continue,
            };
            cell.value = CellValue::Hyperlink {
                text,
                target: target.clone(),
            };
        }
    }
}

#[derive(Debug, Default)]
struct CellContents {
    scalar: Scalar,
    formula: Option<String>,
    raw: Option<String>,
    rich: bool,
}

fn parse_cell_contents<R: std::io::BufRead>(
    reader: &mut Reader<R>,
    t_attr: &str,
    shared_strings: &[SharedString],
    num_fmt: Option<&str>,
) -> Result<CellContents> {
    let mut contents = CellContents::default();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                b"v" => {
                    let v_text = if let Event::Start(_) = event {
                        read_text_node(reader)?
                    } else {
                        String::new()
                    };
                    contents.scalar = match t_attr {
                        "s" => {
                            let idx = v_text.parse::<usize>().unwrap_or(0);
                            let shared = shared_strings.get(idx).cloned().unwrap_or_default();
                            contents.rich = shared.rich;
                            Scalar::Text(shared.text)
                        }
                        "b" => Scalar::Boolean(v_text == "1"),
                        "e" => Scalar::Error(v_text.clone()),
                        "str" | "d" => Scalar::Text(v_text.clone()),
                        _ => {
                            // Text-formatted numbers stay text
                            if num_fmt == Some("@") {
                                Scalar::Text(v_text.clone())
                            } else if let Ok(n) = v_text.parse::<f64>() {
                                Scalar::Number(n)
                            } else {
                                Scalar::Text(v_text.clone())
                            }
                        }
                    };
                    if !v_text.is_empty() {
                        contents.raw = Some(v_text);
                    }
                }
                b"f" => {
                    let f_text = if let Event::Start(_) = event {
                        read_text_node(reader)?
                    } else {
                        String::new()
                    };
                    // Shared formula children carry an empty <f si=".."/>; the
                    // cached result is what matters, so the text stays empty.
                    contents.formula = Some(f_text);
                }
                b"is" => {
                    // Inline string can have multiple <t> tags
                    if let Event::Start(_) = event {
                        let mut is_text = String::new();
                        let mut runs = 0usize;
                        let mut is_buf = Vec::new();
                        loop {
                            match reader.read_event_into(&mut is_buf)? {
                                Event::Start(ref ee) if ee.name().as_ref() == b"t" => {
                                    is_text.push_str(&read_text_node(reader)?);
                                }
                                Event::Start(ref ee) if ee.name().as_ref() == b"r" => runs += 1,
                                Event::End(ref ee) if ee.name().as_ref() == b"is" => break,
                                Event::Eof => break,
                                _ => {}
                            }
                            is_buf.clear();
                        }
                        contents.rich = runs > 1;
                        contents.raw = Some(is_text.clone());
                        contents.scalar = Scalar::Text(is_text);
                    }
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"c" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(contents)
}

pub fn extract_shared_strings(
    archive: &mut ZipArchive<impl std::io::Read + std::io::Seek>,
) -> Result<Vec<SharedString>> {
    let mut strings = Vec::new();
    let ss_xml = match archive.by_name("xl/sharedStrings.xml") {
        Ok(file) => file,
        Err(_) => return Ok(strings),
    };

    let mut reader = Reader::from_reader(BufReader::new(ss_xml));
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current = SharedString::default();
    let mut runs = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"t" => {
                current.text.push_str(&read_text_node(&mut reader)?);
            }
            Event::Start(e) if e.name().as_ref() == b"r" => runs += 1,
            Event::Start(e) if e.name().as_ref() == b"rPh" => {
                // Phonetic hints are not part of the displayed text
                skip_element(&mut reader, b"rPh")?;
            }
            Event::End(e) if e.name().as_ref() == b"si" => {
                current.rich = runs > 1;
                strings.push(std::mem::take(&mut current));
                runs = 0;
            }
            Event::Empty(e) if e.name().as_ref() == b"si" => {
                strings.push(SharedString::default());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn skip_element<R: std::io::BufRead>(reader: &mut Reader<R>, name: &[u8]) -> Result<()> {
    let mut buf = Vec::new();
    let mut depth = 1usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == name => depth += 1,
            Event::End(e) if e.name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn builtin_num_fmts() -> HashMap<u32, String> {
    let mut num_fmts = HashMap::new();
    num_fmts.insert(0, "General".to_string());
    num_fmts.insert(1, "0".to_string());
    num_fmts.insert(2, "0.00".to_string());
    num_fmts.insert(3, "#,##0".to_string());
    num_fmts.insert(4, "#,##0.00".to_string());
    num_fmts.insert(9, "0%".to_string());
    num_fmts.insert(10, "0.00%".to_string());
    num_fmts.insert(14, "mm-dd-yy".to_string());
    num_fmts.insert(15, "d-mmm-yy".to_string());
    num_fmts.insert(16, "d-mmm".to_string());
    num_fmts.insert(17, "mmm-yy".to_string());
    num_fmts.insert(22, "m/d/yy h:mm".to_string());
    num_fmts.insert(37, "#,##0 ;(#,##0)".to_string());
    num_fmts.insert(38, "#,##0 ;[Red](#,##0)".to_string());
    num_fmts.insert(39, "#,##0.00;(#,##0.00)".to_string());
    num_fmts.insert(40, "#,##0.00;[Red](#,##0.00)".to_string());
    num_fmts.insert(49, "@".to_string());
    num_fmts
}

/// Parse `xl/styles.xml` into one [`CellStyle`] per `cellXfs` entry
pub fn parse_styles(
    archive: &mut ZipArchive<impl std::io::Read + std::io::Seek>,
) -> Result<Vec<CellStyle>> {
    let mut num_fmts = builtin_num_fmts();

    let styles_xml = match archive.by_name("xl/styles.xml") {
        Ok(file) => file,
        Err(_) => return Ok(Vec::new()),
    };

    let mut reader = Reader::from_reader(BufReader::new(styles_xml));
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut bold_fonts: Vec<bool> = Vec::new();
    // (numFmtId, fontId, indent)
    let mut xfs: Vec<(u32, usize, u8)> = Vec::new();
    let mut in_fonts = false;
    let mut in_cell_xfs = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let is_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                b"numFmt" => {
                    let mut id = 0u32;
                    let mut code = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"numFmtId" => {
                                if let Ok(val) = attr.unescape_value()?.parse::<u32>() {
                                    id = val;
                                }
                            }
                            b"formatCode" => {
                                code = attr.unescape_value().unwrap_or_default().replace('\\', "");
                            }
                            _ => {}
                        }
                    }
                    if !code.is_empty() {
                        num_fmts.insert(id, code);
                    }
                }
                b"fonts" if !is_empty => in_fonts = true,
                b"font" if in_fonts => bold_fonts.push(false),
                b"b" if in_fonts => {
                    let mut bold = true;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"val" {
                            bold = !matches!(attr.value.as_ref(), b"0" | b"false");
                        }
                    }
                    if let Some(last) = bold_fonts.last_mut() {
                        *last = bold;
                    }
                }
                b"cellXfs" if !is_empty => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    let mut num_fmt_id = 0u32;
                    let mut font_id = 0usize;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"numFmtId" => {
                                num_fmt_id = attr.unescape_value()?.parse().unwrap_or(0)
                            }
                            b"fontId" => font_id = attr.unescape_value()?.parse().unwrap_or(0),
                            _ => {}
                        }
                    }
                    xfs.push((num_fmt_id, font_id, 0));
                }
                b"alignment" if in_cell_xfs => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"indent"
                            && let Some(last) = xfs.last_mut()
                        {
                            last.2 = attr.unescape_value()?.parse().unwrap_or(0);
                        }
                    }
                }
                _ => {}
            },
            Event::End(ref e) => match e.name().as_ref() {
                b"fonts" => in_fonts = false,
                b"cellXfs" => in_cell_xfs = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(xfs
        .into_iter()
        .map(|(num_fmt_id, font_id, indent)| CellStyle {
            num_fmt: num_fmts
                .get(&num_fmt_id)
                .cloned()
                .unwrap_or_else(|| "General".to_string()),
            bold: bold_fonts.get(font_id).copied().unwrap_or(false),
            indent,
        })
        .collect())
}

//! Synthetic XLSX workbooks for integration tests

#![allow(dead_code)]

use nsbu_core::reader::CellReference;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Number(f64),
    /// Formula text and its cached result
    Formula(String, f64),
}

#[derive(Debug, Clone)]
pub struct MockCell {
    pub row: u32,
    pub col: u32,
    pub value: Value,
    pub bold: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockSheet {
    pub name: String,
    pub cells: Vec<MockCell>,
    pub hidden: bool,
}

impl MockSheet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn text(mut self, row: u32, col: u32, text: &str) -> Self {
        self.push(row, col, Value::Text(text.to_string()), false);
        self
    }

    pub fn bold(mut self, row: u32, col: u32, text: &str) -> Self {
        self.push(row, col, Value::Text(text.to_string()), true);
        self
    }

    pub fn num(mut self, row: u32, col: u32, n: f64) -> Self {
        self.push(row, col, Value::Number(n), false);
        self
    }

    pub fn formula(mut self, row: u32, col: u32, formula: &str, cached: f64) -> Self {
        self.push(row, col, Value::Formula(formula.to_string(), cached), false);
        self
    }

    /// Label in column A followed by one number per column from B on
    pub fn line(mut self, row: u32, label: &str, values: &[f64]) -> Self {
        self = self.text(row, 0, label);
        for (i, v) in values.iter().enumerate() {
            self = self.num(row, 1 + i as u32, *v);
        }
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    fn push(&mut self, row: u32, col: u32, value: Value, bold: bool) {
        self.cells.push(MockCell {
            row,
            col,
            value,
            bold,
        });
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts>
<cellXfs count="2"><xf numFmtId="0" fontId="0"/><xf numFmtId="0" fontId="1" applyFont="1"/></cellXfs>
</styleSheet>"#;

/// Write a minimal but valid workbook with shared strings and a bold style
pub fn write_xlsx(path: &Path, sheets: &[MockSheet]) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    let mut shared: Vec<String> = Vec::new();
    let mut shared_index: BTreeMap<String, usize> = BTreeMap::new();
    let mut sheet_xml = Vec::new();

    for sheet in sheets {
        let mut rows: BTreeMap<u32, Vec<&MockCell>> = BTreeMap::new();
        for cell in &sheet.cells {
            rows.entry(cell.row).or_default().push(cell);
        }
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
        );
        for (row, mut cells) in rows {
            cells.sort_by_key(|c| c.col);
            xml.push_str(&format!(r#"<row r="{}">"#, row + 1));
            for cell in cells {
                let r = format!("{}{}", CellReference::col_to_letter(cell.col), cell.row + 1);
                let style = if cell.bold { r#" s="1""# } else { "" };
                match &cell.value {
                    Value::Text(text) => {
                        let next = shared.len();
                        let idx = *shared_index.entry(text.clone()).or_insert(next);
                        if idx == next {
                            shared.push(text.clone());
                        }
                        xml.push_str(&format!(
                            r#"<c r="{}"{} t="s"><v>{}</v></c>"#,
                            r, style, idx
                        ));
                    }
                    Value::Number(n) => {
                        xml.push_str(&format!(r#"<c r="{}"{}><v>{}</v></c>"#, r, style, n));
                    }
                    Value::Formula(f, cached) => {
                        xml.push_str(&format!(
                            r#"<c r="{}"{}><f>{}</f><v>{}</v></c>"#,
                            r,
                            style,
                            escape(f),
                            cached
                        ));
                    }
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        sheet_xml.push(xml);
    }

    zip.start_file("[Content_Types].xml", options)?;
    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
"#,
    );
    for i in 0..sheets.len() {
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            i + 1
        ));
    }
    content_types.push_str("</Types>");
    zip.write_all(content_types.as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#.as_bytes())?;

    zip.start_file("xl/workbook.xml", options)?;
    let mut workbook_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets>"#,
    );
    for (i, sheet) in sheets.iter().enumerate() {
        let state = if sheet.hidden { r#" state="hidden""# } else { "" };
        workbook_xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}"{} r:id="rId{}"/>"#,
            escape(&sheet.name),
            i + 1,
            state,
            i + 1
        ));
    }
    workbook_xml.push_str("</sheets></workbook>");
    zip.write_all(workbook_xml.as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    let mut rels_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for i in 0..sheets.len() {
        rels_xml.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            i + 1,
            i + 1
        ));
    }
    rels_xml.push_str("</Relationships>");
    zip.write_all(rels_xml.as_bytes())?;

    zip.start_file("xl/styles.xml", options)?;
    zip.write_all(STYLES.as_bytes())?;

    zip.start_file("xl/sharedStrings.xml", options)?;
    let mut sst = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">"#,
        shared.len()
    );
    for s in &shared {
        sst.push_str(&format!("<si><t>{}</t></si>", escape(s)));
    }
    sst.push_str("</sst>");
    zip.write_all(sst.as_bytes())?;

    for (i, xml) in sheet_xml.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;
        zip.write_all(xml.as_bytes())?;
    }

    zip.finish()?;
    Ok(())
}

/// Balance sheet with PPE at cost, depreciation, a formula net line and equity
pub fn balance_sheet() -> MockSheet {
    MockSheet::new("Баланс")
        .text(0, 0, "Бухгалтерский баланс")
        .text(1, 0, "Единица измерения: тыс. сум")
        .text(3, 0, "Наименование показателя")
        .text(3, 1, "Код стр.")
        .text(3, 2, "На начало отчетного периода")
        .text(3, 3, "На конец отчетного периода")
        .bold(4, 0, "I. Долгосрочные активы")
        .text(5, 0, "Основные средства по первоначальной стоимости")
        .text(5, 1, "010")
        .num(5, 2, 1000.0)
        .num(5, 3, 1200.0)
        .text(6, 0, "Износ основных средств")
        .text(6, 1, "011")
        .num(6, 2, 200.0)
        .num(6, 3, 300.0)
        .text(7, 0, "Остаточная стоимость")
        .text(7, 1, "012")
        .formula(7, 2, "C6-C7", 800.0)
        .formula(7, 3, "D6-D7", 900.0)
        .text(8, 0, "Уставный капитал")
        .text(8, 1, "410")
        .num(8, 2, 800.0)
        .num(8, 3, 900.0)
        .text(10, 0, "Руководитель")
}

/// Profit and loss with revenue under a bold marker and cost of sales
pub fn profit_loss() -> MockSheet {
    MockSheet::new("ОФР")
        .text(0, 0, "тыс. сум")
        .text(1, 0, "Наименование показателя")
        .text(1, 1, "2023")
        .text(1, 2, "2024")
        .bold(2, 0, "Выручка")
        .line(3, "Услуги", &[300.0, 320.0])
        .line(4, "Товары", &[200.0, 200.0])
        .bold(5, 0, "Себестоимость реализованной продукции")
        .line(6, "Материалы", &[-300.0, -310.0])
}

/// Cash flow without a code column: activity markers, signed flows and the
/// opening and reported closing balances
pub fn cash_flow_by_label(reported_closing: [f64; 2]) -> MockSheet {
    MockSheet::new("ДДС")
        .text(0, 0, "тыс. сум")
        .text(1, 0, "Статья")
        .text(1, 1, "2023")
        .text(1, 2, "2024")
        .line(2, "Остаток денежных средств на начало периода", &[40.0, 50.0])
        .bold(3, 0, "Операционная деятельность")
        .line(4, "Поступления от покупателей", &[900.0, 1000.0])
        .line(5, "Оплата поставщикам", &[-600.0, -700.0])
        .line(6, "Итого по операционной деятельности", &[300.0, 300.0])
        .bold(7, 0, "Инвестиционная деятельность")
        .line(8, "Приобретение основных средств", &[-200.0, -250.0])
        .bold(9, 0, "Финансовая деятельность")
        .line(10, "Получение кредитов", &[50.0, 0.0])
        .line(11, "Остаток денежных средств на конец периода", &reported_closing)
}

/// Cash flow keyed by line codes, with payments reported as positive amounts
pub fn cash_flow_by_code(reported_closing: f64) -> MockSheet {
    let rows: [(&str, &str, f64); 6] = [
        ("Поступления от покупателей", "020", 900.0),
        ("Оплата поставщикам", "040", 600.0),
        ("Итого по операционной деятельности", "080", 300.0),
        ("Приобретение основных средств", "100", 200.0),
        ("Остаток денежных средств на начало периода", "200", 40.0),
        ("Остаток денежных средств на конец периода", "210", reported_closing),
    ];
    let mut sheet = MockSheet::new("Форма 4")
        .text(0, 0, "тыс. сум")
        .text(1, 0, "Показатель")
        .text(1, 1, "Код строки")
        .text(1, 2, "За отчетный период");
    for (i, (label, code, value)) in rows.into_iter().enumerate() {
        let row = 2 + i as u32;
        sheet = sheet.text(row, 0, label).text(row, 1, code).num(row, 2, value);
    }
    sheet
}

/// Profit and loss whose "other operating expenses" marker sits at
/// `other_opex_row`, a few or many rows past the administrative marker at row 4
pub fn profit_loss_with_overheads(other_opex_row: u32) -> MockSheet {
    let mut sheet = MockSheet::new("ОФР")
        .text(0, 0, "тыс. сум")
        .text(1, 0, "Наименование показателя")
        .text(1, 1, "2023")
        .text(1, 2, "2024")
        .bold(2, 0, "Выручка")
        .line(3, "Услуги", &[500.0, 500.0])
        .bold(4, 0, "Административные расходы")
        .line(5, "Заработная плата", &[40.0, 40.0]);
    for row in 6..other_opex_row {
        sheet = sheet.line(row, &format!("Аренда склада {}", row), &[5.0, 5.0]);
    }
    sheet
        .line(other_opex_row, "Прочие операционные расходы", &[8.0, 8.0])
        .line(other_opex_row + 1, "Списание запасов", &[2.0, 2.0])
}

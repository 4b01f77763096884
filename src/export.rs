//! File exports of a list page. Every format renders the full filtered and
//! sorted view, never just the rows currently scrolled into the window.

use crate::entities::{EntitySpec, ExportColumn};
use crate::errors::{AppError, AppResult};
use crate::filter::value_text;
use crate::models::{ExportFormat, ExportResponse, Record};
use crate::sorting::{sort_value, DerivedKey};
use chrono::Utc;
use serde_json::Value;
use std::path::Path;

const UTF8_BOM: &str = "\u{FEFF}";

fn cell(record: &Record, column: &ExportColumn, derived: &[DerivedKey]) -> Option<Value> {
    sort_value(record, column.key, derived)
}

fn cell_text(record: &Record, column: &ExportColumn, derived: &[DerivedKey]) -> String {
    cell(record, column, derived)
        .map(|value| value_text(&value))
        .unwrap_or_default()
}

fn csv_field(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

pub fn render_csv(columns: &[ExportColumn], rows: &[Record], derived: &[DerivedKey]) -> String {
    let mut out = String::from(UTF8_BOM);
    let header = columns
        .iter()
        .map(|column| csv_field(column.label))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&header);
    out.push_str("\r\n");
    for row in rows {
        let line = columns
            .iter()
            .map(|column| csv_field(&cell_text(row, column, derived)))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push_str("\r\n");
    }
    out
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            ch if (ch as u32) < 0x20 && ch != '\n' && ch != '\t' && ch != '\r' => {}
            ch => out.push(ch),
        }
    }
    out
}

fn sheet_name(title: &str) -> String {
    let cleaned = title
        .chars()
        .filter(|ch| !matches!(ch, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(31)
        .collect::<String>();
    if cleaned.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

/// Single-sheet SpreadsheetML workbook with a bold header row of labels.
pub fn render_spreadsheet(title: &str, columns: &[ExportColumn], rows: &[Record], derived: &[DerivedKey]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<?mso-application progid=\"Excel.Sheet\"?>\n");
    out.push_str(
        "<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" \
         xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n",
    );
    out.push_str("<Styles><Style ss:ID=\"header\"><Font ss:Bold=\"1\"/></Style></Styles>\n");
    out.push_str(&format!("<Worksheet ss:Name=\"{}\">\n<Table>\n", xml_escape(&sheet_name(title))));

    out.push_str("<Row>");
    for column in columns {
        out.push_str(&format!(
            "<Cell ss:StyleID=\"header\"><Data ss:Type=\"String\">{}</Data></Cell>",
            xml_escape(column.label)
        ));
    }
    out.push_str("</Row>\n");

    for row in rows {
        out.push_str("<Row>");
        for column in columns {
            match cell(row, column, derived) {
                Some(Value::Number(number)) => out.push_str(&format!(
                    "<Cell><Data ss:Type=\"Number\">{}</Data></Cell>",
                    number
                )),
                Some(value) => out.push_str(&format!(
                    "<Cell><Data ss:Type=\"String\">{}</Data></Cell>",
                    xml_escape(&value_text(&value))
                )),
                None => out.push_str("<Cell/>"),
            }
        }
        out.push_str("</Row>\n");
    }

    out.push_str("</Table>\n</Worksheet>\n</Workbook>\n");
    out
}

fn html_escape(text: &str) -> String {
    xml_escape(text)
}

/// Print-ready HTML document; opening it triggers the print dialog.
pub fn render_print_html(title: &str, columns: &[ExportColumn], rows: &[Record], derived: &[DerivedKey]) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", html_escape(title)));
    out.push_str(
        "<style>\
         body{font-family:Arial,Helvetica,sans-serif;margin:24px;}\
         h1{font-size:18px;margin-bottom:4px;}\
         .meta{color:#666;font-size:11px;margin-bottom:12px;}\
         table{border-collapse:collapse;width:100%;font-size:11px;}\
         th,td{border:1px solid #ccc;padding:4px 6px;text-align:start;}\
         thead th{background:#1f3a5f;color:#fff;}\
         tr:nth-child(even) td{background:#f5f7fa;}\
         </style>\n",
    );
    out.push_str("</head>\n<body onload=\"window.print()\">\n");
    out.push_str(&format!("<h1>{}</h1>\n", html_escape(title)));
    out.push_str(&format!(
        "<div class=\"meta\">{} records, generated {}</div>\n",
        rows.len(),
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    ));
    out.push_str("<table>\n<thead><tr>");
    for column in columns {
        out.push_str(&format!("<th>{}</th>", html_escape(column.label)));
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for row in rows {
        out.push_str("<tr>");
        for column in columns {
            out.push_str(&format!("<td>{}</td>", html_escape(&cell_text(row, column, derived))));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    out
}

// A4 landscape, in points.
const PAGE_WIDTH: f64 = 842.0;
const PAGE_HEIGHT: f64 = 595.0;
const MARGIN: f64 = 36.0;
const TITLE_SIZE: f64 = 14.0;
const BODY_SIZE: f64 = 9.0;
const ROW_HEIGHT: f64 = 16.0;

fn pdf_text(text: &str, max_chars: usize) -> String {
    let mut clipped = text
        .chars()
        .map(|ch| if ch.is_ascii() && !ch.is_ascii_control() { ch } else { '?' })
        .collect::<String>();
    if clipped.chars().count() > max_chars {
        clipped = clipped.chars().take(max_chars.saturating_sub(3)).collect::<String>() + "...";
    }
    clipped.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)")
}

fn pdf_cell(font: &str, size: f64, x: f64, y: f64, text: &str) -> String {
    format!("BT /{} {} Tf 1 0 0 1 {:.2} {:.2} Tm ({}) Tj ET\n", font, size, x, y, text)
}

/// Paginated tabular PDF: title on the first page, shaded bold header row
/// repeated on every page, page numbers in the footer.
pub fn render_pdf(title: &str, columns: &[ExportColumn], rows: &[Record], derived: &[DerivedKey]) -> Vec<u8> {
    let usable_width = PAGE_WIDTH - 2.0 * MARGIN;
    let column_width = usable_width / columns.len().max(1) as f64;
    let max_chars = ((column_width - 6.0) / (BODY_SIZE * 0.5)).floor().max(4.0) as usize;

    let first_page_rows = ((PAGE_HEIGHT - 2.0 * MARGIN - TITLE_SIZE * 2.0) / ROW_HEIGHT).floor() as usize - 2;
    let other_page_rows = ((PAGE_HEIGHT - 2.0 * MARGIN) / ROW_HEIGHT).floor() as usize - 2;

    let mut pages: Vec<&[Record]> = Vec::new();
    let mut rest = rows;
    let mut capacity = first_page_rows.max(1);
    loop {
        let take = capacity.min(rest.len());
        let (chunk, tail) = rest.split_at(take);
        pages.push(chunk);
        rest = tail;
        capacity = other_page_rows.max(1);
        if rest.is_empty() {
            break;
        }
    }

    let page_count = pages.len();
    let mut streams = Vec::with_capacity(page_count);
    for (index, page_rows) in pages.iter().enumerate() {
        let mut content = String::new();
        let mut y = PAGE_HEIGHT - MARGIN;
        if index == 0 {
            y -= TITLE_SIZE;
            content.push_str(&pdf_cell("F2", TITLE_SIZE, MARGIN, y, &pdf_text(title, 120)));
            y -= TITLE_SIZE;
        }

        y -= ROW_HEIGHT;
        content.push_str(&format!(
            "0.12 0.23 0.37 rg {:.2} {:.2} {:.2} {:.2} re f 1 g\n",
            MARGIN,
            y - 4.0,
            usable_width,
            ROW_HEIGHT
        ));
        for (position, column) in columns.iter().enumerate() {
            let x = MARGIN + 3.0 + position as f64 * column_width;
            content.push_str(&pdf_cell("F2", BODY_SIZE, x, y, &pdf_text(column.label, max_chars)));
        }
        content.push_str("0 g\n");

        for row in page_rows.iter() {
            y -= ROW_HEIGHT;
            for (position, column) in columns.iter().enumerate() {
                let x = MARGIN + 3.0 + position as f64 * column_width;
                let text = pdf_text(&cell_text(row, column, derived), max_chars);
                content.push_str(&pdf_cell("F1", BODY_SIZE, x, y, &text));
            }
        }

        let footer = format!("Page {} of {}", index + 1, page_count);
        content.push_str(&pdf_cell("F1", 8.0, PAGE_WIDTH - MARGIN - 60.0, MARGIN / 2.0, &footer));
        streams.push(content);
    }

    // Object layout: 1 catalog, 2 page tree, 3-4 fonts, then page/content pairs.
    let mut objects: Vec<String> = Vec::new();
    let kids = (0..page_count)
        .map(|index| format!("{} 0 R", 5 + index * 2))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push(format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids, page_count));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string());
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>".to_string());
    for (index, stream) in streams.iter().enumerate() {
        let content_id = 6 + index * 2;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
            PAGE_WIDTH, PAGE_HEIGHT, content_id
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}endstream",
            stream.len(),
            stream
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, object) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{}\nendobj\n", index + 1, object));
    }
    let xref_offset = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for offset in offsets {
        out.push_str(&format!("{:010} 00000 n \n", offset));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    ));
    out.into_bytes()
}

pub fn render(format: ExportFormat, spec: &EntitySpec, rows: &[Record]) -> Vec<u8> {
    let derived = &spec.derived_keys;
    match format {
        ExportFormat::Csv => render_csv(&spec.columns, rows, derived).into_bytes(),
        ExportFormat::Spreadsheet => render_spreadsheet(&spec.title, &spec.columns, rows, derived).into_bytes(),
        ExportFormat::Pdf => render_pdf(&spec.title, &spec.columns, rows, derived),
        ExportFormat::Print => render_print_html(&spec.title, &spec.columns, rows, derived).into_bytes(),
    }
}

fn sanitize_filename_component(value: &str) -> String {
    let sanitized = value
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect::<String>();
    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        "export".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

/// Writes the rendered export into `export_dir` and returns its path.
pub fn write_export(export_dir: &Path, spec: &EntitySpec, format: ExportFormat, rows: &[Record]) -> AppResult<ExportResponse> {
    std::fs::create_dir_all(export_dir).map_err(|error| AppError::Io(error.to_string()))?;

    let file_name = format!(
        "{}-{}.{}",
        sanitize_filename_component(&spec.title),
        Utc::now().format("%Y%m%d-%H%M%S%3f"),
        format.extension()
    );
    let output_path = export_dir.join(file_name);
    if !output_path.starts_with(export_dir) {
        return Err(AppError::Io("Resolved export path escaped export directory".to_string()));
    }

    std::fs::write(&output_path, render(format, spec, rows)).map_err(|error| AppError::Io(error.to_string()))?;
    tracing::info!(entity = spec.kind.as_str(), format = format.as_str(), rows = rows.len(), "export written");
    Ok(ExportResponse {
        path: output_path.to_string_lossy().to_string(),
        format,
        rows: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::{render_csv, render_pdf, render_print_html, render_spreadsheet, sanitize_filename_component, write_export};
    use crate::entities::EntitySpec;
    use crate::models::{ExportFormat, Record};
    use serde_json::json;

    fn departments() -> Vec<Record> {
        vec![
            json!({ "id": 1, "name": "Claims \"Motor\"", "headOfEmployee": { "name": "Rana" }, "employees": [1, 2] }),
            json!({ "id": 2, "name": "Sales, Retail", "headOfEmployee": null, "employees": [] }),
        ]
        .into_iter()
        .filter_map(Record::from_value)
        .collect()
    }

    #[test]
    fn csv_has_bom_labels_and_doubled_quotes() {
        let spec = EntitySpec::departments();
        let csv = render_csv(&spec.columns, &departments(), &spec.derived_keys);
        assert!(csv.starts_with('\u{FEFF}'));
        let lines = csv.trim_start_matches('\u{FEFF}').lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "\"Department\",\"Head of Department\",\"Employees\",\"Created At\"");
        assert_eq!(lines[1], "\"Claims \"\"Motor\"\"\",\"Rana\",\"2\",\"\"");
        assert_eq!(lines[2], "\"Sales, Retail\",\"\",\"0\",\"\"");
    }

    #[test]
    fn spreadsheet_has_one_sheet_with_typed_cells() {
        let spec = EntitySpec::departments();
        let xml = render_spreadsheet(&spec.title, &spec.columns, &departments(), &spec.derived_keys);
        assert_eq!(xml.matches("<Worksheet ").count(), 1);
        assert!(xml.contains("<Data ss:Type=\"String\">Head of Department</Data>"));
        assert!(xml.contains("<Data ss:Type=\"Number\">2</Data>"));
        assert!(xml.contains("Claims &quot;Motor&quot;"));
    }

    #[test]
    fn pdf_paginates_long_tables() {
        let spec = EntitySpec::audit_logs();
        let rows = (0..120)
            .map(|index| Record::from_value(json!({ "id": index, "action": format!("login ({})", index) })).expect("record"))
            .collect::<Vec<_>>();
        let pdf = String::from_utf8(render_pdf(&spec.title, &spec.columns, &rows, &[])).expect("ascii pdf");
        assert!(pdf.starts_with("%PDF-1.4"));
        assert!(pdf.trim_end().ends_with("%%EOF"));
        assert!(pdf.contains("(Audit Log) Tj"));
        assert!(pdf.contains("login \\(7\\)"));
        let pages = pdf.matches("/Type /Page ").count();
        assert!(pages >= 4, "expected several pages, got {}", pages);
        assert!(pdf.contains(&format!("Page {} of {}", pages, pages)));
    }

    #[test]
    fn print_document_escapes_markup() {
        let spec = EntitySpec::employees();
        let rows = vec![Record::from_value(json!({ "name": "<b>Omar</b>", "email": "o@x.ae" })).expect("record")];
        let html = render_print_html(&spec.title, &spec.columns, &rows, &[]);
        assert!(html.contains("window.print()"));
        assert!(html.contains("&lt;b&gt;Omar&lt;/b&gt;"));
        assert!(html.contains("<th>Job Title</th>"));
    }

    #[test]
    fn export_file_lands_inside_export_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = EntitySpec::accident_reports("mashreq");
        let response = write_export(dir.path(), &spec, ExportFormat::Csv, &[]).expect("export");
        assert!(response.path.ends_with(".csv"));
        assert!(std::path::Path::new(&response.path).starts_with(dir.path()));
        assert_eq!(response.rows, 0);
        assert_eq!(sanitize_filename_component("../Mashreq Reports"), "mashreq_reports");
    }
}

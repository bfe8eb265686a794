//! Grant-agreement PDF generation.
//!
//! Emits a minimal single-page PDF 1.4 byte stream: catalog, page tree, one
//! Helvetica content stream, and a cross-reference table.  The layout is
//! fixed text, so the document is assembled directly rather than through a
//! layout engine.  The same bytes serve the preview endpoint and the
//! document embedded in envelope creation.

use chrono::{TimeZone, Utc};

use crate::models::Application;

const PAGE_WIDTH: u32 = 595; // A4 portrait, points
const PAGE_HEIGHT: u32 = 842;

/// Render the grant agreement for `app` as a complete PDF document.
pub fn render_agreement(app: &Application) -> Vec<u8> {
    let created = Utc
        .timestamp_opt(app.created_at, 0)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d")
        .to_string();

    let lines = [
        (format!("Grant Agreement #{}", app.id), 18),
        (String::new(), 12),
        (format!("Applicant: {}", app.applicant_name), 12),
        (format!("Email: {}", app.applicant_email), 12),
        (format!("Project: {}", app.title), 12),
        (
            format!("Amount: {} {}", app.currency, format_minor_units(app.amount)),
            12,
        ),
        (format!("Application date: {created}"), 12),
        (String::new(), 12),
        (
            "The grantee agrees to use the awarded funds solely for the".to_string(),
            12,
        ),
        (
            "project described above and to report on each disbursement".to_string(),
            12,
        ),
        ("milestone before the next tranche is released.".to_string(), 12),
        (String::new(), 12),
        (String::new(), 12),
        ("Signature: ____________________________".to_string(), 12),
    ];
    render_page(&lines)
}

/// Format an amount in minor units as a decimal string (`400000` → `4000.00`).
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn render_page(lines: &[(String, u32)]) -> Vec<u8> {
    // Content stream: one text block, cursor moved down per line.
    let mut content = String::from("BT\n/F1 12 Tf\n");
    let mut y = PAGE_HEIGHT as i32 - 72;
    for (text, size) in lines {
        if !text.is_empty() {
            content.push_str(&format!(
                "/F1 {size} Tf\n1 0 0 1 72 {y} Tm\n({}) Tj\n",
                escape_text(text)
            ));
        }
        y -= (*size as i32) + 8;
    }
    content.push_str("ET\n");

    let objects: Vec<String> = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>"
        ),
        format!(
            "<< /Length {} >>\nstream\n{}endstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for off in &offsets {
        out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}

/// Escape the characters PDF string literals reserve.
fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\\' => out.push_str("\\\\"),
            c if c.is_ascii() => out.push(c),
            // Helvetica/WinAnsi cannot carry arbitrary Unicode; degrade.
            _ => out.push('?'),
        }
    }
    out
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

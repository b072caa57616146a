//! Tolerant markup scanning used by the HTML extractors.
//!
//! None of this is a real HTML parser. Upstream pages are scanned with a few
//! forgiving patterns so that cosmetic markup changes do not break extraction.

use once_cell::sync::Lazy;
use regex::Regex;

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr(?:\s[^>]*)?>(.*?)</tr>").unwrap());
static CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<t([dh])(?:\s[^>]*)?>(.*?)</t[dh]>").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Removes `<!-- ... -->` blocks.
pub fn strip_comments(content: &str) -> String {
    COMMENT.replace_all(content, "").into_owned()
}

/// Removes every tag, keeping only the text between them.
pub fn strip_tags(content: &str) -> String {
    TAG.replace_all(content, "").into_owned()
}

/// Replaces tags with spaces and collapses runs of whitespace.
pub fn text_content(content: &str) -> String {
    let spaced = TAG.replace_all(content, " ");
    WHITESPACE.replace_all(&spaced, " ").trim().to_string()
}

/// Invokes `cb` with `(row, col, cell_text)` for every table cell in `content`,
/// in document order. Header (`th`) and data (`td`) cells are treated alike and
/// nested markup inside a cell is stripped. Rows without any cell are skipped
/// and do not consume a row index.
pub fn for_each_table_cell<F>(content: &str, mut cb: F)
where
    F: FnMut(usize, usize, &str),
{
    let content = strip_comments(content);
    let mut row_idx = 0;

    for row in ROW.captures_iter(&content) {
        let mut col_idx = 0;
        for cell in CELL.captures_iter(&row[1]) {
            cb(row_idx, col_idx, &strip_tags(&cell[2]));
            col_idx += 1;
        }
        if col_idx > 0 {
            row_idx += 1;
        }
    }
}

/// Collects the table cells of `content` into a grid of rows.
pub fn table_rows(content: &str) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for_each_table_cell(content, |row, _col, text| {
        if rows.len() <= row {
            rows.push(Vec::new());
        }
        rows[row].push(text.to_string());
    });
    rows
}

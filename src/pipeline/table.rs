//! Table handling: detect aligned-column regions in positioned words and
//! render extracted cell grids as GFM pipe tables.
//!
//! Extraction backends hand over tables as ragged grids of optional cells.
//! Real-world grids are messy: leading blank rows from over-eager region
//! detection, missing cells under merged regions, header rows with unnamed
//! columns. The renderer tolerates all of that rather than dropping the
//! table.
//!
//! Detection works from geometry alone: a run of three or more consecutive
//! visual lines whose column boundaries line up is treated as a table. PDF
//! has no table markup, so alignment is the only available signal.

use crate::pipeline::extract::{RawTable, WordToken};

/// Render one extracted table as a GFM pipe table.
///
/// The first row containing any non-empty cell becomes the header; empty
/// header cells get placeholder names ("Column 1", "Column 2", …).
/// All-empty rows are skipped, short rows are padded to the header width.
/// Returns an empty string when the grid has no usable content at all.
pub fn table_to_markdown(table: &RawTable) -> String {
    let header_idx = match table.iter().position(|row| row_has_content(row)) {
        Some(i) => i,
        None => return String::new(),
    };

    let header: Vec<String> = table[header_idx]
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let text = clean_cell(cell);
            if text.is_empty() {
                format!("Column {}", i + 1)
            } else {
                text
            }
        })
        .collect();
    let width = header.len();
    if width == 0 {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&render_row(&header));
    out.push('\n');
    out.push_str(&separator_row(width));

    for row in table.iter().skip(header_idx + 1) {
        if !row_has_content(row) {
            continue;
        }
        let mut cells: Vec<String> = row.iter().map(clean_cell).collect();
        while cells.len() < width {
            cells.push(String::new());
        }
        out.push('\n');
        out.push_str(&render_row(&cells));
    }

    out
}

fn row_has_content(row: &[Option<String>]) -> bool {
    row.iter()
        .any(|cell| cell.as_deref().is_some_and(|c| !c.trim().is_empty()))
}

/// Flatten a cell for a pipe table: no newlines, no bare pipes.
fn clean_cell(cell: &Option<String>) -> String {
    cell.as_deref()
        .unwrap_or("")
        .replace('\n', " ")
        .replace('|', "\\|")
        .trim()
        .to_string()
}

fn render_row(cells: &[String]) -> String {
    let mut line = String::from("|");
    for cell in cells {
        line.push(' ');
        line.push_str(cell);
        line.push_str(" |");
    }
    line
}

fn separator_row(width: usize) -> String {
    let mut line = String::from("|");
    for _ in 0..width {
        line.push_str(" --- |");
    }
    line
}

// ── Detection ────────────────────────────────────────────────────────────────

/// Minimum consecutive aligned lines to call something a table. Two aligned
/// lines happen by accident (a heading over a date); three or more rarely do.
const MIN_TABLE_ROWS: usize = 3;

/// Column boundaries within this many points still count as aligned.
const BOUNDARY_TOLERANCE: f32 = 5.0;

/// Vertical distance within which words share a line, matching the
/// structure reconstructor's grouping.
const ROW_TOLERANCE: f32 = 2.5;

/// Find table regions in one page's positioned words.
///
/// A line's column boundaries sit in the midpoints of horizontal gaps
/// wider than twice the line's average character width. Runs of
/// [`MIN_TABLE_ROWS`]+ consecutive lines with matching boundaries become
/// tables; each line is split into cells at the run's boundaries.
pub fn detect_tables(words: &[WordToken]) -> Vec<RawTable> {
    let rows = group_rows(words);
    let boundaries: Vec<Vec<f32>> = rows.iter().map(|r| column_boundaries(r)).collect();

    let mut tables = Vec::new();
    let mut i = 0;
    while i < rows.len() {
        if boundaries[i].is_empty() {
            i += 1;
            continue;
        }
        let mut end = i + 1;
        while end < rows.len() && boundaries_align(&boundaries[i], &boundaries[end]) {
            end += 1;
        }
        if end - i >= MIN_TABLE_ROWS {
            let table: RawTable = rows[i..end]
                .iter()
                .map(|row| split_at_boundaries(row, &boundaries[i]))
                .collect();
            tables.push(table);
        }
        i = end.max(i + 1);
    }
    tables
}

/// Group words into visual rows, sorted top to bottom then left to right.
fn group_rows(words: &[WordToken]) -> Vec<Vec<&WordToken>> {
    let mut sorted: Vec<&WordToken> = words.iter().collect();
    sorted.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

    let mut rows: Vec<Vec<&WordToken>> = Vec::new();
    let mut last_y = f32::MIN;
    for w in sorted {
        if rows.is_empty() || (w.y - last_y).abs() > ROW_TOLERANCE {
            rows.push(vec![w]);
        } else if let Some(row) = rows.last_mut() {
            row.push(w);
        }
        last_y = w.y;
    }
    for row in &mut rows {
        row.sort_by(|a, b| a.x.total_cmp(&b.x));
    }
    rows
}

/// Approximate rendered width of a word: glyphs average half an em.
fn word_width(w: &WordToken) -> f32 {
    w.text.chars().count() as f32 * w.size * 0.5
}

/// Midpoints of gaps wide enough to separate columns.
fn column_boundaries(row: &[&WordToken]) -> Vec<f32> {
    if row.len() < 2 {
        return Vec::new();
    }
    let avg_char_width = row.iter().map(|w| w.size * 0.5).sum::<f32>() / row.len() as f32;
    let threshold = avg_char_width * 2.0;

    let mut boundaries = Vec::new();
    for pair in row.windows(2) {
        let end = pair[0].x + word_width(pair[0]);
        let gap = pair[1].x - end;
        if gap > threshold {
            boundaries.push(end + gap / 2.0);
        }
    }
    boundaries
}

fn boundaries_align(a: &[f32], b: &[f32]) -> bool {
    !a.is_empty()
        && a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= BOUNDARY_TOLERANCE)
}

/// Split a row into cells at column boundaries, joining each column's
/// words with single spaces.
fn split_at_boundaries(row: &[&WordToken], boundaries: &[f32]) -> Vec<Option<String>> {
    let mut cells: Vec<Vec<&str>> = vec![Vec::new(); boundaries.len() + 1];
    for w in row {
        let col = boundaries.iter().take_while(|b| w.x > **b).count();
        cells[col].push(w.text.as_str());
    }
    cells
        .into_iter()
        .map(|words| {
            if words.is_empty() {
                None
            } else {
                Some(words.join(" "))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_simple_table() {
        let table = vec![
            vec![cell("Año"), cell("Autor")],
            vec![cell("1928"), cell("Kelsen")],
            vec![cell("1934"), cell("Ross")],
        ];
        assert_eq!(
            table_to_markdown(&table),
            "| Año | Autor |\n| --- | --- |\n| 1928 | Kelsen |\n| 1934 | Ross |"
        );
    }

    #[test]
    fn test_leading_empty_rows_skipped() {
        let table = vec![
            vec![None, None],
            vec![cell(""), cell("  ")],
            vec![cell("A"), cell("B")],
            vec![cell("1"), cell("2")],
        ];
        let md = table_to_markdown(&table);
        assert!(md.starts_with("| A | B |"), "got: {md}");
        assert!(md.contains("| 1 | 2 |"));
    }

    #[test]
    fn test_all_empty_table_renders_nothing() {
        let table: RawTable = vec![vec![None, None], vec![cell(""), cell("")]];
        assert_eq!(table_to_markdown(&table), "");
        assert_eq!(table_to_markdown(&RawTable::new()), "");
    }

    #[test]
    fn test_unnamed_header_cells_get_placeholders() {
        let table = vec![
            vec![cell("Nombre"), None, cell("Edad")],
            vec![cell("Ana"), cell("Lima"), cell("31")],
        ];
        let md = table_to_markdown(&table);
        assert!(
            md.starts_with("| Nombre | Column 2 | Edad |"),
            "got: {md}"
        );
    }

    #[test]
    fn test_short_rows_padded() {
        let table = vec![
            vec![cell("A"), cell("B"), cell("C")],
            vec![cell("1")],
        ];
        let md = table_to_markdown(&table);
        assert!(md.ends_with("| 1 |  |  |"), "got: {md}");
    }

    #[test]
    fn test_empty_body_rows_skipped() {
        let table = vec![
            vec![cell("A"), cell("B")],
            vec![None, None],
            vec![cell("1"), cell("2")],
        ];
        let md = table_to_markdown(&table);
        assert_eq!(md.lines().count(), 3, "got: {md}");
    }

    #[test]
    fn test_pipes_and_newlines_escaped() {
        let table = vec![
            vec![cell("Campo"), cell("Valor")],
            vec![cell("a|b"), cell("línea1\nlínea2")],
        ];
        let md = table_to_markdown(&table);
        assert!(md.contains("a\\|b"), "got: {md}");
        assert!(md.contains("línea1 línea2"), "got: {md}");
    }

    // ── Detection ──

    fn tw(text: &str, x: f32, y: f32) -> WordToken {
        WordToken {
            text: text.to_string(),
            x,
            y,
            size: 10.0,
        }
    }

    /// Two columns at x=50 and x=200; every word is 3 chars so boundaries
    /// land in the same place on every row.
    fn aligned_rows(n: usize) -> Vec<WordToken> {
        let mut words = Vec::new();
        for i in 0..n {
            let y = 100.0 + 15.0 * i as f32;
            words.push(tw("aaa", 50.0, y));
            words.push(tw("bbb", 200.0, y));
        }
        words
    }

    #[test]
    fn test_detects_three_aligned_rows() {
        let tables = detect_tables(&aligned_rows(3));
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].len(), 3);
        assert_eq!(tables[0][0].len(), 2);
        assert_eq!(tables[0][0][0].as_deref(), Some("aaa"));
    }

    #[test]
    fn test_two_aligned_rows_are_not_a_table() {
        assert!(detect_tables(&aligned_rows(2)).is_empty());
    }

    #[test]
    fn test_misaligned_rows_break_the_run() {
        let mut words = aligned_rows(2);
        // Third row's second column starts much further right.
        words.push(tw("ccc", 50.0, 130.0));
        words.push(tw("ddd", 320.0, 130.0));
        assert!(detect_tables(&words).is_empty());
    }

    #[test]
    fn test_prose_lines_have_no_boundaries() {
        // Words flow with ordinary spacing; no column gap anywhere.
        let mut words = Vec::new();
        for i in 0..4 {
            let y = 100.0 + 14.0 * i as f32;
            for j in 0..6 {
                words.push(tw("texto", 50.0 + 30.0 * j as f32, y));
            }
        }
        assert!(detect_tables(&words).is_empty());
    }

    #[test]
    fn test_split_joins_multiword_cells() {
        let nueva = tw("Nueva", 50.0, 100.0);
        let york = tw("York", 85.0, 100.0);
        let year = tw("2020", 200.0, 100.0);
        let row = vec![&nueva, &york, &year];
        let cells = split_at_boundaries(&row, &[150.0]);
        assert_eq!(cells[0].as_deref(), Some("Nueva York"));
        assert_eq!(cells[1].as_deref(), Some("2020"));
    }

    #[test]
    fn test_detected_grid_renders_end_to_end() {
        let tables = detect_tables(&aligned_rows(3));
        let md = table_to_markdown(&tables[0]);
        assert!(md.starts_with("| aaa | bbb |"), "got: {md}");
        assert_eq!(md.lines().count(), 4);
    }
}

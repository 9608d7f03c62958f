//! Plain-text rendering of query previews.

use serde_json::Value;

use crate::client::PreviewResult;

/// Render `result` as an aligned table followed by a row count.
///
/// ```text
/// id | name
/// ---+------
/// 1  | alice
/// 2  | NULL
/// (2 rows)
/// ```
pub fn render_table(result: &PreviewResult) -> String {
    let headers: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    let width = headers
        .len()
        .max(result.rows.iter().map(Vec::len).max().unwrap_or(0));

    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            (0..width)
                .map(|i| row.get(i).map(format_value).unwrap_or_default())
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = (0..width)
        .map(|i| headers.get(i).map_or(0, |h| h.chars().count()))
        .collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    if width > 0 {
        let header_cells: Vec<String> = (0..width)
            .map(|i| headers.get(i).copied().unwrap_or_default().to_string())
            .collect();
        push_line(&mut out, &header_cells, &widths);

        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        out.push_str(&separator.join("-+-"));
        out.push('\n');

        for row in &rows {
            push_line(&mut out, row, &widths);
        }
    }

    let count = result.rows.len();
    out.push_str(&format!(
        "({} {})",
        count,
        if count == 1 { "row" } else { "rows" }
    ));
    out
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let pad = width.saturating_sub(cell.chars().count());
            format!("{}{}", cell, " ".repeat(pad))
        })
        .collect();
    out.push_str(padded.join(" | ").trim_end());
    out.push('\n');
}

/// `NULL` for null, strings without quotes, everything else as JSON.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::client::Column;

    fn column(name: &str) -> Column {
        Column {
            name: name.to_string(),
            column_type: None,
        }
    }

    #[test]
    fn test_render_aligned_table() {
        let result = PreviewResult {
            columns: vec![column("id"), column("name")],
            rows: vec![
                vec![json!(1), json!("alice")],
                vec![json!(22), Value::Null],
            ],
        };

        assert_eq!(
            render_table(&result),
            "id | name\n---+------\n1  | alice\n22 | NULL\n(2 rows)"
        );
    }

    #[test]
    fn test_render_empty_result() {
        let result = PreviewResult {
            columns: vec![column("count")],
            rows: Vec::new(),
        };

        assert_eq!(render_table(&result), "count\n-----\n(0 rows)");
    }

    #[test]
    fn test_render_without_columns() {
        assert_eq!(render_table(&PreviewResult::default()), "(0 rows)");
    }

    #[test]
    fn test_format_values() {
        assert_eq!(format_value(&json!(true)), "true");
        assert_eq!(format_value(&json!(1.5)), "1.5");
        assert_eq!(format_value(&json!("text")), "text");
        assert_eq!(format_value(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn test_single_row_footer() {
        let result = PreviewResult {
            columns: vec![column("x")],
            rows: vec![vec![json!("y")]],
        };
        assert!(render_table(&result).ends_with("(1 row)"));
    }
}

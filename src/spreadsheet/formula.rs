//! Formula text helpers. Formulas are kept as opaque strings and never evaluated,
//! these functions only rewrite their references.
use crate::spreadsheet::reference::col_to_index;
use crate::spreadsheet::reference::index_to_col;
use regex::Captures;
use regex::Regex;
use std::sync::LazyLock;

static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$?)([A-Za-z]{1,3})(\$?)([0-9]+)").expect("Hardcode regex pattern")
});

static ODS_REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]*)\]").expect("Hardcode regex pattern")
});

/// Applies `rewrite` to the parts of a formula that are outside string literals.
/// Doubled quotes inside a literal split it into two literals and an empty gap, which leaves them intact.
fn rewrite_outside_literals<F: Fn(&str) -> String>(formula: &str, rewrite: F) -> String {
    let mut result = String::with_capacity(formula.len());
    for (index, segment) in formula.split('"').enumerate() {
        if index > 0 {
            result.push('"');
        }
        if index % 2 == 1 {
            result.push_str(segment);
        } else {
            result.push_str(&rewrite(segment));
        }
    }
    result
}

/// Expands a shared formula for a dependent cell.
///
/// Relative parts of A1 references move by the offset between the dependent and the master cell,
/// `$` anchored parts stay. A reference shifted before A1 becomes `#REF!`.
///
/// # Arguments
/// * `formula` - Formula text of the master cell
/// * `row_offset` - Rows between master and dependent cell
/// * `col_offset` - Columns between master and dependent cell
pub(crate) fn shift_formula(formula: &str, row_offset: isize, col_offset: isize) -> String {
    rewrite_outside_literals(formula, |segment| {
        let mut shifted = String::with_capacity(segment.len());
        let mut last = 0usize;
        for captures in REFERENCE_PATTERN.captures_iter(segment) {
            let matched = captures.get(0).expect("Whole match");
            if !is_standalone(segment, matched.start(), matched.end()) {
                continue;
            }
            shifted.push_str(&segment[last..matched.start()]);
            shifted.push_str(&shift_reference(&captures, row_offset, col_offset));
            last = matched.end();
        }
        shifted.push_str(&segment[last..]);
        shifted
    })
}

/// A reference candidate is not part of a name (`LOG10`, `TABLE1_A`) or a function call (`ATAN2(`).
fn is_standalone(segment: &str, start: usize, end: usize) -> bool {
    let before = segment[..start].chars().next_back();
    let after = segment[end..].chars().next();
    let is_name_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.';
    !before.map(is_name_char).unwrap_or(false)
        && !after.map(|c| is_name_char(c) || c == '(').unwrap_or(false)
}

fn shift_reference(captures: &Captures, row_offset: isize, col_offset: isize) -> String {
    let col_anchor = &captures[1];
    let row_anchor = &captures[3];
    let letters = captures[2].to_ascii_uppercase();
    let (Some(col), Ok(row)) = (col_to_index(&letters), captures[4].parse::<isize>()) else {
        return captures[0].to_owned();
    };

    let col = if col_anchor.is_empty() { col as isize + col_offset } else { col as isize };
    let row = if row_anchor.is_empty() { row + row_offset } else { row };
    if col < 0 || row < 1 {
        return "#REF!".to_owned();
    }
    format!("{col_anchor}{}{row_anchor}{row}", index_to_col(col as usize))
}

/// Converts an OpenDocument formula (`of:=SUM([.A1:.B2];[Sheet2.C1])`) to the A1 style
/// used for workbook formulas (`SUM(A1:B2,Sheet2!C1)`).
pub(crate) fn normalize_ods_formula(formula: &str) -> String {
    let formula = match formula.split_once(':') {
        Some((namespace, rest)) if rest.starts_with('=') && namespace.chars().all(|c| c.is_ascii_lowercase()) => rest,
        _ => formula,
    };
    let formula = formula.strip_prefix('=').unwrap_or(formula);
    rewrite_outside_literals(formula, |segment| {
        ODS_REFERENCE_PATTERN
            .replace_all(segment, |captures: &Captures| {
                captures[1]
                    .split(':')
                    .map(|part| match part.strip_prefix('.') {
                        Some(reference) => reference.to_owned(),
                        None => part.trim_start_matches('$').replacen('.', "!", 1),
                    })
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .replace(';', ",")
    })
}

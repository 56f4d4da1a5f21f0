use crate::error::AppError;

pub const HEADER: [&str; 7] = [
    "id",
    "user_contact",
    "clinic_or_region",
    "modality",
    "query",
    "answer",
    "created_at",
];

/// Quote a field when it contains a comma, double quote, or line break; inner quotes are
/// doubled.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// One newline-terminated CSV line.
pub fn encode_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

pub fn header_line() -> String {
    encode_row(&HEADER)
}

/// Parse CSV text (header included) into raw rows, skipping the header.
pub fn parse_rows(text: &str) -> Result<Vec<Vec<String>>, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for result in rdr.records() {
        let row = result.map_err(|e| {
            AppError::new("LOG_PARSE_FAILED", "Failed to parse query log row")
                .with_details(e.to_string())
        })?;
        rows.push(row.iter().map(|v| v.to_string()).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_fields_are_left_alone() {
        assert_eq!(escape_field("rice blast"), "rice blast");
        assert_eq!(escape_field(""), "");
    }

    #[test]
    fn special_fields_are_quoted() {
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn quoted_field_survives_parse() {
        let original = "He said, \"hi\"\n";
        let text = format!("{}{}", header_line(), encode_row(&["1", "a", "b", "Text", original, "x", "t"]));
        let rows = parse_rows(&text).expect("parse");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][4], original);
    }
}

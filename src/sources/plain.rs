use camino::Utf8Path;
use serde_json::{Map, Value, json};

use crate::domain::Document;
use crate::error::IngestError;

use super::{DocumentStream, parse_lines, text_lines};

/// One JSON object per line; blank lines are ignored.
pub fn metrics_documents(path: &Utf8Path) -> Result<DocumentStream<'static>, IngestError> {
    let lines = text_lines(path)?;
    Ok(parse_lines(path.to_path_buf(), lines, |text| {
        parse_metric_line(text).map(|document| document.into_iter().collect())
    }))
}

/// One email per line, surrounding whitespace trimmed.
pub fn whitelist_documents(path: &Utf8Path) -> Result<DocumentStream<'static>, IngestError> {
    let lines = text_lines(path)?;
    Ok(parse_lines(path.to_path_buf(), lines, |text| {
        Ok(parse_whitelist_line(text).into_iter().collect())
    }))
}

pub fn parse_metric_line(text: &str) -> Result<Option<Document>, String> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(document)) => Ok(Some(document)),
        Ok(other) => Err(format!("expected a JSON object, found {other}")),
        Err(err) => Err(err.to_string()),
    }
}

pub fn parse_whitelist_line(text: &str) -> Option<Document> {
    let email = text.trim();
    if email.is_empty() {
        return None;
    }
    let mut document = Map::new();
    document.insert("user_id".to_string(), json!(email));
    Some(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_lines_must_be_objects() {
        let document = parse_metric_line(r#"{"metric": "DP", "mids": [1, 2]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(document["metric"], json!("DP"));
        assert_eq!(parse_metric_line("   ").unwrap(), None);
        assert!(parse_metric_line("[1, 2]").is_err());
        assert!(parse_metric_line("{oops").is_err());
    }

    #[test]
    fn whitelist_trims_and_skips_blank_lines() {
        assert_eq!(
            parse_whitelist_line("  someone@example.org \r").unwrap()["user_id"],
            json!("someone@example.org")
        );
        assert!(parse_whitelist_line("\t").is_none());
    }
}

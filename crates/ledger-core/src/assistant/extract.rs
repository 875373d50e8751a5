use serde_json::{Map, Value};

/// A spending record pulled out of the model's extraction output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTransaction {
    pub amount: f64,
    pub category: Option<String>,
    pub merchant: Option<String>,
}

/// Outcome of the extraction phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Transaction(ExtractedTransaction),
    /// Anything that is not a transaction: `{"intent":"query"}`, prose,
    /// malformed JSON, or an object without a usable amount.
    Query,
}

/// Classify raw model output.
///
/// The first balanced `{...}` that parses as a JSON object decides. Text
/// around it is ignored. It counts as a transaction only when `amount` is a
/// finite JSON number greater than zero.
pub fn parse_extraction(raw: &str) -> Extraction {
    let Some(object) = first_json_object(raw) else {
        return Extraction::Query;
    };

    let amount = match object.get("amount").and_then(Value::as_f64) {
        Some(a) if a.is_finite() && a > 0.0 => a,
        _ => return Extraction::Query,
    };

    Extraction::Transaction(ExtractedTransaction {
        amount,
        category: non_blank(object.get("category")),
        merchant: non_blank(object.get("merchant")),
    })
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_json_object(raw: &str) -> Option<Map<String, Value>> {
    raw.char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| balanced_end(&raw[start..]).map(|len| &raw[start..start + len]))
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Byte length of the balanced brace group at the start of `text`, skipping
/// braces inside JSON strings.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

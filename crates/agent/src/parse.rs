//! Best-effort recovery of JSON from model output.
//!
//! Models wrap JSON in code fences, prepend prose, or leave trailing commas.
//! Every entry point returns `None` instead of an error when nothing usable remains.

use serde_json::{Map, Value};

/// Parses the first JSON object in `raw`.
pub fn parse_object(raw: &str) -> Option<Map<String, Value>> {
    match parse_value(raw, '{', '}')? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Parses the first JSON array in `raw`.
pub fn parse_array(raw: &str) -> Option<Vec<Value>> {
    match parse_value(raw, '[', ']')? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

/// Parses a JSON array of strings, skipping non-string entries.
pub fn parse_string_list(raw: &str) -> Option<Vec<String>> {
    let items = parse_array(raw)?;
    Some(
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(value) => Some(value.trim().to_owned()),
                _ => None,
            })
            .filter(|value| !value.is_empty())
            .collect(),
    )
}

/// First word of a label-style reply, upper-cased, without quotes or punctuation.
pub fn parse_keyword(raw: &str) -> Option<String> {
    let word = strip_fences(raw)
        .split_whitespace()
        .next()?
        .trim_matches(|ch: char| !ch.is_ascii_alphanumeric())
        .to_ascii_uppercase();
    (!word.is_empty()).then_some(word)
}

fn parse_value(raw: &str, open: char, close: char) -> Option<Value> {
    let unfenced = strip_fences(raw);
    let candidate = slice_between(unfenced, open, close)?;

    serde_json::from_str::<Value>(candidate)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&strip_trailing_commas(candidate)).ok())
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, e.g. ```json
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn slice_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Removes commas that directly precede `}` or `]`, ignoring string contents.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut output = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in chars.iter().enumerate() {
        if in_string {
            output.push(*ch);
            if escaped {
                escaped = false;
            } else if *ch == '\\' {
                escaped = true;
            } else if *ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                output.push(*ch);
            }
            ',' => {
                let next = chars[index + 1..].iter().find(|next| !next.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    output.push(*ch);
                }
            }
            _ => output.push(*ch),
        }
    }

    output
}

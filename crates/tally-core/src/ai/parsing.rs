//! JSON parsing helpers for AI backend responses
//!
//! Models often wrap the JSON payload in prose or code fences, so these
//! functions cut the payload out before deserializing it.

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

use super::types::{AgentAction, ExtractedTransaction};

/// Longest slice of a raw response quoted in error messages
const RAW_PREVIEW_LEN: usize = 200;

fn preview(raw: &str) -> String {
    if raw.len() > RAW_PREVIEW_LEN {
        let mut end = RAW_PREVIEW_LEN;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &raw[..end])
    } else {
        raw.to_string()
    }
}

/// Slice from the first `open` to the last `close`
fn span(response: &str, open: char, close: char) -> Option<&str> {
    let start = response.find(open)?;
    let end = response.rfind(close)?;
    (start < end).then(|| &response[start..=end])
}

/// Cut the outermost JSON array or object out of a model response
fn extract_json(response: &str) -> Result<Value> {
    let response = response.trim();

    let array_start = response.find('[');
    let object_start = response.find('{');
    let json_str = match (array_start, object_start) {
        (Some(a), Some(o)) if a < o => span(response, '[', ']'),
        (Some(_), None) => span(response, '[', ']'),
        (_, Some(_)) => span(response, '{', '}'),
        (None, None) => None,
    };

    let json_str = json_str.ok_or_else(|| {
        Error::InvalidData(format!(
            "No JSON found in AI response | Raw: {}",
            preview(response)
        ))
    })?;

    serde_json::from_str(json_str).map_err(|e| {
        Error::InvalidData(format!(
            "Invalid JSON from AI: {} | Raw: {}",
            e,
            preview(json_str)
        ))
    })
}

/// Parse extracted transactions from an AI response
///
/// Accepts a list, a single object (treated as a one-item list) or an object
/// wrapping the list under `transactions`. Items that are not objects are
/// dropped.
pub fn parse_extraction(response: &str) -> Result<Vec<ExtractedTransaction>> {
    let items = match extract_json(response)? {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("transactions") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                obj.insert("transactions".into(), other);
                vec![Value::Object(obj)]
            }
            None => vec![Value::Object(obj)],
        },
        other => {
            return Err(Error::InvalidData(format!(
                "Expected a JSON list of transactions, got: {}",
                preview(&other.to_string())
            )))
        }
    };

    let mut extracted = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<ExtractedTransaction>(item) {
            Ok(tx) => extracted.push(tx),
            Err(e) => warn!("Skipping malformed extracted item: {}", e),
        }
    }
    Ok(extracted)
}

fn normalize_tag(raw: &str) -> String {
    raw.trim().to_uppercase().replace(&[' ', '-'][..], "_")
}

/// Parse the next agent action from an AI response
///
/// The `action` tag is matched case-insensitively and may use spaces or
/// dashes in place of underscores.
pub fn parse_agent_action(response: &str) -> Result<AgentAction> {
    let mut value = match extract_json(response)? {
        Value::Array(mut items) if !items.is_empty() => items.remove(0),
        other => other,
    };

    for key in ["action", "decision"] {
        let normalized = value.get(key).and_then(Value::as_str).map(normalize_tag);
        if let (Some(tag), Some(obj)) = (normalized, value.as_object_mut()) {
            obj.insert(key.to_string(), Value::String(tag));
        }
    }

    serde_json::from_value(value.clone()).map_err(|e| {
        Error::InvalidData(format!(
            "Invalid agent action from AI: {} | Raw: {}",
            e,
            preview(&value.to_string())
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeType;

    #[test]
    fn test_parse_extraction_list_in_prose() {
        let response = r#"Here you go:
```json
[{"amount": 12.5, "merchant": "Cafe", "transaction_date": "2026-01-05", "type": "EXPENSE"},
 {"amount": "3,000.00", "merchant": "Employer", "type": "INCOME"}]
```"#;
        let items = parse_extraction(response).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].merchant.as_deref(), Some("Cafe"));
        assert_eq!(items[1].amount, Some(3000.0));
    }

    #[test]
    fn test_parse_extraction_single_object() {
        let items = parse_extraction(r#"{"amount": 4.2, "merchant": "Bakery"}"#).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, Some(4.2));
    }

    #[test]
    fn test_parse_extraction_wrapped_list() {
        let items =
            parse_extraction(r#"{"transactions": [{"amount": 1}, {"amount": 2}, "junk"]}"#).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_parse_extraction_no_json() {
        let err = parse_extraction("I could not read this receipt").unwrap_err();
        assert!(err.to_string().contains("No JSON found"));
    }

    #[test]
    fn test_parse_extraction_truncates_raw() {
        let response = format!("{{\"amount\": {}", "9".repeat(500));
        let err = parse_extraction(&format!("{}}} trailing }}", response)).unwrap_err();
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn test_parse_agent_action_normalizes_tag() {
        let action = parse_agent_action(r#"{"action": "list accounts"}"#).unwrap();
        assert_eq!(action, AgentAction::ListAccounts);

        let action = parse_agent_action(
            r#"Decision: {"action": "decide", "decision": "update-existing", "target_transaction_id": "t1", "confidence": 0.95}"#,
        )
        .unwrap();
        match action {
            AgentAction::Decide(d) => {
                assert_eq!(d.decision, ChangeType::UpdateExisting);
                assert_eq!(d.target_transaction_id.as_deref(), Some("t1"));
            }
            other => panic!("Expected Decide, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_agent_action_unknown() {
        assert!(parse_agent_action(r#"{"action": "DANCE"}"#).is_err());
    }
}

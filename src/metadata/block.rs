//! Text codec for metadata blocks embedded in issue and pull request bodies.
//!
//! A block is an HTML-comment-delimited collapsible section holding the
//! header as pretty-printed JSON with sorted keys:
//!
//! ```text
//! <!-- planstore:metadata-block:plan-header -->
//! <details>
//! <summary><code>plan-header</code></summary>
//!
//! ```json
//! { ... }
//! ```
//!
//! </details>
//! <!-- /planstore:metadata-block:plan-header -->
//! ```

use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Range;

use super::schema::PLAN_HEADER;
use super::HeaderFields;
use crate::error::{PlanError, Result};

const JSON_FENCE_OPEN: &str = "```json\n";
const JSON_FENCE_CLOSE: &str = "\n```";

/// Opening marker of a named block.
pub fn start_marker(name: &str) -> String {
    format!("<!-- planstore:metadata-block:{name} -->")
}

/// Closing marker of a named block.
pub fn end_marker(name: &str) -> String {
    format!("<!-- /planstore:metadata-block:{name} -->")
}

/// Render a header as a `plan-header` block.
///
/// # Errors
///
/// Returns [`PlanError::Validation`] if the header does not satisfy the
/// current schema; nothing but current-version keys is ever written.
pub fn render_block(header: &HeaderFields) -> Result<String> {
    header.validate()?;
    let json = serde_json::to_string_pretty(header.as_map())?;
    Ok(format!(
        "{start}\n<details>\n<summary><code>{PLAN_HEADER}</code></summary>\n\n{JSON_FENCE_OPEN}{json}{JSON_FENCE_CLOSE}\n\n</details>\n{end}",
        start = start_marker(PLAN_HEADER),
        end = end_marker(PLAN_HEADER),
    ))
}

/// Locate the `plan-header` block.
///
/// Returns the byte range of the whole block (markers included) and the
/// JSON payload.
pub fn extract_block(text: &str) -> Option<(Range<usize>, &str)> {
    let start_marker = start_marker(PLAN_HEADER);
    let end_marker = end_marker(PLAN_HEADER);

    let start = text.find(&start_marker)?;
    let inner_start = start + start_marker.len();
    let end_rel = text[inner_start..].find(&end_marker)?;
    let inner = &text[inner_start..inner_start + end_rel];
    let end = inner_start + end_rel + end_marker.len();

    let json_start = inner.find(JSON_FENCE_OPEN)? + JSON_FENCE_OPEN.len();
    let json_end = json_start + inner[json_start..].rfind(JSON_FENCE_CLOSE)?;
    Some((start..end, &inner[json_start..json_end]))
}

/// Parse the `plan-header` block out of `text`.
///
/// Returns `Ok(None)` when the text carries no block at all.
///
/// # Errors
///
/// Returns [`PlanError::Validation`] if the block exists but its payload
/// is not a JSON object or declares an unsupported version.
pub fn parse_block(text: &str) -> Result<Option<HeaderFields>> {
    let Some((_, payload)) = extract_block(text) else {
        return Ok(None);
    };
    let raw: BTreeMap<String, Value> = serde_json::from_str(payload)
        .map_err(|e| PlanError::validation(PLAN_HEADER, format!("malformed block: {e}")))?;
    HeaderFields::from_raw(raw).map(Some)
}

/// Replace the block in `text`, or prepend one if none exists.
///
/// Bytes outside the block are left untouched.
pub fn replace_block(text: &str, block: &str) -> String {
    match extract_block(text) {
        Some((range, _)) => {
            let mut out = String::with_capacity(text.len() + block.len());
            out.push_str(&text[..range.start]);
            out.push_str(block);
            out.push_str(&text[range.end..]);
            out
        }
        None if text.is_empty() => block.to_string(),
        None => format!("{block}\n\n{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::LifecycleStage;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn header() -> HeaderFields {
        HeaderFields::for_creation("octocat", Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap())
    }

    #[test]
    fn test_render_then_parse() {
        let mut h = header();
        h.set("branch_name", json!("P12-add-retry"));
        let block = render_block(&h).unwrap();
        assert!(block.starts_with("<!-- planstore:metadata-block:plan-header -->"));
        assert!(block.ends_with("<!-- /planstore:metadata-block:plan-header -->"));
        assert_eq!(parse_block(&block).unwrap(), Some(h));
    }

    #[test]
    fn test_render_rejects_old_keys() {
        let mut h = header();
        h.set("objective_issue", json!(3));
        assert!(render_block(&h).is_err());
    }

    #[test]
    fn test_parse_without_block() {
        assert_eq!(parse_block("just a body").unwrap(), None);
    }

    #[test]
    fn test_parse_malformed_payload() {
        let text = format!(
            "{}\n```json\nnot json\n```\n{}",
            start_marker(PLAN_HEADER),
            end_marker(PLAN_HEADER)
        );
        assert!(matches!(
            parse_block(&text),
            Err(PlanError::Validation { .. })
        ));
    }

    #[test]
    fn test_parse_block_surrounded_by_text() {
        let block = render_block(&header()).unwrap();
        let text = format!("intro\n\n{block}\n\ntrailing body");
        let parsed = parse_block(&text).unwrap().unwrap();
        assert_eq!(parsed.created_by(), Some("octocat"));
    }

    #[test]
    fn test_stage_change_touches_one_line() {
        let before = render_block(&header()).unwrap();
        let mut h = header();
        h.set(
            "lifecycle_stage",
            json!(LifecycleStage::Implementing.as_str()),
        );
        let after = render_block(&h).unwrap();

        let diff: Vec<_> = before
            .lines()
            .zip(after.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(before.lines().count(), after.lines().count());
        assert_eq!(diff.len(), 1);
        assert!(diff[0].1.contains("implementing"));
    }

    #[test]
    fn test_replace_block_keeps_surrounding_bytes() {
        let block = render_block(&header()).unwrap();
        let text = format!("{block}\n\n---\n\nplan body");
        let mut h = header();
        h.set("branch_name", json!("P1-x"));
        let new_block = render_block(&h).unwrap();
        let replaced = replace_block(&text, &new_block);
        assert!(replaced.ends_with("\n\n---\n\nplan body"));
        assert_eq!(parse_block(&replaced).unwrap(), Some(h));
    }

    #[test]
    fn test_replace_block_prepends_when_missing() {
        let block = render_block(&header()).unwrap();
        assert_eq!(replace_block("", &block), block);
        assert!(replace_block("body", &block).ends_with("\n\nbody"));
    }
}

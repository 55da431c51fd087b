//! Layout of a draft pull request body.
//!
//! ```text
//! <plan-header block>
//!
//! ---
//!
//! [summary]
//!
//! <details>
//! <summary>original-plan</summary>
//!
//! <plan text>
//!
//! </details>
//! ---
//!
//! To check out this plan locally:
//! ...
//! ```
//!
//! The content separator is found by its first occurrence and the footer
//! separator by its last, so plan text containing horizontal rules survives
//! a round trip. The footer is only recognised when the checkout text
//! follows it.

/// Between the metadata block and the plan section.
pub const CONTENT_SEPARATOR: &str = "\n\n---\n\n";

/// Between the plan section and the checkout footer.
pub const FOOTER_SEPARATOR: &str = "\n---\n";

/// First line of the checkout footer.
pub const FOOTER_HEADING: &str = "To check out this plan locally:";

const DETAILS_OPEN: &str = "<details>\n<summary>original-plan</summary>\n\n";
const DETAILS_CLOSE: &str = "\n\n</details>";

/// A body split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrBody<'a> {
    pub metadata: &'a str,
    /// Summary (if any) plus the wrapped plan
    pub section: &'a str,
    /// Footer including its separator
    pub footer: Option<&'a str>,
}

impl<'a> PrBody<'a> {
    pub fn split(body: &'a str) -> Self {
        let (metadata, rest) = body.split_once(CONTENT_SEPARATOR).unwrap_or((body, ""));
        let footer_at = rest.rfind(FOOTER_SEPARATOR).filter(|&idx| {
            rest[idx + FOOTER_SEPARATOR.len()..]
                .trim_start()
                .starts_with(FOOTER_HEADING)
        });
        match footer_at {
            Some(idx) => Self {
                metadata,
                section: &rest[..idx],
                footer: Some(&rest[idx..]),
            },
            None => Self {
                metadata,
                section: rest,
                footer: None,
            },
        }
    }

    /// The original plan text.
    ///
    /// Sections written before the plan was wrapped are returned whole.
    pub fn plan_content(&self) -> &'a str {
        let Some(open) = self.section.find(DETAILS_OPEN) else {
            return self.section;
        };
        let inner = &self.section[open + DETAILS_OPEN.len()..];
        inner.rfind(DETAILS_CLOSE).map_or(inner, |close| &inner[..close])
    }

    /// Text placed ahead of the wrapped plan, if any.
    pub fn summary(&self) -> Option<&'a str> {
        let open = self.section.find(DETAILS_OPEN)?;
        let summary = self.section[..open].trim();
        (!summary.is_empty()).then_some(summary)
    }
}

/// Wrap plan text so it stays recoverable under a summary.
pub fn wrap_plan(content: &str) -> String {
    format!("{DETAILS_OPEN}{content}{DETAILS_CLOSE}")
}

/// Plan section with an optional summary ahead of the wrapped plan.
pub fn render_section(summary: Option<&str>, content: &str) -> String {
    match summary {
        Some(summary) => format!("{}\n\n{}", summary.trim(), wrap_plan(content)),
        None => wrap_plan(content),
    }
}

/// Checkout footer for PR `number`, separator included.
pub fn render_footer(number: u64) -> String {
    format!("{FOOTER_SEPARATOR}\n{FOOTER_HEADING}\n\n```\nplanstore checkout {number}\n```\n")
}

/// Assemble a full body.
pub fn render_body(metadata: &str, section: &str, footer: Option<&str>) -> String {
    format!("{metadata}{CONTENT_SEPARATOR}{section}{}", footer.unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_without_footer() {
        let body = render_body("META", &wrap_plan("plan"), None);
        let parts = PrBody::split(&body);
        assert_eq!(parts.metadata, "META");
        assert_eq!(parts.footer, None);
        assert_eq!(parts.plan_content(), "plan");
        assert_eq!(parts.summary(), None);
    }

    #[test]
    fn test_split_with_footer() {
        let footer = render_footer(12);
        let body = render_body("META", &wrap_plan("plan"), Some(&footer));
        let parts = PrBody::split(&body);
        assert_eq!(parts.footer, Some(footer.as_str()));
        assert_eq!(parts.plan_content(), "plan");
    }

    #[test]
    fn test_horizontal_rules_in_plan_survive() {
        let content = "Phase 1\n---\nPhase 2\n\n---\n\nPhase 3";
        let footer = render_footer(3);
        let body = render_body("META", &wrap_plan(content), Some(&footer));
        let parts = PrBody::split(&body);
        assert_eq!(parts.metadata, "META");
        assert_eq!(parts.plan_content(), content);

        let no_footer = render_body("META", &wrap_plan(content), None);
        assert_eq!(PrBody::split(&no_footer).footer, None);
        assert_eq!(PrBody::split(&no_footer).plan_content(), content);
    }

    #[test]
    fn test_summary_keeps_plan_recoverable() {
        let section = render_section(Some("Implemented retries."), "1. retry");
        let body = render_body("META", &section, None);
        let parts = PrBody::split(&body);
        assert_eq!(parts.summary(), Some("Implemented retries."));
        assert_eq!(parts.plan_content(), "1. retry");
    }

    #[test]
    fn test_unwrapped_section_is_taken_whole() {
        let parts = PrBody::split("META\n\n---\n\nraw plan");
        assert_eq!(parts.plan_content(), "raw plan");
    }
}

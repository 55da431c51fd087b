//! Plan identity and per-provider resolution.
//!
//! Providers disagree on what an identifier looks like: issue and pull
//! request trackers hand out small integers, ticket trackers hand out opaque
//! keys. [`PlanId`] carries both shapes so shared code never narrows an id
//! to a single numeric type.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

// ============================================================================
// Patterns
// ============================================================================

/// Branch name used by issue-backed plans, e.g. `P123-add-retry-01-15-1430`,
/// or bare `P123` when the title has no usable characters.
pub const ISSUE_BRANCH_PATTERN: &str = r"^P(\d+)(?:-|$)";

/// Branch prefix used before the `P` marker was introduced, e.g. `123-add-retry`.
pub const LEGACY_ISSUE_BRANCH_PATTERN: &str = r"^(\d+)-";

/// Issue or pull request URL, e.g. `https://github.com/o/r/pull/88`.
pub const CONTAINER_URL_PATTERN: &str = r"/(?:issues|pull)/(\d+)(?:[/?#].*)?$";

/// Ticket key, e.g. `PLN-1a2b3c4d`.
pub const TICKET_KEY_PATTERN: &str = r"^[A-Z][A-Z0-9]*-[A-Za-z0-9]+$";

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("identity patterns are valid regexes"))
}

fn issue_branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, ISSUE_BRANCH_PATTERN)
}

fn legacy_issue_branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, LEGACY_ISSUE_BRANCH_PATTERN)
}

fn container_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, CONTAINER_URL_PATTERN)
}

fn ticket_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, TICKET_KEY_PATTERN)
}

// ============================================================================
// Plan Id
// ============================================================================

/// Identifier of a plan as assigned by its provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanId {
    /// Issue or pull request number
    Number(u64),
    /// Opaque ticket key
    Key(String),
}

impl PlanId {
    /// Parse user input: `42`, `#42`, an issue/PR URL, or a ticket key.
    ///
    /// # Example
    ///
    /// ```
    /// use planstore::plan::PlanId;
    ///
    /// assert_eq!(PlanId::parse("#42"), Some(PlanId::Number(42)));
    /// assert_eq!(PlanId::parse("https://github.com/o/r/pull/7"), Some(PlanId::Number(7)));
    /// assert_eq!(PlanId::parse("PLN-9f2c"), Some(PlanId::Key("PLN-9f2c".into())));
    /// assert_eq!(PlanId::parse("not an id"), None);
    /// ```
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let digits = input.strip_prefix('#').unwrap_or(input);
        if let Ok(n) = digits.parse::<u64>() {
            return Some(Self::Number(n));
        }
        if let Some(caps) = container_url_re().captures(input) {
            return caps[1].parse().ok().map(Self::Number);
        }
        if ticket_key_re().is_match(input) {
            return Some(Self::Key(input.to_string()));
        }
        None
    }

    /// Read an identifier stored in a metadata value.
    ///
    /// Numeric strings are accepted because older headers stored numbers
    /// as strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(Self::Number),
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(
                s.parse::<u64>()
                    .map(Self::Number)
                    .unwrap_or_else(|_| Self::Key(s.clone())),
            ),
            _ => None,
        }
    }

    /// Encode as a metadata value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::Key(k) => Value::from(k.as_str()),
        }
    }

    /// The numeric form, if this id has one.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Key(_) => None,
        }
    }

    /// The key form, if this id has one.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Key(k) => Some(k),
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanId::Number(n) => write!(f, "#{}", n),
            PlanId::Key(k) => write!(f, "{}", k),
        }
    }
}

impl From<u64> for PlanId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for PlanId {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Storage provider that owns a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Plan stored as an issue with a companion content comment
    Issues,
    /// Plan stored as a draft pull request body
    DraftPr,
    /// Plan stored in a third-party ticket tracker
    Tickets,
}

impl Provider {
    /// Stable name used in config files and plan refs.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Issues => "issues",
            Provider::DraftPr => "draft_pr",
            Provider::Tickets => "tickets",
        }
    }

    /// Check whether `id` has the shape this provider assigns.
    pub fn accepts(&self, id: &PlanId) -> bool {
        match self {
            Provider::Issues | Provider::DraftPr => matches!(id, PlanId::Number(_)),
            Provider::Tickets => matches!(id, PlanId::Key(_)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "issues" | "issue" | "github" => Ok(Provider::Issues),
            "draft_pr" | "pr" | "github_draft_pr" => Ok(Provider::DraftPr),
            "tickets" | "ticket" => Ok(Provider::Tickets),
            other => Err(format!(
                "Unknown provider: {other}. Valid options: issues, draft_pr, tickets"
            )),
        }
    }
}

// ============================================================================
// Plan Ref
// ============================================================================

/// Fully resolved identity: which provider, which id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanRef {
    pub provider: Provider,
    pub id: PlanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl PlanRef {
    #[must_use]
    pub fn new(provider: Provider, id: PlanId) -> Self {
        Self {
            provider,
            id,
            url: None,
        }
    }
}

impl fmt::Display for PlanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

// ============================================================================
// Branch resolution
// ============================================================================

/// Recover an issue number from an issue-plan branch name.
///
/// Pure string matching; never touches the store.
///
/// # Example
///
/// ```
/// use planstore::plan::identity::issue_number_from_branch;
///
/// assert_eq!(issue_number_from_branch("P123-add-retry-01-15-1430"), Some(123));
/// assert_eq!(issue_number_from_branch("45-legacy-branch"), Some(45));
/// assert_eq!(issue_number_from_branch("feature/no-number"), None);
/// ```
pub fn issue_number_from_branch(branch: &str) -> Option<u64> {
    let branch = branch.rsplit_once("refs/heads/").map_or(branch, |(_, b)| b);
    issue_branch_re()
        .captures(branch)
        .or_else(|| legacy_issue_branch_re().captures(branch))
        .and_then(|caps| caps[1].parse().ok())
}

/// Build the branch name for an issue-backed plan.
///
/// The slug keeps lowercase alphanumerics and single dashes, capped at
/// 30 characters.
pub fn issue_branch_name(number: u64, title: &str) -> String {
    let slug = slugify(title, 30);
    if slug.is_empty() {
        format!("P{number}")
    } else {
        format!("P{number}-{slug}")
    }
}

/// Lowercase, dash-separated slug truncated to `max_len` characters.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let mut slug: String = slug.chars().take(max_len).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

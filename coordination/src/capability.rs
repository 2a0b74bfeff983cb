//! Capability matching
//!
//! Workers advertise a set of capability tags; each task type maps to exactly
//! one required capability through a [`CapabilityTable`]. A worker may handle
//! a task when its [`CapabilitySet`] contains the required capability or the
//! wildcard.
//!
//! ```text
//! Task type        | Required capability
//! -----------------|--------------------
//! captcha-solve    | CaptchaSolve
//! web-scrape       | WebScrape
//! form-fill        | FormFill
//! (anything else)  | Generic
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Unknown capability tag: {0}")]
    Unknown(String),

    #[error("Task type {0} cannot require the wildcard")]
    WildcardRequirement(String),
}

/// A closed set of capability tags, plus the wildcard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Capability {
    #[serde(rename = "captcha-solve")]
    CaptchaSolve,
    #[serde(rename = "web-scrape")]
    WebScrape,
    #[serde(rename = "form-fill")]
    FormFill,
    #[serde(rename = "generic")]
    Generic,
    /// Matches every task type.
    #[serde(rename = "*")]
    Wildcard,
}

impl Capability {
    /// Wire tag as sent to the queue service
    pub fn tag(&self) -> &'static str {
        match self {
            Self::CaptchaSolve => "captcha-solve",
            Self::WebScrape => "web-scrape",
            Self::FormFill => "form-fill",
            Self::Generic => "generic",
            Self::Wildcard => "*",
        }
    }

    /// All concrete (non-wildcard) capabilities
    pub fn concrete() -> &'static [Capability] {
        &[
            Capability::CaptchaSolve,
            Capability::WebScrape,
            Capability::FormFill,
            Capability::Generic,
        ]
    }
}

impl FromStr for Capability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "captcha-solve" => Ok(Self::CaptchaSolve),
            "web-scrape" => Ok(Self::WebScrape),
            "form-fill" => Ok(Self::FormFill),
            "generic" => Ok(Self::Generic),
            "*" => Ok(Self::Wildcard),
            other => Err(CapabilityError::Unknown(other.to_string())),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Ordered set of capabilities a worker advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self(caps.into_iter().collect())
    }

    /// A set holding only the wildcard
    pub fn wildcard() -> Self {
        Self::new([Capability::Wildcard])
    }

    /// Parse wire tags, rejecting unknown ones.
    pub fn parse<S: AsRef<str>>(tags: &[S]) -> Result<Self, CapabilityError> {
        tags.iter()
            .map(|t| t.as_ref().parse::<Capability>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    /// Whether this set can serve `required`.
    pub fn matches(&self, required: Capability) -> bool {
        self.0.contains(&Capability::Wildcard) || self.0.contains(&required)
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// Wire tags in set order
    pub fn tags(&self) -> Vec<String> {
        self.0.iter().map(|c| c.tag().to_string()).collect()
    }
}

/// Static task-type → required-capability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTable {
    entries: HashMap<String, Capability>,
}

impl CapabilityTable {
    /// Empty table; every type falls through to [`Capability::Generic`].
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add or replace a mapping.
    pub fn with_entry(mut self, task_type: impl Into<String>, cap: Capability) -> Self {
        self.entries.insert(task_type.into(), cap);
        self
    }

    /// Apply overrides from configuration (task type → capability tag).
    pub fn with_overrides(
        mut self,
        overrides: &HashMap<String, String>,
    ) -> Result<Self, CapabilityError> {
        for (task_type, tag) in overrides {
            let cap: Capability = tag.parse()?;
            if cap == Capability::Wildcard {
                return Err(CapabilityError::WildcardRequirement(task_type.clone()));
            }
            self.entries.insert(task_type.clone(), cap);
        }
        Ok(self)
    }

    /// Capability required to handle `task_type`.
    pub fn required_for(&self, task_type: &str) -> Capability {
        self.entries
            .get(task_type)
            .copied()
            .unwrap_or(Capability::Generic)
    }

    /// Whether a worker with `caps` may claim a task of `task_type`.
    pub fn is_eligible(&self, caps: &CapabilitySet, task_type: &str) -> bool {
        caps.matches(self.required_for(task_type))
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::empty()
            .with_entry("captcha-solve", Capability::CaptchaSolve)
            .with_entry("web-scrape", Capability::WebScrape)
            .with_entry("form-fill", Capability::FormFill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tags() {
        let set = CapabilitySet::parse(&["web-scrape", "form-fill"]).unwrap();
        assert!(set.contains(Capability::WebScrape));
        assert!(set.contains(Capability::FormFill));
        assert!(!set.contains(Capability::Wildcard));
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        let err = CapabilitySet::parse(&["web-scrape", "teleport"]).unwrap_err();
        assert_eq!(err, CapabilityError::Unknown("teleport".to_string()));
    }

    #[test]
    fn test_web_scrape_requires_tag_or_wildcard() {
        let table = CapabilityTable::default();

        let scraper = CapabilitySet::new([Capability::WebScrape]);
        let filler = CapabilitySet::new([Capability::FormFill]);
        let any = CapabilitySet::wildcard();

        assert!(table.is_eligible(&scraper, "web-scrape"));
        assert!(table.is_eligible(&any, "web-scrape"));
        assert!(!table.is_eligible(&filler, "web-scrape"));
    }

    #[test]
    fn test_unmapped_type_requires_generic() {
        let table = CapabilityTable::default();
        assert_eq!(table.required_for("pdf-render"), Capability::Generic);

        let generic = CapabilitySet::new([Capability::Generic]);
        assert!(table.is_eligible(&generic, "pdf-render"));
        assert!(!table.is_eligible(&generic, "captcha-solve"));
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert("login".to_string(), "form-fill".to_string());
        overrides.insert("web-scrape".to_string(), "generic".to_string());

        let table = CapabilityTable::default().with_overrides(&overrides).unwrap();
        assert_eq!(table.required_for("login"), Capability::FormFill);
        assert_eq!(table.required_for("web-scrape"), Capability::Generic);
    }

    #[test]
    fn test_overrides_reject_unknown_capability() {
        let mut overrides = HashMap::new();
        overrides.insert("login".to_string(), "hacking".to_string());
        assert!(CapabilityTable::default().with_overrides(&overrides).is_err());
    }

    #[test]
    fn test_overrides_reject_wildcard_requirement() {
        let mut overrides = HashMap::new();
        overrides.insert("login".to_string(), "*".to_string());
        assert_eq!(
            CapabilityTable::default().with_overrides(&overrides),
            Err(CapabilityError::WildcardRequirement("login".to_string()))
        );
    }

    #[test]
    fn test_tags_are_ordered() {
        let set = CapabilitySet::parse(&["*", "form-fill", "captcha-solve"]).unwrap();
        assert_eq!(set.tags(), vec!["captcha-solve", "form-fill", "*"]);
    }
}

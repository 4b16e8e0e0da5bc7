use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::utils::error::ConfigurationError;

/// Separator between attribute name and value in a stored selector path.
pub const PATH_SEPARATOR: char = '/';

/// A single `(attribute, value)` equality match, stored as `attribute/value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorPath {
    pub attribute: String,
    pub value: String,
}

impl SelectorPath {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Parse a stored rule value, naming the rule in any error.
    pub fn parse_rule(rule: &str, raw: &str) -> Result<Self, ConfigurationError> {
        let malformed = |reason: &str| ConfigurationError::MalformedSelector {
            rule: rule.to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let (attribute, value) = raw
            .trim()
            .split_once(PATH_SEPARATOR)
            .ok_or_else(|| malformed("missing '/' separator"))?;

        let attribute = attribute.trim();
        let value = value.trim();

        if attribute.is_empty() {
            return Err(malformed("empty attribute name"));
        }
        if value.is_empty() {
            return Err(malformed("empty attribute value"));
        }
        if attribute.chars().any(char::is_whitespace) {
            return Err(malformed("attribute name contains whitespace"));
        }

        Ok(Self::new(attribute, value))
    }
}

impl FromStr for SelectorPath {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_rule("selector", s)
    }
}

impl fmt::Display for SelectorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.attribute, PATH_SEPARATOR, self.value)
    }
}

/// One stored `(name, value)` rule row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRow {
    pub name: String,
    pub value: Option<String>,
}

impl RuleRow {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// Where a scraper finds its content. `searches` and `products` are required,
/// the item-level fields are optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub url: String,
    pub searches: SelectorPath,
    pub products: SelectorPath,
    pub title: Option<SelectorPath>,
    pub price: Option<SelectorPath>,
    pub stock: Option<SelectorPath>,
}

impl RuleSet {
    pub fn from_rules(scraper_id: i64, rows: &[RuleRow]) -> Result<Self, ConfigurationError> {
        let mut url = None;
        let mut searches = None;
        let mut products = None;
        let mut title = None;
        let mut price = None;
        let mut stock = None;

        for row in rows {
            let raw = row.value.as_deref().map(str::trim).unwrap_or_default();
            match row.name.as_str() {
                "url" => url = Some(raw.to_string()),
                "searches" => searches = optional_path("searches", raw)?,
                "products" => products = optional_path("products", raw)?,
                "title" => title = optional_path("title", raw)?,
                "price" => price = optional_path("price", raw)?,
                "stock" => stock = optional_path("stock", raw)?,
                other => {
                    tracing::warn!(scraper_id, rule = other, "Ignoring unknown rule");
                }
            }
        }

        let missing = |rule: &str| ConfigurationError::MissingRule {
            scraper_id,
            rule: rule.to_string(),
        };

        let url = url.filter(|u| !u.is_empty()).ok_or_else(|| missing("url"))?;
        if let Err(e) = Url::parse(&url) {
            return Err(ConfigurationError::InvalidUrl {
                scraper_id,
                url,
                reason: e.to_string(),
            });
        }

        Ok(Self {
            url,
            searches: searches.ok_or_else(|| missing("searches"))?,
            products: products.ok_or_else(|| missing("products"))?,
            title,
            price,
            stock,
        })
    }
}

// Empty means "not configured"; anything else has to parse.
fn optional_path(rule: &str, raw: &str) -> Result<Option<SelectorPath>, ConfigurationError> {
    if raw.is_empty() {
        Ok(None)
    } else {
        SelectorPath::parse_rule(rule, raw).map(Some)
    }
}

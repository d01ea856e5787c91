use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named rate-limit scope one or more endpoints draw from.
///
/// The set of categories is open and configuration-driven; the constructors
/// below only cover the names the default marketplace table uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Every outbound call draws from this category.
    pub fn global() -> Self {
        Self::new("GLOBAL")
    }

    pub fn catalog() -> Self {
        Self::new("CATALOG")
    }

    pub fn orders() -> Self {
        Self::new("ORDERS")
    }

    pub fn listings() -> Self {
        Self::new("LISTINGS")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Capacity and refill window for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryLimit {
    pub capacity: u32,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl CategoryLimit {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self { capacity, interval }
    }
}

/// Maps a request path (and optionally method) to the extra categories it
/// must draw from on top of GLOBAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Regex matched against the request path.
    pub pattern: String,
    /// When set, the rule only applies to this HTTP method (case-insensitive).
    #[serde(default)]
    pub method: Option<String>,
    pub categories: Vec<Category>,
}

impl RouteRule {
    pub fn new(pattern: impl Into<String>, categories: Vec<Category>) -> Self {
        Self {
            pattern: pattern.into(),
            method: None,
            categories,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// Static configuration supplied at controller construction. Immutable
/// afterwards; there is no runtime reconfiguration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Per-category limits. Must contain GLOBAL.
    pub limits: BTreeMap<Category, CategoryLimit>,
    /// Classification rules, evaluated in order.
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    /// Total transport attempts allowed when the remote answers 429.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Queue wait applied when the caller does not pass one explicitly.
    #[serde(default, with = "humantime_serde")]
    pub default_max_wait: Option<Duration>,
}

fn default_max_attempts() -> u32 {
    3
}

impl GateConfig {
    pub fn new(limits: BTreeMap<Category, CategoryLimit>) -> Self {
        Self {
            limits,
            routes: Vec::new(),
            max_attempts: default_max_attempts(),
            default_max_wait: Some(Duration::from_secs(30)),
        }
    }

    /// The default limits table for the marketplace API. One concrete
    /// instance; callers are free to supply their own.
    pub fn marketplace_defaults() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(Category::global(), CategoryLimit::new(200, Duration::from_secs(1)));
        limits.insert(Category::catalog(), CategoryLimit::new(50, Duration::from_secs(1)));
        limits.insert(Category::listings(), CategoryLimit::new(20, Duration::from_secs(1)));
        limits.insert(Category::orders(), CategoryLimit::new(30, Duration::from_secs(1)));

        let routes = vec![
            RouteRule::new(r"^/v\d+/catalog(/|$)", vec![Category::catalog()]),
            RouteRule::new(r"^/v\d+/listings(/|$)", vec![Category::catalog(), Category::listings()]),
            RouteRule::new(r"^/v\d+/orders(/|$)", vec![Category::orders()]),
        ];

        Self {
            routes,
            ..Self::new(limits)
        }
    }

    /// Fail-fast validation, run before any request is accepted.
    pub fn validate(&self) -> Result<()> {
        if self.limits.is_empty() {
            return Err(Error::Configuration("limits table is empty".to_string()));
        }
        if !self.limits.contains_key(&Category::global()) {
            return Err(Error::Configuration(
                "limits table must define the GLOBAL category".to_string(),
            ));
        }
        for (category, limit) in &self.limits {
            if limit.capacity == 0 {
                return Err(Error::Configuration(format!(
                    "category {category} has zero capacity"
                )));
            }
            if limit.interval.is_zero() {
                return Err(Error::Configuration(format!(
                    "category {category} has zero refill interval"
                )));
            }
        }
        if self.max_attempts == 0 {
            return Err(Error::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        for rule in &self.routes {
            if rule.categories.is_empty() {
                return Err(Error::Configuration(format!(
                    "route rule '{}' names no categories",
                    rule.pattern
                )));
            }
            for category in &rule.categories {
                if !self.limits.contains_key(category) {
                    return Err(Error::Configuration(format!(
                        "route rule '{}' references unknown category {category}",
                        rule.pattern
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pass_validation() {
        GateConfig::marketplace_defaults().validate().unwrap();
    }

    #[test]
    fn test_rejects_missing_global() {
        let mut limits = BTreeMap::new();
        limits.insert(Category::catalog(), CategoryLimit::new(5, Duration::from_secs(1)));
        let config = GateConfig::new(limits);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("GLOBAL"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut limits = BTreeMap::new();
        limits.insert(Category::global(), CategoryLimit::new(0, Duration::from_secs(1)));
        let config = GateConfig::new(limits);

        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut limits = BTreeMap::new();
        limits.insert(Category::global(), CategoryLimit::new(5, Duration::ZERO));
        let config = GateConfig::new(limits);

        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_route_with_unknown_category() {
        let mut limits = BTreeMap::new();
        limits.insert(Category::global(), CategoryLimit::new(5, Duration::from_secs(1)));
        let mut config = GateConfig::new(limits);
        config.routes.push(RouteRule::new("^/v1/catalog", vec![Category::catalog()]));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CATALOG"));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = GateConfig::marketplace_defaults();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GateConfig = serde_json::from_str(&json).unwrap();

        parsed.validate().unwrap();
        assert_eq!(parsed.limits.len(), config.limits.len());
        assert_eq!(parsed.max_attempts, config.max_attempts);
    }

    #[test]
    fn test_durations_accept_humantime_strings() {
        let json = r#"{
            "limits": { "GLOBAL": { "capacity": 10, "interval": "1s" } },
            "routes": [],
            "max_attempts": 2,
            "default_max_wait": "500ms"
        }"#;
        let config: GateConfig = serde_json::from_str(json).unwrap();

        config.validate().unwrap();
        assert_eq!(
            config.limits[&Category::global()].interval,
            Duration::from_secs(1)
        );
        assert_eq!(config.default_max_wait, Some(Duration::from_millis(500)));
    }
}

use regex::Regex;

use crate::config::{Category, RouteRule};
use crate::error::{Error, Result};

/// Maps a request to the set of categories it must draw from.
///
/// Matching is pure and deterministic: the same method and path always yield
/// the same category set. Every call draws from GLOBAL; matching rules add
/// their categories in rule order; unmatched paths stay GLOBAL-only.
#[derive(Debug)]
pub struct Classifier {
    rules: Vec<CompiledRule>,
}

#[derive(Debug)]
struct CompiledRule {
    pattern: Regex,
    method: Option<String>,
    categories: Vec<Category>,
}

impl Classifier {
    /// Compiles the route rules. An invalid pattern is a configuration error,
    /// reported before any request is accepted.
    pub fn new(routes: &[RouteRule]) -> Result<Self> {
        let mut rules = Vec::with_capacity(routes.len());
        for rule in routes {
            let pattern = Regex::new(&rule.pattern).map_err(|e| {
                Error::Configuration(format!("invalid route pattern '{}': {e}", rule.pattern))
            })?;
            rules.push(CompiledRule {
                pattern,
                method: rule.method.as_ref().map(|m| m.to_ascii_uppercase()),
                categories: rule.categories.clone(),
            });
        }
        Ok(Self { rules })
    }

    /// Resolves the ordered category set for a call. GLOBAL is always first.
    pub fn classify(&self, method: &str, path: &str) -> Vec<Category> {
        let mut categories = vec![Category::global()];
        for rule in &self.rules {
            if let Some(required) = &rule.method {
                if !method.eq_ignore_ascii_case(required) {
                    continue;
                }
            }
            if rule.pattern.is_match(path) {
                for category in &rule.categories {
                    if !categories.contains(category) {
                        categories.push(category.clone());
                    }
                }
            }
        }
        categories
    }
}

mod rule;

pub use rule::HttpProxyRule;

use crate::template::{Bindings, TemplateError, UriTemplate};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// A matched declarative rule plus the variables bound from the request
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub rule: Arc<HttpProxyRule>,
    pub bindings: Bindings,
}

/// Ordered set of hand-authored proxy rules. Earlier rules win.
#[derive(Debug, Default)]
pub struct DeclarativeRuleBase {
    rules: RwLock<Vec<Arc<HttpProxyRule>>>,
}

impl DeclarativeRuleBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the rule for `uri_template`, creating it at the end of the list
    /// if this template string has not been seen yet.
    pub fn rule(&self, uri_template: &str) -> Result<Arc<HttpProxyRule>, TemplateError> {
        let pattern = uri_template.trim();

        if let Some(existing) = self.find_rule(pattern) {
            return Ok(existing);
        }

        // Compile before taking the write lock
        let template = UriTemplate::compile(pattern)?;

        let mut rules = self.rules.write();
        if let Some(existing) = rules.iter().find(|r| r.uri_template().pattern() == pattern) {
            return Ok(Arc::clone(existing));
        }

        debug!("Adding proxy rule {}", pattern);
        let rule = Arc::new(HttpProxyRule::new(template));
        rules.push(Arc::clone(&rule));
        Ok(rule)
    }

    pub fn find_rule(&self, uri_template: &str) -> Option<Arc<HttpProxyRule>> {
        let pattern = uri_template.trim();
        self.rules
            .read()
            .iter()
            .find(|r| r.uri_template().pattern() == pattern)
            .cloned()
    }

    pub fn remove_rule(&self, uri_template: &str) -> bool {
        let pattern = uri_template.trim();
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.uri_template().pattern() != pattern);
        rules.len() != before
    }

    /// First rule (in declaration order) whose template matches `path`
    pub fn matches(&self, path: &str) -> Option<MatchResult> {
        let rules = self.rules.read();
        rules.iter().find_map(|rule| {
            rule.uri_template().matches(path).map(|bindings| MatchResult {
                rule: Arc::clone(rule),
                bindings,
            })
        })
    }

    pub fn match_segments<S: AsRef<str>>(&self, segments: &[S]) -> Option<MatchResult> {
        let rules = self.rules.read();
        rules.iter().find_map(|rule| {
            rule.uri_template()
                .match_segments(segments)
                .map(|bindings| MatchResult {
                    rule: Arc::clone(rule),
                    bindings,
                })
        })
    }

    /// Snapshot of the rules in declaration order
    pub fn rules(&self) -> Vec<Arc<HttpProxyRule>> {
        self.rules.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

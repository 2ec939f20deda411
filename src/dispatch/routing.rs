//! Keyword routing for tasks started without an explicit worker.
//!
//! Image attachments go to the vision worker. Otherwise the first rule whose
//! pattern matches the task text wins, and unmatched tasks go to the coder.

use regex::Regex;
use tracing::debug;

use super::attachments::is_image;
use crate::worker::{CapabilityKind, ProfileCatalog, WorkerProfile};

/// A keyword rule mapping task text to a capability.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub regex: Regex,
    pub kind: CapabilityKind,
    pub reason: String,
}

/// Outcome of routing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub kind: CapabilityKind,
    pub reason: String,
}

pub struct TaskRouter {
    rules: Vec<RouteRule>,
}

impl TaskRouter {
    /// Router with the default keyword rules.
    pub fn default_rules() -> Self {
        let rules = vec![
            RouteRule {
                regex: Regex::new(
                    r"(?i)\b(docs?|documentation|readme|changelog|docstrings?|tutorial|api reference|write[- ]?up)\b",
                )
                .unwrap(),
                kind: CapabilityKind::Docs,
                reason: "documentation keywords".into(),
            },
            RouteRule {
                regex: Regex::new(
                    r"(?i)\b(architecture|architect|system design|design doc|trade-?offs?|scalability|module boundaries)\b",
                )
                .unwrap(),
                kind: CapabilityKind::Architect,
                reason: "architecture keywords".into(),
            },
            RouteRule {
                regex: Regex::new(
                    r"(?i)\b(search|find|locate|grep|where is|where are|look up|explore|which files?)\b",
                )
                .unwrap(),
                kind: CapabilityKind::Explorer,
                reason: "search keywords".into(),
            },
        ];
        Self { rules }
    }

    /// Router without keyword rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule after the existing ones.
    pub fn add_rule(
        &mut self,
        pattern: &str,
        kind: CapabilityKind,
        reason: &str,
    ) -> Result<(), regex::Error> {
        self.rules.push(RouteRule {
            regex: Regex::new(pattern)?,
            kind,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Pick a capability for a task.
    pub fn route(&self, task: &str, attachments: &[String]) -> RouteDecision {
        if attachments.iter().any(|a| is_image(a)) {
            return RouteDecision {
                kind: CapabilityKind::Vision,
                reason: "image attachment".into(),
            };
        }

        for rule in &self.rules {
            if rule.regex.is_match(task) {
                debug!(kind = %rule.kind, reason = %rule.reason, "Task matched route rule");
                return RouteDecision {
                    kind: rule.kind,
                    reason: rule.reason.clone(),
                };
            }
        }

        RouteDecision {
            kind: CapabilityKind::Coder,
            reason: "default".into(),
        }
    }

    /// Resolve the routed capability to a profile, falling back to a coder.
    pub fn select<'a>(
        &self,
        catalog: &'a ProfileCatalog,
        task: &str,
        attachments: &[String],
    ) -> Option<(&'a WorkerProfile, RouteDecision)> {
        let decision = self.route(task, attachments);
        catalog
            .first_of_kind(decision.kind)
            .or_else(|| catalog.first_of_kind(CapabilityKind::Coder))
            .map(|profile| (profile, decision))
    }
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(task: &str, attachments: &[&str]) -> CapabilityKind {
        let attachments: Vec<String> = attachments.iter().map(|a| a.to_string()).collect();
        TaskRouter::default_rules().route(task, &attachments).kind
    }

    #[test]
    fn image_attachment_wins() {
        assert_eq!(route("update the readme", &["ui/screen.png"]), CapabilityKind::Vision);
    }

    #[test]
    fn keyword_routes() {
        assert_eq!(route("Update the README for the CLI", &[]), CapabilityKind::Docs);
        assert_eq!(
            route("Review the architecture of the cache layer", &[]),
            CapabilityKind::Architect
        );
        assert_eq!(route("Where is the retry logic defined?", &[]), CapabilityKind::Explorer);
        assert_eq!(route("Fix the off-by-one in the parser", &[]), CapabilityKind::Coder);
    }

    #[test]
    fn keywords_need_word_boundaries() {
        assert_eq!(route("refactor findings_table and docstring_parser", &[]), CapabilityKind::Coder);
    }

    #[test]
    fn custom_rules_apply_after_defaults() {
        let mut router = TaskRouter::empty();
        router
            .add_rule(r"(?i)\bbenchmark\b", CapabilityKind::Explorer, "perf")
            .unwrap();
        assert_eq!(router.route("run the benchmark", &[]).kind, CapabilityKind::Explorer);
        assert!(router.add_rule("(", CapabilityKind::Coder, "bad").is_err());
    }

    #[test]
    fn select_falls_back_to_coder() {
        let catalog = ProfileCatalog::with_builtins();
        let router = TaskRouter::default_rules();
        let (vision, decision) = router.select(&catalog, "x", &["a.jpg".to_string()]).unwrap();
        assert_eq!(vision.id, "vision");
        assert_eq!(decision.reason, "image attachment");

        let mut coder_only = ProfileCatalog::new();
        coder_only
            .insert(catalog.get("coder").unwrap().clone())
            .unwrap();
        let (picked, decision) = router.select(&coder_only, "write the docs", &[]).unwrap();
        assert_eq!(picked.id, "coder");
        assert_eq!(decision.kind, CapabilityKind::Docs);
    }
}

//! Common view over anything tracked from dispatch to a terminal status.
//!
//! Ledger jobs complete through awaited futures; background tasks complete
//! through polling. Both stay separate types and share this read-only view.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ledger::Job;

/// Characters of result/error text shown in rendered tables.
const SUMMARY_CHARS: usize = 60;

/// A unit of work that moves from running to a terminal status.
pub trait Trackable {
    fn tracking_id(&self) -> Uuid;
    fn worker_id(&self) -> &str;
    fn owner(&self) -> Option<&str>;
    fn status_label(&self) -> String;
    fn is_terminal(&self) -> bool;
    fn created_at(&self) -> DateTime<Utc>;
    /// Result text for successes, error text otherwise.
    fn summary(&self) -> Option<&str>;
}

impl Trackable for Job {
    fn tracking_id(&self) -> Uuid {
        self.id
    }

    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    fn status_label(&self) -> String {
        self.status.to_string()
    }

    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn summary(&self) -> Option<&str> {
        self.result.as_deref().or(self.error.as_deref())
    }
}

/// Render tracked items as a plain-text table, one line per item.
pub fn render_table<T: Trackable>(items: &[T]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }

    let mut out = String::new();
    for item in items {
        let summary = item
            .summary()
            .map(|s| truncate_chars(&s.replace('\n', " "), SUMMARY_CHARS))
            .unwrap_or_default();
        out.push_str(&format!(
            "{}  {:<10} {:<10} {}  {}\n",
            item.tracking_id(),
            item.worker_id(),
            item.status_label(),
            item.created_at().format("%H:%M:%S"),
            summary
        ));
    }
    out.truncate(out.trim_end().len());
    out
}

/// Truncate to at most `max` chars, appending `...` when cut.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::JobLedger;

    #[test]
    fn truncate_short() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_long_respects_limit() {
        let result = truncate_chars("hello world this is long text", 10);
        assert!(result.ends_with("..."));
        assert_eq!(result.chars().count(), 10);
    }

    #[tokio::test]
    async fn renders_jobs() {
        let ledger = JobLedger::new(LedgerConfig::default());
        let job = ledger.create("coder", "x", None).await;
        ledger.set_result(job.id, "all\ngood").await;
        let job = ledger.get(job.id).await.unwrap();

        let table = render_table(&[job.clone()]);
        assert!(table.contains(&job.id.to_string()));
        assert!(table.contains("succeeded"));
        assert!(table.contains("all good"));
        assert_eq!(render_table::<Job>(&[]), "(none)");
    }
}

//! Outcome tracking for ingestion runs.
//!
//! Every entity touched by a run ends up as one [`EntityResult`]. Counters
//! per phase are derived from those results so the summary and the results
//! file never disagree.

use crate::model::Handle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Entities built directly from source rows.
    Primary,
    /// Owned entities submitted once their primary resolved.
    Related,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Primary => f.write_str("primary"),
            Phase::Related => f.write_str("related"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Skipped { reason: String },
    Failed { reason: String },
    Deleted,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
            Outcome::Deleted => "deleted",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Skipped { reason } | Outcome::Failed { reason } => Some(reason.as_str()),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityResult {
    /// Resolved handle when the catalog assigned one, else the placeholder.
    pub handle: Handle,
    pub type_name: String,
    pub identity: String,
    pub phase: Phase,
    pub pass: String,
    pub outcome: Outcome,
}

/// Counters for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub submitted: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
}

impl PhaseStats {
    pub fn record(&mut self, outcome: &Outcome) {
        self.submitted += 1;
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Deleted => self.deleted += 1,
        }
    }

    /// Merge another PhaseStats into this one by summing all counts.
    pub fn merge(&mut self, other: PhaseStats) {
        self.submitted += other.submitted;
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.deleted += other.deleted;
    }

    pub fn from_results<'a>(
        phase: Phase,
        results: impl IntoIterator<Item = &'a EntityResult>,
    ) -> Self {
        let mut stats = Self::default();
        for result in results.into_iter().filter(|r| r.phase == phase) {
            stats.record(&result.outcome);
        }
        stats
    }
}

impl fmt::Display for PhaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted={} created={} updated={} skipped={} failed={}",
            self.submitted, self.created, self.updated, self.skipped, self.failed
        )?;
        if self.deleted > 0 {
            write!(f, " deleted={}", self.deleted)?;
        }
        Ok(())
    }
}

/// Summary of one scan of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub type_name: String,
    pub pass: String,
    /// Rows selected for this pass.
    pub rows: usize,
    pub primary: PhaseStats,
    pub related: PhaseStats,
    /// Holds discarded because their primary never resolved.
    pub dropped_holds: usize,
}

impl PassSummary {
    pub fn log(&self) {
        log::info!(
            "{} pass {}: {} rows | primary {} | related {}",
            self.type_name,
            self.pass,
            self.rows,
            self.primary,
            self.related
        );
        if self.dropped_holds > 0 {
            log::warn!(
                "{} pass {}: dropped {} related-entity holds of unresolved primaries",
                self.type_name,
                self.pass,
                self.dropped_holds
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub passes: Vec<PassSummary>,
    pub results: Vec<EntityResult>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            passes: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn stats(&self, phase: Phase) -> PhaseStats {
        PhaseStats::from_results(phase, &self.results)
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failure())
    }

    pub fn count(&self, label: &str) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.label() == label)
            .count()
    }

    /// Primary and related counts of every pass, summed per type.
    pub fn stats_by_type(&self) -> BTreeMap<&str, PhaseStats> {
        let mut by_type: BTreeMap<&str, PhaseStats> = BTreeMap::new();
        for pass in &self.passes {
            let stats = by_type.entry(pass.type_name.as_str()).or_default();
            stats.merge(pass.primary);
            stats.merge(pass.related);
        }
        by_type
    }

    /// Passes that ran for `type_name`, in execution order.
    pub fn passes_for<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a PassSummary> {
        self.passes.iter().filter(move |p| p.type_name == type_name)
    }

    /// 1 when failures were recorded and the caller asked to fail on them.
    pub fn exit_code(&self, fail_on_errors: bool) -> i32 {
        if fail_on_errors && self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn log_summary(&self) {
        let elapsed = self
            .finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or_default();
        log::info!(
            "Run finished in {} ms over {} passes",
            elapsed,
            self.passes.len()
        );
        log::info!("  primary: {}", self.stats(Phase::Primary));
        log::info!("  related: {}", self.stats(Phase::Related));
        for (type_name, stats) in self.stats_by_type() {
            log::debug!("  {}: {}", type_name, stats);
        }
        if self.has_failures() {
            log::warn!(
                "  {} entities failed, see the results file for reasons",
                self.count("failed")
            );
        }
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Placeholder;

    fn result(phase: Phase, outcome: Outcome) -> EntityResult {
        EntityResult {
            handle: Handle::Placeholder(Placeholder(1)),
            type_name: "Table".to_string(),
            identity: "db/orders".to_string(),
            phase,
            pass: "primary".to_string(),
            outcome,
        }
    }

    #[test]
    fn test_phase_stats_count_by_phase() {
        let results = vec![
            result(Phase::Primary, Outcome::Created),
            result(Phase::Primary, Outcome::Updated),
            result(
                Phase::Related,
                Outcome::Failed {
                    reason: "boom".to_string(),
                },
            ),
        ];

        let primary = PhaseStats::from_results(Phase::Primary, &results);
        assert_eq!(primary.submitted, 2);
        assert_eq!(primary.created, 1);
        assert_eq!(primary.failed, 0);

        let related = PhaseStats::from_results(Phase::Related, &results);
        assert_eq!(related.failed, 1);
    }

    #[test]
    fn test_merge_sums_counts() {
        let mut a = PhaseStats {
            submitted: 2,
            created: 2,
            ..PhaseStats::default()
        };
        a.merge(PhaseStats {
            submitted: 1,
            failed: 1,
            ..PhaseStats::default()
        });
        assert_eq!(a.submitted, 3);
        assert_eq!(a.failed, 1);
    }

    #[test]
    fn test_stats_by_type_sums_every_pass() {
        let pass = |type_name: &str, created: usize, related: usize| PassSummary {
            type_name: type_name.to_string(),
            pass: "primary".to_string(),
            rows: created,
            primary: PhaseStats {
                submitted: created,
                created,
                ..PhaseStats::default()
            },
            related: PhaseStats {
                submitted: related,
                created: related,
                ..PhaseStats::default()
            },
            dropped_holds: 0,
        };
        let mut report = RunReport::new();
        report.passes = vec![
            pass("DataDomain", 1, 0),
            pass("DataDomain", 2, 1),
            pass("Table", 3, 3),
        ];

        let by_type = report.stats_by_type();

        assert_eq!(by_type["DataDomain"].created, 4);
        assert_eq!(by_type["DataDomain"].submitted, 4);
        assert_eq!(by_type["Table"].created, 6);
    }

    #[test]
    fn test_exit_code_depends_on_opt_in() {
        let mut report = RunReport::new();
        report.results.push(result(Phase::Primary, Outcome::Created));
        assert_eq!(report.exit_code(true), 0);

        report.results.push(result(
            Phase::Related,
            Outcome::Failed {
                reason: "rejected".to_string(),
            },
        ));
        assert_eq!(report.exit_code(false), 0);
        assert_eq!(report.exit_code(true), 1);
    }
}

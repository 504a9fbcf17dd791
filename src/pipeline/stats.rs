use std::time::Duration;

use serde::Serialize;

use super::OutputSink;

/// How a stage ended within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Skipped,
    Failed,
    Interrupted,
}

impl StageOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "FAILED",
            Self::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub name: &'static str,
    pub label: &'static str,
    pub elapsed: Duration,
    pub outcome: StageOutcome,
}

/// Per-stage timings of one run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatistics {
    pub stages: Vec<StageRecord>,
}

impl RunStatistics {
    pub(crate) fn record(
        &mut self,
        name: &'static str,
        label: &'static str,
        elapsed: Duration,
        outcome: StageOutcome,
    ) {
        self.stages.push(StageRecord {
            name,
            label,
            elapsed,
            outcome,
        });
    }

    pub fn total(&self) -> Duration {
        self.stages.iter().map(|s| s.elapsed).sum()
    }

    pub fn outcome_of(&self, name: &str) -> Option<StageOutcome> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.outcome)
    }

    /// Print the timing table.
    pub fn print(&self, sink: &OutputSink) {
        sink.line("Build statistics:");
        for stage in &self.stages {
            sink.line(format_args!(
                "  {:<20} {:>9.3}s  {}",
                stage.name,
                stage.elapsed.as_secs_f64(),
                stage.outcome.as_str()
            ));
        }
        sink.line(format_args!(
            "  {:<20} {:>9.3}s",
            "total",
            self.total().as_secs_f64()
        ));
    }
}

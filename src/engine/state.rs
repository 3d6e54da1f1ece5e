use std::fmt;

use serde::Serialize;

use crate::engine::models::{UpdateEntry, UpdateSummary};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Report availability only; nothing on disk changes.
    Check,
    Apply,
}

/// Outcome of one component within a reconciliation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComponentOutcome {
    UpToDate {
        version: String,
    },
    UpdateAvailable {
        current: String,
        latest: String,
        url: String,
    },
    Updated {
        from: String,
        to: String,
    },
    Failed {
        reason: String,
    },
}

impl ComponentOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ComponentOutcome::Failed { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ComponentReport {
    pub name: String,
    pub outcome: ComponentOutcome,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub mode: &'static str,
    pub components: Vec<ComponentReport>,
}

impl RunReport {
    pub fn new(mode: RunMode) -> Self {
        let mode = match mode {
            RunMode::Check => "check",
            RunMode::Apply => "apply",
        };
        Self {
            mode,
            components: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, outcome: ComponentOutcome) {
        self.components.push(ComponentReport {
            name: name.into(),
            outcome,
        });
    }

    pub fn succeeded(&self) -> usize {
        self.components
            .iter()
            .filter(|c| !c.outcome.is_failure())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.components
            .iter()
            .filter(|c| c.outcome.is_failure())
            .count()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.components
            .iter()
            .filter(|c| c.outcome.is_failure())
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn updates_available(&self) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c.outcome, ComponentOutcome::UpdateAvailable { .. }))
    }

    pub fn any_updated(&self) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c.outcome, ComponentOutcome::Updated { .. }))
    }

    /// Name -> {current, latest} for every pending or applied update.
    pub fn summary(&self) -> UpdateSummary {
        self.components
            .iter()
            .filter_map(|c| match &c.outcome {
                ComponentOutcome::UpdateAvailable {
                    current, latest, ..
                } => Some((
                    c.name.clone(),
                    UpdateEntry {
                        current: current.clone(),
                        latest: latest.clone(),
                    },
                )),
                ComponentOutcome::Updated { from, to } => Some((
                    c.name.clone(),
                    UpdateEntry {
                        current: from.clone(),
                        latest: to.clone(),
                    },
                )),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in &self.components {
            match &component.outcome {
                ComponentOutcome::UpToDate { version } => {
                    writeln!(f, "  {}: up to date ({version})", component.name)?
                }
                ComponentOutcome::UpdateAvailable {
                    current, latest, ..
                } => writeln!(f, "  {}: {current} -> {latest} available", component.name)?,
                ComponentOutcome::Updated { from, to } => {
                    writeln!(f, "  {}: updated {from} -> {to}", component.name)?
                }
                ComponentOutcome::Failed { reason } => {
                    writeln!(f, "  {}: FAILED ({reason})", component.name)?
                }
            }
        }
        write!(f, "{} succeeded, {} failed", self.succeeded(), self.failed())
    }
}

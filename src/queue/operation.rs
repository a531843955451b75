use crate::core::{MutationKind, PackageCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type OperationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Identity of a mutation: at most one operation per key may be live
/// (pending or running) at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub kind: MutationKind,
    pub name: String,
    pub category: PackageCategory,
}

impl OperationKey {
    pub fn new(kind: MutationKind, name: impl Into<String>, category: PackageCategory) -> Self {
        Self {
            kind,
            name: name.into(),
            category,
        }
    }

    /// Synthetic key for a bulk "update everything in this category"
    /// mutation.
    pub fn bulk_update(category: PackageCategory) -> Self {
        Self {
            kind: MutationKind::Update,
            name: format!("all-{category}"),
            category,
        }
    }
}

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.name, self.category)
    }
}

/// One attempted mutation, from `Pending` through a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub kind: MutationKind,
    pub name: String,
    pub category: PackageCategory,
    pub status: OperationStatus,
    pub progress: Option<f32>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set when the record leaves `Pending`; time spent waiting for a run
    /// slot does not count as running time.
    pub run_started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    pub(crate) fn new(key: &OperationKey, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: key.kind,
            name: key.name.clone(),
            category: key.category,
            status: OperationStatus::Pending,
            progress: None,
            message: None,
            error: None,
            started_at: now,
            run_started_at: None,
            finished_at: None,
        }
    }

    pub fn key(&self) -> OperationKey {
        OperationKey::new(self.kind, self.name.clone(), self.category)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OperationStatus::Completed | OperationStatus::Failed
        )
    }

    /// Wall-clock duration for terminal records.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at
            .map(|end| end.signed_duration_since(self.started_at))
    }

    /// How long a running record has been running as of `now`.
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        (self.status == OperationStatus::Running)
            .then(|| now.signed_duration_since(self.run_started_at.unwrap_or(self.started_at)))
    }
}

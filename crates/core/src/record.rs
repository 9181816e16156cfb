use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a case as assigned by the upstream service.
pub type CaseId = String;

/// One in-flight case as streamed by the upstream case-management service.
///
/// Records are immutable once parsed. An update for the same `id` replaces the
/// whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: CaseId,
    /// Days since the case was registered.
    pub age_days: u32,
    pub case_type: Option<String>,
    pub benefit_category: Option<String>,
    pub assigned_unit: Option<String>,
    pub assignment_status: AssignmentStatus,
    pub on_hold: bool,
    pub hold_reason: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub registered_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Minimal record with only the required fields set.
    pub fn new(id: impl Into<CaseId>, age_days: u32) -> Self {
        Self {
            id: id.into(),
            age_days,
            case_type: None,
            benefit_category: None,
            assigned_unit: None,
            assignment_status: AssignmentStatus::Unknown,
            on_hold: false,
            hold_reason: None,
            deadline: None,
            registered_at: None,
        }
    }

    /// Whether the deadline lies strictly before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.deadline.is_some_and(|d| d < today)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Unassigned,
    Assigned,
    #[default]
    Unknown,
}

impl AssignmentStatus {
    /// Lenient mapping from the upstream vocabulary; anything unrecognized is `Unknown`.
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "assigned" | "tildelt" => AssignmentStatus::Assigned,
            "unassigned" | "ikke_tildelt" | "ikke tildelt" => AssignmentStatus::Unassigned,
            _ => AssignmentStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Unassigned => "unassigned",
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Unknown => "unknown",
        }
    }
}

//! Read access to the case snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use casestats_core::{AssignmentStatus, Record};
use casestats_loader::Readiness;

use crate::state::AppState;

use super::{error, ErrorResponse};

#[derive(Debug, Default, Deserialize)]
pub struct CaseFilter {
    pub status: Option<AssignmentStatus>,
    pub on_hold: Option<bool>,
    pub unit: Option<String>,
}

impl CaseFilter {
    fn matches(&self, r: &Record) -> bool {
        self.status.map_or(true, |s| r.assignment_status == s)
            && self.on_hold.map_or(true, |h| r.on_hold == h)
            && self
                .unit
                .as_deref()
                .map_or(true, |u| r.assigned_unit.as_deref() == Some(u))
    }
}

/// Current snapshot, ordered by id. Served in every readiness state; while
/// `degraded` the data may be stale.
pub async fn cases_list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<CaseFilter>,
) -> Json<Vec<Record>> {
    let records = state
        .loader
        .records()
        .into_iter()
        .filter(|r| filter.matches(r))
        .map(|r| (*r).clone())
        .collect();
    Json(records)
}

pub async fn case_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Record>, (StatusCode, Json<ErrorResponse>)> {
    state
        .loader
        .get(&id)
        .map(|r| Json((*r).clone()))
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("case '{id}' not found")))
}

/// Age buckets, upper bounds inclusive.
const AGE_BUCKETS: [(&str, u32); 4] = [("0-30", 30), ("31-90", 90), ("91-180", 180), ("181-365", 365)];
const AGE_OVERFLOW: &str = ">365";

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct CaseSummary {
    pub readiness: Option<Readiness>,
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub on_hold: usize,
    pub overdue: usize,
    pub by_unit: BTreeMap<String, usize>,
    pub by_age: BTreeMap<&'static str, usize>,
    pub average_age_days: Option<f64>,
}

fn age_bucket(age: u32) -> &'static str {
    AGE_BUCKETS
        .iter()
        .find(|(_, max)| age <= *max)
        .map(|(label, _)| *label)
        .unwrap_or(AGE_OVERFLOW)
}

pub(crate) fn summarize<'a>(records: impl IntoIterator<Item = &'a Record>, today: NaiveDate) -> CaseSummary {
    let mut s = CaseSummary::default();
    let mut age_sum: u64 = 0;
    for r in records {
        s.total += 1;
        age_sum += u64::from(r.age_days);
        *s.by_status.entry(r.assignment_status.as_str()).or_default() += 1;
        if r.on_hold {
            s.on_hold += 1;
        }
        if r.is_overdue(today) {
            s.overdue += 1;
        }
        let unit = r.assigned_unit.clone().unwrap_or_else(|| "(none)".to_string());
        *s.by_unit.entry(unit).or_default() += 1;
        *s.by_age.entry(age_bucket(r.age_days)).or_default() += 1;
    }
    if s.total > 0 {
        s.average_age_days = Some(age_sum as f64 / s.total as f64);
    }
    s
}

pub async fn cases_summary(State(state): State<Arc<AppState>>) -> Json<CaseSummary> {
    let snapshot = state.loader.snapshot();
    let mut summary = summarize(snapshot.iter().map(|r| r.as_ref()), Utc::now().date_naive());
    summary.readiness = Some(state.loader.readiness());
    Json(summary)
}

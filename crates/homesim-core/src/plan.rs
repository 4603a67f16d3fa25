//! Planned activities and parsing of Oracle plan payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::time::MinuteOfDay;

/// One schedule item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedActivity {
    #[serde(alias = "activity", alias = "name")]
    pub activity_name: String,
    #[serde(alias = "start")]
    pub start_time: MinuteOfDay,
    #[serde(alias = "end")]
    pub end_time: MinuteOfDay,
}

impl PlannedActivity {
    #[must_use]
    pub fn new(activity_name: impl Into<String>, start_time: MinuteOfDay, end_time: MinuteOfDay) -> Self {
        Self {
            activity_name: activity_name.into(),
            start_time,
            end_time,
        }
    }

    /// Planned length, wrapping at midnight.
    #[must_use]
    pub const fn nominal_minutes(&self) -> u32 {
        self.start_time.span_to(self.end_time)
    }
}

/// Oracle text that could not be read as a plan.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("empty response")]
    Empty,
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON array or an object with a `schedule` or `plan` array")]
    NotAPlan,
}

/// Outcome of a step-out decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutDecision {
    Keep,
    Replace(Vec<PlannedActivity>),
}

/// Strip a surrounding Markdown code fence (with or without a language tag).
#[must_use]
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a plan from a JSON array or a `{ "schedule" | "plan": [...] }` object.
pub fn parse_plan(text: &str) -> Result<Vec<PlannedActivity>, PlanParseError> {
    let body = strip_fences(text);
    if body.is_empty() {
        return Err(PlanParseError::Empty);
    }
    let value: Value = serde_json::from_str(body)?;
    let items = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut object) => object
            .remove("schedule")
            .or_else(|| object.remove("plan"))
            .filter(Value::is_array)
            .ok_or(PlanParseError::NotAPlan)?,
        _ => return Err(PlanParseError::NotAPlan),
    };
    Ok(serde_json::from_value(items)?)
}

/// `null`, `no`, `none` or an empty reply keep the current plan; anything else must be a plan.
pub fn parse_step_out(text: &str) -> Result<StepOutDecision, PlanParseError> {
    let body = strip_fences(text).trim_matches('"').trim();
    if body.is_empty()
        || ["null", "no", "none", "false"]
            .iter()
            .any(|keep| body.eq_ignore_ascii_case(keep))
    {
        return Ok(StepOutDecision::Keep);
    }
    parse_plan(body).map(StepOutDecision::Replace)
}

/// Filler replies are a bare activity name, possibly quoted or fenced.
#[must_use]
pub fn parse_activity_name(text: &str) -> Option<String> {
    let body = strip_fences(text).trim().trim_matches('"').trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => object
            .get("activity_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => Some(body.to_string()),
    }
}

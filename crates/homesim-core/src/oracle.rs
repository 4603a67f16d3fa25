//! Interface to the plan-generating collaborator, plus a scripted stand-in.

use std::collections::VecDeque;
use thiserror::Error;

use crate::plan::PlannedActivity;
use crate::time::Weekday;

/// Errors an Oracle may report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The endpoint could not be reached or answered with a failure status.
    #[error("oracle transport error: {0}")]
    Transport(String),
    /// The endpoint answered, but not with anything usable.
    #[error("oracle returned a malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct DailyPlanRequest<'a> {
    pub persona: &'a str,
    pub lifestyle: &'a str,
    pub weekday: Weekday,
    pub reference_plan: &'a [PlannedActivity],
    pub catalog: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct RevisionRequest<'a> {
    pub persona: &'a str,
    pub lifestyle: &'a str,
    pub remaining: &'a [PlannedActivity],
    pub completed: &'a [PlannedActivity],
    pub weekday: Weekday,
    pub catalog: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct WaitingRequest<'a> {
    pub persona: &'a str,
    pub lifestyle: &'a str,
    pub remaining: &'a [PlannedActivity],
    pub completed: &'a [PlannedActivity],
    pub current: &'a PlannedActivity,
    /// Label of the waiting execution event.
    pub waiting: &'a str,
    pub waiting_minutes: u32,
    pub weekday: Weekday,
    pub catalog: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct StepOutRequest<'a> {
    pub persona: &'a str,
    pub lifestyle: &'a str,
    pub remaining: &'a [PlannedActivity],
    pub completed: &'a [PlannedActivity],
    pub weekday: Weekday,
    pub catalog: &'a [String],
}

/// Text-in/text-out plan collaborator. Responses are parsed by the engine.
pub trait Oracle {
    /// A JSON plan for the whole day.
    fn generate_daily_plan(&mut self, request: &DailyPlanRequest<'_>) -> Result<String, OracleError>;

    /// A JSON plan replacing `remaining`.
    fn revise_daily_plan(&mut self, request: &RevisionRequest<'_>) -> Result<String, OracleError>;

    /// Name of an activity to fill a waiting period.
    fn decide_waiting_filler(&mut self, request: &WaitingRequest<'_>) -> Result<String, OracleError>;

    /// `null`/`no` to keep the plan, or a JSON plan replacing `remaining`.
    fn decide_step_out(&mut self, request: &StepOutRequest<'_>) -> Result<String, OracleError>;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn generate_daily_plan(&mut self, request: &DailyPlanRequest<'_>) -> Result<String, OracleError> {
        (**self).generate_daily_plan(request)
    }

    fn revise_daily_plan(&mut self, request: &RevisionRequest<'_>) -> Result<String, OracleError> {
        (**self).revise_daily_plan(request)
    }

    fn decide_waiting_filler(&mut self, request: &WaitingRequest<'_>) -> Result<String, OracleError> {
        (**self).decide_waiting_filler(request)
    }

    fn decide_step_out(&mut self, request: &StepOutRequest<'_>) -> Result<String, OracleError> {
        (**self).decide_step_out(request)
    }
}

/// How often each endpoint was consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OracleCalls {
    pub daily: usize,
    pub revise: usize,
    pub filler: usize,
    pub step_out: usize,
}

/// Replays queued responses. When a queue runs dry it falls back to a neutral answer:
/// the standing daily plan (or `[]`), an echo of the remaining plan, no filler, and no
/// step-out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    daily: VecDeque<String>,
    standing_daily: Option<String>,
    revisions: VecDeque<String>,
    fillers: VecDeque<String>,
    step_outs: VecDeque<String>,
    calls: OracleCalls,
}

impl ScriptedOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan returned every day once the daily queue is empty.
    #[must_use]
    pub fn with_standing_plan(mut self, plan: impl Into<String>) -> Self {
        self.standing_daily = Some(plan.into());
        self
    }

    /// Serialize `plan` as the standing daily plan.
    #[must_use]
    pub fn with_plan(self, plan: &[PlannedActivity]) -> Self {
        let text = serde_json::to_string(plan).unwrap_or_else(|_| "[]".to_string());
        self.with_standing_plan(text)
    }

    pub fn push_daily(&mut self, text: impl Into<String>) -> &mut Self {
        self.daily.push_back(text.into());
        self
    }

    pub fn push_revision(&mut self, text: impl Into<String>) -> &mut Self {
        self.revisions.push_back(text.into());
        self
    }

    pub fn push_filler(&mut self, text: impl Into<String>) -> &mut Self {
        self.fillers.push_back(text.into());
        self
    }

    pub fn push_step_out(&mut self, text: impl Into<String>) -> &mut Self {
        self.step_outs.push_back(text.into());
        self
    }

    #[must_use]
    pub const fn calls(&self) -> OracleCalls {
        self.calls
    }
}

fn echo(plan: &[PlannedActivity]) -> Result<String, OracleError> {
    serde_json::to_string(plan).map_err(|err| OracleError::Malformed(err.to_string()))
}

impl Oracle for ScriptedOracle {
    fn generate_daily_plan(&mut self, _request: &DailyPlanRequest<'_>) -> Result<String, OracleError> {
        self.calls.daily += 1;
        Ok(self
            .daily
            .pop_front()
            .or_else(|| self.standing_daily.clone())
            .unwrap_or_else(|| "[]".to_string()))
    }

    fn revise_daily_plan(&mut self, request: &RevisionRequest<'_>) -> Result<String, OracleError> {
        self.calls.revise += 1;
        match self.revisions.pop_front() {
            Some(text) => Ok(text),
            None => echo(request.remaining),
        }
    }

    fn decide_waiting_filler(&mut self, _request: &WaitingRequest<'_>) -> Result<String, OracleError> {
        self.calls.filler += 1;
        Ok(self.fillers.pop_front().unwrap_or_default())
    }

    fn decide_step_out(&mut self, _request: &StepOutRequest<'_>) -> Result<String, OracleError> {
        self.calls.step_out += 1;
        Ok(self
            .step_outs
            .pop_front()
            .unwrap_or_else(|| "null".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_oracle_replays_then_falls_back() {
        let remaining = vec![PlannedActivity::new(
            "Work",
            "09:00".parse().expect("time"),
            "17:00".parse().expect("time"),
        )];
        let catalog = vec!["Work".to_string()];
        let mut oracle = ScriptedOracle::new().with_standing_plan("[\"standing\"]");
        oracle.push_daily("first").push_revision("revised");

        let daily = DailyPlanRequest {
            persona: "",
            lifestyle: "",
            weekday: Weekday::Monday,
            reference_plan: &[],
            catalog: &catalog,
        };
        assert_eq!(oracle.generate_daily_plan(&daily).expect("daily"), "first");
        assert_eq!(oracle.generate_daily_plan(&daily).expect("daily"), "[\"standing\"]");

        let revision = RevisionRequest {
            persona: "",
            lifestyle: "",
            remaining: &remaining,
            completed: &[],
            weekday: Weekday::Monday,
            catalog: &catalog,
        };
        assert_eq!(oracle.revise_daily_plan(&revision).expect("revise"), "revised");
        let echoed = oracle.revise_daily_plan(&revision).expect("echo");
        assert_eq!(crate::plan::parse_plan(&echoed).expect("plan"), remaining);

        let step_out = StepOutRequest {
            persona: "",
            lifestyle: "",
            remaining: &remaining,
            completed: &[],
            weekday: Weekday::Monday,
            catalog: &catalog,
        };
        assert_eq!(oracle.decide_step_out(&step_out).expect("step out"), "null");

        assert_eq!(
            oracle.calls(),
            OracleCalls {
                daily: 2,
                revise: 2,
                filler: 0,
                step_out: 1,
            }
        );
    }
}

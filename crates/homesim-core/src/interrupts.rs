//! Time-conditioned likelihoods for toilet breaks, phone checks, and stepping out.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::time::{MinuteOfDay, Weekday};

/// Behaviour that can cut into an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interrupt {
    Toilet,
    Phone,
}

/// Multiplier applied while the elapsed time is strictly below `under_minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElapsedStep {
    pub under_minutes: u32,
    pub factor: f64,
}

/// Multiplier applied while the time of day is strictly before `before`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockStep {
    pub before: MinuteOfDay,
    pub factor: f64,
}

/// Shape of every interrupt curve. Defaults match the household profiles shipped in
/// `config/`; tests pin their own values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbabilityPolicy {
    /// Ascending buckets on minutes since the last toilet visit.
    pub toilet_steps: Vec<ElapsedStep>,
    /// Factor once the gap outlasts every bucket.
    pub toilet_long_gap_factor: f64,
    /// Phone checks happen only inside `[phone_window_start, phone_window_end)`.
    pub phone_window_start: MinuteOfDay,
    pub phone_window_end: MinuteOfDay,
    /// Ascending, non-increasing buckets inside the phone window.
    pub phone_steps: Vec<ClockStep>,
    pub step_out_start: MinuteOfDay,
    pub step_out_peak: MinuteOfDay,
    pub step_out_end: MinuteOfDay,
    /// Probability at `step_out_start`; rises linearly to `step_out_peak_probability`.
    pub step_out_floor: f64,
    pub step_out_peak_probability: f64,
}

fn at(hour: u32) -> MinuteOfDay {
    MinuteOfDay::hm(hour, 0).unwrap_or(MinuteOfDay::MIDNIGHT)
}

impl Default for ProbabilityPolicy {
    fn default() -> Self {
        Self {
            toilet_steps: vec![
                ElapsedStep {
                    under_minutes: 60,
                    factor: 0.05,
                },
                ElapsedStep {
                    under_minutes: 120,
                    factor: 0.5,
                },
                ElapsedStep {
                    under_minutes: 240,
                    factor: 1.0,
                },
            ],
            toilet_long_gap_factor: 1.8,
            phone_window_start: at(8),
            phone_window_end: at(22),
            phone_steps: vec![
                ClockStep {
                    before: at(12),
                    factor: 1.0,
                },
                ClockStep {
                    before: at(17),
                    factor: 0.7,
                },
                ClockStep {
                    before: at(22),
                    factor: 0.4,
                },
            ],
            step_out_start: at(8),
            step_out_peak: at(12),
            step_out_end: at(18),
            step_out_floor: 0.1,
            step_out_peak_probability: 0.3,
        }
    }
}

impl ProbabilityPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self
            .toilet_steps
            .windows(2)
            .all(|pair| pair[0].under_minutes < pair[1].under_minutes)
        {
            return Err(ConfigError::Invalid(
                "toilet_steps must be strictly ascending",
            ));
        }
        if !self
            .phone_steps
            .windows(2)
            .all(|pair| pair[0].before < pair[1].before && pair[0].factor >= pair[1].factor)
        {
            return Err(ConfigError::Invalid(
                "phone_steps must be ascending in time and non-increasing in factor",
            ));
        }
        let mut factors = self
            .toilet_steps
            .iter()
            .map(|step| step.factor)
            .chain(self.phone_steps.iter().map(|step| step.factor))
            .chain([self.toilet_long_gap_factor]);
        if factors.any(|factor| !factor.is_finite() || factor < 0.0) {
            return Err(ConfigError::Invalid(
                "probability factors must be finite and non-negative",
            ));
        }
        if self.phone_window_start > self.phone_window_end {
            return Err(ConfigError::Invalid(
                "phone window must not wrap past midnight",
            ));
        }
        if !(self.step_out_start <= self.step_out_peak && self.step_out_peak < self.step_out_end) {
            return Err(ConfigError::Invalid(
                "step-out window must satisfy start <= peak < end",
            ));
        }
        if !(0.0..=1.0).contains(&self.step_out_floor)
            || !(0.0..=1.0).contains(&self.step_out_peak_probability)
        {
            return Err(ConfigError::Invalid(
                "step-out probabilities must lie in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Base toilet rate scaled by the gap since the last visit.
    #[must_use]
    pub fn toilet_probability(&self, base: f64, minutes_since_last: u64) -> f64 {
        let factor = self
            .toilet_steps
            .iter()
            .find(|step| minutes_since_last < u64::from(step.under_minutes))
            .map_or(self.toilet_long_gap_factor, |step| step.factor);
        clamp_unit(base * factor)
    }

    /// Zero once the phone was used today or outside the phone window.
    #[must_use]
    pub fn phone_probability(&self, base: f64, already_today: bool, now: MinuteOfDay) -> f64 {
        if already_today || now < self.phone_window_start || now >= self.phone_window_end {
            return 0.0;
        }
        let factor = self
            .phone_steps
            .iter()
            .find(|step| now < step.before)
            .map_or(0.0, |step| step.factor);
        clamp_unit(base * factor)
    }

    /// Piecewise-linear hump: floor at the window start, peak at midday, zero at the end.
    #[must_use]
    pub fn step_out_probability(&self, now: MinuteOfDay) -> f64 {
        if now < self.step_out_start || now >= self.step_out_end {
            return 0.0;
        }
        let minute = f64::from(now.minutes());
        let start = f64::from(self.step_out_start.minutes());
        let peak = f64::from(self.step_out_peak.minutes());
        let end = f64::from(self.step_out_end.minutes());
        let p = if now < self.step_out_peak {
            let progress = (minute - start) / (peak - start);
            self.step_out_floor + (self.step_out_peak_probability - self.step_out_floor) * progress
        } else {
            self.step_out_peak_probability * (end - minute) / (end - peak)
        };
        clamp_unit(p)
    }
}

fn clamp_unit(p: f64) -> f64 {
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
}

/// Base rates read from the persona profile.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BaseRates {
    pub toilet: ToiletRates,
    pub phone: PhoneRates,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToiletRates {
    pub sleeping: f64,
    pub daytime: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhoneRates {
    pub weekday: f64,
    pub weekend: f64,
}

impl BaseRates {
    #[must_use]
    pub const fn toilet(&self, sleeping: bool) -> f64 {
        if sleeping {
            self.toilet.sleeping
        } else {
            self.toilet.daytime
        }
    }

    #[must_use]
    pub const fn phone(&self, weekday: Weekday) -> f64 {
        if weekday.is_weekend() {
            self.phone.weekend
        } else {
            self.phone.weekday
        }
    }
}

/// Toilet is checked first; the two outcomes never coincide.
#[must_use]
pub fn classify(r: f64, toilet_p: f64, phone_p: f64) -> Option<Interrupt> {
    if r < toilet_p {
        Some(Interrupt::Toilet)
    } else if r < toilet_p + phone_p {
        Some(Interrupt::Phone)
    } else {
        None
    }
}

/// One uniform draw in `[0, 1)`, classified.
pub fn draw<R: Rng + ?Sized>(rng: &mut R, toilet_p: f64, phone_p: f64) -> Option<Interrupt> {
    let r: f64 = rng.random();
    classify(r, toilet_p, phone_p)
}

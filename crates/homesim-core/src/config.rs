//! Simulation settings and decoding of the household configuration files.
//!
//! Three JSON documents describe a household:
//!
//! * `env_config.json`: `environment_config.{layout, valid_area, sensor, control_device, Facility}`
//! * `activity_config.json`: `activity_config[]` with `event_sequence` variants
//! * `user_profile.json`: `user_config.<persona>` profiles
//!
//! Object key order is significant (sensor order drives record order, variant order drives
//! weighted selection), so maps are read through `serde_json::Map`, which keeps insertion
//! order.

use rand::{SeedableRng, rngs::SmallRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use homesim_grid::{Area, GridError, GridMap, MapLayout, Marker, Rect};

use crate::catalog::{
    ActivityCatalog, ActivityDefinition, CatalogError, DurationPolicy, EventTemplate,
    VariantWeight,
};
use crate::interrupts::{BaseRates, ProbabilityPolicy};
use crate::plan::PlannedActivity;

/// Errors raised while validating or decoding configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("malformed configuration document: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("no persona named `{0}` in the user profile")]
    UnknownPersona(String),
    #[error("start facility `{0}` is not on the map")]
    UnknownStartFacility(String),
}

/// Static configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for every random draw; entropy when absent.
    pub rng_seed: Option<u64>,
    /// Absolute day counter at run start (`0 = Monday`).
    pub start_day: u64,
    /// Facility the persona wakes up at on the first day.
    pub start_facility: String,
    /// Activity whose toilet base rate is the sleeping one.
    pub sleep_activity: String,
    pub toilet_activity: String,
    pub phone_activity: String,
    /// Planned-vs-actual end gap that triggers a plan revision.
    pub drift_threshold_minutes: u32,
    /// Deepest nesting at which interrupts and fillers may still start.
    pub max_interrupt_depth: usize,
    pub durations: DurationPolicy,
    pub probabilities: ProbabilityPolicy,
    pub persona_id: String,
    /// Run identifier for persistence keys; drawn from the run RNG when absent.
    pub run_id: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            start_day: 5,
            start_facility: "BedroomBed".to_string(),
            sleep_activity: "Sleeping".to_string(),
            toilet_activity: "Toilet".to_string(),
            phone_activity: "Phone".to_string(),
            drift_threshold_minutes: 60,
            max_interrupt_depth: 3,
            durations: DurationPolicy::default(),
            probabilities: ProbabilityPolicy::default(),
            persona_id: "RemoteWorker".to_string(),
            run_id: None,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.durations.random_min > self.durations.random_max {
            return Err(ConfigError::Invalid(
                "durations.random_min cannot exceed durations.random_max",
            ));
        }
        if self.max_interrupt_depth == 0 {
            return Err(ConfigError::Invalid("max_interrupt_depth must be positive"));
        }
        if self.persona_id.is_empty() {
            return Err(ConfigError::Invalid("persona_id must be non-empty"));
        }
        if self.start_facility.is_empty()
            || self.toilet_activity.is_empty()
            || self.phone_activity.is_empty()
        {
            return Err(ConfigError::Invalid(
                "start_facility, toilet_activity and phone_activity must be non-empty",
            ));
        }
        self.probabilities.validate()
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Static description of the simulated person.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PersonaProfile {
    pub name: String,
    pub profile: String,
    pub traits: Vec<String>,
    pub rates: BaseRates,
    /// Weighted variants per activity name, in profile order.
    pub variant_weights: HashMap<String, Vec<VariantWeight>>,
    /// Sample day shown to the Oracle; also the fallback when the day plan is unreadable.
    pub reference_plan: Vec<PlannedActivity>,
}

impl PersonaProfile {
    /// Numbered trait list, e.g. `1.early riser;2.works from home;`.
    #[must_use]
    pub fn lifestyle(&self) -> String {
        self.traits
            .iter()
            .enumerate()
            .map(|(idx, item)| format!("{}.{item};", idx + 1))
            .collect()
    }

    #[must_use]
    pub fn weights_for(&self, activity: &str) -> Option<&[VariantWeight]> {
        self.variant_weights
            .get(activity)
            .map(Vec::as_slice)
            .filter(|weights| !weights.is_empty())
    }
}

/// Immutable world the engine runs in.
#[derive(Debug, Clone)]
pub struct Household {
    pub map: GridMap,
    pub catalog: ActivityCatalog,
    pub persona: PersonaProfile,
}

impl Household {
    /// Decode all three documents.
    pub fn from_json(
        env_config: &str,
        activity_config: &str,
        user_profile: &str,
        persona: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            map: GridMap::build(parse_layout(env_config)?)?,
            catalog: parse_catalog(activity_config)?,
            persona: parse_persona(user_profile, persona)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EnvFile {
    environment_config: EnvironmentSection,
}

#[derive(Debug, Deserialize)]
struct EnvironmentSection {
    layout: Rect,
    #[serde(default)]
    valid_area: Map<String, Value>,
    #[serde(default)]
    sensor: Map<String, Value>,
    #[serde(default)]
    control_device: Map<String, Value>,
    #[serde(default, rename = "Facility")]
    facility: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AreaEntry {
    #[serde(rename = "Scope")]
    scope: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Point {
    x: i32,
    y: i32,
}

/// Decode an ordered JSON object into `(key, value)` pairs.
fn ordered<T: DeserializeOwned>(map: Map<String, Value>) -> Result<Vec<(String, T)>, ConfigError> {
    map.into_iter()
        .map(|(key, value)| -> Result<(String, T), ConfigError> {
            Ok((key, serde_json::from_value(value)?))
        })
        .collect()
}

fn markers(map: Map<String, Value>) -> Result<Vec<Marker>, ConfigError> {
    Ok(ordered::<Point>(map)?
        .into_iter()
        .map(|(name, point)| Marker::new(name, point.x, point.y))
        .collect())
}

/// Decode `env_config.json` into an unrasterized layout.
pub fn parse_layout(text: &str) -> Result<MapLayout, ConfigError> {
    let EnvFile {
        environment_config: env,
    } = serde_json::from_str(text)?;

    let areas = ordered::<AreaEntry>(env.valid_area)?
        .into_iter()
        .map(|(name, entry)| -> Result<Area, ConfigError> {
            let rects = ordered::<Rect>(entry.scope)?
                .into_iter()
                .map(|(_, rect)| rect)
                .collect();
            Ok(Area::new(name, rects))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(MapLayout {
        bounds: Some(env.layout),
        areas,
        sensors: markers(env.sensor)?,
        devices: markers(env.control_device)?,
        facilities: markers(env.facility)?,
    })
}

#[derive(Debug, Deserialize)]
struct ActivityFile {
    activity_config: Vec<ActivityEntry>,
}

#[derive(Debug, Deserialize)]
struct ActivityEntry {
    activity_name: String,
    event_sequence: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawTemplate {
    attribute: String,
    target: String,
    state: String,
    #[serde(default, rename = "Generate")]
    generate: Option<String>,
    #[serde(default)]
    duration: Option<u32>,
}

/// Decode `activity_config.json` into a catalog.
pub fn parse_catalog(text: &str) -> Result<ActivityCatalog, ConfigError> {
    let file: ActivityFile = serde_json::from_str(text)?;
    let mut activities = Vec::with_capacity(file.activity_config.len());
    for entry in file.activity_config {
        let mut variants = Vec::with_capacity(entry.event_sequence.len());
        for (variant, raw) in ordered::<Vec<RawTemplate>>(entry.event_sequence)? {
            let templates = raw
                .iter()
                .map(|raw| {
                    EventTemplate::decode(
                        &entry.activity_name,
                        &raw.attribute,
                        &raw.target,
                        &raw.state,
                        raw.generate.as_deref(),
                        raw.duration,
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            variants.push((variant, templates));
        }
        activities.push(ActivityDefinition {
            name: entry.activity_name,
            variants,
        });
    }
    Ok(ActivityCatalog::new(activities)?)
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    user_config: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ProfileEntry {
    profile: String,
    #[serde(default)]
    traits: Vec<String>,
    #[serde(default)]
    probabilities: BaseRates,
    #[serde(default)]
    variant_weights: HashMap<String, Vec<VariantWeight>>,
    #[serde(default)]
    reference_plan: Vec<PlannedActivity>,
}

/// Decode one persona from `user_profile.json`.
pub fn parse_persona(text: &str, persona: &str) -> Result<PersonaProfile, ConfigError> {
    let mut file: ProfileFile = serde_json::from_str(text)?;
    let raw = file
        .user_config
        .remove(persona)
        .ok_or_else(|| ConfigError::UnknownPersona(persona.to_string()))?;
    let entry: ProfileEntry = serde_json::from_value(raw)?;
    if entry
        .variant_weights
        .values()
        .flatten()
        .any(|weight| !weight.probability.is_finite() || weight.probability < 0.0)
    {
        return Err(ConfigError::Invalid(
            "variant weights must be finite and non-negative",
        ));
    }
    Ok(PersonaProfile {
        name: persona.to_string(),
        profile: entry.profile,
        traits: entry.traits,
        rates: entry.probabilities,
        variant_weights: entry.variant_weights,
        reference_plan: entry.reference_plan,
    })
}

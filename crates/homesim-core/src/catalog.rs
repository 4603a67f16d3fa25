//! Activity definitions and their expansion into timed primitive events.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Variant used when an activity has no weighted alternatives.
pub const DEFAULT_VARIANT: &str = "normal";

/// Failures while decoding or resolving catalog entries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("no activity named `{0}` in the catalog")]
    MissingActivity(String),
    #[error("activity `{activity}` has no variant `{variant}`")]
    MissingVariant { activity: String, variant: String },
    #[error("activity `{activity}` is declared more than once")]
    DuplicateActivity { activity: String },
    #[error("invalid event template in `{activity}`: {reason}")]
    InvalidTemplate { activity: String, reason: String },
}

/// Movement destinations are either a named area or a named facility/device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementMode {
    Area,
    Position,
}

/// Waiting executions may be filled with another activity; doing executions may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    Waiting,
    Doing,
}

/// Coarse event class used in execution records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    Movement,
    Control,
    Execution,
}

impl EventClass {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            EventClass::Movement => "movement",
            EventClass::Control => "control",
            EventClass::Execution => "execution",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a primitive event does, independent of how long it takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Movement { target: String, mode: MovementMode },
    Control { device: String, state: String },
    Execution { label: String, mode: ExecutionMode },
}

impl EventKind {
    #[must_use]
    pub const fn class(&self) -> EventClass {
        match self {
            EventKind::Movement { .. } => EventClass::Movement,
            EventKind::Control { .. } => EventClass::Control,
            EventKind::Execution { .. } => EventClass::Execution,
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            EventKind::Movement { target, .. } => target,
            EventKind::Control { device, .. } => device,
            EventKind::Execution { label, .. } => label,
        }
    }

    /// State column as written in activity files (`area`, `on`, `waiting`, ...).
    #[must_use]
    pub fn state(&self) -> &str {
        match self {
            EventKind::Movement {
                mode: MovementMode::Area,
                ..
            } => "area",
            EventKind::Movement {
                mode: MovementMode::Position,
                ..
            } => "position",
            EventKind::Control { state, .. } => state,
            EventKind::Execution {
                mode: ExecutionMode::Waiting,
                ..
            } => "waiting",
            EventKind::Execution {
                mode: ExecutionMode::Doing,
                ..
            } => "doing",
        }
    }
}

/// How a template's duration is resolved at expansion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationRule {
    /// Class default: movement/control policy minutes, or the activity's allotment.
    ByClass,
    Fixed(u32),
    /// Fresh draw from the policy range on every expansion.
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub kind: EventKind,
    pub duration: DurationRule,
}

impl EventTemplate {
    /// Decode the loosely-typed fields of an activity file entry.
    ///
    /// `attribute` is matched case-insensitively on its prefix so that `Movement`,
    /// `movement_area` and `control` all decode. `generate == "random"` wins over an
    /// explicit `duration`.
    pub fn decode(
        activity: &str,
        attribute: &str,
        target: &str,
        state: &str,
        generate: Option<&str>,
        duration: Option<u32>,
    ) -> Result<Self, CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidTemplate {
            activity: activity.to_string(),
            reason,
        };
        let attribute = attribute.trim().to_ascii_lowercase();
        let state_lower = state.trim().to_ascii_lowercase();
        let target = target.trim().to_string();

        let kind = if attribute.starts_with("movement") {
            let mode = match state_lower.as_str() {
                "area" => MovementMode::Area,
                "position" => MovementMode::Position,
                other => return Err(invalid(format!("movement state `{other}`"))),
            };
            EventKind::Movement { target, mode }
        } else if attribute.starts_with("control") {
            EventKind::Control {
                device: target,
                state: state.trim().to_string(),
            }
        } else if attribute.starts_with("execution") {
            let mode = match state_lower.as_str() {
                "waiting" => ExecutionMode::Waiting,
                "doing" => ExecutionMode::Doing,
                other => return Err(invalid(format!("execution state `{other}`"))),
            };
            EventKind::Execution {
                label: target,
                mode,
            }
        } else {
            return Err(invalid(format!("attribute `{attribute}`")));
        };

        if kind.target().is_empty() {
            return Err(invalid("empty target".to_string()));
        }

        let duration = match (generate.map(str::trim), duration) {
            (Some(rule), _) if rule.eq_ignore_ascii_case("random") => DurationRule::Random,
            (_, Some(minutes)) => DurationRule::Fixed(minutes),
            _ => DurationRule::ByClass,
        };
        Ok(Self { kind, duration })
    }
}

/// Static definition: ordered variants, each an ordered template list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDefinition {
    pub name: String,
    pub variants: Vec<(String, Vec<EventTemplate>)>,
}

impl ActivityDefinition {
    #[must_use]
    pub fn variant(&self, name: &str) -> Option<&[EventTemplate]> {
        self.variants
            .iter()
            .find(|(variant, _)| variant == name)
            .map(|(_, templates)| templates.as_slice())
    }
}

/// Immutable lookup table of activity definitions.
#[derive(Debug, Clone, Default)]
pub struct ActivityCatalog {
    activities: Vec<ActivityDefinition>,
}

impl ActivityCatalog {
    pub fn new(activities: Vec<ActivityDefinition>) -> Result<Self, CatalogError> {
        for (idx, activity) in activities.iter().enumerate() {
            if activities[..idx].iter().any(|prior| prior.name == activity.name) {
                return Err(CatalogError::DuplicateActivity {
                    activity: activity.name.clone(),
                });
            }
        }
        Ok(Self { activities })
    }

    /// Exact-name lookup.
    pub fn resolve(&self, name: &str) -> Result<&ActivityDefinition, CatalogError> {
        self.activities
            .iter()
            .find(|activity| activity.name == name)
            .ok_or_else(|| CatalogError::MissingActivity(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.activities.iter().any(|activity| activity.name == name)
    }

    /// Declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.activities.iter().map(|activity| activity.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

/// Probability mass for one weighted variant, in persona-profile order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantWeight {
    pub variant: String,
    pub probability: f64,
}

/// Minutes assigned to each event class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationPolicy {
    pub movement_minutes: u32,
    pub control_minutes: u32,
    pub random_min: u32,
    pub random_max: u32,
    /// Allotment given to toilet/phone interruptions.
    pub interrupt_minutes: u32,
}

impl Default for DurationPolicy {
    fn default() -> Self {
        Self {
            movement_minutes: 1,
            control_minutes: 1,
            random_min: 3,
            random_max: 10,
            interrupt_minutes: 1,
        }
    }
}

/// Template with its duration resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteEvent {
    pub kind: EventKind,
    pub minutes: u32,
}

/// Pick a variant by walking cumulative thresholds with one draw in `[0, 1)`.
/// The last listed variant absorbs any leftover mass.
fn pick_variant<'a, R: Rng + ?Sized>(weights: &'a [VariantWeight], rng: &mut R) -> Option<&'a str> {
    let last = weights.last()?;
    let r: f64 = rng.random();
    let mut cumulative = 0.0;
    for weight in weights {
        cumulative += weight.probability;
        if r < cumulative {
            return Some(&weight.variant);
        }
    }
    Some(&last.variant)
}

/// Expand an activity into concrete events.
///
/// `weights` are the persona's variant weights for this activity, if any; without them the
/// `normal` variant is used.
pub fn expand<R: Rng + ?Sized>(
    definition: &ActivityDefinition,
    allotted_minutes: u32,
    weights: Option<&[VariantWeight]>,
    policy: &DurationPolicy,
    rng: &mut R,
) -> Result<Vec<ConcreteEvent>, CatalogError> {
    let variant = weights
        .and_then(|weights| pick_variant(weights, rng))
        .unwrap_or(DEFAULT_VARIANT);
    let templates = definition
        .variant(variant)
        .ok_or_else(|| CatalogError::MissingVariant {
            activity: definition.name.clone(),
            variant: variant.to_string(),
        })?;

    let events = templates
        .iter()
        .map(|template| {
            let minutes = match (template.duration, &template.kind) {
                (DurationRule::Fixed(minutes), _) => minutes,
                (DurationRule::Random, _) => rng.random_range(policy.random_min..=policy.random_max),
                (DurationRule::ByClass, EventKind::Movement { .. }) => policy.movement_minutes,
                (DurationRule::ByClass, EventKind::Control { .. }) => policy.control_minutes,
                (DurationRule::ByClass, EventKind::Execution { .. }) => allotted_minutes,
            };
            ConcreteEvent {
                kind: template.kind.clone(),
                minutes,
            }
        })
        .collect();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    fn template(attribute: &str, target: &str, state: &str) -> EventTemplate {
        EventTemplate::decode("Test", attribute, target, state, None, None).expect("template")
    }

    fn cooking() -> ActivityDefinition {
        let variant = |label: &str| {
            vec![
                template("Movement", "Kitchen", "area"),
                template("control", "Stove", "on"),
                template("execution", label, "doing"),
            ]
        };
        ActivityDefinition {
            name: "Cooking".into(),
            variants: vec![
                ("Heating".into(), variant("heat")),
                ("Stewing".into(), variant("stew")),
                ("Stir-frying".into(), variant("fry")),
            ],
        }
    }

    #[test]
    fn decode_maps_raw_fields_to_variants() {
        let movement = template("Movement", "Kitchen", "area");
        assert_eq!(
            movement.kind,
            EventKind::Movement {
                target: "Kitchen".into(),
                mode: MovementMode::Area
            }
        );
        assert_eq!(movement.duration, DurationRule::ByClass);

        let random =
            EventTemplate::decode("Test", "execution", "read", "doing", Some("random"), Some(4))
                .expect("random");
        assert_eq!(random.duration, DurationRule::Random);

        let fixed = EventTemplate::decode("Test", "execution", "read", "waiting", None, Some(4))
            .expect("fixed");
        assert_eq!(fixed.duration, DurationRule::Fixed(4));
        assert_eq!(fixed.kind.state(), "waiting");

        assert!(matches!(
            EventTemplate::decode("Test", "teleport", "x", "area", None, None),
            Err(CatalogError::InvalidTemplate { .. })
        ));
        assert!(matches!(
            EventTemplate::decode("Test", "movement", "Kitchen", "floating", None, None),
            Err(CatalogError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn resolve_is_exact_and_rejects_duplicates() {
        let catalog = ActivityCatalog::new(vec![cooking()]).expect("catalog");
        assert!(catalog.resolve("Cooking").is_ok());
        assert_eq!(
            catalog.resolve("cooking").expect_err("case sensitive"),
            CatalogError::MissingActivity("cooking".into())
        );
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["Cooking"]);
        assert!(matches!(
            ActivityCatalog::new(vec![cooking(), cooking()]),
            Err(CatalogError::DuplicateActivity { .. })
        ));
    }

    #[test]
    fn class_durations_follow_policy() {
        let definition = ActivityDefinition {
            name: "Reading".into(),
            variants: vec![(
                DEFAULT_VARIANT.into(),
                vec![
                    template("Movement", "Study", "area"),
                    template("control", "Lamp", "on"),
                    template("execution", "read", "doing"),
                ],
            )],
        };
        let policy = DurationPolicy {
            movement_minutes: 2,
            control_minutes: 3,
            ..DurationPolicy::default()
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let events = expand(&definition, 45, None, &policy, &mut rng).expect("expand");
        let minutes: Vec<_> = events.iter().map(|event| event.minutes).collect();
        assert_eq!(minutes, vec![2, 3, 45]);
    }

    #[test]
    fn weighted_variants_use_cumulative_thresholds() {
        let definition = cooking();
        let weights = vec![
            VariantWeight {
                variant: "Heating".into(),
                probability: 0.0,
            },
            VariantWeight {
                variant: "Stewing".into(),
                probability: 0.0,
            },
            VariantWeight {
                variant: "Stir-frying".into(),
                probability: 0.0,
            },
        ];
        let mut rng = SmallRng::seed_from_u64(3);
        // All thresholds exhausted: the last variant is the fallback.
        let events = expand(&definition, 20, Some(&weights), &DurationPolicy::default(), &mut rng)
            .expect("expand");
        assert_eq!(events[2].kind.target(), "fry");

        let certain = vec![VariantWeight {
            variant: "Stewing".into(),
            probability: 1.0,
        }];
        let events = expand(&definition, 20, Some(&certain), &DurationPolicy::default(), &mut rng)
            .expect("expand");
        assert_eq!(events[2].kind.target(), "stew");
    }

    #[test]
    fn missing_normal_variant_is_reported() {
        let mut rng = SmallRng::seed_from_u64(0);
        let err = expand(&cooking(), 10, None, &DurationPolicy::default(), &mut rng)
            .expect_err("no normal variant");
        assert_eq!(
            err,
            CatalogError::MissingVariant {
                activity: "Cooking".into(),
                variant: DEFAULT_VARIANT.into()
            }
        );
    }

    #[test]
    fn random_durations_match_the_seeded_sequence() {
        let definition = ActivityDefinition {
            name: "Snack".into(),
            variants: vec![(
                DEFAULT_VARIANT.into(),
                vec![
                    EventTemplate::decode("Snack", "execution", "eat", "doing", Some("random"), None)
                        .expect("template"),
                ],
            )],
        };
        let policy = DurationPolicy::default();
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let mut reference = SmallRng::seed_from_u64(0x5EED);
        for _ in 0..1000 {
            let events = expand(&definition, 60, None, &policy, &mut rng).expect("expand");
            let expected: u32 = reference.random_range(policy.random_min..=policy.random_max);
            assert_eq!(events[0].minutes, expected);
            assert!((3..=10).contains(&events[0].minutes));
        }
    }
}

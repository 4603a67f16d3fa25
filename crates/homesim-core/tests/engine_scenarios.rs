use homesim_core::interrupts::ProbabilityPolicy;
use homesim_core::{
    CatalogError, DailyPlanRequest, DayBatch, DurationPolicy, EngineError, EventClass, Household,
    MemoryPersistence, MinuteOfDay, Oracle, OracleError, PlannedActivity, RevisionRequest,
    ScriptedOracle, SimConfig, Simulation, StepOutRequest, WaitingRequest, Weekday,
};
use std::sync::{Arc, Mutex};

// 5x5 flat: four rooms in the corners joined by a cross-shaped hall.
const ENV: &str = r#"{"environment_config": {
    "layout": {"xmin": 0, "xhigh": 4, "ymin": 0, "yhigh": 4},
    "valid_area": {
        "Bedroom": {"Scope": {"main": {"xmin": 0, "xhigh": 1, "ymin": 0, "yhigh": 1}}},
        "Utility": {"Scope": {"main": {"xmin": 3, "xhigh": 4, "ymin": 0, "yhigh": 1}}},
        "Bathroom": {"Scope": {"main": {"xmin": 0, "xhigh": 1, "ymin": 3, "yhigh": 4}}},
        "Office": {"Scope": {"main": {"xmin": 3, "xhigh": 4, "ymin": 3, "yhigh": 4}}},
        "Hall": {"Scope": {
            "spine": {"xmin": 2, "xhigh": 2, "ymin": 0, "yhigh": 4},
            "cross": {"xmin": 0, "xhigh": 4, "ymin": 2, "yhigh": 2}
        }}
    },
    "sensor": {"HallMotion": {"x": 2, "y": 2}},
    "control_device": {"DeskLamp": {"x": 4, "y": 3}},
    "Facility": {"Bed": {"x": 0, "y": 0}, "Desk": {"x": 4, "y": 4}}
}}"#;

const ACTIVITIES: &str = r#"{"activity_config": [
    {"activity_name": "Sleeping", "event_sequence": {"normal": [
        {"attribute": "Movement", "target": "Bedroom", "state": "area"},
        {"attribute": "Movement", "target": "Bed", "state": "position"},
        {"attribute": "execution", "target": "sleep", "state": "doing"}
    ]}},
    {"activity_name": "Oversleeping", "event_sequence": {"normal": [
        {"attribute": "Movement", "target": "Bed", "state": "position"},
        {"attribute": "execution", "target": "sleep", "state": "doing", "duration": 510}
    ]}},
    {"activity_name": "Working", "event_sequence": {"normal": [
        {"attribute": "Movement", "target": "Office", "state": "area"},
        {"attribute": "Movement", "target": "Desk", "state": "position"},
        {"attribute": "control", "target": "DeskLamp", "state": "on"},
        {"attribute": "execution", "target": "work", "state": "doing"}
    ]}},
    {"activity_name": "Resting", "event_sequence": {"normal": [
        {"attribute": "Movement", "target": "Bedroom", "state": "area"},
        {"attribute": "execution", "target": "rest", "state": "doing"}
    ]}},
    {"activity_name": "Laundry", "event_sequence": {"normal": [
        {"attribute": "Movement", "target": "Utility", "state": "area"},
        {"attribute": "execution", "target": "wash", "state": "waiting"}
    ]}},
    {"activity_name": "Reading", "event_sequence": {"normal": [
        {"attribute": "execution", "target": "read", "state": "doing"}
    ]}},
    {"activity_name": "Toilet", "event_sequence": {"normal": [
        {"attribute": "Movement", "target": "Bathroom", "state": "area"},
        {"attribute": "execution", "target": "relieve", "state": "doing"}
    ]}},
    {"activity_name": "Phone", "event_sequence": {"normal": [
        {"attribute": "execution", "target": "call", "state": "doing"}
    ]}}
]}"#;

const QUIET: &str = r#"{"user_config": {"Tester": {
    "profile": "Lives alone.",
    "traits": ["tidy"],
    "reference_plan": [
        {"activity_name": "Reading", "start_time": "10:00", "end_time": "10:30"}
    ]
}}}"#;

const RESTLESS: &str = r#"{"user_config": {"Tester": {
    "profile": "Cannot sit still.",
    "probabilities": {
        "toilet": {"sleeping": 1.0, "daytime": 1.0},
        "phone": {"weekday": 0.0, "weekend": 0.0}
    }
}}}"#;

const CHATTY: &str = r#"{"user_config": {"Tester": {
    "profile": "Always on the phone.",
    "probabilities": {
        "toilet": {"sleeping": 0.0, "daytime": 0.0},
        "phone": {"weekday": 1.0, "weekend": 1.0}
    }
}}}"#;

fn t(s: &str) -> MinuteOfDay {
    s.parse().expect("time")
}

fn item(name: &str, start: &str, end: &str) -> PlannedActivity {
    PlannedActivity::new(name, t(start), t(end))
}

fn config() -> SimConfig {
    SimConfig {
        rng_seed: Some(0x5eed),
        start_facility: "Bed".into(),
        persona_id: "Tester".into(),
        run_id: Some(42),
        durations: DurationPolicy {
            movement_minutes: 0,
            control_minutes: 0,
            ..DurationPolicy::default()
        },
        ..SimConfig::default()
    }
}

fn household(profiles: &str) -> Household {
    Household::from_json(ENV, ACTIVITIES, profiles, "Tester").expect("household")
}

fn simulate<O: Oracle>(
    config: SimConfig,
    profiles: &str,
    oracle: O,
) -> (Simulation<O>, Arc<Mutex<Vec<DayBatch>>>) {
    let sink = MemoryPersistence::new();
    let days = sink.handle();
    let sim = Simulation::with_persistence(config, household(profiles), oracle, Box::new(sink))
        .expect("simulation");
    (sim, days)
}

fn only_day(days: &Arc<Mutex<Vec<DayBatch>>>) -> DayBatch {
    let days = days.lock().expect("lock");
    assert_eq!(days.len(), 1);
    days[0].clone()
}

#[test]
fn quiet_day_runs_exactly_to_plan() {
    let plan = [item("Sleeping", "00:00", "07:00"), item("Working", "07:00", "15:00")];
    let oracle = ScriptedOracle::new().with_plan(&plan);
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    let key = sim.run_day().expect("day");
    assert_eq!(key.day, 0);
    assert_eq!(key.run_id, 42);
    assert_eq!(key.persona_id, "Tester");

    let day = only_day(&days);
    assert_eq!(day.weekday, Weekday::Saturday);
    assert_eq!(day.log.done, plan.to_vec());
    assert!(day.log.events.iter().all(|event| event.depth == 0));
    assert!(!day.log.events.iter().any(|event| event.activity == "Toilet"));

    // Crossing into the office passes the hall sensor in transit, then again on the way
    // to the desk.
    let motion: Vec<_> = day
        .log
        .sensors
        .iter()
        .filter(|record| record.sensor.as_deref() == Some("HallMotion"))
        .collect();
    assert!(motion.iter().any(|record| record.activity.is_none()));
    assert!(
        motion
            .iter()
            .any(|record| record.activity.as_deref() == Some("Working"))
    );
    assert!(day.log.sensors.iter().any(|record| {
        record.device.as_deref() == Some("DeskLamp") && record.time == t("07:00")
    }));

    assert_eq!(sim.oracle().calls().daily, 1);
    assert_eq!(sim.oracle().calls().revise, 0);
    assert_eq!(sim.state().clock.now(), t("15:00"));
    assert!(sim.log().is_empty());
}

#[test]
fn drift_beyond_threshold_requests_one_revision() {
    let plan = [
        item("Oversleeping", "00:00", "07:00"),
        item("Working", "07:00", "15:00"),
        item("Resting", "15:00", "16:00"),
    ];
    let mut oracle = ScriptedOracle::new().with_plan(&plan);
    oracle.push_revision(r#"[{"activity_name": "Working", "start_time": "08:30", "end_time": "09:30"}]"#);
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    sim.run_day().expect("day");
    let day = only_day(&days);
    assert_eq!(
        day.log.done,
        vec![item("Oversleeping", "00:00", "08:30"), item("Working", "08:30", "09:30")]
    );
    assert_eq!(sim.oracle().calls().revise, 1);
}

#[test]
fn unreadable_revision_keeps_the_remaining_plan() {
    let plan = [
        item("Oversleeping", "00:00", "07:00"),
        item("Working", "07:00", "15:00"),
        item("Resting", "15:00", "16:00"),
    ];
    let mut oracle = ScriptedOracle::new().with_plan(&plan);
    oracle.push_revision("Sorry, I cannot help with that.");
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    sim.run_day().expect("day");
    let day = only_day(&days);
    assert_eq!(
        day.log.done,
        vec![
            item("Oversleeping", "00:00", "08:30"),
            item("Working", "08:30", "16:30"),
            item("Resting", "16:30", "17:30"),
        ]
    );
    // Working also ran late; the second revision echoes what is left.
    assert_eq!(sim.oracle().calls().revise, 2);
}

#[test]
fn unreadable_daily_plan_falls_back_to_reference() {
    let mut oracle = ScriptedOracle::new();
    oracle.push_daily("Here is a lovely plan for your day!");
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    sim.run_day().expect("day");
    assert_eq!(only_day(&days).log.done, vec![item("Reading", "10:00", "10:30")]);
}

#[test]
fn waiting_filler_splits_the_current_activity() {
    let mut oracle = ScriptedOracle::new().with_plan(&[item("Laundry", "09:00", "10:00")]);
    oracle.push_filler("\"Reading\"");
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    sim.run_day().expect("day");
    let day = only_day(&days);
    assert_eq!(
        day.log.done,
        vec![
            item("Laundry", "09:00", "09:00"),
            item("Reading", "09:00", "10:00"),
            item("Laundry", "10:00", "10:00"),
        ]
    );
    let reading = day
        .log
        .events
        .iter()
        .find(|event| event.activity == "Reading")
        .expect("filler event");
    assert_eq!(reading.depth, 1);
    assert_eq!(reading.class, EventClass::Execution);
    assert_eq!(reading.minutes, 60);
    assert_eq!(sim.oracle().calls().filler, 1);
    // Back in the utility room once the filler is over, with no spot to return to.
    assert_eq!(sim.state().area.as_deref(), Some("Utility"));
    assert!(sim.state().spot.is_none());
}

#[test]
fn unknown_filler_aborts_the_day() {
    let mut oracle = ScriptedOracle::new().with_plan(&[item("Laundry", "09:00", "10:00")]);
    oracle.push_filler("Skydiving");
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    let err = sim.run_day().expect_err("unknown filler");
    assert!(matches!(
        err,
        EngineError::Catalog(CatalogError::MissingActivity(name)) if name == "Skydiving"
    ));
    assert!(days.lock().expect("lock").is_empty());
}

#[test]
fn empty_filler_reply_lets_the_wait_elapse() {
    let oracle = ScriptedOracle::new().with_plan(&[item("Laundry", "09:00", "10:00")]);
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    sim.run_day().expect("day");
    assert_eq!(sim.oracle().calls().filler, 1);
    assert_eq!(only_day(&days).log.done, vec![item("Laundry", "09:00", "10:00")]);
}

#[test]
fn toilet_breaks_cut_in_and_extend_the_activity() {
    let config = SimConfig {
        max_interrupt_depth: 1,
        probabilities: ProbabilityPolicy {
            toilet_steps: Vec::new(),
            toilet_long_gap_factor: 1.0,
            ..ProbabilityPolicy::default()
        },
        ..config()
    };
    let oracle = ScriptedOracle::new().with_plan(&[item("Working", "09:00", "10:00")]);
    let (mut sim, days) = simulate(config, RESTLESS, oracle);

    sim.run_day().expect("day");
    let day = only_day(&days);
    // One break inside the work block and one right after it, a minute each.
    assert_eq!(day.log.done, vec![item("Working", "09:00", "10:02")]);
    let breaks: Vec<_> = day
        .log
        .events
        .iter()
        .filter(|event| event.activity == "Toilet" && event.class == EventClass::Execution)
        .collect();
    assert_eq!(breaks.len(), 2);
    assert!(breaks.iter().all(|event| event.depth == 1 && event.minutes == 1));
    assert_eq!(
        sim.state().last_toilet,
        Some(sim.state().clock.absolute_minutes())
    );
    // Walked back to the desk after the interruption.
    assert!(day.log.events.iter().filter(|event| event.target == "Desk").count() >= 2);
}

#[test]
fn stepping_out_replaces_the_remaining_plan() {
    let config = SimConfig {
        max_interrupt_depth: 1,
        probabilities: ProbabilityPolicy {
            step_out_floor: 1.0,
            step_out_peak_probability: 1.0,
            ..ProbabilityPolicy::default()
        },
        ..config()
    };
    let plan = [item("Working", "09:00", "10:00"), item("Resting", "10:00", "11:00")];
    let mut oracle = ScriptedOracle::new().with_plan(&plan);
    oracle.push_step_out(r#"[{"activity_name": "Reading", "start_time": "10:00", "end_time": "10:30"}]"#);
    let (mut sim, days) = simulate(config, CHATTY, oracle);

    sim.run_day().expect("day");
    let day = only_day(&days);
    assert_eq!(
        day.log.done,
        vec![item("Working", "09:00", "10:01"), item("Reading", "10:01", "10:31")]
    );
    assert_eq!(sim.oracle().calls().step_out, 1);
    assert!(sim.state().phone_used_today);
}

#[test]
fn phone_checks_stop_after_stepping_out_until_the_next_day() {
    let config = SimConfig {
        max_interrupt_depth: 1,
        probabilities: ProbabilityPolicy {
            step_out_floor: 1.0,
            step_out_peak_probability: 1.0,
            ..ProbabilityPolicy::default()
        },
        ..config()
    };
    let plan = [item("Working", "09:00", "10:00"), item("Resting", "10:00", "11:00")];
    let mut inner = ScriptedOracle::new().with_plan(&plan);
    inner.push_step_out(r#"[{"activity_name": "Reading", "start_time": "10:00", "end_time": "10:30"}]"#);
    let oracle = FlakyOracle {
        inner,
        days_left: 2,
    };
    let (mut sim, days) = simulate(config, CHATTY, oracle);
    let phone_calls = |batch: &DayBatch| {
        batch
            .log
            .events
            .iter()
            .filter(|event| event.activity == "Phone")
            .count()
    };

    sim.run_day().expect("first day");
    assert!(sim.state().phone_used_today);

    sim.run_day().expect("second day");
    {
        let days = days.lock().expect("lock");
        assert_eq!(days.len(), 2);
        // The first day's only call led to stepping out; nothing rang afterwards.
        assert_eq!(phone_calls(&days[0]), 1);
        assert_eq!(days[0].log.done.last(), Some(&item("Reading", "10:01", "10:31")));
        // A new day rearms the phone.
        assert_eq!(phone_calls(&days[1]), 1);
    }
    assert_eq!(sim.oracle().inner.calls().step_out, 2);

    // The third day fails right after it starts, exposing the reset flag.
    assert!(sim.run_day().is_err());
    assert!(!sim.state().phone_used_today);
}

#[test]
fn consecutive_days_share_the_clock() {
    let plan = [item("Sleeping", "00:00", "07:00"), item("Working", "07:00", "15:00")];
    let oracle = ScriptedOracle::new().with_plan(&plan);
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    sim.run(2).expect("two days");
    let days = days.lock().expect("lock");
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].key.day, 0);
    assert_eq!(days[1].key.day, 1);
    assert_eq!(days[0].key.run_id, days[1].key.run_id);
    // The second day starts where the first stopped, so it runs past midnight.
    assert_eq!(days[1].log.done[0].start_time, t("15:00"));
    assert_eq!(sim.state().clock.day(), 6);
    assert_eq!(sim.state().clock.weekday(), Weekday::Sunday);
    assert_eq!(sim.days_completed(), 2);
}

/// Serves a fixed number of days, then loses its connection.
struct FlakyOracle {
    inner: ScriptedOracle,
    days_left: usize,
}

impl Oracle for FlakyOracle {
    fn generate_daily_plan(&mut self, request: &DailyPlanRequest<'_>) -> Result<String, OracleError> {
        if self.days_left == 0 {
            return Err(OracleError::Transport("connection refused".into()));
        }
        self.days_left -= 1;
        self.inner.generate_daily_plan(request)
    }

    fn revise_daily_plan(&mut self, request: &RevisionRequest<'_>) -> Result<String, OracleError> {
        self.inner.revise_daily_plan(request)
    }

    fn decide_waiting_filler(&mut self, request: &WaitingRequest<'_>) -> Result<String, OracleError> {
        self.inner.decide_waiting_filler(request)
    }

    fn decide_step_out(&mut self, request: &StepOutRequest<'_>) -> Result<String, OracleError> {
        self.inner.decide_step_out(request)
    }
}

#[test]
fn transport_failure_aborts_but_keeps_finished_days() {
    let oracle = FlakyOracle {
        inner: ScriptedOracle::new().with_plan(&[item("Reading", "10:00", "11:00")]),
        days_left: 1,
    };
    let (mut sim, days) = simulate(config(), QUIET, oracle);

    let err = sim.run(3).expect_err("second day fails");
    assert!(matches!(err, EngineError::Oracle(OracleError::Transport(_))));
    assert_eq!(days.lock().expect("lock").len(), 1);
    assert_eq!(sim.days_completed(), 1);
}

#[test]
fn malformed_oracle_errors_are_survivable() {
    struct Mumbling;
    impl Oracle for Mumbling {
        fn generate_daily_plan(&mut self, _: &DailyPlanRequest<'_>) -> Result<String, OracleError> {
            Err(OracleError::Malformed("no choices".into()))
        }
        fn revise_daily_plan(&mut self, _: &RevisionRequest<'_>) -> Result<String, OracleError> {
            Err(OracleError::Malformed("no choices".into()))
        }
        fn decide_waiting_filler(&mut self, _: &WaitingRequest<'_>) -> Result<String, OracleError> {
            Err(OracleError::Malformed("no choices".into()))
        }
        fn decide_step_out(&mut self, _: &StepOutRequest<'_>) -> Result<String, OracleError> {
            Err(OracleError::Malformed("no choices".into()))
        }
    }

    let (mut sim, days) = simulate(config(), QUIET, Mumbling);
    sim.run_day().expect("day");
    assert_eq!(only_day(&days).log.done, vec![item("Reading", "10:00", "10:30")]);
}

//! Schedule execution: drives one persona through planned days.
//!
//! Each planned activity is expanded into primitive events that run on an explicit stack of
//! frames. Interruptions (toilet, phone) and waiting fillers push a new frame on top of the
//! one they cut into, and queue a [`Step::Resume`] on the interrupted frame so the persona
//! walks back to where they were before the remaining time elapses.

use rand::{Rng, rngs::SmallRng};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, info, warn};

use homesim_grid::{Cell, path_to_area, path_to_position};

use crate::catalog::{self, CatalogError, ConcreteEvent, EventKind, ExecutionMode, MovementMode};
use crate::config::{ConfigError, Household, SimConfig};
use crate::interrupts::{self, Interrupt};
use crate::oracle::{
    DailyPlanRequest, Oracle, OracleError, RevisionRequest, StepOutRequest, WaitingRequest,
};
use crate::plan::{PlannedActivity, StepOutDecision, parse_activity_name, parse_plan, parse_step_out};
use crate::records::{
    DayBatch, DayKey, DayLog, DayPersistence, EventRecord, NullPersistence, SensorRecord,
};
use crate::time::{MinuteOfDay, SimClock};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("movement into unknown area `{0}`")]
    UnknownArea(String),
    #[error("movement to unknown facility or device `{0}`")]
    UnknownTarget(String),
    #[error(transparent)]
    Oracle(OracleError),
}

/// Runtime state of the simulated persona. Survives across days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaState {
    pub clock: SimClock,
    pub position: Cell,
    /// Last area entered by an area movement.
    pub area: Option<String>,
    /// Facility or device reached since entering `area`.
    pub spot: Option<String>,
    /// Absolute minute of the last toilet visit.
    pub last_toilet: Option<u64>,
    pub phone_used_today: bool,
    /// Planned activity currently running, with its start rewritten to the actual start.
    pub current: Option<PlannedActivity>,
}

/// Pending work inside a frame.
#[derive(Debug)]
enum Step {
    Event(ConcreteEvent),
    /// Walk back to the stored area and spot, then let `remainder` minutes pass.
    Resume {
        area: Option<String>,
        spot: Option<String>,
        remainder: u32,
    },
    Advance(u32),
    AfterToilet,
    AfterPhone,
    /// Record the filler in `done` and reopen the interrupted activity.
    FinishFiller {
        name: String,
        start: MinuteOfDay,
    },
}

#[derive(Debug)]
struct Frame {
    activity: String,
    /// 0 for planned activities, +1 per nested interruption or filler.
    depth: usize,
    steps: VecDeque<Step>,
}

impl Frame {
    fn new(activity: impl Into<String>, depth: usize, events: Vec<ConcreteEvent>) -> Self {
        Self {
            activity: activity.into(),
            depth,
            steps: events.into_iter().map(Step::Event).collect(),
        }
    }

    fn then(mut self, step: Step) -> Self {
        self.steps.push_back(step);
        self
    }
}

/// Transport failures abort; malformed replies are logged and dropped.
fn recover(
    result: Result<String, OracleError>,
    call: &'static str,
) -> Result<Option<String>, EngineError> {
    match result {
        Ok(text) => Ok(Some(text)),
        Err(OracleError::Malformed(detail)) => {
            warn!(call, %detail, "discarding malformed oracle response");
            Ok(None)
        }
        Err(err @ OracleError::Transport(_)) => Err(EngineError::Oracle(err)),
    }
}

/// Single-persona simulation.
pub struct Simulation<O> {
    config: SimConfig,
    household: Household,
    oracle: O,
    persistence: Box<dyn DayPersistence>,
    rng: SmallRng,
    state: PersonaState,
    todo: VecDeque<PlannedActivity>,
    log: DayLog,
    catalog_names: Vec<String>,
    run_id: u64,
    day_ordinal: u32,
}

impl<O: Oracle> Simulation<O> {
    /// Simulation that discards completed days.
    pub fn new(config: SimConfig, household: Household, oracle: O) -> Result<Self, EngineError> {
        Self::with_persistence(config, household, oracle, Box::new(NullPersistence))
    }

    /// Simulation that hands every completed day to `persistence`.
    pub fn with_persistence(
        config: SimConfig,
        household: Household,
        oracle: O,
        persistence: Box<dyn DayPersistence>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let start = household
            .map
            .facility(&config.start_facility)
            .ok_or_else(|| ConfigError::UnknownStartFacility(config.start_facility.clone()))?;
        household.catalog.resolve(&config.toilet_activity)?;
        household.catalog.resolve(&config.phone_activity)?;

        let mut rng = config.seeded_rng();
        let run_id = config.run_id.unwrap_or_else(|| rng.random());
        let catalog_names = household.catalog.names().map(str::to_string).collect();
        let area = household
            .map
            .areas()
            .iter()
            .find(|area| area.contains(start))
            .map(|area| area.name.clone());

        let state = PersonaState {
            clock: SimClock::new(config.start_day),
            position: start,
            area,
            spot: Some(config.start_facility.clone()),
            last_toilet: None,
            phone_used_today: false,
            current: None,
        };

        Ok(Self {
            config,
            household,
            oracle,
            persistence,
            rng,
            state,
            todo: VecDeque::new(),
            log: DayLog::default(),
            catalog_names,
            run_id,
            day_ordinal: 0,
        })
    }

    /// Replace the run RNG.
    #[must_use]
    pub fn with_rng(mut self, rng: SmallRng) -> Self {
        self.rng = rng;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub fn household(&self) -> &Household {
        &self.household
    }

    #[must_use]
    pub fn state(&self) -> &PersonaState {
        &self.state
    }

    #[must_use]
    pub fn todo(&self) -> &VecDeque<PlannedActivity> {
        &self.todo
    }

    /// Log of the day in progress.
    #[must_use]
    pub fn log(&self) -> &DayLog {
        &self.log
    }

    #[must_use]
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    #[must_use]
    pub const fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Number of days completed so far.
    #[must_use]
    pub const fn days_completed(&self) -> u32 {
        self.day_ordinal
    }

    /// Simulate `days` consecutive days. A fatal error leaves earlier days persisted and
    /// drops the partial log of the failing day.
    pub fn run(&mut self, days: u32) -> Result<(), EngineError> {
        for _ in 0..days {
            self.run_day()?;
        }
        Ok(())
    }

    /// Request a plan, execute it to completion, and persist the day.
    pub fn run_day(&mut self) -> Result<DayKey, EngineError> {
        let weekday = self.state.clock.weekday();
        info!(day = self.day_ordinal, %weekday, "day started");
        self.state.phone_used_today = false;
        self.log = DayLog::default();
        self.todo.clear();

        let persona = &self.household.persona;
        let lifestyle = persona.lifestyle();
        let request = DailyPlanRequest {
            persona: &persona.profile,
            lifestyle: &lifestyle,
            weekday,
            reference_plan: &persona.reference_plan,
            catalog: &self.catalog_names,
        };
        let response = recover(self.oracle.generate_daily_plan(&request), "daily plan")?;
        let plan = match response.as_deref().map(parse_plan) {
            Some(Ok(plan)) => plan,
            Some(Err(err)) => {
                warn!(%err, raw = response.as_deref().unwrap_or_default(), "unreadable daily plan; using reference plan");
                persona.reference_plan.clone()
            }
            None => persona.reference_plan.clone(),
        };
        info!(items = plan.len(), "daily plan received");
        self.todo = plan.into();

        while let Some(item) = self.todo.pop_front() {
            self.execute_activity(item)?;
        }

        let key = DayKey {
            persona_id: self.config.persona_id.clone(),
            run_id: self.run_id,
            day: self.day_ordinal,
        };
        let batch = DayBatch {
            key: key.clone(),
            weekday,
            log: std::mem::take(&mut self.log),
        };
        info!(
            day = key.day,
            done = batch.log.done.len(),
            sensors = batch.log.sensors.len(),
            events = batch.log.events.len(),
            "day complete"
        );
        self.persistence.on_day_complete(&batch);
        self.day_ordinal += 1;
        Ok(key)
    }

    /// Run one planned activity, including interruptions, and append it to `done`.
    pub fn execute_activity(&mut self, item: PlannedActivity) -> Result<(), EngineError> {
        let planned_end = item.end_time;
        let nominal = item.nominal_minutes();
        let mut item = item;
        if self.state.clock.is_set() {
            item.start_time = self.state.clock.now();
        } else {
            self.state.clock.set(item.start_time);
            self.state.last_toilet = Some(self.state.clock.absolute_minutes());
        }
        debug!(activity = %item.activity_name, start = %item.start_time, nominal, "activity started");

        let events = self.expand(&item.activity_name, nominal)?;
        let frame = Frame::new(item.activity_name.clone(), 0, events);
        self.state.current = Some(item);
        self.drain(vec![frame])?;

        if let Some(kind) = self.draw_interrupt(1) {
            let frame = self.interrupt_frame(kind, 1)?;
            self.drain(vec![frame])?;
        }

        if let Some(mut finished) = self.state.current.take() {
            finished.end_time = self.state.clock.now();
            debug!(activity = %finished.activity_name, end = %finished.end_time, "activity done");
            self.log.done.push(finished);
        }
        self.check_drift(planned_end)
    }

    fn expand(&mut self, activity: &str, allotted: u32) -> Result<Vec<ConcreteEvent>, EngineError> {
        let definition = self.household.catalog.resolve(activity)?;
        let weights = self.household.persona.weights_for(activity);
        Ok(catalog::expand(
            definition,
            allotted,
            weights,
            &self.config.durations,
            &mut self.rng,
        )?)
    }

    fn drain(&mut self, mut stack: Vec<Frame>) -> Result<(), EngineError> {
        while let Some(frame) = stack.last_mut() {
            let Some(step) = frame.steps.pop_front() else {
                stack.pop();
                continue;
            };
            let activity = frame.activity.clone();
            let depth = frame.depth;
            match step {
                Step::Event(event) => self.dispatch(&mut stack, &activity, depth, event)?,
                Step::Resume {
                    area,
                    spot,
                    remainder,
                } => {
                    let minutes = self.config.durations.movement_minutes;
                    let mut restore = Vec::with_capacity(3);
                    if let Some(area) = area {
                        restore.push(Step::Event(ConcreteEvent {
                            kind: EventKind::Movement {
                                target: area,
                                mode: MovementMode::Area,
                            },
                            minutes,
                        }));
                    }
                    if let Some(spot) = spot {
                        restore.push(Step::Event(ConcreteEvent {
                            kind: EventKind::Movement {
                                target: spot,
                                mode: MovementMode::Position,
                            },
                            minutes,
                        }));
                    }
                    restore.push(Step::Advance(remainder));
                    if let Some(frame) = stack.last_mut() {
                        for step in restore.into_iter().rev() {
                            frame.steps.push_front(step);
                        }
                    }
                }
                Step::Advance(minutes) => self.advance(minutes),
                Step::AfterToilet => {
                    self.state.last_toilet = Some(self.state.clock.absolute_minutes());
                }
                Step::AfterPhone => self.after_phone()?,
                Step::FinishFiller { name, start } => {
                    let now = self.state.clock.now();
                    self.log.done.push(PlannedActivity::new(name, start, now));
                    if let Some(current) = self.state.current.as_mut() {
                        current.start_time = now;
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        stack: &mut Vec<Frame>,
        activity: &str,
        depth: usize,
        event: ConcreteEvent,
    ) -> Result<(), EngineError> {
        let now = self.state.clock.now();
        let weekday = self.state.clock.weekday();
        debug!(activity, class = %event.kind.class(), target = event.kind.target(), minutes = event.minutes, "event");
        self.log.events.push(EventRecord {
            weekday,
            start_time: now,
            activity: activity.to_string(),
            class: event.kind.class(),
            target: event.kind.target().to_string(),
            state: event.kind.state().to_string(),
            minutes: event.minutes,
            depth: depth as u32,
        });

        match event.kind {
            EventKind::Movement { target, mode } => self.travel(activity, &target, mode, event.minutes),
            EventKind::Control { device, state } => {
                self.log
                    .sensors
                    .push(SensorRecord::device(weekday, now, device, state, activity));
                self.advance(event.minutes);
                Ok(())
            }
            EventKind::Execution { label, mode } => {
                self.execute(stack, depth, &label, mode, event.minutes)
            }
        }
    }

    fn travel(
        &mut self,
        activity: &str,
        target: &str,
        mode: MovementMode,
        minutes: u32,
    ) -> Result<(), EngineError> {
        let map = &self.household.map;
        let from = self.state.position;
        let (path, label) = match mode {
            MovementMode::Area => {
                if map.area(target).is_none() {
                    return Err(EngineError::UnknownArea(target.to_string()));
                }
                (path_to_area(map, from, target), None)
            }
            MovementMode::Position => {
                let Some(to) = map.landmark(target) else {
                    return Err(EngineError::UnknownTarget(target.to_string()));
                };
                (path_to_position(map, from, to), Some(activity.to_string()))
            }
        };

        let Some(&last) = path.last() else {
            warn!(target, ?mode, x = from.x, y = from.y, "no path to movement target; staying put");
            return Ok(());
        };
        match mode {
            MovementMode::Area => {
                self.state.area = Some(target.to_string());
                self.state.spot = None;
            }
            MovementMode::Position => self.state.spot = Some(target.to_string()),
        }

        let now = self.state.clock.now();
        let weekday = self.state.clock.weekday();
        for cell in &path {
            for sensor in map.sensors_near(*cell) {
                self.log.sensors.push(SensorRecord::sensor(
                    weekday,
                    now,
                    sensor.name.clone(),
                    label.clone(),
                ));
            }
        }
        self.state.position = last;
        self.advance(minutes);
        Ok(())
    }

    fn execute(
        &mut self,
        stack: &mut Vec<Frame>,
        depth: usize,
        label: &str,
        mode: ExecutionMode,
        minutes: u32,
    ) -> Result<(), EngineError> {
        let area = self.state.area.clone();
        let spot = self.state.spot.clone();
        let nested = depth + 1;

        if let Some(kind) = self.draw_interrupt(nested) {
            let split = self.rng.random_range(0..=minutes);
            debug!(?kind, split, of = minutes, "interrupting execution");
            self.advance(split);
            let frame = self.interrupt_frame(kind, nested)?;
            push_front(
                stack,
                Step::Resume {
                    area,
                    spot,
                    remainder: minutes - split,
                },
            );
            stack.push(frame);
            return Ok(());
        }

        if mode == ExecutionMode::Waiting
            && nested <= self.config.max_interrupt_depth
            && let Some(filler) = self.ask_filler(label, minutes)?
        {
            let now = self.state.clock.now();
            if let Some(current) = self.state.current.as_ref() {
                let mut closed = current.clone();
                closed.end_time = now;
                self.log.done.push(closed);
            }
            info!(filler = %filler, minutes, "filling waiting time");
            let events = self.expand(&filler, minutes)?;
            push_front(
                stack,
                Step::Resume {
                    area,
                    spot,
                    remainder: 0,
                },
            );
            stack.push(Frame::new(filler.clone(), nested, events).then(Step::FinishFiller {
                name: filler,
                start: now,
            }));
            return Ok(());
        }

        self.advance(minutes);
        Ok(())
    }

    /// Draw for an interruption that would run at `depth`.
    fn draw_interrupt(&mut self, depth: usize) -> Option<Interrupt> {
        if depth > self.config.max_interrupt_depth {
            return None;
        }
        let clock = &self.state.clock;
        let policy = &self.config.probabilities;
        let rates = &self.household.persona.rates;
        let sleeping = self
            .state
            .current
            .as_ref()
            .is_some_and(|current| current.activity_name == self.config.sleep_activity);
        let since = self
            .state
            .last_toilet
            .map_or(0, |last| clock.absolute_minutes().saturating_sub(last));
        let toilet_p = policy.toilet_probability(rates.toilet(sleeping), since);
        let phone_p = policy.phone_probability(
            rates.phone(clock.weekday()),
            self.state.phone_used_today,
            clock.now(),
        );
        interrupts::draw(&mut self.rng, toilet_p, phone_p)
    }

    fn interrupt_frame(&mut self, kind: Interrupt, depth: usize) -> Result<Frame, EngineError> {
        let (activity, after) = match kind {
            Interrupt::Toilet => (self.config.toilet_activity.clone(), Step::AfterToilet),
            Interrupt::Phone => (self.config.phone_activity.clone(), Step::AfterPhone),
        };
        debug!(?kind, at = %self.state.clock.now(), depth, "interruption");
        let events = self.expand(&activity, self.config.durations.interrupt_minutes)?;
        Ok(Frame::new(activity, depth, events).then(after))
    }

    fn ask_filler(&mut self, waiting: &str, minutes: u32) -> Result<Option<String>, EngineError> {
        let Some(current) = self.state.current.as_ref() else {
            return Ok(None);
        };
        let persona = &self.household.persona;
        let lifestyle = persona.lifestyle();
        let request = WaitingRequest {
            persona: &persona.profile,
            lifestyle: &lifestyle,
            remaining: self.todo.make_contiguous(),
            completed: &self.log.done,
            current,
            waiting,
            waiting_minutes: minutes,
            weekday: self.state.clock.weekday(),
            catalog: &self.catalog_names,
        };
        let Some(text) = recover(self.oracle.decide_waiting_filler(&request), "waiting filler")?
        else {
            return Ok(None);
        };
        match parse_activity_name(&text) {
            Some(name) if self.household.catalog.contains(&name) => Ok(Some(name)),
            Some(name) => Err(CatalogError::MissingActivity(name).into()),
            None => {
                debug!(raw = %text, "no filler chosen");
                Ok(None)
            }
        }
    }

    fn after_phone(&mut self) -> Result<(), EngineError> {
        let now = self.state.clock.now();
        let p = self.config.probabilities.step_out_probability(now);
        let r: f64 = self.rng.random();
        if r >= p {
            return Ok(());
        }
        self.state.phone_used_today = true;

        let persona = &self.household.persona;
        let lifestyle = persona.lifestyle();
        let request = StepOutRequest {
            persona: &persona.profile,
            lifestyle: &lifestyle,
            remaining: self.todo.make_contiguous(),
            completed: &self.log.done,
            weekday: self.state.clock.weekday(),
            catalog: &self.catalog_names,
        };
        let Some(text) = recover(self.oracle.decide_step_out(&request), "step out")? else {
            return Ok(());
        };
        match parse_step_out(&text) {
            Ok(StepOutDecision::Keep) => debug!("step-out declined"),
            Ok(StepOutDecision::Replace(plan)) => {
                info!(items = plan.len(), at = %now, "stepping out; remaining plan replaced");
                self.todo = plan.into();
            }
            Err(err) => warn!(%err, raw = %text, "unreadable step-out decision; keeping plan"),
        }
        Ok(())
    }

    fn check_drift(&mut self, planned_end: MinuteOfDay) -> Result<(), EngineError> {
        let now = self.state.clock.now();
        let drift = planned_end.circular_distance(now);
        if drift <= self.config.drift_threshold_minutes || self.todo.is_empty() {
            return Ok(());
        }
        info!(drift, remaining = self.todo.len(), "plan drifted; requesting revision");

        let persona = &self.household.persona;
        let lifestyle = persona.lifestyle();
        let request = RevisionRequest {
            persona: &persona.profile,
            lifestyle: &lifestyle,
            remaining: self.todo.make_contiguous(),
            completed: &self.log.done,
            weekday: self.state.clock.weekday(),
            catalog: &self.catalog_names,
        };
        let Some(text) = recover(self.oracle.revise_daily_plan(&request), "plan revision")? else {
            return Ok(());
        };
        match parse_plan(&text) {
            Ok(plan) => {
                info!(items = plan.len(), "plan revised");
                self.todo = plan.into();
            }
            Err(err) => warn!(%err, raw = %text, "unreadable plan revision; keeping plan"),
        }
        Ok(())
    }

    fn advance(&mut self, minutes: u32) {
        if self.state.clock.advance(minutes) > 0 {
            debug!(day = self.state.clock.day(), weekday = %self.state.clock.weekday(), "passed midnight");
        }
    }
}

fn push_front(stack: &mut [Frame], step: Step) {
    if let Some(frame) = stack.last_mut() {
        frame.steps.push_front(step);
    }
}

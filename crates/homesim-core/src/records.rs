//! Per-day logs and the persistence hook that receives them.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::catalog::EventClass;
use crate::plan::PlannedActivity;
use crate::time::{MinuteOfDay, Weekday};

/// State written for a triggered binary sensor.
pub const SENSOR_ON: &str = "ON";

/// Sensor trigger or device state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub weekday: Weekday,
    pub time: MinuteOfDay,
    pub sensor: Option<String>,
    pub sensor_state: Option<String>,
    pub device: Option<String>,
    pub device_state: Option<String>,
    /// Absent for transit between areas.
    pub activity: Option<String>,
}

impl SensorRecord {
    #[must_use]
    pub fn sensor(
        weekday: Weekday,
        time: MinuteOfDay,
        sensor: impl Into<String>,
        activity: Option<String>,
    ) -> Self {
        Self {
            weekday,
            time,
            sensor: Some(sensor.into()),
            sensor_state: Some(SENSOR_ON.to_string()),
            device: None,
            device_state: None,
            activity,
        }
    }

    #[must_use]
    pub fn device(
        weekday: Weekday,
        time: MinuteOfDay,
        device: impl Into<String>,
        state: impl Into<String>,
        activity: impl Into<String>,
    ) -> Self {
        Self {
            weekday,
            time,
            sensor: None,
            sensor_state: None,
            device: Some(device.into()),
            device_state: Some(state.into()),
            activity: Some(activity.into()),
        }
    }
}

/// Audit entry for every dispatched primitive event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub weekday: Weekday,
    pub start_time: MinuteOfDay,
    pub activity: String,
    pub class: EventClass,
    pub target: String,
    pub state: String,
    pub minutes: u32,
    /// 0 for planned activities, +1 per nested interruption or filler.
    pub depth: u32,
}

/// Everything one simulated day produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayLog {
    pub done: Vec<PlannedActivity>,
    pub sensors: Vec<SensorRecord>,
    pub events: Vec<EventRecord>,
}

impl DayLog {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.done.is_empty() && self.sensors.is_empty() && self.events.is_empty()
    }
}

/// Persistence key for a completed day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub persona_id: String,
    pub run_id: u64,
    /// Ordinal of the day within the run, starting at 0.
    pub day: u32,
}

/// Payload handed to the persistence sink once per day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayBatch {
    pub key: DayKey,
    /// Weekday the day started on.
    pub weekday: Weekday,
    pub log: DayLog,
}

/// Sink for completed days. Implementations report their own storage failures.
pub trait DayPersistence: Send {
    fn on_day_complete(&mut self, batch: &DayBatch);
}

/// No-op persistence sink.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl DayPersistence for NullPersistence {
    fn on_day_complete(&mut self, _batch: &DayBatch) {}
}

/// Keeps every batch in memory behind a shared handle.
#[derive(Debug, Default, Clone)]
pub struct MemoryPersistence {
    days: Arc<Mutex<Vec<DayBatch>>>,
}

impl MemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the stored batches; stays valid after the sink is boxed.
    #[must_use]
    pub fn handle(&self) -> Arc<Mutex<Vec<DayBatch>>> {
        Arc::clone(&self.days)
    }
}

impl DayPersistence for MemoryPersistence {
    fn on_day_complete(&mut self, batch: &DayBatch) {
        match self.days.lock() {
            Ok(mut days) => days.push(batch.clone()),
            Err(_) => tracing::error!(day = batch.key.day, "memory persistence lock poisoned"),
        }
    }
}

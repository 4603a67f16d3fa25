//! DuckDB-backed persistence layer for homesim day logs.

use duckdb::{Connection, Transaction, params};
use homesim_core::{DayBatch, DayKey, DayPersistence, MinuteOfDay, PlannedActivity};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, mpsc},
    thread,
};
use thiserror::Error;
use tracing::{debug, error, warn};

const DEFAULT_DAY_BUFFER: usize = 4;

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored value is unreadable: {0}")]
    Corrupt(String),
    #[error("storage worker error: {0}")]
    Worker(String),
}

#[derive(Debug, Clone)]
struct DayRow {
    persona_id: String,
    run_id: i64,
    day: i64,
    weekday: String,
    done_count: i64,
    sensor_count: i64,
    event_count: i64,
}

#[derive(Debug, Clone)]
struct DoneRow {
    persona_id: String,
    run_id: i64,
    day: i64,
    seq: i64,
    activity_name: String,
    start_time: String,
    end_time: String,
}

#[derive(Debug, Clone)]
struct SensorRow {
    persona_id: String,
    run_id: i64,
    day: i64,
    seq: i64,
    weekday: String,
    time: String,
    sensor: Option<String>,
    sensor_state: Option<String>,
    device: Option<String>,
    device_state: Option<String>,
    activity: Option<String>,
}

#[derive(Debug, Clone)]
struct EventRow {
    persona_id: String,
    run_id: i64,
    day: i64,
    seq: i64,
    weekday: String,
    start_time: String,
    activity: String,
    class: String,
    target: String,
    state: String,
    minutes: i64,
    depth: i64,
}

#[derive(Default)]
struct StorageBuffer {
    days: Vec<DayRow>,
    done: Vec<DoneRow>,
    sensors: Vec<SensorRow>,
    events: Vec<EventRow>,
}

impl StorageBuffer {
    fn is_empty(&self) -> bool {
        self.days.is_empty() && self.done.is_empty() && self.sensors.is_empty() && self.events.is_empty()
    }

    fn clear(&mut self) {
        self.days.clear();
        self.done.clear();
        self.sensors.clear();
        self.events.clear();
    }
}

/// Per-day row counts read back from the `days` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub day: u32,
    pub weekday: String,
    pub done: usize,
    pub sensors: usize,
    pub events: usize,
}

/// DuckDB-backed persistence sink with buffered writes.
pub struct Storage {
    conn: Connection,
    buffer: StorageBuffer,
    day_flush_threshold: usize,
}

impl Storage {
    /// Open or create a DuckDB database at the provided path with default buffering.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_threshold(path, DEFAULT_DAY_BUFFER)
    }

    /// Flush once `days` completed days are buffered.
    pub fn with_threshold(path: &str, days: usize) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let mut storage = Self {
            conn,
            buffer: StorageBuffer::default(),
            day_flush_threshold: days.max(1),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute(
            "create table if not exists days (
                persona_id text,
                run_id bigint,
                day integer,
                weekday text,
                done_count integer,
                sensor_count integer,
                event_count integer,
                primary key (persona_id, run_id, day)
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists done_schedule (
                persona_id text,
                run_id bigint,
                day integer,
                seq integer,
                activity_name text,
                start_time text,
                end_time text,
                primary key (persona_id, run_id, day, seq)
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists sensor_records (
                persona_id text,
                run_id bigint,
                day integer,
                seq integer,
                weekday text,
                time text,
                sensor text,
                sensor_state text,
                device text,
                device_state text,
                activity text,
                primary key (persona_id, run_id, day, seq)
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists event_records (
                persona_id text,
                run_id bigint,
                day integer,
                seq integer,
                weekday text,
                start_time text,
                activity text,
                class text,
                target text,
                state text,
                minutes integer,
                depth integer,
                primary key (persona_id, run_id, day, seq)
            )",
            [],
        )?;
        Ok(())
    }

    fn enqueue(&mut self, batch: &DayBatch) {
        let key = &batch.key;
        let run_id = key.run_id as i64;
        let day = i64::from(key.day);
        let log = &batch.log;

        self.buffer.days.push(DayRow {
            persona_id: key.persona_id.clone(),
            run_id,
            day,
            weekday: batch.weekday.to_string(),
            done_count: log.done.len() as i64,
            sensor_count: log.sensors.len() as i64,
            event_count: log.events.len() as i64,
        });

        for (seq, item) in log.done.iter().enumerate() {
            self.buffer.done.push(DoneRow {
                persona_id: key.persona_id.clone(),
                run_id,
                day,
                seq: seq as i64,
                activity_name: item.activity_name.clone(),
                start_time: item.start_time.to_string(),
                end_time: item.end_time.to_string(),
            });
        }

        for (seq, record) in log.sensors.iter().enumerate() {
            self.buffer.sensors.push(SensorRow {
                persona_id: key.persona_id.clone(),
                run_id,
                day,
                seq: seq as i64,
                weekday: record.weekday.to_string(),
                time: record.time.to_string(),
                sensor: record.sensor.clone(),
                sensor_state: record.sensor_state.clone(),
                device: record.device.clone(),
                device_state: record.device_state.clone(),
                activity: record.activity.clone(),
            });
        }

        for (seq, record) in log.events.iter().enumerate() {
            self.buffer.events.push(EventRow {
                persona_id: key.persona_id.clone(),
                run_id,
                day,
                seq: seq as i64,
                weekday: record.weekday.to_string(),
                start_time: record.start_time.to_string(),
                activity: record.activity.clone(),
                class: record.class.to_string(),
                target: record.target.clone(),
                state: record.state.clone(),
                minutes: i64::from(record.minutes),
                depth: i64::from(record.depth),
            });
        }
    }

    /// Persist one completed day, buffering until the threshold is met.
    pub fn persist(&mut self, batch: &DayBatch) -> Result<(), StorageError> {
        self.enqueue(batch);
        if self.buffer.days.len() >= self.day_flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn insert_days(tx: &Transaction<'_>, rows: &[DayRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into days (
                persona_id, run_id, day, weekday, done_count, sensor_count, event_count
            ) values (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.persona_id,
                row.run_id,
                row.day,
                row.weekday,
                row.done_count,
                row.sensor_count,
                row.event_count,
            ])?;
        }
        Ok(())
    }

    fn insert_done(tx: &Transaction<'_>, rows: &[DoneRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into done_schedule (
                persona_id, run_id, day, seq, activity_name, start_time, end_time
            ) values (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.persona_id,
                row.run_id,
                row.day,
                row.seq,
                row.activity_name,
                row.start_time,
                row.end_time,
            ])?;
        }
        Ok(())
    }

    fn insert_sensors(tx: &Transaction<'_>, rows: &[SensorRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into sensor_records (
                persona_id, run_id, day, seq, weekday, time,
                sensor, sensor_state, device, device_state, activity
            ) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.persona_id,
                row.run_id,
                row.day,
                row.seq,
                row.weekday,
                row.time,
                row.sensor,
                row.sensor_state,
                row.device,
                row.device_state,
                row.activity,
            ])?;
        }
        Ok(())
    }

    fn insert_events(tx: &Transaction<'_>, rows: &[EventRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into event_records (
                persona_id, run_id, day, seq, weekday, start_time,
                activity, class, target, state, minutes, depth
            ) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.persona_id,
                row.run_id,
                row.day,
                row.seq,
                row.weekday,
                row.start_time,
                row.activity,
                row.class,
                row.target,
                row.state,
                row.minutes,
                row.depth,
            ])?;
        }
        Ok(())
    }

    /// Force flush buffered records to disk.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        Self::insert_days(&tx, &self.buffer.days)?;
        Self::insert_done(&tx, &self.buffer.done)?;
        Self::insert_sensors(&tx, &self.buffer.sensors)?;
        Self::insert_events(&tx, &self.buffer.events)?;
        tx.commit()?;
        debug!(days = self.buffer.days.len(), "flushed day logs");
        self.buffer.clear();
        Ok(())
    }

    /// Days stored for one run, in order.
    pub fn day_summaries(
        &mut self,
        persona_id: &str,
        run_id: u64,
    ) -> Result<Vec<DaySummary>, StorageError> {
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select day, weekday, done_count, sensor_count, event_count
             from days
             where persona_id = ? and run_id = ?
             order by day asc",
        )?;
        let mut rows = stmt.query(params![persona_id, run_id as i64])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            summaries.push(DaySummary {
                day: row.get::<_, i64>(0)? as u32,
                weekday: row.get(1)?,
                done: row.get::<_, i64>(2)? as usize,
                sensors: row.get::<_, i64>(3)? as usize,
                events: row.get::<_, i64>(4)? as usize,
            });
        }
        Ok(summaries)
    }

    /// Completed schedule of one day, in completion order.
    pub fn done_schedule(&mut self, key: &DayKey) -> Result<Vec<PlannedActivity>, StorageError> {
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select activity_name, start_time, end_time
             from done_schedule
             where persona_id = ? and run_id = ? and day = ?
             order by seq asc",
        )?;
        let mut rows = stmt.query(params![key.persona_id, key.run_id as i64, i64::from(key.day)])?;
        let mut schedule = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let start: String = row.get(1)?;
            let end: String = row.get(2)?;
            schedule.push(PlannedActivity::new(name, parse_time(&start)?, parse_time(&end)?));
        }
        Ok(schedule)
    }

    /// Write `done_schedule_day{n}.csv`, `record_day{n}.csv` and `event_record_day{n}.csv`
    /// for every stored day of a run. Returns the files written.
    pub fn export_csv(
        &mut self,
        persona_id: &str,
        run_id: u64,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, StorageError> {
        fs::create_dir_all(dir).map_err(|source| StorageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let days: Vec<u32> = self
            .day_summaries(persona_id, run_id)?
            .into_iter()
            .map(|summary| summary.day)
            .collect();

        let persona = quote_literal(persona_id);
        let run = run_id as i64;
        let mut written = Vec::with_capacity(days.len() * 3);
        for day in days {
            let filter = format!("persona_id = {persona} and run_id = {run} and day = {day}");
            let exports = [
                (
                    format!("done_schedule_day{day}.csv"),
                    format!(
                        "select activity_name, start_time, end_time from done_schedule \
                         where {filter} order by seq"
                    ),
                ),
                (
                    format!("record_day{day}.csv"),
                    format!(
                        "select weekday, time, sensor, sensor_state, device, device_state, activity \
                         from sensor_records where {filter} order by seq"
                    ),
                ),
                (
                    format!("event_record_day{day}.csv"),
                    format!(
                        "select weekday, start_time, activity, class, target, state, minutes, depth \
                         from event_records where {filter} order by seq"
                    ),
                ),
            ];
            for (file, query) in exports {
                let path = dir.join(file);
                let target = quote_literal(&path.to_string_lossy());
                self.conn
                    .execute_batch(&format!("copy ({query}) to {target} (header, delimiter ',')"))?;
                written.push(path);
            }
        }
        debug!(files = written.len(), dir = %dir.display(), "exported day logs");
        Ok(written)
    }
}

fn parse_time(text: &str) -> Result<MinuteOfDay, StorageError> {
    text.parse()
        .map_err(|_| StorageError::Corrupt(format!("time `{text}`")))
}

/// SQL string literal for statements that cannot take bound parameters.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!(%err, "failed to flush day logs on drop");
        }
    }
}

impl DayPersistence for Storage {
    fn on_day_complete(&mut self, batch: &DayBatch) {
        if let Err(err) = self.persist(batch) {
            error!(%err, day = batch.key.day, "failed to persist day log");
        }
    }
}

#[derive(Debug)]
enum StorageCommand {
    Persist(Box<DayBatch>),
    Flush,
    Shutdown,
}

/// Background writer: the engine hands batches over a channel and keeps simulating.
pub struct StoragePipeline {
    tx: mpsc::Sender<StorageCommand>,
    storage: Arc<Mutex<Storage>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StoragePipeline {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        Self::with_threshold(path, DEFAULT_DAY_BUFFER)
    }

    pub fn with_threshold(path: &str, days: usize) -> Result<Self, StorageError> {
        Self::from_storage(Storage::with_threshold(path, days)?)
    }

    fn from_storage(storage: Storage) -> Result<Self, StorageError> {
        let shared = Arc::new(Mutex::new(storage));
        let (tx, rx) = mpsc::channel::<StorageCommand>();
        let worker_storage = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("homesim-storage-worker".into())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        StorageCommand::Persist(batch) => {
                            let mut storage = match worker_storage.lock() {
                                Ok(storage) => storage,
                                Err(poisoned) => {
                                    warn!(day = batch.key.day, "storage mutex poisoned; recovering");
                                    poisoned.into_inner()
                                }
                            };
                            if let Err(err) = storage.persist(&batch) {
                                error!(%err, day = batch.key.day, "failed to persist day log");
                            }
                        }
                        StorageCommand::Flush => {
                            if let Ok(mut storage) = worker_storage.lock()
                                && let Err(err) = storage.flush()
                            {
                                error!(%err, "failed to flush storage");
                            }
                        }
                        StorageCommand::Shutdown => {
                            if let Ok(mut storage) = worker_storage.lock()
                                && let Err(err) = storage.flush()
                            {
                                error!(%err, "failed to flush storage on shutdown");
                            }
                            break;
                        }
                    }
                }
            })
            .map_err(|err| {
                StorageError::Worker(format!("failed to spawn storage worker thread: {err}"))
            })?;

        Ok(Self {
            tx,
            storage: shared,
            handle: Some(handle),
        })
    }

    /// Shared access to the underlying storage for queries and export.
    #[must_use]
    pub fn storage(&self) -> Arc<Mutex<Storage>> {
        Arc::clone(&self.storage)
    }

    /// Request an immediate flush of buffered records.
    pub fn flush(&self) {
        let _ = self.tx.send(StorageCommand::Flush);
    }
}

impl DayPersistence for StoragePipeline {
    fn on_day_complete(&mut self, batch: &DayBatch) {
        if self
            .tx
            .send(StorageCommand::Persist(Box::new(batch.clone())))
            .is_err()
        {
            error!(day = batch.key.day, "storage worker channel closed; day dropped");
        }
    }
}

impl Drop for StoragePipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(StorageCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            error!(?err, "storage worker thread panicked");
        }
    }
}

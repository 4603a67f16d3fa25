//! Floor-plan grid, named areas, and breadth-first pathfinding for homesim.
//!
//! A [`GridMap`] is rasterized once from a [`MapLayout`] and never mutated afterwards.
//! Path queries live in [`path_to_position`] and [`path_to_area`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod path;

pub use path::{path_to_area, path_to_position};

/// Errors raised while rasterizing a floor plan.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    /// The layout rectangle cannot describe a 0-based grid.
    #[error("malformed map bounds: {0}")]
    MalformedBounds(&'static str),
    /// A marker or area rectangle falls outside the layout rectangle.
    #[error("{kind} `{name}` at ({x}, {y}) lies outside the map")]
    OutOfBounds {
        kind: &'static str,
        name: String,
        x: i32,
        y: i32,
    },
    /// Sensor names must identify a door or a motion sensor.
    #[error("no such sensor type: `{0}`")]
    UnknownSensorType(String),
}

/// Integer grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[must_use]
    const fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Whether `other` lies within one king move (|dx| <= 1 and |dy| <= 1) of `self`.
    #[must_use]
    pub const fn touches(self, other: Cell) -> bool {
        (self.x - other.x).abs() <= 1 && (self.y - other.y).abs() <= 1
    }
}

/// Rasterized classification of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellKind {
    #[default]
    Blocked,
    Free,
    DoorSensor,
    MotionSensor,
    ControlDevice,
    Facility,
}

impl CellKind {
    /// Obstacles and control devices cannot be walked through.
    #[must_use]
    pub const fn is_walkable(self) -> bool {
        !matches!(self, CellKind::Blocked | CellKind::ControlDevice)
    }
}

/// Inclusive axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub xmin: i32,
    pub xhigh: i32,
    pub ymin: i32,
    pub yhigh: i32,
}

impl Rect {
    #[must_use]
    pub const fn new(xmin: i32, xhigh: i32, ymin: i32, yhigh: i32) -> Self {
        Self {
            xmin,
            xhigh,
            ymin,
            yhigh,
        }
    }

    #[must_use]
    pub const fn contains(&self, cell: Cell) -> bool {
        cell.x >= self.xmin && cell.x <= self.xhigh && cell.y >= self.ymin && cell.y <= self.yhigh
    }

    fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (self.xmin..=self.xhigh).flat_map(move |x| (self.ymin..=self.yhigh).map(move |y| Cell::new(x, y)))
    }
}

/// Named region made of one or more rectangles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub name: String,
    pub rects: Vec<Rect>,
}

impl Area {
    #[must_use]
    pub fn new(name: impl Into<String>, rects: Vec<Rect>) -> Self {
        Self {
            name: name.into(),
            rects,
        }
    }

    /// A cell is inside the area if any sub-rectangle contains it.
    #[must_use]
    pub fn contains(&self, cell: Cell) -> bool {
        self.rects.iter().any(|rect| rect.contains(cell))
    }
}

/// Named point feature (sensor, control device, facility).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub cell: Cell,
}

impl Marker {
    #[must_use]
    pub fn new(name: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            name: name.into(),
            cell: Cell::new(x, y),
        }
    }
}

/// Binary sensor families recognised by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Door,
    Motion,
}

impl SensorKind {
    /// Classify a sensor by its configured name.
    pub fn from_name(name: &str) -> Result<Self, GridError> {
        if name.contains("Door") {
            Ok(SensorKind::Door)
        } else if name.contains("Motion") {
            Ok(SensorKind::Motion)
        } else {
            Err(GridError::UnknownSensorType(name.to_string()))
        }
    }

    const fn cell_kind(self) -> CellKind {
        match self {
            SensorKind::Door => CellKind::DoorSensor,
            SensorKind::Motion => CellKind::MotionSensor,
        }
    }
}

/// Sensor placed on the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sensor {
    pub name: String,
    pub cell: Cell,
    pub kind: SensorKind,
}

/// Unrasterized floor plan as supplied by configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapLayout {
    /// Whole-map rectangle; must start at the origin.
    pub bounds: Option<Rect>,
    pub areas: Vec<Area>,
    pub sensors: Vec<Marker>,
    pub devices: Vec<Marker>,
    pub facilities: Vec<Marker>,
}

/// Immutable walkability/feature grid with named areas.
#[derive(Debug, Clone)]
pub struct GridMap {
    width: i32,
    height: i32,
    cells: Vec<CellKind>,
    areas: Vec<Area>,
    sensors: Vec<Sensor>,
    devices: Vec<Marker>,
    facilities: Vec<Marker>,
}

impl GridMap {
    /// Rasterize a layout. Stamps are applied in a fixed order (areas, sensors, control
    /// devices, facilities); later stamps overwrite earlier ones.
    pub fn build(layout: MapLayout) -> Result<Self, GridError> {
        let bounds = layout
            .bounds
            .ok_or(GridError::MalformedBounds("layout rectangle is missing"))?;
        if bounds.xmin != 0 || bounds.ymin != 0 {
            return Err(GridError::MalformedBounds("map origin must be (0, 0)"));
        }
        if bounds.xhigh < bounds.xmin || bounds.yhigh < bounds.ymin {
            return Err(GridError::MalformedBounds(
                "upper bounds must not be below lower bounds",
            ));
        }

        let width = bounds.xhigh + 1;
        let height = bounds.yhigh + 1;
        let mut map = Self {
            width,
            height,
            cells: vec![CellKind::Blocked; (width as usize) * (height as usize)],
            areas: Vec::with_capacity(layout.areas.len()),
            sensors: Vec::with_capacity(layout.sensors.len()),
            devices: layout.devices,
            facilities: layout.facilities,
        };

        for area in &layout.areas {
            for rect in &area.rects {
                for corner in [Cell::new(rect.xmin, rect.ymin), Cell::new(rect.xhigh, rect.yhigh)] {
                    map.check_bounds("area", &area.name, corner)?;
                }
                for cell in rect.cells() {
                    map.stamp(cell, CellKind::Free);
                }
            }
        }
        map.areas = layout.areas;

        for marker in layout.sensors {
            let kind = SensorKind::from_name(&marker.name)?;
            map.check_bounds("sensor", &marker.name, marker.cell)?;
            map.stamp(marker.cell, kind.cell_kind());
            map.sensors.push(Sensor {
                name: marker.name,
                cell: marker.cell,
                kind,
            });
        }

        let devices = std::mem::take(&mut map.devices);
        for marker in &devices {
            map.check_bounds("control device", &marker.name, marker.cell)?;
            map.stamp(marker.cell, CellKind::ControlDevice);
        }
        map.devices = devices;

        let facilities = std::mem::take(&mut map.facilities);
        for marker in &facilities {
            map.check_bounds("facility", &marker.name, marker.cell)?;
            map.stamp(marker.cell, CellKind::Facility);
        }
        map.facilities = facilities;

        Ok(map)
    }

    #[must_use]
    pub const fn width(&self) -> i32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> i32 {
        self.height
    }

    #[inline]
    pub(crate) fn index_of(&self, cell: Cell) -> Option<usize> {
        if cell.x >= 0 && cell.x < self.width && cell.y >= 0 && cell.y < self.height {
            Some((cell.y as usize) * (self.width as usize) + (cell.x as usize))
        } else {
            None
        }
    }

    /// Inverse of [`GridMap::index_of`].
    #[inline]
    pub(crate) fn cell_of(&self, idx: usize) -> Option<Cell> {
        if idx >= self.cells.len() {
            return None;
        }
        let width = self.width as usize;
        Some(Cell::new((idx % width) as i32, (idx / width) as i32))
    }

    #[inline]
    pub(crate) fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn check_bounds(&self, kind: &'static str, name: &str, cell: Cell) -> Result<(), GridError> {
        match self.index_of(cell) {
            Some(_) => Ok(()),
            None => Err(GridError::OutOfBounds {
                kind,
                name: name.to_string(),
                x: cell.x,
                y: cell.y,
            }),
        }
    }

    fn stamp(&mut self, cell: Cell, kind: CellKind) {
        if let Some(idx) = self.index_of(cell) {
            self.cells[idx] = kind;
        }
    }

    /// Cell classification, `None` when out of bounds.
    #[must_use]
    pub fn kind(&self, cell: Cell) -> Option<CellKind> {
        self.index_of(cell).map(|idx| self.cells[idx])
    }

    /// Out-of-bounds cells are never walkable.
    #[must_use]
    pub fn is_walkable(&self, cell: Cell) -> bool {
        self.kind(cell).is_some_and(CellKind::is_walkable)
    }

    #[must_use]
    pub fn area(&self, name: &str) -> Option<&Area> {
        self.areas.iter().find(|area| area.name == name)
    }

    #[must_use]
    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    /// False for unknown area names.
    #[must_use]
    pub fn is_in_area(&self, cell: Cell, area: &str) -> bool {
        self.area(area).is_some_and(|area| area.contains(cell))
    }

    #[must_use]
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Sensors within king-move adjacency of `cell`, in declaration order.
    pub fn sensors_near(&self, cell: Cell) -> impl Iterator<Item = &Sensor> + '_ {
        self.sensors.iter().filter(move |sensor| sensor.cell.touches(cell))
    }

    #[must_use]
    pub fn device(&self, name: &str) -> Option<Cell> {
        self.devices
            .iter()
            .find(|marker| marker.name == name)
            .map(|marker| marker.cell)
    }

    #[must_use]
    pub fn facility(&self, name: &str) -> Option<Cell> {
        self.facilities
            .iter()
            .find(|marker| marker.name == name)
            .map(|marker| marker.cell)
    }

    /// Resolve a movement target, preferring facilities over control devices.
    #[must_use]
    pub fn landmark(&self, name: &str) -> Option<Cell> {
        self.facility(name).or_else(|| self.device(name))
    }

    pub(crate) fn neighbors(&self, cell: Cell) -> impl Iterator<Item = Cell> + '_ {
        path::DIRECTIONS
            .iter()
            .map(move |&(dx, dy)| cell.offset(dx, dy))
            .filter(|next| self.is_walkable(*next))
    }
}

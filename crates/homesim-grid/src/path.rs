//! Breadth-first shortest paths over 4-directional adjacency.

use std::collections::VecDeque;

use crate::{Cell, GridMap};

/// Expansion order: up, right, down, left (applied to `(x, y)`).
pub(crate) const DIRECTIONS: [(i32, i32); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];

/// Per-search scratch state indexed by cell. Visitation order doubles as the tie-break key.
struct Search {
    parent: Vec<Option<usize>>,
    distance: Vec<Option<u32>>,
    visited: Vec<usize>,
}

impl Search {
    /// Explore from `from` until `stop` accepts a dequeued cell or the frontier drains.
    /// Returns the accepted cell's index, if any.
    fn run(&mut self, map: &GridMap, from: Cell, mut stop: impl FnMut(Cell) -> bool) -> Option<usize> {
        let start = map.index_of(from)?;
        let mut queue = VecDeque::new();
        self.distance[start] = Some(0);
        self.visited.push(start);
        queue.push_back((start, from));

        while let Some((idx, cell)) = queue.pop_front() {
            if stop(cell) {
                return Some(idx);
            }
            let next_distance = self.distance[idx].unwrap_or(0) + 1;
            for next in map.neighbors(cell) {
                let Some(next_idx) = map.index_of(next) else {
                    continue;
                };
                if self.distance[next_idx].is_some() {
                    continue;
                }
                self.distance[next_idx] = Some(next_distance);
                self.parent[next_idx] = Some(idx);
                self.visited.push(next_idx);
                queue.push_back((next_idx, next));
            }
        }
        None
    }

    fn new(map: &GridMap) -> Self {
        let len = map.cell_count();
        Self {
            parent: vec![None; len],
            distance: vec![None; len],
            visited: Vec::new(),
        }
    }

    /// Walk parent pointers back from `target` and return the path start-first.
    fn reconstruct(&self, map: &GridMap, target: usize) -> Vec<Cell> {
        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(idx) = cursor {
            if let Some(cell) = map.cell_of(idx) {
                path.push(cell);
            }
            cursor = self.parent[idx];
        }
        path.reverse();
        path
    }
}

/// Shortest path from `from` to `to`, both inclusive.
///
/// Empty when either endpoint is not walkable or `to` is unreachable; never partial.
#[must_use]
pub fn path_to_position(map: &GridMap, from: Cell, to: Cell) -> Vec<Cell> {
    if !map.is_walkable(from) || !map.is_walkable(to) {
        return Vec::new();
    }
    if from == to {
        return vec![from];
    }

    let mut search = Search::new(map);
    match search.run(map, from, |cell| cell == to) {
        Some(target) => search.reconstruct(map, target),
        None => Vec::new(),
    }
}

/// Shortest path from `from` to the nearest cell of the named area.
///
/// Returns `[from]` when already inside. Otherwise every reachable cell is explored and the
/// in-area cell with the smallest `(distance, visitation order)` is chosen. Empty when the
/// area is unknown, `from` is not walkable, or no reachable cell lies in the area.
#[must_use]
pub fn path_to_area(map: &GridMap, from: Cell, area: &str) -> Vec<Cell> {
    let Some(area) = map.area(area) else {
        return Vec::new();
    };
    if area.contains(from) {
        return vec![from];
    }
    if !map.is_walkable(from) {
        return Vec::new();
    }

    let mut search = Search::new(map);
    search.run(map, from, |_| false);

    let nearest = search
        .visited
        .iter()
        .enumerate()
        .filter(|(_, idx)| map.cell_of(**idx).is_some_and(|cell| area.contains(cell)))
        .filter_map(|(order, idx)| search.distance[*idx].map(|distance| (distance, order, *idx)))
        .min_by_key(|(distance, order, _)| (*distance, *order));

    match nearest {
        Some((_, _, target)) => search.reconstruct(map, target),
        None => Vec::new(),
    }
}

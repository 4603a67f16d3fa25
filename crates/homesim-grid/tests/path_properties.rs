use homesim_grid::{Area, Cell, GridMap, MapLayout, Marker, Rect, path_to_area, path_to_position};

const SIZE: i32 = 8;
const UNREACHABLE: u32 = u32::MAX;

/// 8x8 room with a scattered set of control devices and a walled-off pocket at (7, 7).
fn cluttered_map() -> GridMap {
    let mut devices = Vec::new();
    for x in 0..SIZE {
        for y in 0..SIZE {
            if (x * 7 + y * 13) % 5 == 0 && !matches!((x, y), (0, 1) | (7, 7)) {
                devices.push(Marker::new(format!("Device{x}_{y}"), x, y));
            }
        }
    }
    devices.push(Marker::new("WallA", 6, 7));
    devices.push(Marker::new("WallB", 7, 6));
    devices.push(Marker::new("WallC", 6, 6));

    GridMap::build(MapLayout {
        bounds: Some(Rect::new(0, SIZE - 1, 0, SIZE - 1)),
        areas: vec![
            Area::new("Room", vec![Rect::new(0, SIZE - 1, 0, SIZE - 1)]),
            Area::new("Nook", vec![Rect::new(5, 6, 1, 2), Rect::new(2, 2, 5, 6)]),
            Area::new("Pocket", vec![Rect::new(7, 7, 7, 7)]),
        ],
        sensors: Vec::new(),
        devices,
        facilities: Vec::new(),
    })
    .expect("map")
}

fn cells() -> Vec<Cell> {
    (0..SIZE)
        .flat_map(|x| (0..SIZE).map(move |y| Cell::new(x, y)))
        .collect()
}

/// All-pairs distances by Floyd-Warshall, independent of the BFS under test.
fn all_pairs(map: &GridMap) -> Vec<Vec<u32>> {
    let cells = cells();
    let n = cells.len();
    let mut dist = vec![vec![UNREACHABLE; n]; n];
    for (i, a) in cells.iter().enumerate() {
        if !map.is_walkable(*a) {
            continue;
        }
        dist[i][i] = 0;
        for (j, b) in cells.iter().enumerate() {
            let manhattan = (a.x - b.x).abs() + (a.y - b.y).abs();
            if manhattan == 1 && map.is_walkable(*b) {
                dist[i][j] = 1;
            }
        }
    }
    for k in 0..n {
        for i in 0..n {
            if dist[i][k] == UNREACHABLE {
                continue;
            }
            for j in 0..n {
                if dist[k][j] == UNREACHABLE {
                    continue;
                }
                let through = dist[i][k] + dist[k][j];
                if through < dist[i][j] {
                    dist[i][j] = through;
                }
            }
        }
    }
    dist
}

fn assert_contiguous(map: &GridMap, path: &[Cell]) {
    for pair in path.windows(2) {
        let step = (pair[0].x - pair[1].x).abs() + (pair[0].y - pair[1].y).abs();
        assert_eq!(step, 1, "non-adjacent step in {path:?}");
    }
    assert!(path.iter().all(|cell| map.is_walkable(*cell)));
}

#[test]
fn position_paths_match_reference_distances() {
    let map = cluttered_map();
    let cells = cells();
    let dist = all_pairs(&map);

    for (i, from) in cells.iter().enumerate() {
        for (j, to) in cells.iter().enumerate() {
            let path = path_to_position(&map, *from, *to);
            if !map.is_walkable(*from) || !map.is_walkable(*to) || dist[i][j] == UNREACHABLE {
                assert!(path.is_empty(), "{from:?} -> {to:?} should be empty");
                continue;
            }
            assert_eq!(path.len() as u32, dist[i][j] + 1, "{from:?} -> {to:?}");
            assert_eq!(path.first(), Some(from));
            assert_eq!(path.last(), Some(to));
            assert_contiguous(&map, &path);
        }
    }
}

#[test]
fn area_paths_reach_the_nearest_member() {
    let map = cluttered_map();
    let cells = cells();
    let dist = all_pairs(&map);

    for area in ["Room", "Nook", "Pocket"] {
        for (i, from) in cells.iter().enumerate() {
            let path = path_to_area(&map, *from, area);
            if map.is_in_area(*from, area) {
                assert_eq!(path, vec![*from]);
                continue;
            }
            let nearest = cells
                .iter()
                .enumerate()
                .filter(|(_, cell)| map.is_in_area(**cell, area))
                .map(|(j, _)| dist[i][j])
                .min()
                .unwrap_or(UNREACHABLE);
            if !map.is_walkable(*from) || nearest == UNREACHABLE {
                assert!(path.is_empty(), "{from:?} -> {area} should be empty");
                continue;
            }
            assert_eq!(path.len() as u32, nearest + 1, "{from:?} -> {area}");
            assert_eq!(path.first(), Some(from));
            let last = path.last().copied().expect("non-empty path");
            assert!(map.is_in_area(last, area));
            assert_contiguous(&map, &path);
        }
    }
}

#[test]
fn walled_pocket_is_unreachable() {
    let map = cluttered_map();
    assert!(map.is_walkable(Cell::new(7, 7)));
    assert!(path_to_position(&map, Cell::new(0, 1), Cell::new(7, 7)).is_empty());
    assert!(path_to_area(&map, Cell::new(0, 1), "Pocket").is_empty());
    assert_eq!(path_to_area(&map, Cell::new(7, 7), "Pocket"), vec![Cell::new(7, 7)]);
}

#[test]
fn repeated_queries_are_deterministic() {
    let map = cluttered_map();
    let first = path_to_area(&map, Cell::new(0, 1), "Nook");
    for _ in 0..8 {
        assert_eq!(path_to_area(&map, Cell::new(0, 1), "Nook"), first);
    }
}

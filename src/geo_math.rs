use crate::geo_types::Coordinate;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle (haversine) distance in kilometres. Altitude is ignored.
/// NaN inputs propagate NaN.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h just past 1 for antipodal points. Comparison keeps NaN intact.
    let h = if h > 1.0 { 1.0 } else { h };
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Sum of consecutive leg distances in kilometres.
pub fn path_length(points: &[Coordinate]) -> f64 {
    points.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Greedy nearest-neighbour ordering starting at `points[0]`.
///
/// Each step appends the unvisited point closest to the current end of the
/// path; distance ties go to the earliest point in input order. This is a
/// heuristic, not a shortest-tour solver, and runs in O(n²).
pub fn nearest_neighbor_order(points: &[Coordinate]) -> Vec<Coordinate> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut visited = vec![false; points.len()];
    let mut ordered = Vec::with_capacity(points.len());
    let mut current = 0;
    visited[0] = true;
    ordered.push(points[0]);

    while ordered.len() < points.len() {
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in points.iter().enumerate() {
            if visited[idx] {
                continue;
            }
            let d = distance(points[current], *candidate);
            match best {
                None => best = Some((idx, d)),
                Some((_, best_d)) if d < best_d => best = Some((idx, d)),
                _ => {}
            }
        }
        let Some((next, _)) = best else { break };
        visited[next] = true;
        ordered.push(points[next]);
        current = next;
    }

    ordered
}

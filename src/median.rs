//! Geometric median via Weiszfeld iteration.
//!
//! The geometric median minimises the sum of Euclidean distances to the input
//! points (not the sum of squares), so a single far-away participant pulls the
//! meetpoint much less than it would pull a centroid. Distances are measured in
//! plain (lat, lng) degree space.

use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::LatLng;

/// Points closer than this to the current estimate count as coincident.
pub const COINCIDENCE_EPSILON: f64 = 1e-12;

/// Tunables for the Weiszfeld iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedianConfig {
    /// Iteration cap. Default: 80
    pub max_iterations: usize,
    /// Stop once successive estimates move less than this. Default: 1e-6
    pub tolerance: f64,
}

impl Default for MedianConfig {
    fn default() -> Self {
        Self {
            max_iterations: 80,
            tolerance: 1e-6,
        }
    }
}

/// Geometric median with default tunables.
///
/// # Example
/// ```
/// use rendezvous_planner::{median, LatLng};
/// assert_eq!(median::solve(&[]), None);
/// assert_eq!(median::solve(&[LatLng::new(1.0, 2.0)]), Some(LatLng::new(1.0, 2.0)));
/// ```
pub fn solve(points: &[LatLng]) -> Option<LatLng> {
    solve_with(points, &MedianConfig::default())
}

/// Geometric median with explicit tunables.
///
/// Returns `None` for an empty input and the point itself for a single input.
pub fn solve_with(points: &[LatLng], config: &MedianConfig) -> Option<LatLng> {
    match points {
        [] => return None,
        [single] => return Some(*single),
        _ => {}
    }

    let coords: Vec<Coord<f64>> = points.iter().map(|&p| p.into()).collect();
    let mut current = mean(&coords);

    for _ in 0..config.max_iterations {
        let mut numerator = Coord { x: 0.0, y: 0.0 };
        let mut denominator = 0.0;

        for &point in &coords {
            let distance = euclidean(current, point);
            // A point sitting on the estimate would divide by ~0; give it unit weight
            let weight = if distance < COINCIDENCE_EPSILON {
                1.0
            } else {
                1.0 / distance
            };
            numerator = numerator + point * weight;
            denominator += weight;
        }

        if denominator == 0.0 {
            return Some(current.into());
        }

        let next = numerator / denominator;
        if euclidean(next, current) < config.tolerance {
            return Some(next.into());
        }
        current = next;
    }

    Some(current.into())
}

/// Sum of Euclidean (degree-space) distances from `candidate` to every point.
pub fn sum_of_distances(points: &[LatLng], candidate: LatLng) -> f64 {
    points
        .iter()
        .map(|&p| euclidean(p.into(), candidate.into()))
        .sum()
}

/// Arithmetic mean of the points, `None` when empty.
pub fn centroid(points: &[LatLng]) -> Option<LatLng> {
    if points.is_empty() {
        return None;
    }
    let coords: Vec<Coord<f64>> = points.iter().map(|&p| p.into()).collect();
    Some(mean(&coords).into())
}

fn mean(coords: &[Coord<f64>]) -> Coord<f64> {
    let sum = coords
        .iter()
        .fold(Coord { x: 0.0, y: 0.0 }, |acc, &c| acc + c);
    sum / coords.len() as f64
}

#[inline]
fn euclidean(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let d = a - b;
    d.x.hypot(d.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng)
    }

    #[test]
    fn test_empty_and_single() {
        assert_eq!(solve(&[]), None);
        assert_eq!(solve(&[p(0.0, 0.0)]), Some(p(0.0, 0.0)));
        assert_eq!(solve(&[p(55.7, 37.6)]), Some(p(55.7, 37.6)));
    }

    #[test]
    fn test_coincident_points_do_not_produce_nan() {
        let result = solve(&[p(0.0, 0.0), p(0.0, 0.0)]).unwrap();
        assert!(result.is_valid());
        assert_eq!(result, p(0.0, 0.0));

        let result = solve(&[p(1.5, 2.5), p(1.5, 2.5), p(1.5, 2.5)]).unwrap();
        assert_eq!(result, p(1.5, 2.5));
    }

    #[test]
    fn test_triangle_is_deterministic() {
        let points = [p(0.0, 0.0), p(10.0, 0.0), p(0.0, 10.0)];
        let first = solve(&points).unwrap();
        for _ in 0..5 {
            assert_eq!(solve(&points).unwrap(), first);
        }
        // Fermat point of a right isosceles triangle lies inside, off the centroid
        assert!(first.lat > 0.0 && first.lng > 0.0);
        assert!(first.lat < 10.0 / 3.0 && first.lng < 10.0 / 3.0);
    }

    #[test]
    fn test_median_beats_mean() {
        let sets: Vec<Vec<LatLng>> = vec![
            vec![p(0.0, 0.0), p(10.0, 0.0), p(0.0, 10.0)],
            vec![p(55.0, 37.0), p(55.1, 37.1), p(55.02, 37.5), p(56.0, 38.0)],
            vec![p(0.0, 0.0), p(0.1, 0.0), p(0.0, 0.1), p(50.0, 50.0)],
            vec![p(-10.0, 3.0), p(4.0, -7.0)],
        ];
        for points in sets {
            let median = solve(&points).unwrap();
            let mean = centroid(&points).unwrap();
            assert!(
                sum_of_distances(&points, median) <= sum_of_distances(&points, mean) + 1e-9,
                "median worse than mean for {:?}",
                points
            );
        }
    }

    #[test]
    fn test_outlier_pulls_less_than_centroid() {
        let points = [p(0.0, 0.0), p(0.1, 0.0), p(0.0, 0.1), p(50.0, 50.0)];
        let median = solve(&points).unwrap();
        let mean = centroid(&points).unwrap();
        assert!(median.lat < mean.lat);
        assert!(median.lat < 1.0);
    }

    #[test]
    fn test_collinear_points_converge_to_middle() {
        let points = [p(0.0, 0.0), p(1.0, 0.0), p(10.0, 0.0)];
        let median = solve(&points).unwrap();
        assert!((median.lat - 1.0).abs() < 1e-2);
        assert!(median.lng.abs() < 1e-9);
    }

    #[test]
    fn test_iteration_cap_is_respected() {
        let points = [p(0.0, 0.0), p(10.0, 0.0), p(0.0, 10.0)];
        let config = MedianConfig {
            max_iterations: 0,
            tolerance: 1e-6,
        };
        // No iterations: the estimate stays at the mean
        let result = solve_with(&points, &config).unwrap();
        assert_eq!(result, centroid(&points).unwrap());
    }
}

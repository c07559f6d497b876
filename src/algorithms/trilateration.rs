//! Range-only trilateration on the floor plane
//!
//! Picks the three strongest anchors by RSSI and minimises
//! `Σ (‖anchor_i − p‖ − d_i)²` with a damped Gauss-Newton
//! (Levenberg-Marquardt) iteration started at the anchors' centroid.

use nalgebra::{DMatrix, DVector, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Position, MIN_ANCHORS};

/// Smallest diagonal used when damping the normal equations
const MIN_DIAGONAL: f64 = 1e-9;
/// Damping beyond which no descent step exists and the estimate is final
const MAX_DAMPING: f64 = 1e12;
/// Cost below which the fit is treated as exact
const EXACT_FIT_COST: f64 = 1e-20;
/// Lower bound on `det(JᵀJ) / trace(JᵀJ)²` at the final estimate, roughly the
/// inverse condition number of the normal matrix
const MIN_CONDITIONING: f64 = 1e-8;

/// A range from one anchor whose position is known
#[derive(Debug, Clone, PartialEq)]
pub struct RangeObservation {
    pub anchor_id: String,
    pub anchor: Position,
    pub distance: f64,
    pub rssi: i32,
}

/// Solver tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum outer iterations before reporting non-convergence
    pub max_iterations: usize,
    /// Relative step size that counts as converged
    pub step_tolerance: f64,
    /// Gradient norm that counts as converged
    pub gradient_tolerance: f64,
    /// Initial Levenberg-Marquardt damping
    pub initial_damping: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            step_tolerance: 1e-10,
            gradient_tolerance: 1e-10,
            initial_damping: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrilaterationError {
    #[error("need {required} anchors with known positions, have {available}")]
    InsufficientAnchors { available: usize, required: usize },
    #[error("non-finite input from anchor {anchor_id}")]
    NonFiniteInput { anchor_id: String },
    #[error("solver did not converge after {iterations} iterations (cost {cost})")]
    NoConvergence { iterations: usize, cost: f64 },
    #[error("solver produced a non-finite estimate")]
    NonFiniteEstimate,
    #[error("anchor geometry does not determine a position")]
    DegenerateGeometry,
}

/// Raw position fix and fit diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct TrilaterationSolution {
    pub position: Position,
    /// Sum of squared range residuals at the solution
    pub residual_cost: f64,
    pub iterations: usize,
    /// Anchors that took part, strongest first
    pub anchor_ids: Vec<String>,
}

/// Least-squares trilateration engine
#[derive(Debug, Clone, Default)]
pub struct Trilateration {
    config: SolverConfig,
}

impl Trilateration {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// The three observations with the strongest signal. The sort is stable,
    /// so ties keep input order.
    pub fn select_strongest(observations: &[RangeObservation]) -> Vec<&RangeObservation> {
        let mut ranked: Vec<&RangeObservation> = observations.iter().collect();
        ranked.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        ranked.truncate(MIN_ANCHORS);
        ranked
    }

    /// Estimate a position from the three strongest observations
    pub fn solve(&self, observations: &[RangeObservation]) -> Result<TrilaterationSolution, TrilaterationError> {
        if observations.len() < MIN_ANCHORS {
            return Err(TrilaterationError::InsufficientAnchors {
                available: observations.len(),
                required: MIN_ANCHORS,
            });
        }

        let chosen = Self::select_strongest(observations);
        if let Some(bad) = chosen
            .iter()
            .find(|o| !o.anchor.is_finite() || !o.distance.is_finite())
        {
            return Err(TrilaterationError::NonFiniteInput {
                anchor_id: bad.anchor_id.clone(),
            });
        }

        let anchors: Vec<Vector2<f64>> = chosen.iter().map(|o| o.anchor.to_vector()).collect();
        let ranges: Vec<f64> = chosen.iter().map(|o| o.distance).collect();

        let (estimate, cost, iterations) = self.levenberg_marquardt(&anchors, &ranges)?;
        if !estimate.x.is_finite() || !estimate.y.is_finite() || !cost.is_finite() {
            return Err(TrilaterationError::NonFiniteEstimate);
        }
        // A stationary point of a rank-deficient fit is not a position fix
        if !Self::is_well_conditioned(&anchors, &ranges, &estimate) {
            return Err(TrilaterationError::DegenerateGeometry);
        }

        Ok(TrilaterationSolution {
            position: Position::from_vector(&estimate),
            residual_cost: cost,
            iterations,
            anchor_ids: chosen.iter().map(|o| o.anchor_id.clone()).collect(),
        })
    }

    /// Returns (estimate, final cost, iterations used)
    fn levenberg_marquardt(
        &self,
        anchors: &[Vector2<f64>],
        ranges: &[f64],
    ) -> Result<(Vector2<f64>, f64, usize), TrilaterationError> {
        let centroid = anchors.iter().fold(Vector2::<f64>::zeros(), |acc, a| acc + a) / anchors.len() as f64;

        let mut estimate = centroid;
        let (mut residuals, mut jacobian) = Self::compute_residuals_and_jacobian(anchors, ranges, &estimate);
        let mut cost = residuals.norm_squared();
        let mut lambda = self.config.initial_damping;

        for iteration in 1..=self.config.max_iterations {
            if cost < EXACT_FIT_COST {
                return Ok((estimate, cost, iteration));
            }

            let gradient = jacobian.transpose() * &residuals;
            if gradient.norm() < self.config.gradient_tolerance {
                return Ok((estimate, cost, iteration));
            }

            let jt_j = jacobian.transpose() * &jacobian;
            let mut accepted = false;

            while lambda <= MAX_DAMPING {
                let mut normal = jt_j.clone();
                for i in 0..2 {
                    normal[(i, i)] += lambda * jt_j[(i, i)].max(MIN_DIAGONAL);
                }

                let Some(cholesky) = normal.cholesky() else {
                    lambda *= 10.0;
                    continue;
                };
                let step = cholesky.solve(&(-&gradient));
                let candidate = estimate + Vector2::new(step[0], step[1]);

                let (new_residuals, new_jacobian) =
                    Self::compute_residuals_and_jacobian(anchors, ranges, &candidate);
                let new_cost = new_residuals.norm_squared();

                if new_cost.is_finite() && new_cost < cost {
                    let step_norm = step.norm();
                    estimate = candidate;
                    residuals = new_residuals;
                    jacobian = new_jacobian;
                    cost = new_cost;
                    lambda = (lambda * 0.1).max(1e-12);
                    accepted = true;

                    if step_norm < self.config.step_tolerance * (1.0 + estimate.norm()) {
                        return Ok((estimate, cost, iteration));
                    }
                    break;
                }

                lambda *= 10.0;
            }

            // No damping level reduces the cost: we are at a stationary point
            if !accepted {
                return Ok((estimate, cost, iteration));
            }
        }

        Err(TrilaterationError::NoConvergence {
            iterations: self.config.max_iterations,
            cost,
        })
    }

    /// Whether the undamped normal matrix at `estimate` constrains both axes
    fn is_well_conditioned(anchors: &[Vector2<f64>], ranges: &[f64], estimate: &Vector2<f64>) -> bool {
        let (_, jacobian) = Self::compute_residuals_and_jacobian(anchors, ranges, estimate);
        let jt_j = jacobian.transpose() * &jacobian;
        let trace = jt_j.trace();
        trace > 0.0 && jt_j.determinant() / (trace * trace) >= MIN_CONDITIONING
    }

    /// Range residuals `‖p − a_i‖ − d_i` and their Jacobian w.r.t. p
    fn compute_residuals_and_jacobian(
        anchors: &[Vector2<f64>],
        ranges: &[f64],
        estimate: &Vector2<f64>,
    ) -> (DVector<f64>, DMatrix<f64>) {
        let n = anchors.len();
        let mut residuals = DVector::zeros(n);
        let mut jacobian = DMatrix::zeros(n, 2);

        for (i, (anchor, range)) in anchors.iter().zip(ranges).enumerate() {
            let diff = estimate - anchor;
            let distance = diff.norm();
            residuals[i] = distance - range;

            // Gradient is undefined on top of an anchor; leave the row zero
            if distance > 1e-12 {
                jacobian[(i, 0)] = diff.x / distance;
                jacobian[(i, 1)] = diff.y / distance;
            }
        }

        (residuals, jacobian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn observation(id: &str, x: f64, y: f64, truth: Position, rssi: i32) -> RangeObservation {
        let anchor = Position::new(x, y);
        RangeObservation {
            anchor_id: id.to_string(),
            anchor,
            distance: anchor.distance_to(&truth),
            rssi,
        }
    }

    #[test]
    fn test_exact_ranges_recover_position() {
        let truth = Position::new(15.0, 15.0);
        let observations = vec![
            observation("ANCHOR_1", 0.0, 0.0, truth, -40),
            observation("ANCHOR_2", 50.0, 0.0, truth, -60),
            observation("ANCHOR_3", 50.0, 50.0, truth, -70),
        ];

        let solution = Trilateration::default().solve(&observations).unwrap();
        assert_abs_diff_eq!(solution.position.x, 15.0, epsilon = 1e-6);
        assert_abs_diff_eq!(solution.position.y, 15.0, epsilon = 1e-6);
        assert!(solution.residual_cost < 1e-10);
    }

    #[test]
    fn test_uses_three_strongest_of_four() {
        let truth = Position::new(30.0, 12.0);
        let mut observations = vec![
            observation("ANCHOR_1", 0.0, 0.0, truth, -40),
            observation("ANCHOR_2", 50.0, 0.0, truth, -60),
            observation("ANCHOR_3", 50.0, 50.0, truth, -90),
            observation("ANCHOR_4", 0.0, 50.0, truth, -55),
        ];
        // A bogus range on the weakest anchor must not matter
        observations[2].distance = 1000.0;

        let solution = Trilateration::default().solve(&observations).unwrap();
        assert_eq!(solution.anchor_ids, vec!["ANCHOR_1", "ANCHOR_4", "ANCHOR_2"]);
        assert_abs_diff_eq!(solution.position.x, 30.0, epsilon = 1e-6);
        assert_abs_diff_eq!(solution.position.y, 12.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rssi_ties_keep_input_order() {
        let truth = Position::new(10.0, 10.0);
        let observations = vec![
            observation("A", 0.0, 0.0, truth, -50),
            observation("B", 50.0, 0.0, truth, -50),
            observation("C", 50.0, 50.0, truth, -50),
            observation("D", 0.0, 50.0, truth, -50),
        ];

        let chosen: Vec<&str> = Trilateration::select_strongest(&observations)
            .iter()
            .map(|o| o.anchor_id.as_str())
            .collect();
        assert_eq!(chosen, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_fewer_than_three_anchors() {
        let truth = Position::new(10.0, 10.0);
        let observations = vec![
            observation("A", 0.0, 0.0, truth, -50),
            observation("B", 50.0, 0.0, truth, -50),
        ];
        assert_eq!(
            Trilateration::default().solve(&observations),
            Err(TrilaterationError::InsufficientAnchors { available: 2, required: 3 })
        );
    }

    #[test]
    fn test_non_finite_range_is_rejected() {
        let truth = Position::new(10.0, 10.0);
        let mut observations = vec![
            observation("A", 0.0, 0.0, truth, -50),
            observation("B", 50.0, 0.0, truth, -50),
            observation("C", 0.0, 50.0, truth, -50),
        ];
        observations[1].distance = f64::NAN;

        assert_eq!(
            Trilateration::default().solve(&observations),
            Err(TrilaterationError::NonFiniteInput { anchor_id: "B".to_string() })
        );
    }

    #[test]
    fn test_noisy_ranges_stay_close() {
        let truth = Position::new(20.0, 18.0);
        let mut observations = vec![
            observation("ANCHOR_1", 0.0, 0.0, truth, -40),
            observation("ANCHOR_2", 50.0, 0.0, truth, -60),
            observation("ANCHOR_4", 0.0, 50.0, truth, -55),
        ];
        observations[0].distance += 0.4;
        observations[1].distance -= 0.3;
        observations[2].distance += 0.2;

        let solution = Trilateration::default().solve(&observations).unwrap();
        assert!(solution.position.distance_to(&truth) < 1.0);
        assert!(solution.residual_cost > 0.0);
    }

    #[test]
    fn test_iteration_cap_reports_no_convergence() {
        let truth = Position::new(20.0, 18.0);
        let mut observations = vec![
            observation("ANCHOR_1", 0.0, 0.0, truth, -40),
            observation("ANCHOR_2", 50.0, 0.0, truth, -60),
            observation("ANCHOR_4", 0.0, 50.0, truth, -55),
        ];
        observations[0].distance += 0.4;
        observations[1].distance -= 0.3;

        let solver = Trilateration::new(SolverConfig {
            max_iterations: 1,
            ..SolverConfig::default()
        });
        let result = solver.solve(&observations);
        assert!(
            matches!(result, Err(TrilaterationError::NoConvergence { iterations: 1, cost }) if cost > 0.0),
            "{:?}",
            result
        );
    }

    #[test]
    fn test_coincident_anchors_are_degenerate() {
        let observations = vec![
            RangeObservation { anchor_id: "A".into(), anchor: Position::new(10.0, 10.0), distance: 30.0, rssi: -40 },
            RangeObservation { anchor_id: "B".into(), anchor: Position::new(10.0, 10.0), distance: 5.0, rssi: -50 },
            RangeObservation { anchor_id: "C".into(), anchor: Position::new(10.0, 10.0), distance: 12.0, rssi: -60 },
        ];

        assert_eq!(
            Trilateration::default().solve(&observations),
            Err(TrilaterationError::DegenerateGeometry)
        );
    }

    proptest! {
        #[test]
        fn prop_consistent_ranges_recover_interior_point(u in 0.1f64..0.8, v in 0.1f64..0.8) {
            prop_assume!(u + v <= 0.9);
            let a = Position::new(0.0, 0.0);
            let b = Position::new(50.0, 0.0);
            let c = Position::new(25.0, 50.0);
            let truth = Position::new(
                a.x + u * (b.x - a.x) + v * (c.x - a.x),
                a.y + u * (b.y - a.y) + v * (c.y - a.y),
            );

            let observations = vec![
                observation("A", a.x, a.y, truth, -40),
                observation("B", b.x, b.y, truth, -50),
                observation("C", c.x, c.y, truth, -60),
            ];
            let solution = Trilateration::default().solve(&observations).unwrap();
            prop_assert!(solution.position.distance_to(&truth) < 1e-6);
        }
    }
}

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Position, WAREHOUSE_CENTER};

/// Tuning for the per-tag motion filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParameters {
    /// Time step of one predict cycle (seconds)
    pub dt: f64,
    /// White-noise acceleration variance driving the process noise
    pub process_variance: f64,
    /// Variance of a raw trilateration fix, per axis (m²)
    pub measurement_variance: f64,
    /// Diagonal of the initial state covariance
    pub initial_covariance: f64,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            dt: 1.0,
            process_variance: 0.5,
            measurement_variance: 5.0,
            initial_covariance: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("measurement is not finite: ({x}, {y})")]
    NonFiniteMeasurement { x: f64, y: f64 },
    #[error("innovation covariance is singular")]
    SingularInnovation,
}

/// Constant-velocity Kalman filter for one tag.
/// State vector: [x, y, vx, vy]; observation: [x, y]
#[derive(Debug, Clone, PartialEq)]
pub struct MotionFilter {
    /// Current state estimate [position, velocity]
    pub state: Vector4<f64>,
    /// State covariance matrix
    pub covariance: Matrix4<f64>,
    transition: Matrix4<f64>,
    process_noise: Matrix4<f64>,
    measurement_noise: Matrix2<f64>,
    observation: Matrix2x4<f64>,
}

impl MotionFilter {
    /// Fresh filter at the warehouse centre with zero velocity
    pub fn new(params: &FilterParameters) -> Self {
        Self::at_position(WAREHOUSE_CENTER, params)
    }

    /// Fresh filter at a known position, e.g. a tag's last persisted fix
    pub fn at_position(position: Position, params: &FilterParameters) -> Self {
        Self {
            state: Vector4::new(position.x, position.y, 0.0, 0.0),
            covariance: Matrix4::identity() * params.initial_covariance,
            transition: Self::create_state_transition_matrix(params.dt),
            process_noise: Self::discrete_white_noise(params.dt, params.process_variance),
            measurement_noise: Matrix2::identity() * params.measurement_variance,
            observation: Matrix2x4::new(
                1.0, 0.0, 0.0, 0.0,
                0.0, 1.0, 0.0, 0.0,
            ),
        }
    }

    /// Advance state and covariance by one time step
    pub fn predict(&mut self) -> Position {
        // x_k = F * x_{k-1}
        self.state = self.transition * self.state;
        // P_k = F * P_{k-1} * F^T + Q
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;

        self.position()
    }

    /// Correct the state with a raw position fix.
    ///
    /// On error the filter is left untouched.
    pub fn update(&mut self, measurement: &Position) -> Result<Position, FilterError> {
        if !measurement.is_finite() {
            return Err(FilterError::NonFiniteMeasurement {
                x: measurement.x,
                y: measurement.y,
            });
        }

        let h = self.observation;
        let r = self.measurement_noise;

        let innovation: Vector2<f64> = measurement.to_vector() - h * self.state;
        let s = h * self.covariance * h.transpose() + r;
        let s_inv = s.try_inverse().ok_or(FilterError::SingularInnovation)?;

        let k = self.covariance * h.transpose() * s_inv;
        self.state += k * innovation;

        // Joseph form keeps P symmetric positive definite
        let i_kh = Matrix4::identity() - k * h;
        self.covariance = i_kh * self.covariance * i_kh.transpose() + k * r * k.transpose();

        Ok(self.position())
    }

    /// One full predict-then-update cycle, committed only if the update
    /// succeeds.
    pub fn step(&mut self, measurement: &Position) -> Result<Position, FilterError> {
        let mut next = self.clone();
        next.predict();
        let smoothed = next.update(measurement)?;
        *self = next;
        Ok(smoothed)
    }

    /// Current position estimate
    pub fn position(&self) -> Position {
        Position::new(self.state[0], self.state[1])
    }

    /// Current velocity estimate
    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.state[2], self.state[3])
    }

    /// Position uncertainty (standard deviations)
    pub fn position_uncertainty(&self) -> Vector2<f64> {
        Vector2::new(
            self.covariance[(0, 0)].sqrt(),
            self.covariance[(1, 1)].sqrt(),
        )
    }

    /// Extrapolate the position `future_dt` seconds ahead
    pub fn predict_future_position(&self, future_dt: f64) -> Position {
        if future_dt <= 0.0 {
            return self.position();
        }
        Position::from_vector(&(self.position().to_vector() + self.velocity() * future_dt))
    }

    fn create_state_transition_matrix(dt: f64) -> Matrix4<f64> {
        Matrix4::new(
            1.0, 0.0, dt,  0.0,
            0.0, 1.0, 0.0, dt,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Discretised white-noise acceleration model, per axis
    /// `var * [[dt⁴/4, dt³/2], [dt³/2, dt²]]`
    fn discrete_white_noise(dt: f64, variance: f64) -> Matrix4<f64> {
        let pp = variance * dt.powi(4) / 4.0;
        let pv = variance * dt.powi(3) / 2.0;
        let vv = variance * dt.powi(2);

        Matrix4::new(
            pp,  0.0, pv,  0.0,
            0.0, pp,  0.0, pv,
            pv,  0.0, vv,  0.0,
            0.0, pv,  0.0, vv,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_new_filter_starts_at_center() {
        let filter = MotionFilter::new(&FilterParameters::default());
        assert_eq!(filter.position(), WAREHOUSE_CENTER);
        assert_eq!(filter.velocity(), Vector2::zeros());
        assert_abs_diff_eq!(filter.position_uncertainty().x, 50.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_prediction_follows_velocity() {
        let mut filter = MotionFilter::at_position(Position::new(0.0, 0.0), &FilterParameters::default());
        filter.state[2] = 1.0;
        filter.state[3] = -2.0;

        let predicted = filter.predict();
        assert_abs_diff_eq!(predicted.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(predicted.y, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_one_cycle_lands_between_prior_and_fix() {
        let mut filter = MotionFilter::new(&FilterParameters::default());
        let smoothed = filter.step(&Position::new(15.0, 15.0)).unwrap();

        assert!(smoothed.x > 15.0 && smoothed.x < 25.0);
        assert!(smoothed.y > 15.0 && smoothed.y < 25.0);
        // P = 100.125 after predict, S = 105.125
        let gain = 100.125 / 105.125;
        assert_abs_diff_eq!(smoothed.x, 25.0 - 10.0 * gain, epsilon = 1e-9);
    }

    #[test]
    fn test_repeated_fixes_converge() {
        let mut filter = MotionFilter::new(&FilterParameters::default());
        let target = Position::new(10.0, 40.0);
        for _ in 0..100 {
            filter.step(&target).unwrap();
        }
        assert!(filter.position().distance_to(&target) < 0.1);
        assert!(filter.velocity().norm() < 0.1);
    }

    #[test]
    fn test_non_finite_fix_leaves_state_untouched() {
        let mut filter = MotionFilter::new(&FilterParameters::default());
        let before = filter.clone();

        let result = filter.step(&Position::new(f64::NAN, 3.0));
        assert!(matches!(result, Err(FilterError::NonFiniteMeasurement { .. })));
        assert_eq!(filter, before);
    }

    #[test]
    fn test_process_noise_shape() {
        let q = MotionFilter::discrete_white_noise(1.0, 0.5);
        assert_eq!(q, q.transpose());
        assert_abs_diff_eq!(q[(0, 0)], 0.125, epsilon = 1e-12);
        assert_abs_diff_eq!(q[(0, 2)], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(q[(3, 3)], 0.5, epsilon = 1e-12);
        assert_eq!(q[(0, 1)], 0.0);
    }

    #[test]
    fn test_future_prediction() {
        let mut filter = MotionFilter::at_position(Position::new(0.0, 0.0), &FilterParameters::default());
        filter.state[2] = 2.0;
        filter.state[3] = 1.0;

        let future = filter.predict_future_position(2.0);
        assert_abs_diff_eq!(future.x, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(future.y, 2.0, epsilon = 1e-12);
    }
}

use crate::error::{EvaluationError, SolverError};
use crate::traits::{DynamicalSystem, Scalar, Steppable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace, warn};

/// Relative slack (in units of the step size) when deciding whether the
/// integration clock has reached the end time.
const TIME_EPSILON: f64 = 1e-9;

/// Trajectories longer than this grow on demand instead of up front.
const MAX_PREALLOCATED_SAMPLES: usize = 1 << 16;

/// Fixed-step rules the integrator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Euler,
    Midpoint,
    Heun,
    #[default]
    Rk4,
}

impl Method {
    pub const ALL: [Method; 4] = [Method::Euler, Method::Midpoint, Method::Heun, Method::Rk4];

    pub fn name(self) -> &'static str {
        match self {
            Method::Euler => "euler",
            Method::Midpoint => "midpoint",
            Method::Heun => "heun",
            Method::Rk4 => "rk4",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| SolverError::InvalidConfig(format!("Unknown solver method `{s}`")))
    }
}

/// What the analyzer may recommend. `Analytical` and `FiniteDifference`
/// have no solver behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedMethod {
    Euler,
    Midpoint,
    Heun,
    Rk4,
    Analytical,
    FiniteDifference,
}

impl RecommendedMethod {
    /// The integrator to actually run; recommendations without a solver fall back to RK4.
    pub fn solver_method(self) -> Method {
        match self {
            RecommendedMethod::Euler => Method::Euler,
            RecommendedMethod::Midpoint => Method::Midpoint,
            RecommendedMethod::Heun => Method::Heun,
            RecommendedMethod::Rk4 => Method::Rk4,
            RecommendedMethod::Analytical | RecommendedMethod::FiniteDifference => {
                warn!(recommended = %self, "no solver for recommendation; using rk4");
                Method::Rk4
            }
        }
    }

    pub fn has_solver(self) -> bool {
        !matches!(
            self,
            RecommendedMethod::Analytical | RecommendedMethod::FiniteDifference
        )
    }
}

impl From<Method> for RecommendedMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Euler => RecommendedMethod::Euler,
            Method::Midpoint => RecommendedMethod::Midpoint,
            Method::Heun => RecommendedMethod::Heun,
            Method::Rk4 => RecommendedMethod::Rk4,
        }
    }
}

impl fmt::Display for RecommendedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendedMethod::Analytical => f.write_str("analytical"),
            RecommendedMethod::FiniteDifference => f.write_str("finite_difference"),
            other => f.write_str(other.solver_method().name()),
        }
    }
}

/// How the integrator reacts when the right-hand side fails to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop and report `SolverError::SolverFailed`.
    #[default]
    Abort,
    /// Record the previous state at the next time sample and keep going.
    HoldState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub method: Method,
    pub step_size: f64,
    pub time_start: f64,
    pub time_end: f64,
    pub max_steps: Option<usize>,
    pub failure_policy: FailurePolicy,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: Method::Rk4,
            step_size: 0.1,
            time_start: 0.0,
            time_end: 10.0,
            max_steps: None,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

impl SolverConfig {
    pub fn new(method: Method, step_size: f64, time_start: f64, time_end: f64) -> Self {
        Self {
            method,
            step_size,
            time_start,
            time_end,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(SolverError::InvalidConfig(format!(
                "step size must be positive and finite, got {}",
                self.step_size
            )));
        }
        if !self.time_start.is_finite() || !self.time_end.is_finite() {
            return Err(SolverError::InvalidConfig(
                "time range must be finite".to_string(),
            ));
        }
        if self.time_end < self.time_start {
            return Err(SolverError::InvalidConfig(format!(
                "end time {} is before start time {}",
                self.time_end, self.time_start
            )));
        }
        Ok(())
    }

    /// Number of steps needed for the clock to reach `time_end`.
    pub fn step_count(&self) -> Result<usize, SolverError> {
        let span = (self.time_end - self.time_start) / self.step_size;
        let steps = (span - TIME_EPSILON).ceil().max(0.0);
        // Leave room for the initial sample.
        if !steps.is_finite() || steps >= usize::MAX as f64 {
            return Err(SolverError::InvalidConfig(format!(
                "time range [{}, {}] needs too many steps of size {}",
                self.time_start, self.time_end, self.step_size
            )));
        }
        Ok(steps as usize)
    }
}

/// Time samples and the state vector at each of them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub t: Vec<f64>,
    pub y: Vec<Vec<f64>>,
    /// Steps whose state was carried over under `FailurePolicy::HoldState`.
    pub held_steps: usize,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// The last sample as `(t, state)`.
    pub fn last(&self) -> Option<(f64, &[f64])> {
        Some((*self.t.last()?, self.y.last()?.as_slice()))
    }

    /// One state component over time.
    pub fn component(&self, index: usize) -> Vec<f64> {
        self.y.iter().map(|state| state[index]).collect()
    }
}

/// Forward Euler Solver
pub struct Euler<T: Scalar> {
    k1: Vec<T>,
}

impl<T: Scalar> Euler<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Euler<T> {
    fn step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        next: &mut [T],
    ) -> Result<(), EvaluationError> {
        // y_next = y + dt*f(t, y)
        system.apply(t, state, &mut self.k1)?;
        for i in 0..state.len() {
            next[i] = state[i] + dt * self.k1[i];
        }
        Ok(())
    }
}

/// Explicit Midpoint Solver
pub struct Midpoint<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> Midpoint<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
            k2: vec![T::zero(); dim],
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Midpoint<T> {
    fn step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        next: &mut [T],
    ) -> Result<(), EvaluationError> {
        let half = T::constant(0.5);

        system.apply(t, state, &mut self.k1)?;

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t + dt * half, &self.tmp, &mut self.k2)?;

        for i in 0..state.len() {
            next[i] = state[i] + dt * self.k2[i];
        }
        Ok(())
    }
}

/// Heun's method (improved Euler)
pub struct Heun<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> Heun<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
            k2: vec![T::zero(); dim],
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Heun<T> {
    fn step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        next: &mut [T],
    ) -> Result<(), EvaluationError> {
        let half = T::constant(0.5);

        system.apply(t, state, &mut self.k1)?;

        // Predictor: y + dt*k1
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i];
        }
        system.apply(t + dt, &self.tmp, &mut self.k2)?;

        // Corrector: trapezoidal average of both slopes
        for i in 0..state.len() {
            next[i] = state[i] + dt * (self.k1[i] + self.k2[i]) * half;
        }
        Ok(())
    }
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
            k2: vec![T::zero(); dim],
            k3: vec![T::zero(); dim],
            k4: vec![T::zero(); dim],
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        next: &mut [T],
    ) -> Result<(), EvaluationError> {
        let half = T::constant(0.5);
        let sixth = T::constant(1.0 / 6.0);
        let two = T::constant(2.0);

        // k1 = f(t, y)
        system.apply(t, state, &mut self.k1)?;

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t + dt * half, &self.tmp, &mut self.k2)?;

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t + dt * half, &self.tmp, &mut self.k3)?;

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t + dt, &self.tmp, &mut self.k4)?;

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            next[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }
        Ok(())
    }
}

/// Runtime choice of stepping rule.
pub enum Stepper<T: Scalar> {
    Euler(Euler<T>),
    Midpoint(Midpoint<T>),
    Heun(Heun<T>),
    Rk4(RK4<T>),
}

impl<T: Scalar> Stepper<T> {
    pub fn new(method: Method, dim: usize) -> Self {
        match method {
            Method::Euler => Stepper::Euler(Euler::new(dim)),
            Method::Midpoint => Stepper::Midpoint(Midpoint::new(dim)),
            Method::Heun => Stepper::Heun(Heun::new(dim)),
            Method::Rk4 => Stepper::Rk4(RK4::new(dim)),
        }
    }
}

impl<T: Scalar> Steppable<T> for Stepper<T> {
    fn step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        next: &mut [T],
    ) -> Result<(), EvaluationError> {
        match self {
            Stepper::Euler(s) => s.step(system, t, state, dt, next),
            Stepper::Midpoint(s) => s.step(system, t, state, dt, next),
            Stepper::Heun(s) => s.step(system, t, state, dt, next),
            Stepper::Rk4(s) => s.step(system, t, state, dt, next),
        }
    }
}

/// Advances `system` from `config.time_start` until the clock reaches
/// `config.time_end`. The last sample may overshoot the end time by less
/// than one step; `t[i] == time_start + i * step_size`.
pub fn integrate(
    system: &impl DynamicalSystem<f64>,
    initial_state: &[f64],
    config: &SolverConfig,
) -> Result<Trajectory, SolverError> {
    config.validate()?;
    let dim = system.dimension();
    if initial_state.len() != dim {
        return Err(SolverError::DimensionMismatch {
            expected: dim,
            actual: initial_state.len(),
        });
    }

    let steps = config.step_count()?;
    if let Some(budget) = config.max_steps {
        if steps > budget {
            return Err(SolverError::StepBudgetExceeded {
                required: steps,
                budget,
            });
        }
    }
    debug!(method = %config.method, steps, dim, "integrating");

    let h = config.step_size;
    let t0 = config.time_start;
    let mut stepper = Stepper::new(config.method, dim);
    let mut trajectory = Trajectory {
        t: Vec::with_capacity(steps.min(MAX_PREALLOCATED_SAMPLES) + 1),
        y: Vec::with_capacity(steps.min(MAX_PREALLOCATED_SAMPLES) + 1),
        held_steps: 0,
    };
    trajectory.t.push(t0);
    trajectory.y.push(initial_state.to_vec());

    let mut state = initial_state.to_vec();
    let mut next = vec![0.0; dim];
    for i in 0..steps {
        let t = t0 + i as f64 * h;
        match stepper.step(system, t, &state, h, &mut next) {
            Ok(()) => state.copy_from_slice(&next),
            Err(source) => match config.failure_policy {
                FailurePolicy::Abort => {
                    return Err(SolverError::SolverFailed { at_time: t, source });
                }
                FailurePolicy::HoldState => {
                    warn!(t, error = %source, "right-hand side failed; holding state");
                    trajectory.held_steps += 1;
                }
            },
        }
        trace!(t, ?state, "step");
        trajectory.t.push(t0 + (i + 1) as f64 * h);
        trajectory.y.push(state.clone());
    }

    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LinearSystem {
        rate: f64,
    }

    impl DynamicalSystem<f64> for LinearSystem {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) -> Result<(), EvaluationError> {
            out[0] = self.rate * x[0];
            Ok(())
        }
    }

    /// dy/dt = t, fails once t passes a threshold.
    struct Ramp {
        fail_after: f64,
    }

    impl DynamicalSystem<f64> for Ramp {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], out: &mut [f64]) -> Result<(), EvaluationError> {
            if t > self.fail_after {
                return Err(EvaluationError::DivisionByZero);
            }
            out[0] = t;
            Ok(())
        }
    }

    fn single_step(method: Method, h: f64) -> f64 {
        let system = LinearSystem { rate: -1.0 };
        let mut stepper = Stepper::new(method, 1);
        let mut next = [0.0];
        stepper
            .step(&system, 0.0, &[1.0], h, &mut next)
            .expect("step should succeed");
        next[0]
    }

    #[test]
    fn single_steps_match_hand_computation() {
        let h = 0.1;
        assert!((single_step(Method::Euler, h) - 0.9).abs() < 1e-15);
        // Midpoint and Heun agree on linear problems: 1 - h + h²/2
        assert!((single_step(Method::Midpoint, h) - 0.905).abs() < 1e-15);
        assert!((single_step(Method::Heun, h) - 0.905).abs() < 1e-15);
        let rk4 = 1.0 - h + h * h / 2.0 - h.powi(3) / 6.0 + h.powi(4) / 24.0;
        assert!((single_step(Method::Rk4, h) - rk4).abs() < 1e-15);
    }

    #[test]
    fn rk4_step_advances_constant_field() {
        struct Constant;
        impl DynamicalSystem<f64> for Constant {
            fn dimension(&self) -> usize {
                1
            }
            fn apply(&self, _t: f64, _x: &[f64], out: &mut [f64]) -> Result<(), EvaluationError> {
                out[0] = 1.0;
                Ok(())
            }
        }
        let mut stepper = RK4::new(1);
        let mut next = [0.0];
        stepper.step(&Constant, 0.0, &[0.0], 0.5, &mut next).unwrap();
        assert!((next[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn time_grid_starts_at_t0_and_may_overshoot() {
        let system = LinearSystem { rate: 0.0 };
        let config = SolverConfig::new(Method::Euler, 0.1, 1.0, 1.25);
        let trajectory = integrate(&system, &[2.0], &config).expect("integrate");
        assert_eq!(trajectory.len(), 4);
        assert_eq!(trajectory.t[0], 1.0);
        let (t_last, y_last) = trajectory.last().unwrap();
        assert!(t_last >= 1.25 && t_last - 1.25 < 0.1);
        assert_eq!(y_last, &[2.0]);
        for pair in trajectory.t.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn exact_multiples_do_not_add_an_extra_sample() {
        let system = LinearSystem { rate: 0.0 };
        let config = SolverConfig::new(Method::Rk4, 0.1, 0.0, 1.0);
        let trajectory = integrate(&system, &[0.0], &config).expect("integrate");
        assert_eq!(trajectory.len(), 11);
        assert!((trajectory.t[10] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_interval_returns_initial_sample() {
        let system = LinearSystem { rate: 1.0 };
        let config = SolverConfig::new(Method::Rk4, 0.1, 3.0, 3.0);
        let trajectory = integrate(&system, &[1.0], &config).expect("integrate");
        assert_eq!(trajectory.t, vec![3.0]);
        assert_eq!(trajectory.y, vec![vec![1.0]]);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let system = LinearSystem { rate: 1.0 };
        for config in [
            SolverConfig::new(Method::Rk4, 0.0, 0.0, 1.0),
            SolverConfig::new(Method::Rk4, -0.1, 0.0, 1.0),
            SolverConfig::new(Method::Rk4, f64::NAN, 0.0, 1.0),
            SolverConfig::new(Method::Rk4, 0.1, 1.0, 0.0),
            SolverConfig::new(Method::Rk4, 0.1, 0.0, f64::INFINITY),
        ] {
            assert!(matches!(
                integrate(&system, &[1.0], &config),
                Err(SolverError::InvalidConfig(_))
            ));
        }
        assert_eq!(
            integrate(&system, &[1.0, 2.0], &SolverConfig::default()),
            Err(SolverError::DimensionMismatch {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn unrepresentable_step_counts_are_rejected() {
        let system = LinearSystem { rate: 1.0 };
        for config in [
            SolverConfig::new(Method::Euler, 1e-10, 0.0, 1e308),
            SolverConfig::new(Method::Euler, 1e-300, -1e308, 1e308),
        ] {
            assert!(matches!(config.step_count(), Err(SolverError::InvalidConfig(_))));
            assert!(matches!(
                integrate(&system, &[1.0], &config),
                Err(SolverError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn large_step_counts_defer_to_the_budget() {
        let system = LinearSystem { rate: 1.0 };
        let config = SolverConfig {
            max_steps: Some(1000),
            ..SolverConfig::new(Method::Euler, 0.5, 0.0, 5e14)
        };
        assert_eq!(config.step_count(), Ok(1_000_000_000_000_000));
        assert!(matches!(
            integrate(&system, &[1.0], &config),
            Err(SolverError::StepBudgetExceeded { budget: 1000, .. })
        ));
    }

    #[test]
    fn step_budget_is_enforced() {
        let system = LinearSystem { rate: 1.0 };
        let config = SolverConfig {
            max_steps: Some(5),
            ..SolverConfig::new(Method::Euler, 0.1, 0.0, 1.0)
        };
        assert_eq!(
            integrate(&system, &[1.0], &config),
            Err(SolverError::StepBudgetExceeded {
                required: 10,
                budget: 5
            })
        );
    }

    #[test]
    fn evaluation_failure_aborts_by_default() {
        let system = Ramp { fail_after: 0.25 };
        let config = SolverConfig::new(Method::Euler, 0.1, 0.0, 1.0);
        match integrate(&system, &[0.0], &config) {
            Err(SolverError::SolverFailed { at_time, source }) => {
                assert!((at_time - 0.3).abs() < 1e-12);
                assert_eq!(source, EvaluationError::DivisionByZero);
            }
            other => panic!("expected SolverFailed, got {other:?}"),
        }
    }

    #[test]
    fn hold_state_policy_keeps_the_grid_rectangular() {
        let system = Ramp { fail_after: 0.25 };
        let config = SolverConfig {
            failure_policy: FailurePolicy::HoldState,
            ..SolverConfig::new(Method::Euler, 0.1, 0.0, 1.0)
        };
        let trajectory = integrate(&system, &[0.0], &config).expect("integrate");
        assert_eq!(trajectory.len(), 11);
        assert_eq!(trajectory.held_steps, 7);
        let held = trajectory.y[3][0];
        assert!(trajectory.y[3..].iter().all(|state| state[0] == held));
    }

    #[test]
    fn method_tags_round_trip_through_strings() {
        for method in Method::ALL {
            assert_eq!(method.to_string().parse::<Method>().unwrap(), method);
        }
        assert!("tsit5".parse::<Method>().is_err());
        assert_eq!(RecommendedMethod::FiniteDifference.to_string(), "finite_difference");
        assert_eq!(RecommendedMethod::Analytical.solver_method(), Method::Rk4);
        assert!(!RecommendedMethod::Analytical.has_solver());
    }

    #[test]
    fn config_decodes_with_defaults() {
        let config: SolverConfig =
            serde_json::from_str(r#"{"method": "heun", "step_size": 0.05}"#).expect("decode");
        assert_eq!(config.method, Method::Heun);
        assert_eq!(config.step_size, 0.05);
        assert_eq!(config.time_end, 10.0);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
    }
}

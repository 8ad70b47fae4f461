//! Simulation state, the pure action reducer, and the end-to-end
//! text → trajectory pipeline.

use crate::analyzer::{self, Analysis, EquationKind};
use crate::autodiff::Dual;
use crate::error::{EvaluationError, SolveError, SolverError};
use crate::library::{Archetype, SpecializedModel};
use crate::parser::{self, ParseResult};
use crate::reduction::{self, FirstOrderSystem, InitialConditionSet, StateSlot};
use crate::solvers::{self, FailurePolicy, Method, SolverConfig, Stepper, Trajectory};
use crate::stiffness::{self, StiffnessReport};
use crate::traits::{DynamicalSystem, Steppable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Everything needed to run one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationState {
    pub equation: String,
    pub parameters: BTreeMap<String, f64>,
    pub initial_conditions: InitialConditionSet,
    pub config: SolverConfig,
    /// Run recognized archetypes through their closed-form right-hand side.
    pub use_specialized: bool,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self {
            equation: "dy/dx = y".to_string(),
            parameters: BTreeMap::new(),
            initial_conditions: InitialConditionSet::new().with("y", 0, 1.0),
            config: SolverConfig::default(),
            use_specialized: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    SetEquation(String),
    SetParameter {
        name: String,
        value: f64,
    },
    RemoveParameter(String),
    SetInitialCondition {
        variable: String,
        order: usize,
        value: f64,
    },
    RemoveInitialCondition {
        variable: String,
        order: usize,
    },
    SetTimeRange {
        start: f64,
        end: f64,
    },
    SetMethod(Method),
    SetStepSize(f64),
    /// Loads an archetype's canonical equation with its preset values.
    UsePreset(Archetype),
    Reset,
}

/// Returns the state after `action`; `state` itself is never modified.
pub fn reduce(state: &SimulationState, action: Action) -> SimulationState {
    let mut next = state.clone();
    match action {
        Action::SetEquation(equation) => next.equation = equation,
        Action::SetParameter { name, value } => {
            next.parameters.insert(name, value);
        }
        Action::RemoveParameter(name) => {
            next.parameters.remove(&name);
        }
        Action::SetInitialCondition {
            variable,
            order,
            value,
        } => next.initial_conditions.set(variable, order, value),
        Action::RemoveInitialCondition { variable, order } => {
            next.initial_conditions.remove(&variable, order);
        }
        Action::SetTimeRange { start, end } => {
            next.config.time_start = start;
            next.config.time_end = end;
        }
        Action::SetMethod(method) => next.config.method = method,
        Action::SetStepSize(step_size) => next.config.step_size = step_size,
        Action::UsePreset(archetype) => {
            next.equation = archetype.canonical_equation().to_string();
            next.parameters = archetype
                .default_parameters()
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect();
            next.initial_conditions = InitialConditionSet::new();
            for (variable, order, value) in archetype.default_initial_conditions() {
                next.initial_conditions.set(*variable, *order, *value);
            }
        }
        Action::Reset => next = SimulationState::default(),
    }
    next
}

/// Which right-hand side drove the integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "archetype", rename_all = "snake_case")]
pub enum IntegrationPath {
    Specialized(Archetype),
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    pub analysis: Analysis,
    pub path: IntegrationPath,
    pub method: Method,
    /// Names of the state components, e.g. `["y", "y'"]`.
    pub variables: Vec<String>,
    pub trajectory: Trajectory,
}

/// The right-hand side chosen for a state.
pub enum Integrand {
    Specialized(SpecializedModel),
    Generic(FirstOrderSystem),
}

impl Integrand {
    pub fn path(&self) -> IntegrationPath {
        match self {
            Integrand::Specialized(model) => IntegrationPath::Specialized(model.archetype()),
            Integrand::Generic(_) => IntegrationPath::Generic,
        }
    }

    /// Jacobian stiffness probe at `(t, state)`.
    pub fn stiffness(&self, t: f64, state: &[f64]) -> anyhow::Result<StiffnessReport> {
        match self {
            Integrand::Specialized(model) => stiffness::probe(model, t, state),
            Integrand::Generic(reduced) => {
                stiffness::probe(&reduced.system.map_params(Dual::constant), t, state)
            }
        }
    }
}

impl DynamicalSystem<f64> for Integrand {
    fn dimension(&self) -> usize {
        match self {
            Integrand::Specialized(model) => DynamicalSystem::<f64>::dimension(model),
            Integrand::Generic(system) => system.dimension(),
        }
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> Result<(), EvaluationError> {
        match self {
            Integrand::Specialized(model) => model.apply(t, x, out),
            Integrand::Generic(system) => system.apply(t, x, out),
        }
    }
}

/// A validated, ready-to-integrate problem.
pub struct Prepared {
    pub analysis: Analysis,
    pub slots: Vec<StateSlot>,
    pub initial_state: Vec<f64>,
    pub integrand: Integrand,
}

impl SimulationState {
    pub fn dispatch(&self, action: Action) -> SimulationState {
        reduce(self, action)
    }

    pub fn parse(&self) -> ParseResult {
        parser::parse(&self.equation)
    }

    pub fn analyze(&self) -> Analysis {
        analyzer::analyze(&self.equation)
    }

    /// Parses, classifies and binds the equation without integrating it.
    pub fn prepare(&self) -> Result<Prepared, SolveError> {
        let parsed = self.parse();
        if !parsed.valid {
            return Err(SolveError::InvalidEquation(parsed.error.unwrap_or_default()));
        }
        let analysis = analyzer::analyze_parsed(&parsed);
        let kind = match analysis.kind {
            EquationKind::Ordinary | EquationKind::System => None,
            EquationKind::Partial => Some("Partial differential"),
            EquationKind::Algebraic => Some("Algebraic"),
            EquationKind::Unknown => Some("Unrecognized"),
        };
        if let Some(kind) = kind {
            return Err(SolveError::UnsupportedEquation { kind });
        }
        if let Some(missing) = parsed
            .parameters
            .iter()
            .find(|name| !self.parameters.contains_key(*name))
        {
            return Err(SolveError::MissingParameter(missing.clone()));
        }

        let slots = reduction::state_slots(&parsed)?;
        let initial_state = self.initial_conditions.initial_state(&slots)?;

        let specialized = analysis
            .archetype
            .filter(|archetype| self.use_specialized && archetype.matches_canonical_form(&parsed));
        let integrand = match specialized {
            Some(archetype) => Integrand::Specialized(SpecializedModel::from_parameters(
                archetype,
                &self.parameters,
            )?),
            None => Integrand::Generic(reduction::reduce_parsed(&parsed, &self.parameters)?),
        };
        debug!(
            path = ?integrand.path(),
            dim = slots.len(),
            recommended = %analysis.recommended_method,
            "prepared simulation"
        );

        Ok(Prepared {
            analysis,
            slots,
            initial_state,
            integrand,
        })
    }

    /// Runs the whole pipeline with the configured method.
    pub fn solve(&self) -> Result<Solution, SolveError> {
        let prepared = self.prepare()?;
        let trajectory =
            solvers::integrate(&prepared.integrand, &prepared.initial_state, &self.config)?;
        Ok(Solution {
            path: prepared.integrand.path(),
            method: self.config.method,
            variables: prepared.slots.iter().map(StateSlot::key).collect(),
            analysis: prepared.analysis,
            trajectory,
        })
    }

    /// A stepper that advances the prepared problem one step at a time.
    pub fn session(&self) -> Result<Session, SolveError> {
        self.config.validate()?;
        let prepared = self.prepare()?;
        Ok(Session::new(prepared, &self.config))
    }
}

/// Incremental integration, for callers that animate a trajectory.
pub struct Session {
    integrand: Integrand,
    stepper: Stepper<f64>,
    variables: Vec<String>,
    state: Vec<f64>,
    next: Vec<f64>,
    t: f64,
    steps: usize,
    time_start: f64,
    step_size: f64,
    failure_policy: FailurePolicy,
}

impl Session {
    fn new(prepared: Prepared, config: &SolverConfig) -> Self {
        let dim = prepared.initial_state.len();
        Self {
            stepper: Stepper::new(config.method, dim),
            variables: prepared.slots.iter().map(StateSlot::key).collect(),
            next: vec![0.0; dim],
            state: prepared.initial_state,
            integrand: prepared.integrand,
            t: config.time_start,
            steps: 0,
            time_start: config.time_start,
            step_size: config.step_size,
            failure_policy: config.failure_policy,
        }
    }

    /// Advances by one step. Under `HoldState` a failed step keeps the state
    /// and still moves the clock.
    pub fn step(&mut self) -> Result<(), SolverError> {
        let outcome = self
            .stepper
            .step(&self.integrand, self.t, &self.state, self.step_size, &mut self.next);
        match (outcome, self.failure_policy) {
            (Ok(()), _) => self.state.copy_from_slice(&self.next),
            (Err(source), FailurePolicy::Abort) => {
                return Err(SolverError::SolverFailed {
                    at_time: self.t,
                    source,
                })
            }
            (Err(source), FailurePolicy::HoldState) => {
                warn!(t = self.t, error = %source, "right-hand side failed; holding state");
            }
        }
        self.steps += 1;
        self.t = self.time_start + self.steps as f64 * self.step_size;
        Ok(())
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn path(&self) -> IntegrationPath {
        self.integrand.path()
    }

    /// Probes stiffness at the current time and state.
    pub fn probe_stiffness(&self) -> anyhow::Result<StiffnessReport> {
        self.integrand.stiffness(self.t, &self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Stiffness;
    use crate::error::ReductionError;

    fn preset(archetype: Archetype) -> SimulationState {
        reduce(&SimulationState::default(), Action::UsePreset(archetype))
    }

    #[test]
    fn reducer_leaves_the_input_untouched() {
        let state = SimulationState::default();
        let next = reduce(&state, Action::SetEquation("dy/dt = -y".into()));
        assert_eq!(state.equation, "dy/dx = y");
        assert_eq!(next.equation, "dy/dt = -y");
    }

    #[test]
    fn reducer_handles_every_field() {
        let state = [
            Action::SetParameter {
                name: "k".into(),
                value: 2.0,
            },
            Action::SetInitialCondition {
                variable: "y".into(),
                order: 1,
                value: 0.5,
            },
            Action::SetTimeRange {
                start: 1.0,
                end: 4.0,
            },
            Action::SetMethod(Method::Heun),
            Action::SetStepSize(0.25),
        ]
        .into_iter()
        .fold(SimulationState::default(), |s, a| reduce(&s, a));

        assert_eq!(state.parameters.get("k"), Some(&2.0));
        assert_eq!(state.initial_conditions.get("y", 1), Some(0.5));
        assert_eq!(state.config.time_start, 1.0);
        assert_eq!(state.config.time_end, 4.0);
        assert_eq!(state.config.method, Method::Heun);
        assert_eq!(state.config.step_size, 0.25);

        let trimmed = state
            .dispatch(Action::RemoveParameter("k".into()))
            .dispatch(Action::RemoveInitialCondition {
                variable: "y".into(),
                order: 1,
            });
        assert!(trimmed.parameters.is_empty());
        assert_eq!(trimmed.initial_conditions.get("y", 1), None);
        assert_eq!(trimmed.dispatch(Action::Reset), SimulationState::default());
    }

    #[test]
    fn actions_decode_from_tagged_json() {
        let action: Action =
            serde_json::from_str(r#"{"type": "SET_METHOD", "payload": "midpoint"}"#)
                .expect("decode");
        assert_eq!(action, Action::SetMethod(Method::Midpoint));
        let reset: Action = serde_json::from_str(r#"{"type": "RESET"}"#).expect("decode");
        assert_eq!(reset, Action::Reset);
    }

    #[test]
    fn default_state_solves_growth() {
        let solution = SimulationState::default().solve().expect("solve");
        assert_eq!(solution.path, IntegrationPath::Generic);
        assert_eq!(solution.variables, vec!["y"]);
        let (t, y) = solution.trajectory.last().unwrap();
        assert!((y[0] - t.exp()).abs() / t.exp() < 1e-4);
    }

    #[test]
    fn stale_parameters_do_not_shadow_the_clock() {
        let state = SimulationState::default()
            .dispatch(Action::SetEquation("dy/dt = t".into()))
            .dispatch(Action::SetParameter {
                name: "t".into(),
                value: 3.0,
            })
            .dispatch(Action::SetParameter {
                name: "k".into(),
                value: 7.0,
            });
        let solution = state.solve().expect("solve");
        let (t, y) = solution.trajectory.last().unwrap();
        assert!((t - 10.0).abs() < 1e-9);
        assert!((y[0] - 51.0).abs() < 1e-9, "y(10) = {}", y[0]);
    }

    #[test]
    fn presets_take_the_specialized_path() {
        for archetype in Archetype::ALL {
            let solution = preset(archetype).solve().expect("solve");
            assert_eq!(solution.path, IntegrationPath::Specialized(archetype));
            assert_eq!(solution.analysis.archetype, Some(archetype));
        }
    }

    #[test]
    fn specialized_path_can_be_disabled() {
        let mut state = preset(Archetype::Pendulum);
        state.use_specialized = false;
        let solution = state.solve().expect("solve");
        assert_eq!(solution.path, IntegrationPath::Generic);
        assert_eq!(solution.variables, vec!["θ", "θ'"]);
    }

    #[test]
    fn non_canonical_archetype_runs_generically() {
        let state = SimulationState {
            equation: "dy/dt = 2*y".into(),
            ..SimulationState::default()
        };
        let solution = state.solve().expect("solve");
        assert_eq!(solution.analysis.archetype, Some(Archetype::Exponential));
        assert_eq!(solution.path, IntegrationPath::Generic);
    }

    #[test]
    fn rejects_what_cannot_be_integrated() {
        let with = |equation: &str| SimulationState {
            equation: equation.into(),
            ..SimulationState::default()
        };
        assert!(matches!(
            with("∂u/∂t = k*u").solve(),
            Err(SolveError::UnsupportedEquation { .. })
        ));
        assert!(matches!(
            with("y = 2*x").solve(),
            Err(SolveError::UnsupportedEquation { kind: "Algebraic" })
        ));
        assert!(matches!(
            with("dy/dt = ").solve(),
            Err(SolveError::InvalidEquation(_))
        ));
        assert_eq!(
            with("dy/dt = -k*y").solve().map(|_| ()),
            Err(SolveError::MissingParameter("k".into()))
        );
        assert_eq!(
            with("d^2y/dt^2 = -y").solve().map(|_| ()),
            Err(SolveError::Reduction(ReductionError::MissingInitialCondition {
                variable: "y".into(),
                order: 1
            }))
        );
    }

    #[test]
    fn session_matches_batch_integration() {
        let state = preset(Archetype::DampedOscillator);
        let batch = state.solve().expect("solve").trajectory;
        let mut session = state.session().expect("session");
        for i in 1..batch.len() {
            session.step().expect("step");
            assert_eq!(session.time(), batch.t[i]);
            assert_eq!(session.state(), batch.y[i].as_slice());
        }
        assert_eq!(session.variables(), ["y".to_string(), "y'".to_string()]);
    }

    #[test]
    fn both_paths_report_the_same_stiffness() {
        let mut state = preset(Archetype::DampedOscillator)
            .dispatch(Action::SetParameter {
                name: "c".into(),
                value: 5000.0,
            });
        let specialized = state.session().expect("session");
        state.use_specialized = false;
        let generic = state.session().expect("session");
        assert_eq!(generic.path(), IntegrationPath::Generic);

        let a = specialized.probe_stiffness().expect("probe");
        let b = generic.probe_stiffness().expect("probe");
        assert_eq!(a.jacobian, b.jacobian);
        assert_eq!(a.stiffness, Stiffness::Stiff);
        assert_eq!(b.stiffness, Stiffness::Stiff);
    }

    #[test]
    fn state_round_trips_through_json() {
        let state = preset(Archetype::LotkaVolterra);
        let json = serde_json::to_string(&state).expect("encode");
        let decoded: SimulationState = serde_json::from_str(&json).expect("decode");
        assert_eq!(decoded, state);
    }
}

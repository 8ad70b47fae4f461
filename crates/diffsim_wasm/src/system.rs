//! Stepping session wrapper.

use crate::{error_to_js, from_js, to_js};
use anyhow::Context;
use diffsim_core::error::SolveError;
use diffsim_core::simulation::{Session, SimulationState};
use js_sys::Float64Array;
use wasm_bindgen::prelude::*;

/// Samples reserved up front by `advance`; longer runs grow the buffer as needed.
const MAX_PREALLOCATED_STEPS: usize = 4096;

/// Buffer size for `steps` flattened `[t, state...]` rows, at most
/// `MAX_PREALLOCATED_STEPS` rows.
fn sample_capacity(steps: usize, dim: usize) -> usize {
    steps
        .min(MAX_PREALLOCATED_STEPS)
        .checked_mul(dim.saturating_add(1))
        .unwrap_or(0)
}

/// Integrates one prepared simulation a step at a time, for animation.
#[wasm_bindgen]
pub struct WasmSession {
    session: Session,
}

impl WasmSession {
    pub(crate) fn from_state(state: &SimulationState) -> Result<WasmSession, SolveError> {
        Ok(WasmSession {
            session: state.session()?,
        })
    }

    /// Advances up to `steps` steps and returns the visited states, flattened.
    pub(crate) fn advance_flat(&mut self, steps: usize) -> Result<Vec<f64>, JsValue> {
        let mut samples = Vec::with_capacity(sample_capacity(steps, self.session.state().len()));
        for _ in 0..steps {
            self.session.step().map_err(error_to_js)?;
            samples.push(self.session.time());
            samples.extend_from_slice(self.session.state());
        }
        Ok(samples)
    }
}

#[wasm_bindgen]
impl WasmSession {
    #[wasm_bindgen(constructor)]
    pub fn new(state: JsValue) -> Result<WasmSession, JsValue> {
        console_error_panic_hook::set_once();
        let state: SimulationState = from_js(state, "simulation state")?;
        Self::from_state(&state).map_err(error_to_js)
    }

    pub fn step(&mut self) -> Result<(), JsValue> {
        self.session.step().map_err(error_to_js)
    }

    /// `[t, y_0, ..., y_n, t, y_0, ...]` for each step taken.
    pub fn advance(&mut self, steps: usize) -> Result<Float64Array, JsValue> {
        let samples = self.advance_flat(steps)?;
        Ok(Float64Array::from(samples.as_slice()))
    }

    pub fn get_state(&self) -> Vec<f64> {
        self.session.state().to_vec()
    }

    pub fn get_t(&self) -> f64 {
        self.session.time()
    }

    pub fn variables(&self) -> Vec<String> {
        self.session.variables().to_vec()
    }

    pub fn probe_stiffness(&self) -> Result<JsValue, JsValue> {
        let report = self
            .session
            .probe_stiffness()
            .with_context(|| format!("Stiffness probe failed at t = {}", self.session.time()))
            .map_err(|err| JsValue::from_str(&format!("{err:#}")))?;
        to_js(&report, "stiffness report")
    }
}

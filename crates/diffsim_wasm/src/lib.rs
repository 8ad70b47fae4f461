//! Browser bridge for `diffsim_core`.
//!
//! Every export decodes its arguments with `serde-wasm-bindgen`, calls into
//! the core and serializes the result back. Errors become string `JsValue`s.

use diffsim_core::analyzer::{self, Analysis};
use diffsim_core::library::Archetype;
use diffsim_core::parser;
use diffsim_core::simulation::{self, Action, SimulationState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;

mod system;

pub use system::WasmSession;

pub(crate) fn to_js<T: Serialize>(value: &T, what: &str) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|err| JsValue::from_str(&format!("Failed to serialize {what}: {err}")))
}

pub(crate) fn from_js<T: DeserializeOwned>(value: JsValue, what: &str) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|err| JsValue::from_str(&format!("Invalid {what}: {err}")))
}

pub(crate) fn error_to_js(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnalysisView {
    #[serde(flatten)]
    analysis: Analysis,
    explanation: String,
}

pub(crate) fn analysis_view(text: &str) -> AnalysisView {
    let analysis = analyzer::analyze(text);
    AnalysisView {
        explanation: analysis.explanation(),
        analysis,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PresetView {
    archetype: Archetype,
    name: String,
    equation: &'static str,
    state: SimulationState,
}

pub(crate) fn preset_views() -> Vec<PresetView> {
    Archetype::ALL
        .into_iter()
        .map(|archetype| PresetView {
            archetype,
            name: archetype.to_string(),
            equation: archetype.canonical_equation(),
            state: simulation::reduce(&SimulationState::default(), Action::UsePreset(archetype)),
        })
        .collect()
}

#[wasm_bindgen]
pub fn parse_equation(text: &str) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    to_js(&parser::parse(text), "parse result")
}

#[wasm_bindgen]
pub fn analyze_equation(text: &str) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    to_js(&analysis_view(text), "analysis")
}

#[wasm_bindgen]
pub fn default_simulation() -> Result<JsValue, JsValue> {
    to_js(&SimulationState::default(), "simulation state")
}

/// `state` and `action` use the same JSON shapes as `SimulationState` and `Action`.
#[wasm_bindgen]
pub fn reduce_simulation(state: JsValue, action: JsValue) -> Result<JsValue, JsValue> {
    let state: SimulationState = from_js(state, "simulation state")?;
    let action: Action = from_js(action, "action")?;
    to_js(&simulation::reduce(&state, action), "simulation state")
}

#[wasm_bindgen]
pub fn solve_simulation(state: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let state: SimulationState = from_js(state, "simulation state")?;
    let solution = state.solve().map_err(error_to_js)?;
    to_js(&solution, "solution")
}

#[wasm_bindgen]
pub fn list_presets() -> Result<JsValue, JsValue> {
    to_js(&preset_views(), "presets")
}


#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use diffsim_core::solvers::Method;
    use serde_wasm_bindgen::{from_value, to_value};
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn solve_simulation_rejects_garbage() {
        let result = solve_simulation(JsValue::from_str("not a state"));
        let message = result.expect_err("garbage should not decode");
        assert!(message
            .as_string()
            .expect("string error")
            .starts_with("Invalid simulation state"));
    }

    #[wasm_bindgen_test]
    fn reduce_simulation_applies_tagged_actions() {
        let state = default_simulation().expect("default state");
        let action = to_value(&Action::SetMethod(Method::Heun)).expect("action");
        let next: SimulationState =
            from_value(reduce_simulation(state, action).expect("reduce")).expect("decode");
        assert_eq!(next.config.method, Method::Heun);
    }

    #[wasm_bindgen_test]
    fn solve_simulation_returns_a_trajectory() {
        let state = default_simulation().expect("default state");
        let value = solve_simulation(state).expect("solve");
        let variables = js_sys::Reflect::get(&value, &JsValue::from_str("variables"))
            .expect("variables field");
        assert_eq!(js_sys::Array::from(&variables).length(), 1);
    }

    #[wasm_bindgen_test]
    fn solve_simulation_reports_missing_parameters() {
        let state = SimulationState::default().dispatch(Action::SetEquation("dy/dt = -k*y".into()));
        let err = solve_simulation(to_value(&state).expect("state")).expect_err("k is unbound");
        assert!(err.as_string().expect("string error").contains('k'));
    }

    #[wasm_bindgen_test]
    fn list_presets_covers_every_archetype() {
        let presets = js_sys::Array::from(&list_presets().expect("presets"));
        assert_eq!(presets.length() as usize, Archetype::ALL.len());
    }
}

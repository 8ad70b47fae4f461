//! Order reduction: rewrites first- and second-order equations as one
//! first-order vector system over `[y, y', ...]` state slots.

use crate::equation_engine::{derivative_key, Bytecode, Compiler, EquationSystem};
use crate::error::{EvaluationError, ReductionError};
use crate::parser::{self, EquationForm, ParseResult, ParsedEquation};
use crate::traits::DynamicalSystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Highest order the adapter reduces.
pub const MAX_ORDER: usize = 2;

/// One state component: the `order`-th derivative of `variable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSlot {
    pub variable: String,
    pub order: usize,
}

impl StateSlot {
    /// Name under which the slot is visible to compiled expressions (`y`, `y'`).
    pub fn key(&self) -> String {
        derivative_key(&self.variable, self.order)
    }
}

/// Values for `(variable, derivative order)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitialConditionSet {
    values: BTreeMap<String, BTreeMap<usize, f64>>,
}

impl InitialConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, variable: impl Into<String>, order: usize, value: f64) {
        self.values
            .entry(variable.into())
            .or_default()
            .insert(order, value);
    }

    pub fn with(mut self, variable: impl Into<String>, order: usize, value: f64) -> Self {
        self.set(variable, order, value);
        self
    }

    pub fn get(&self, variable: &str, order: usize) -> Option<f64> {
        self.values.get(variable)?.get(&order).copied()
    }

    pub fn remove(&mut self, variable: &str, order: usize) -> Option<f64> {
        let orders = self.values.get_mut(variable)?;
        let removed = orders.remove(&order);
        if orders.is_empty() {
            self.values.remove(variable);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assembles the state vector for `slots`. Every slot must be present;
    /// nothing is defaulted.
    pub fn initial_state(&self, slots: &[StateSlot]) -> Result<Vec<f64>, ReductionError> {
        slots
            .iter()
            .map(|slot| {
                self.get(&slot.variable, slot.order).ok_or_else(|| {
                    ReductionError::MissingInitialCondition {
                        variable: slot.variable.clone(),
                        order: slot.order,
                    }
                })
            })
            .collect()
    }
}

/// A compiled first-order system together with the meaning of each component.
pub struct FirstOrderSystem {
    pub slots: Vec<StateSlot>,
    pub parameter_names: Vec<String>,
    pub system: EquationSystem<f64>,
}

impl FirstOrderSystem {
    pub fn initial_state(&self, conditions: &InitialConditionSet) -> Result<Vec<f64>, ReductionError> {
        conditions.initial_state(&self.slots)
    }

    /// Index of the slot holding the `order`-th derivative of `variable`.
    pub fn slot_index(&self, variable: &str, order: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.variable == variable && slot.order == order)
    }
}

impl DynamicalSystem<f64> for FirstOrderSystem {
    fn dimension(&self) -> usize {
        self.system.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> Result<(), EvaluationError> {
        self.system.apply(t, x, out)
    }
}

/// Reduces the single equation in `equation_text` whose unknown is `dependent_var`.
pub fn reduce(
    equation_text: &str,
    dependent_var: &str,
    params: &BTreeMap<String, f64>,
) -> Result<FirstOrderSystem, ReductionError> {
    let parsed = parser::parse(equation_text);
    if !parsed.valid {
        return Err(ReductionError::InvalidEquation(
            parsed.error.unwrap_or_default(),
        ));
    }
    if parsed.is_system {
        return Err(ReductionError::InvalidEquation(
            "expected a single equation".to_string(),
        ));
    }
    if !parsed.dependent_vars.contains(dependent_var) {
        return Err(ReductionError::UnknownVariable(dependent_var.to_string()));
    }
    reduce_parsed(&parsed, params)
}

/// State slots for every equation, in line order: an order-`n` equation in
/// `y` contributes `y, y', ..., y^(n-1)`.
pub fn state_slots(parsed: &ParseResult) -> Result<Vec<StateSlot>, ReductionError> {
    let mut slots = Vec::new();
    for eq in &parsed.equations {
        let (variable, order) = reducible(eq)?;
        slots.extend((0..order).map(|order| StateSlot {
            variable: variable.to_string(),
            order,
        }));
    }
    Ok(slots)
}

/// Compiles every line of a parsed text into one first-order system.
/// The text's parameters are bound from `params` and other entries are
/// ignored; parameters missing there fail to compile.
pub fn reduce_parsed(
    parsed: &ParseResult,
    params: &BTreeMap<String, f64>,
) -> Result<FirstOrderSystem, ReductionError> {
    let slots = state_slots(parsed)?;
    let var_names: Vec<String> = slots.iter().map(StateSlot::key).collect();
    let (parameter_names, parameter_values): (Vec<String>, Vec<f64>) = params
        .iter()
        .filter(|(name, _)| parsed.parameters.contains(*name))
        .map(|(name, value)| (name.clone(), *value))
        .unzip();
    let time_symbol = parsed
        .equations
        .iter()
        .find_map(|eq| eq.independent.clone())
        .unwrap_or_else(|| "t".to_string());
    let compiler = Compiler::new(&var_names, &parameter_names).with_time_symbol(time_symbol);

    let mut equations = Vec::with_capacity(slots.len());
    for eq in &parsed.equations {
        let (variable, order) = reducible(eq)?;
        // y^(i)' = y^(i+1) for the lower slots, the right side for the top one.
        for i in 0..order - 1 {
            let next = derivative_key(variable, i + 1);
            let index = var_names
                .iter()
                .position(|name| *name == next)
                .ok_or_else(|| ReductionError::UnknownVariable(next.clone()))?;
            equations.push(Bytecode::forward(index));
        }
        equations.push(compiler.compile(&eq.expr)?);
    }

    debug!(slots = ?var_names, params = ?parameter_names, "reduced to first-order system");
    Ok(FirstOrderSystem {
        slots,
        system: EquationSystem::new(equations, parameter_values),
        parameter_names,
    })
}

fn reducible(eq: &ParsedEquation) -> Result<(&str, usize), ReductionError> {
    if eq.form != EquationForm::Ordinary {
        return Err(ReductionError::InvalidEquation(format!(
            "`{} = {}` is not an ordinary differential equation",
            eq.lhs, eq.rhs
        )));
    }
    let variable = eq
        .dependent
        .as_deref()
        .ok_or_else(|| ReductionError::InvalidEquation(format!("`{}` names no unknown", eq.lhs)))?;
    match eq.order {
        0 => Err(ReductionError::InvalidEquation(format!(
            "`{}` is not a derivative",
            eq.lhs
        ))),
        order if order > MAX_ORDER => Err(ReductionError::UnsupportedOrder { order }),
        order => Ok((variable, order)),
    }
}

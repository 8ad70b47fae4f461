//! Hand-written right-hand sides for the recognized equation families.
//!
//! Each model evaluates its canonical equation with the same operation order
//! the bytecode VM uses, so a specialized run and a generic run of the
//! canonical text produce the same trajectory.

use crate::equation_engine::Expr;
use crate::error::{EvaluationError, SolveError};
use crate::parser::{self, ParseResult};
use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archetype {
    Logistic,
    Exponential,
    HarmonicOscillator,
    DampedOscillator,
    Pendulum,
    LotkaVolterra,
}

impl Archetype {
    pub const ALL: [Archetype; 6] = [
        Archetype::Logistic,
        Archetype::Exponential,
        Archetype::HarmonicOscillator,
        Archetype::DampedOscillator,
        Archetype::Pendulum,
        Archetype::LotkaVolterra,
    ];

    pub fn canonical_equation(self) -> &'static str {
        match self {
            Archetype::Exponential => "dy/dt = r*y",
            Archetype::Logistic => "dy/dt = r*y*(1 - y/K)",
            Archetype::HarmonicOscillator => "d^2y/dt^2 = -k*y",
            Archetype::DampedOscillator => "d^2y/dt^2 = -k*y - c*dy/dt",
            Archetype::Pendulum => "d^2θ/dt^2 = -(g/L)*sin(θ)",
            Archetype::LotkaVolterra => "dx/dt = a*x - b*x*y\ndy/dt = c*x*y - d*y",
        }
    }

    /// Preset parameter values, keyed by the names used in `canonical_equation`.
    pub fn default_parameters(self) -> &'static [(&'static str, f64)] {
        match self {
            Archetype::Exponential => &[("r", 0.5)],
            Archetype::Logistic => &[("r", 1.0), ("K", 10.0)],
            Archetype::HarmonicOscillator => &[("k", 1.0)],
            Archetype::DampedOscillator => &[("k", 1.0), ("c", 0.2)],
            Archetype::Pendulum => &[("g", 9.81), ("L", 1.0)],
            Archetype::LotkaVolterra => &[("a", 1.1), ("b", 0.4), ("c", 0.1), ("d", 0.4)],
        }
    }

    /// Preset initial conditions as `(variable, derivative order, value)`.
    pub fn default_initial_conditions(self) -> &'static [(&'static str, usize, f64)] {
        match self {
            Archetype::Exponential => &[("y", 0, 1.0)],
            Archetype::Logistic => &[("y", 0, 0.5)],
            Archetype::HarmonicOscillator | Archetype::DampedOscillator => {
                &[("y", 0, 1.0), ("y", 1, 0.0)]
            }
            Archetype::Pendulum => &[("θ", 0, 0.5), ("θ", 1, 0.0)],
            Archetype::LotkaVolterra => &[("x", 0, 10.0), ("y", 0, 5.0)],
        }
    }

    /// True when `parsed` is the canonical equation up to the names of its
    /// dependent variables. Only then may the closed form replace it.
    pub fn matches_canonical_form(self, parsed: &ParseResult) -> bool {
        let canonical = parser::parse(self.canonical_equation());
        if !parsed.valid || !canonical.valid || parsed.equations.len() != canonical.equations.len()
        {
            return false;
        }
        if parsed.parameters != canonical.parameters {
            return false;
        }
        let shapes = |result: &ParseResult| -> Option<Vec<(usize, Expr)>> {
            let dependents: Vec<&str> = result
                .equations
                .iter()
                .map(|eq| eq.dependent.as_deref())
                .collect::<Option<_>>()?;
            Some(
                result
                    .equations
                    .iter()
                    .map(|eq| (eq.order, positional(&eq.expr, &dependents)))
                    .collect(),
            )
        };
        match (shapes(parsed), shapes(&canonical)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Archetype::Logistic => "Logistic",
            Archetype::Exponential => "Exponential",
            Archetype::HarmonicOscillator => "Harmonic Oscillator",
            Archetype::DampedOscillator => "Damped Oscillator",
            Archetype::Pendulum => "Pendulum",
            Archetype::LotkaVolterra => "Lotka-Volterra",
        })
    }
}

/// Replaces dependent-variable names by their line position.
fn positional(expr: &Expr, dependents: &[&str]) -> Expr {
    let slot = |name: &str| {
        dependents
            .iter()
            .position(|d| *d == name)
            .map(|i| format!("#{i}"))
    };
    match expr {
        Expr::Number(n) => Expr::Number(*n),
        Expr::Variable(name) => Expr::Variable(slot(name).unwrap_or_else(|| name.clone())),
        Expr::Derivative(name, order) => {
            Expr::Derivative(slot(name).unwrap_or_else(|| name.clone()), *order)
        }
        Expr::PartialDerivative(name, wrt) => {
            Expr::PartialDerivative(slot(name).unwrap_or_else(|| name.clone()), wrt.clone())
        }
        Expr::Binary(left, op, right) => Expr::Binary(
            Box::new(positional(left, dependents)),
            *op,
            Box::new(positional(right, dependents)),
        ),
        Expr::Neg(inner) => Expr::Neg(Box::new(positional(inner, dependents))),
        Expr::Call(func, arg) => Expr::Call(*func, Box::new(positional(arg, dependents))),
    }
}

/// A closed-form right-hand side with its physical parameters bound.
///
/// Second-order models use the state layout `[position, velocity]`;
/// Lotka–Volterra uses `[prey, predator]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "archetype", rename_all = "snake_case")]
pub enum SpecializedModel {
    Exponential { r: f64 },
    Logistic { r: f64, k: f64 },
    HarmonicOscillator { k: f64 },
    DampedOscillator { k: f64, c: f64 },
    Pendulum { g: f64, l: f64 },
    LotkaVolterra { a: f64, b: f64, c: f64, d: f64 },
}

impl SpecializedModel {
    /// Binds the archetype's parameters by their canonical names.
    pub fn from_parameters(
        archetype: Archetype,
        params: &BTreeMap<String, f64>,
    ) -> Result<Self, SolveError> {
        let get = |name: &str| {
            params
                .get(name)
                .copied()
                .ok_or_else(|| SolveError::MissingParameter(name.to_string()))
        };
        Ok(match archetype {
            Archetype::Exponential => SpecializedModel::Exponential { r: get("r")? },
            Archetype::Logistic => SpecializedModel::Logistic {
                r: get("r")?,
                k: get("K")?,
            },
            Archetype::HarmonicOscillator => SpecializedModel::HarmonicOscillator { k: get("k")? },
            Archetype::DampedOscillator => SpecializedModel::DampedOscillator {
                k: get("k")?,
                c: get("c")?,
            },
            Archetype::Pendulum => SpecializedModel::Pendulum {
                g: get("g")?,
                l: get("L")?,
            },
            Archetype::LotkaVolterra => SpecializedModel::LotkaVolterra {
                a: get("a")?,
                b: get("b")?,
                c: get("c")?,
                d: get("d")?,
            },
        })
    }

    pub fn archetype(&self) -> Archetype {
        match self {
            SpecializedModel::Exponential { .. } => Archetype::Exponential,
            SpecializedModel::Logistic { .. } => Archetype::Logistic,
            SpecializedModel::HarmonicOscillator { .. } => Archetype::HarmonicOscillator,
            SpecializedModel::DampedOscillator { .. } => Archetype::DampedOscillator,
            SpecializedModel::Pendulum { .. } => Archetype::Pendulum,
            SpecializedModel::LotkaVolterra { .. } => Archetype::LotkaVolterra,
        }
    }
}

impl<T: Scalar> DynamicalSystem<T> for SpecializedModel {
    fn dimension(&self) -> usize {
        match self {
            SpecializedModel::Exponential { .. } | SpecializedModel::Logistic { .. } => 1,
            _ => 2,
        }
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) -> Result<(), EvaluationError> {
        let p = T::constant;
        match *self {
            SpecializedModel::Exponential { r } => {
                out[0] = p(r) * x[0];
            }
            SpecializedModel::Logistic { r, k } => {
                let k = p(k);
                if k.is_zero() {
                    return Err(EvaluationError::DivisionByZero);
                }
                out[0] = p(r) * x[0] * (T::one() - x[0] / k);
            }
            SpecializedModel::HarmonicOscillator { k } => {
                out[0] = x[1];
                out[1] = -p(k) * x[0];
            }
            SpecializedModel::DampedOscillator { k, c } => {
                out[0] = x[1];
                out[1] = -p(k) * x[0] - p(c) * x[1];
            }
            SpecializedModel::Pendulum { g, l } => {
                let l = p(l);
                if l.is_zero() {
                    return Err(EvaluationError::DivisionByZero);
                }
                out[0] = x[1];
                out[1] = -(p(g) / l) * x[0].sin();
            }
            SpecializedModel::LotkaVolterra { a, b, c, d } => {
                let (prey, predator) = (x[0], x[1]);
                out[0] = p(a) * prey - p(b) * prey * predator;
                out[1] = p(c) * prey * predator - p(d) * predator;
            }
        }
        Ok(())
    }
}

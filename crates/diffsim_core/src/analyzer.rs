//! Structural classification of equations and solver recommendation.
//!
//! Every property is computed from the parsed right-side AST rather than from
//! raw substrings, so `-k*y` inside a damped oscillator cannot be mistaken for
//! a bare harmonic restoring term.

use crate::equation_engine::{BinaryOp, Expr, Function};
use crate::library::Archetype;
use crate::parser::{self, EquationForm, ParseResult, ParsedEquation};
use crate::solvers::RecommendedMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Damping coefficients at or above this magnitude mark a damped oscillator as stiff.
const STIFF_DAMPING_COEFFICIENT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquationKind {
    Ordinary,
    Partial,
    System,
    Algebraic,
    Unknown,
}

impl From<EquationForm> for EquationKind {
    fn from(form: EquationForm) -> Self {
        match form {
            EquationForm::Ordinary => EquationKind::Ordinary,
            EquationForm::Partial => EquationKind::Partial,
            EquationForm::Algebraic => EquationKind::Algebraic,
            EquationForm::Unknown => EquationKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stiffness {
    NonStiff,
    ModeratelyStiff,
    Stiff,
    Unknown,
}

impl Stiffness {
    fn rank(self) -> u8 {
        match self {
            Stiffness::Unknown | Stiffness::NonStiff => 0,
            Stiffness::ModeratelyStiff => 1,
            Stiffness::Stiff => 2,
        }
    }

    /// The worse of two levels (`NonStiff < ModeratelyStiff < Stiff`).
    pub fn escalate(self, other: Stiffness) -> Stiffness {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Stiffness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stiffness::NonStiff => "non-stiff",
            Stiffness::ModeratelyStiff => "moderately stiff",
            Stiffness::Stiff => "stiff",
            Stiffness::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub valid: bool,
    pub error: Option<String>,
    pub kind: EquationKind,
    pub order: usize,
    pub linear: bool,
    pub homogeneous: bool,
    pub autonomous: bool,
    pub stiffness: Stiffness,
    pub archetype: Option<Archetype>,
    pub recommended_method: RecommendedMethod,
    pub equation_count: usize,
    pub required_initial_conditions: usize,
}

/// Assembles one fully-populated `Analysis`.
#[derive(Debug, Clone)]
pub struct AnalysisBuilder {
    kind: EquationKind,
    order: usize,
    linear: bool,
    homogeneous: bool,
    autonomous: bool,
    stiffness: Stiffness,
    archetype: Option<Archetype>,
    equation_count: usize,
}

impl AnalysisBuilder {
    pub fn new(kind: EquationKind) -> Self {
        Self {
            kind,
            order: 0,
            linear: false,
            homogeneous: false,
            autonomous: false,
            stiffness: Stiffness::Unknown,
            archetype: None,
            equation_count: 1,
        }
    }

    pub fn order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn linear(mut self, linear: bool) -> Self {
        self.linear = linear;
        self
    }

    pub fn homogeneous(mut self, homogeneous: bool) -> Self {
        self.homogeneous = homogeneous;
        self
    }

    pub fn autonomous(mut self, autonomous: bool) -> Self {
        self.autonomous = autonomous;
        self
    }

    pub fn stiffness(mut self, stiffness: Stiffness) -> Self {
        self.stiffness = stiffness;
        self
    }

    pub fn archetype(mut self, archetype: Option<Archetype>) -> Self {
        self.archetype = archetype;
        self
    }

    pub fn equation_count(mut self, count: usize) -> Self {
        self.equation_count = count;
        self
    }

    /// Derives the recommended method and initial-condition count.
    pub fn build(self) -> Analysis {
        let recommended_method = recommend_method(
            self.kind,
            self.order,
            self.linear,
            self.stiffness,
            self.archetype,
        );
        Analysis {
            valid: true,
            error: None,
            kind: self.kind,
            order: self.order,
            linear: self.linear,
            homogeneous: self.homogeneous,
            autonomous: self.autonomous,
            stiffness: self.stiffness,
            archetype: self.archetype,
            recommended_method,
            equation_count: self.equation_count,
            required_initial_conditions: self.equation_count * self.order,
        }
    }
}

impl Analysis {
    fn invalid(error: Option<String>, is_system: bool) -> Self {
        let mut analysis = AnalysisBuilder::new(if is_system {
            EquationKind::System
        } else {
            EquationKind::Unknown
        })
        .equation_count(0)
        .build();
        analysis.valid = false;
        analysis.error = error;
        analysis
    }

    /// Human-readable summary of the classification.
    pub fn explanation(&self) -> String {
        if !self.valid {
            return format!(
                "Unable to analyze equation: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }

        let mut text = String::new();
        let system = self.kind == EquationKind::System;
        let subject = if system { "system" } else { "equation" };

        match self.kind {
            EquationKind::Ordinary => text.push_str(&format!(
                "This is an ordinary differential equation (ODE) of order {}. ",
                self.order
            )),
            EquationKind::Partial => text.push_str("This is a partial differential equation (PDE). "),
            EquationKind::System => text.push_str(&format!(
                "This is a system of {} differential equation{}. The highest order in the system is {}. ",
                self.equation_count,
                plural(self.equation_count),
                self.order
            )),
            EquationKind::Algebraic => {
                text.push_str("This is an algebraic equation, not a differential equation. ")
            }
            EquationKind::Unknown => text.push_str("The equation type could not be determined. "),
        }

        if let Some(archetype) = self.archetype {
            text.push_str(&format!("It appears to be a {archetype} {subject}. "));
        }

        text.push_str(match (system, self.linear) {
            (true, true) => "All equations in the system are linear. ",
            (true, false) => "The system contains non-linear equations. ",
            (false, true) => "The equation is linear. ",
            (false, false) => "The equation is non-linear. ",
        });

        if self.kind == EquationKind::Ordinary {
            text.push_str(if self.homogeneous {
                "It is homogeneous. "
            } else {
                "It is non-homogeneous. "
            });
        }

        text.push_str(&format!(
            "The {subject} is {}. ",
            if self.autonomous {
                "autonomous (time-independent)"
            } else {
                "non-autonomous (time-dependent)"
            }
        ));

        match self.stiffness {
            Stiffness::Stiff => text.push_str(&format!(
                "The {subject} appears to be stiff, which may require special numerical methods. "
            )),
            Stiffness::ModeratelyStiff => {
                text.push_str(&format!("The {subject} may be moderately stiff. "))
            }
            Stiffness::NonStiff | Stiffness::Unknown => {}
        }

        if matches!(self.kind, EquationKind::Ordinary | EquationKind::System) {
            text.push_str(&format!(
                "You will need to provide {} initial condition{} in total ({} for each variable). ",
                self.required_initial_conditions,
                plural(self.required_initial_conditions),
                self.order
            ));
        }

        text.push_str(&format!(
            "Based on this analysis, the {} method is recommended for solving this {subject}.",
            self.recommended_method
        ));
        text
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Analyzes raw equation text (one line, or several lines for a system).
pub fn analyze(text: &str) -> Analysis {
    analyze_parsed(&parser::parse(text))
}

/// Analyzes an already parsed text.
pub fn analyze_parsed(parsed: &ParseResult) -> Analysis {
    if !parsed.valid {
        return Analysis::invalid(parsed.error.clone(), parsed.is_system);
    }

    let states = parsed.dependent_vars.clone();
    let analysis = if parsed.is_system {
        analyze_system(&parsed.equations, &states)
    } else {
        analyze_line(&parsed.equations[0], &states)
    };
    debug!(
        kind = ?analysis.kind,
        order = analysis.order,
        archetype = ?analysis.archetype,
        method = %analysis.recommended_method,
        "analyzed equation"
    );
    analysis
}

fn analyze_line(eq: &ParsedEquation, states: &BTreeSet<String>) -> Analysis {
    let kind = EquationKind::from(eq.form);
    let differential = matches!(kind, EquationKind::Ordinary | EquationKind::Partial);
    let wrt = eq.independent.as_deref().unwrap_or("t");

    let archetype = detect_archetype(std::slice::from_ref(eq), states);
    AnalysisBuilder::new(kind)
        .order(eq.order)
        .linear(differential && is_linear(&eq.expr, states))
        .homogeneous(kind == EquationKind::Ordinary && is_homogeneous(&eq.expr, states))
        .autonomous(states.contains(wrt) || !eq.expr.references(wrt))
        .stiffness(estimate_stiffness(&eq.expr, archetype))
        .archetype(archetype)
        .build()
}

fn analyze_system(equations: &[ParsedEquation], states: &BTreeSet<String>) -> Analysis {
    let components: Vec<Analysis> = equations.iter().map(|eq| analyze_line(eq, states)).collect();

    let order = components.iter().map(|a| a.order).max().unwrap_or(0);
    let stiffness = components
        .iter()
        .fold(Stiffness::NonStiff, |acc, a| acc.escalate(a.stiffness));

    AnalysisBuilder::new(EquationKind::System)
        .order(order)
        .linear(components.iter().all(|a| a.linear))
        .homogeneous(components.iter().all(|a| a.homogeneous))
        .autonomous(components.iter().all(|a| a.autonomous))
        .stiffness(stiffness)
        .archetype(detect_archetype(equations, states))
        .equation_count(equations.len())
        .build()
}

/// Decision table, evaluated top to bottom; the first matching row wins.
pub fn recommend_method(
    kind: EquationKind,
    order: usize,
    linear: bool,
    stiffness: Stiffness,
    archetype: Option<Archetype>,
) -> RecommendedMethod {
    match (kind, archetype) {
        (EquationKind::Partial, _) => RecommendedMethod::FiniteDifference,
        (EquationKind::Algebraic, _) => RecommendedMethod::Analytical,
        (_, Some(Archetype::Pendulum | Archetype::LotkaVolterra)) => RecommendedMethod::Rk4,
        // No implicit solver exists; RK4 is the most stable option available.
        _ if stiffness == Stiffness::Stiff => RecommendedMethod::Rk4,
        _ if !linear => RecommendedMethod::Rk4,
        _ if order > 1 => RecommendedMethod::Rk4,
        (EquationKind::Ordinary, _) if order == 1 && stiffness == Stiffness::NonStiff => {
            RecommendedMethod::Midpoint
        }
        _ => RecommendedMethod::Rk4,
    }
}

// --- Archetype rule table ---

struct RuleInput<'a> {
    equations: &'a [ParsedEquation],
    states: &'a BTreeSet<String>,
}

impl<'a> RuleInput<'a> {
    /// The only equation, for single-equation archetypes of the given order.
    fn single(&self, order: usize) -> Option<(&'a Expr, &'a str, Unknowns<'a>)> {
        match self.equations {
            [eq] if eq.order == order && eq.form == EquationForm::Ordinary => {
                let unknowns = Unknowns {
                    states: self.states,
                    clock: eq.independent.as_deref().unwrap_or("t"),
                };
                Some((&eq.expr, eq.dependent.as_deref()?, unknowns))
            }
            _ => None,
        }
    }
}

/// Symbols a coefficient may not depend on: the state and the clock.
#[derive(Clone, Copy)]
struct Unknowns<'a> {
    states: &'a BTreeSet<String>,
    clock: &'a str,
}

impl Unknowns<'_> {
    /// A factor built only from numbers and parameters.
    fn is_coefficient(self, expr: &Expr) -> bool {
        !depends_on_state(expr, self.states) && !expr.references(self.clock)
    }
}

type ArchetypeRule = (Archetype, fn(&RuleInput) -> bool);

/// Priority order matters: the first matching rule names the archetype.
const ARCHETYPE_RULES: [ArchetypeRule; 6] = [
    (Archetype::Logistic, is_logistic),
    (Archetype::Exponential, is_exponential),
    (Archetype::HarmonicOscillator, is_harmonic),
    (Archetype::DampedOscillator, is_damped),
    (Archetype::Pendulum, is_pendulum),
    (Archetype::LotkaVolterra, is_lotka_volterra),
];

fn detect_archetype(equations: &[ParsedEquation], states: &BTreeSet<String>) -> Option<Archetype> {
    let input = RuleInput { equations, states };
    ARCHETYPE_RULES
        .iter()
        .find(|(_, rule)| rule(&input))
        .map(|(archetype, _)| *archetype)
}

// dy/dt = r*y*(1 - y/K)
fn is_logistic(input: &RuleInput) -> bool {
    let Some((expr, dep, unknowns)) = input.single(1) else {
        return false;
    };
    let mut saturation = false;
    expr.visit(&mut |node| {
        if let Expr::Binary(one, BinaryOp::Sub, ratio) = node {
            if let (Expr::Number(n), Expr::Binary(num, BinaryOp::Div, den)) =
                (one.as_ref(), ratio.as_ref())
            {
                saturation |= *n == 1.0
                    && matches!(num.as_ref(), Expr::Variable(v) if v == dep)
                    && unknowns.is_coefficient(den);
            }
        }
    });
    saturation && !is_linear(expr, input.states)
}

// dy/dt = r*y
fn is_exponential(input: &RuleInput) -> bool {
    input
        .single(1)
        .is_some_and(|(expr, dep, unknowns)| {
            monomial_sign(expr, &Target::Value(dep), unknowns).is_some()
        })
}

// d²y/dt² = -k*y
fn is_harmonic(input: &RuleInput) -> bool {
    input.single(2).is_some_and(|(expr, dep, unknowns)| {
        monomial_sign(expr, &Target::Value(dep), unknowns) == Some(Sign::Negative)
    })
}

// d²y/dt² = -k*y - c*dy/dt
fn is_damped(input: &RuleInput) -> bool {
    let Some((expr, dep, unknowns)) = input.single(2) else {
        return false;
    };
    let terms = additive_terms(expr);
    let [(s1, t1), (s2, t2)] = terms.as_slice() else {
        return false;
    };
    let restoring = |sign: Sign, term: &Expr| {
        monomial_sign(term, &Target::Value(dep), unknowns).map(|s| s.times(sign))
    };
    let damping = |sign: Sign, term: &Expr| {
        monomial_sign(term, &Target::Velocity(dep), unknowns).map(|s| s.times(sign))
    };
    let negative = Some(Sign::Negative);
    (restoring(*s1, *t1) == negative && damping(*s2, *t2) == negative)
        || (damping(*s1, *t1) == negative && restoring(*s2, *t2) == negative)
}

// d²θ/dt² = -(g/L)*sin(θ)
fn is_pendulum(input: &RuleInput) -> bool {
    let Some((expr, dep, _)) = input.single(2) else {
        return false;
    };
    let mut found = false;
    expr.visit(&mut |node| {
        if let Expr::Call(Function::Sin, arg) = node {
            found |= arg.references(dep);
        }
    });
    found
}

// dx/dt = a*x - b*x*y, dy/dt = c*x*y - d*y
fn is_lotka_volterra(input: &RuleInput) -> bool {
    let [first, second] = input.equations else {
        return false;
    };
    let (Some(x), Some(y)) = (first.dependent.as_deref(), second.dependent.as_deref()) else {
        return false;
    };
    x != y
        && first.order == 1
        && second.order == 1
        && has_interaction(&first.expr, x, y)
        && has_interaction(&second.expr, x, y)
}

fn has_interaction(expr: &Expr, x: &str, y: &str) -> bool {
    let mut found = false;
    expr.visit(&mut |node| {
        if let Expr::Binary(_, BinaryOp::Mul, _) = node {
            found |= node.references(x) && node.references(y);
        }
    });
    found
}

// --- AST predicates ---

/// True if the expression reads any state variable or derivative.
fn depends_on_state(expr: &Expr, states: &BTreeSet<String>) -> bool {
    let mut found = false;
    expr.visit(&mut |node| match node {
        Expr::Variable(name) => found |= states.contains(name),
        Expr::Derivative(_, _) | Expr::PartialDerivative(_, _) => found = true,
        _ => {}
    });
    found
}

fn is_linear(expr: &Expr, states: &BTreeSet<String>) -> bool {
    match expr {
        Expr::Number(_)
        | Expr::Variable(_)
        | Expr::Derivative(_, _)
        | Expr::PartialDerivative(_, _) => true,
        Expr::Neg(inner) => is_linear(inner, states),
        Expr::Binary(left, op, right) => {
            let l = depends_on_state(left, states);
            let r = depends_on_state(right, states);
            let combines = match op {
                BinaryOp::Add | BinaryOp::Sub => false,
                BinaryOp::Mul => l && r,
                BinaryOp::Div => r,
                BinaryOp::Pow => l || r,
            };
            !combines && is_linear(left, states) && is_linear(right, states)
        }
        Expr::Call(_, arg) => !depends_on_state(arg, states),
    }
}

/// Homogeneous when every additive term involves the unknown or its derivatives.
fn is_homogeneous(expr: &Expr, states: &BTreeSet<String>) -> bool {
    additive_terms(expr)
        .iter()
        .all(|(_, term)| depends_on_state(term, states))
}

fn estimate_stiffness(expr: &Expr, archetype: Option<Archetype>) -> Stiffness {
    if archetype == Some(Archetype::DampedOscillator) {
        let large_damping = additive_terms(expr).iter().any(|(_, term)| {
            let mut has_velocity = false;
            term.visit(&mut |node| has_velocity |= matches!(node, Expr::Derivative(_, _)));
            let mut scales = Vec::new();
            scaling_literals(term, &mut scales);
            has_velocity
                && scales
                    .iter()
                    .any(|n| n.abs() >= STIFF_DAMPING_COEFFICIENT)
        });
        return if large_damping {
            Stiffness::Stiff
        } else {
            Stiffness::ModeratelyStiff
        };
    }

    let mut exponential = false;
    expr.visit(&mut |node| match node {
        Expr::Call(Function::Exp, _) => exponential = true,
        Expr::Binary(base, BinaryOp::Pow, _) => {
            exponential |= matches!(base.as_ref(), Expr::Variable(v) if v == "e")
        }
        _ => {}
    });
    if exponential {
        Stiffness::ModeratelyStiff
    } else {
        Stiffness::NonStiff
    }
}

/// Numeric literals that multiply a term, as in `1000*dy/dt`. Divisors are skipped.
fn scaling_literals(term: &Expr, out: &mut Vec<f64>) {
    match term {
        Expr::Number(n) => out.push(*n),
        Expr::Neg(inner) => scaling_literals(inner, out),
        Expr::Binary(left, BinaryOp::Mul, right) => {
            scaling_literals(left, out);
            scaling_literals(right, out);
        }
        Expr::Binary(numerator, BinaryOp::Div, _) => scaling_literals(numerator, out),
        _ => {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Positive,
    Negative,
}

impl Sign {
    fn times(self, other: Sign) -> Sign {
        if self == other {
            Sign::Positive
        } else {
            Sign::Negative
        }
    }
}

enum Target<'a> {
    Value(&'a str),
    Velocity(&'a str),
}

impl Target<'_> {
    fn matches(&self, expr: &Expr) -> bool {
        match (self, expr) {
            (Target::Value(dep), Expr::Variable(v)) => v == dep,
            (Target::Velocity(dep), Expr::Derivative(v, 1)) => v == dep,
            _ => false,
        }
    }
}

/// Flattens top-level `+`, `-` and negation into signed terms.
fn additive_terms(expr: &Expr) -> Vec<(Sign, &Expr)> {
    fn collect<'e>(expr: &'e Expr, sign: Sign, out: &mut Vec<(Sign, &'e Expr)>) {
        match expr {
            Expr::Binary(left, BinaryOp::Add, right) => {
                collect(left, sign, out);
                collect(right, sign, out);
            }
            Expr::Binary(left, BinaryOp::Sub, right) => {
                collect(left, sign, out);
                collect(right, sign.times(Sign::Negative), out);
            }
            Expr::Neg(inner) => collect(inner, sign.times(Sign::Negative), out),
            _ => out.push((sign, expr)),
        }
    }
    let mut out = Vec::new();
    collect(expr, Sign::Positive, &mut out);
    out
}

/// If `expr` is `coefficient * target` (in any product/quotient arrangement),
/// returns the syntactic sign of the coefficient.
fn monomial_sign(expr: &Expr, target: &Target, unknowns: Unknowns) -> Option<Sign> {
    if target.matches(expr) {
        return Some(Sign::Positive);
    }
    match expr {
        Expr::Neg(inner) => monomial_sign(inner, target, unknowns).map(|s| s.times(Sign::Negative)),
        Expr::Binary(left, BinaryOp::Mul, right) => {
            if unknowns.is_coefficient(left) {
                monomial_sign(right, target, unknowns).map(|s| s.times(coefficient_sign(left)))
            } else if unknowns.is_coefficient(right) {
                monomial_sign(left, target, unknowns).map(|s| s.times(coefficient_sign(right)))
            } else {
                None
            }
        }
        Expr::Binary(left, BinaryOp::Div, right) if unknowns.is_coefficient(right) => {
            monomial_sign(left, target, unknowns).map(|s| s.times(coefficient_sign(right)))
        }
        _ => None,
    }
}

fn coefficient_sign(expr: &Expr) -> Sign {
    match expr {
        Expr::Number(n) if *n < 0.0 => Sign::Negative,
        Expr::Neg(inner) => coefficient_sign(inner).times(Sign::Negative),
        Expr::Binary(left, BinaryOp::Mul | BinaryOp::Div, right) => {
            coefficient_sign(left).times(coefficient_sign(right))
        }
        _ => Sign::Positive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth_is_linear_first_order() {
        let analysis = analyze("dy/dt = r*y");
        assert!(analysis.valid);
        assert_eq!(analysis.kind, EquationKind::Ordinary);
        assert_eq!(analysis.order, 1);
        assert!(analysis.linear);
        assert!(analysis.homogeneous);
        assert!(analysis.autonomous);
        assert_eq!(analysis.stiffness, Stiffness::NonStiff);
        assert_eq!(analysis.archetype, Some(Archetype::Exponential));
        assert_eq!(analysis.recommended_method, RecommendedMethod::Midpoint);
        assert_eq!(analysis.required_initial_conditions, 1);
    }

    #[test]
    fn logistic_wins_over_exponential() {
        let analysis = analyze("dy/dt = r*y*(1 - y/K)");
        assert_eq!(analysis.archetype, Some(Archetype::Logistic));
        assert!(!analysis.linear);
        assert_eq!(analysis.recommended_method, RecommendedMethod::Rk4);
    }

    #[test]
    fn harmonic_and_damped_oscillators_are_distinguished() {
        let harmonic = analyze("d^2y/dt^2 = -k*y");
        assert_eq!(harmonic.order, 2);
        assert_eq!(harmonic.archetype, Some(Archetype::HarmonicOscillator));
        assert_eq!(harmonic.recommended_method, RecommendedMethod::Rk4);
        assert_eq!(harmonic.required_initial_conditions, 2);

        let damped = analyze("d²y/dt² = -k*y - c*dy/dt");
        assert_eq!(damped.archetype, Some(Archetype::DampedOscillator));
        assert_eq!(damped.stiffness, Stiffness::ModeratelyStiff);
        assert!(damped.linear);

        let heavy = analyze("d^2y/dt^2 = -k*y - 100*c*dy/dt");
        assert_eq!(heavy.archetype, Some(Archetype::DampedOscillator));
        assert_eq!(heavy.stiffness, Stiffness::Stiff);
    }

    #[test]
    fn divisors_do_not_count_as_heavy_damping() {
        let light = analyze("d^2y/dt^2 = -k*y - c*dy/dt/10");
        assert_eq!(light.archetype, Some(Archetype::DampedOscillator));
        assert_eq!(light.stiffness, Stiffness::ModeratelyStiff);

        let heavy = analyze("d^2y/dt^2 = -k*y - 20*dy/dt/c");
        assert_eq!(heavy.stiffness, Stiffness::Stiff);
    }

    #[test]
    fn own_independent_variable_is_not_a_coefficient() {
        assert_eq!(analyze("dy/dx = x*y").archetype, None);
        assert_eq!(analyze("dy/dt = t*y").archetype, None);
        assert_eq!(
            analyze("dy/dx = r*y").archetype,
            Some(Archetype::Exponential)
        );
        assert_eq!(
            analyze("d^2u/dx^2 = -k*u").archetype,
            Some(Archetype::HarmonicOscillator)
        );
    }

    #[test]
    fn pendulum_is_nonlinear() {
        let analysis = analyze("d^2θ/dt^2 = -(g/L)*sin(θ)");
        assert_eq!(analysis.archetype, Some(Archetype::Pendulum));
        assert!(!analysis.linear);
        assert_eq!(analysis.recommended_method, RecommendedMethod::Rk4);
    }

    #[test]
    fn lotka_volterra_system_is_combined() {
        let analysis = analyze("dx/dt = a*x - b*x*y\ndy/dt = c*x*y - d*y");
        assert!(analysis.valid);
        assert_eq!(analysis.kind, EquationKind::System);
        assert_eq!(analysis.order, 1);
        assert_eq!(analysis.equation_count, 2);
        assert_eq!(analysis.required_initial_conditions, 2);
        assert!(!analysis.linear);
        assert!(analysis.autonomous);
        assert_eq!(analysis.archetype, Some(Archetype::LotkaVolterra));
        assert_eq!(analysis.recommended_method, RecommendedMethod::Rk4);
    }

    #[test]
    fn system_combines_orders_and_stiffness() {
        let analysis = analyze("d^2x/dt^2 = -x\ndy/dt = exp(-y)");
        assert_eq!(analysis.order, 2);
        assert_eq!(analysis.required_initial_conditions, 4);
        assert_eq!(analysis.stiffness, Stiffness::ModeratelyStiff);
        assert_eq!(analysis.archetype, None);
    }

    #[test]
    fn coefficients_do_not_break_homogeneity() {
        assert!(analyze("dy/dt = 2*y").homogeneous);
        assert!(!analyze("dy/dt = 2*y + 3").homogeneous);
        assert!(!analyze("dy/dt = -y + sin(t)").homogeneous);
    }

    #[test]
    fn time_dependence_breaks_autonomy() {
        assert!(!analyze("dy/dt = -y + t").autonomous);
        assert!(analyze("dy/dt = -y").autonomous);
        assert!(!analyze("dy/dx = x*y").autonomous);
    }

    #[test]
    fn nonlinear_patterns_are_detected() {
        for text in [
            "dy/dt = y*y",
            "dy/dt = y^2",
            "dy/dt = sin(y)",
            "dy/dt = cos(2*y)",
            "dy/dt = exp(y)",
            "dy/dt = log(y)",
            "dy/dt = 1/y",
        ] {
            assert!(!analyze(text).linear, "{text}");
        }
        assert!(analyze("dy/dt = sin(t)*y").linear);
    }

    #[test]
    fn partial_and_algebraic_equations_get_non_integrator_recommendations() {
        let pde = analyze("∂u/∂t = alpha*u");
        assert_eq!(pde.kind, EquationKind::Partial);
        assert_eq!(pde.recommended_method, RecommendedMethod::FiniteDifference);

        for text in [
            "∂u/∂t = alpha*∂²u/∂x²",
            "∂u/∂t = alpha*∂^2u/∂x^2",
            "\\partial u/\\partial t = alpha * \\partial^2 u / \\partial x^2",
            "∂²u/∂t² = c^2*∂²u/∂x²",
        ] {
            let heat = analyze(text);
            assert!(heat.valid, "{text}: {:?}", heat.error);
            assert_eq!(heat.kind, EquationKind::Partial, "{text}");
            assert_eq!(heat.recommended_method, RecommendedMethod::FiniteDifference, "{text}");
            assert!(heat.linear, "{text}");
        }

        let algebraic = analyze("y = 2*x");
        assert_eq!(algebraic.kind, EquationKind::Algebraic);
        assert_eq!(algebraic.order, 0);
        assert_eq!(algebraic.recommended_method, RecommendedMethod::Analytical);
    }

    #[test]
    fn invalid_text_yields_invalid_analysis() {
        let analysis = analyze("dy/dt y");
        assert!(!analysis.valid);
        assert_eq!(analysis.kind, EquationKind::Unknown);
        assert!(analysis.explanation().contains("equals sign"));
    }

    #[test]
    fn recommendation_table_is_ordered() {
        use Archetype::*;
        use EquationKind::*;
        assert_eq!(
            recommend_method(Ordinary, 1, true, Stiffness::NonStiff, Some(Pendulum)),
            RecommendedMethod::Rk4
        );
        assert_eq!(
            recommend_method(Ordinary, 1, true, Stiffness::Stiff, None),
            RecommendedMethod::Rk4
        );
        assert_eq!(
            recommend_method(Ordinary, 1, true, Stiffness::ModeratelyStiff, None),
            RecommendedMethod::Rk4
        );
        assert_eq!(
            recommend_method(Ordinary, 1, true, Stiffness::NonStiff, None),
            RecommendedMethod::Midpoint
        );
        assert_eq!(
            recommend_method(System, 1, true, Stiffness::NonStiff, None),
            RecommendedMethod::Rk4
        );
    }

    #[test]
    fn explanation_mentions_key_facts() {
        let text = analyze("d^2y/dt^2 = -k*y").explanation();
        assert!(text.contains("order 2"));
        assert!(text.contains("Harmonic Oscillator"));
        assert!(text.contains("2 initial conditions"));
        assert!(text.contains("rk4"));

        let system = analyze("dx/dt = a*x - b*x*y\ndy/dt = c*x*y - d*y").explanation();
        assert!(system.contains("system of 2 differential equations"));
        assert!(system.contains("Lotka-Volterra system"));
    }
}

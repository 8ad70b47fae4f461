//! Splits raw equation text into left and right sides, recognizes derivative
//! notation and classifies every referenced symbol.

use crate::equation_engine::{
    self, is_identifier_continue, read_identifier, read_order_marker, Expr, INDEPENDENT_VARIABLES,
};
use crate::error::EquationError;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Names that are always treated as parameters when they appear on a right side.
pub const PHYSICAL_PARAMETERS: [&str; 16] = [
    "g", "L", "r", "K", "k", "c", "α", "β", "δ", "γ", "ω", "alpha", "beta", "delta", "gamma",
    "omega",
];

const BIG_OPERATORS: [&str; 5] = ["sum", "prod", "product", "integral", "integrate"];

pub fn is_physical_parameter(name: &str) -> bool {
    PHYSICAL_PARAMETERS.contains(&name)
}

/// Shape of an equation's left side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EquationForm {
    /// `dy/dt`, `d^2y/dt^2`, `d²y/dt²`, `y''`.
    Ordinary,
    /// `∂u/∂t`, `\partial u/\partial x`.
    Partial,
    /// A bare identifier.
    Algebraic,
    /// Anything else that still splits cleanly on `=`.
    Unknown,
}

/// One successfully split equation line.
#[derive(Debug, Clone)]
pub struct ParsedEquation {
    pub lhs: String,
    pub rhs: String,
    pub form: EquationForm,
    pub dependent: Option<String>,
    /// The variable the derivative is taken with respect to.
    pub independent: Option<String>,
    pub order: usize,
    pub expr: Expr,
    pub symbols: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub valid: bool,
    pub independent_vars: BTreeSet<String>,
    pub dependent_vars: BTreeSet<String>,
    pub parameters: BTreeSet<String>,
    pub is_system: bool,
    pub error: Option<String>,
    #[serde(skip)]
    pub equations: Vec<ParsedEquation>,
    #[serde(skip)]
    pub failures: Vec<EquationError>,
}

impl ParseResult {
    fn invalid(failures: Vec<EquationError>, is_system: bool) -> Self {
        let joined = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        let error = if is_system {
            format!("Invalid system of equations: {joined}")
        } else {
            joined
        };
        Self {
            valid: false,
            is_system,
            error: Some(error),
            failures,
            ..Self::default()
        }
    }

    /// Independent and dependent variables together.
    pub fn variables(&self) -> BTreeSet<String> {
        self.independent_vars
            .union(&self.dependent_vars)
            .cloned()
            .collect()
    }
}

/// Non-blank, trimmed lines of an equation text.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

pub fn parse(text: &str) -> ParseResult {
    let lines = split_lines(text);
    let is_system = lines.len() > 1;
    if lines.is_empty() {
        return ParseResult::invalid(
            vec![EquationError::MissingEqualsSign {
                line: String::new(),
            }],
            false,
        );
    }

    let mut equations = Vec::with_capacity(lines.len());
    let mut failures = Vec::new();
    for line in &lines {
        match parse_line(line) {
            Ok(eq) => equations.push(eq),
            Err(err) => failures.push(err),
        }
    }
    if !failures.is_empty() {
        debug!(?failures, "equation text rejected");
        return ParseResult::invalid(failures, is_system);
    }

    let mut result = ParseResult {
        valid: true,
        is_system,
        ..ParseResult::default()
    };
    for eq in &equations {
        let (independent, dependent, parameters) = classify_symbols(eq);
        result.independent_vars.extend(independent);
        result.dependent_vars.extend(dependent);
        result.parameters.extend(parameters);
    }
    // A symbol that one line solves for is a variable everywhere in the system.
    let dependent = result.dependent_vars.clone();
    result.independent_vars.retain(|v| !dependent.contains(v));
    result.parameters.retain(|p| !dependent.contains(p));
    result.equations = equations;

    debug!(
        dependent = ?result.dependent_vars,
        parameters = ?result.parameters,
        is_system,
        "parsed equation text"
    );
    result
}

fn classify_symbols(eq: &ParsedEquation) -> (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>) {
    let mut independent = BTreeSet::new();
    let mut dependent = BTreeSet::new();
    let mut parameters = BTreeSet::new();

    if let Some(dep) = &eq.dependent {
        dependent.insert(dep.clone());
    }
    eq.expr.visit(&mut |node| {
        if let Expr::PartialDerivative(_, wrt) = node {
            independent.extend(wrt.iter().cloned());
        }
    });
    for symbol in &eq.symbols {
        if eq.dependent.as_deref() == Some(symbol.as_str()) {
            continue;
        }
        let reserved = INDEPENDENT_VARIABLES.contains(&symbol.as_str())
            || eq.independent.as_deref() == Some(symbol.as_str());
        if reserved && !is_physical_parameter(symbol) {
            independent.insert(symbol.clone());
        } else {
            parameters.insert(symbol.clone());
        }
    }
    (independent, dependent, parameters)
}

/// Parses one `<left> = <right>` line.
pub fn parse_line(line: &str) -> Result<ParsedEquation, EquationError> {
    let mut sides = line.split('=');
    let (lhs, rhs) = match (sides.next(), sides.next(), sides.next()) {
        (Some(lhs), Some(rhs), None) => (lhs.trim(), rhs.trim()),
        (_, None, _) => {
            return Err(EquationError::MissingEqualsSign {
                line: line.to_string(),
            })
        }
        _ => {
            return Err(EquationError::MultipleEqualsSigns {
                line: line.to_string(),
            })
        }
    };

    check_supported(rhs)?;
    let left = recognize_left_side(lhs)?;
    let expr = equation_engine::parse(rhs)
        .map_err(|err| EquationError::MalformedExpression(err.to_string()))?;
    let symbols = expr.free_symbols();

    Ok(ParsedEquation {
        lhs: lhs.to_string(),
        rhs: rhs.to_string(),
        form: left.form,
        dependent: left.dependent,
        independent: left.independent,
        order: left.order,
        expr,
        symbols,
    })
}

fn check_supported(rhs: &str) -> Result<(), EquationError> {
    let unsupported = |construct| {
        Err(EquationError::UnsupportedExpression {
            construct,
            rhs: rhs.to_string(),
        })
    };
    if rhs.contains('[') || rhs.contains(']') {
        return unsupported("matrix");
    }
    if rhs.contains('{') || rhs.contains('}') {
        return unsupported("piecewise");
    }
    if rhs.contains('|') {
        return unsupported("absolute value bars");
    }
    let words = rhs.split(|c: char| !is_identifier_continue(c));
    if words.into_iter().any(|w| BIG_OPERATORS.contains(&w)) {
        return unsupported("big operator");
    }
    Ok(())
}

struct LeftSide {
    form: EquationForm,
    dependent: Option<String>,
    independent: Option<String>,
    order: usize,
}

fn recognize_left_side(lhs: &str) -> Result<LeftSide, EquationError> {
    let compact: String = lhs
        .replace("\\partial", "∂")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let invalid = || EquationError::InvalidDifferentialNotation {
        lhs: lhs.to_string(),
    };

    if compact.contains('∂') {
        let (name, wrt, order) = match_quotient(&compact, '∂', None).ok_or_else(invalid)?;
        return Ok(LeftSide {
            form: EquationForm::Partial,
            dependent: Some(name),
            independent: Some(wrt),
            order,
        });
    }

    if compact.contains('d') && compact.contains('/') {
        let (name, wrt, order) =
            match_quotient(&compact, 'd', Some(&INDEPENDENT_VARIABLES)).ok_or_else(invalid)?;
        return Ok(LeftSide {
            form: EquationForm::Ordinary,
            dependent: Some(name),
            independent: Some(wrt),
            order,
        });
    }

    let chars: Vec<char> = compact.chars().collect();
    let mut i = 0;
    if let Some(name) = read_identifier(&chars, &mut i) {
        let primes = chars[i..].iter().take_while(|&&c| c == '\'').count();
        if i + primes == chars.len() {
            return Ok(if primes > 0 {
                LeftSide {
                    form: EquationForm::Ordinary,
                    dependent: Some(name),
                    independent: Some("t".to_string()),
                    order: primes,
                }
            } else {
                LeftSide {
                    form: EquationForm::Algebraic,
                    dependent: Some(name),
                    independent: None,
                    order: 0,
                }
            });
        }
    }

    Ok(LeftSide {
        form: EquationForm::Unknown,
        dependent: None,
        independent: None,
        order: 0,
    })
}

/// Matches `<op>[^n|²|³]<name>/<op><wrt>[^n|²|³]` and returns `(name, wrt, order)`.
fn match_quotient(
    compact: &str,
    op: char,
    allowed_wrt: Option<&[&str]>,
) -> Option<(String, String, usize)> {
    let (num, den) = compact.split_once('/')?;

    let num: Vec<char> = num.chars().collect();
    let mut i = 0;
    expect_char(&num, &mut i, op)?;
    let order = read_order_marker(&num, &mut i)?.unwrap_or(1);
    let name = read_identifier(&num, &mut i)?;
    if i != num.len() || order == 0 {
        return None;
    }

    let den: Vec<char> = den.chars().collect();
    let mut j = 0;
    expect_char(&den, &mut j, op)?;
    let wrt = read_identifier(&den, &mut j)?;
    let den_order = read_order_marker(&den, &mut j)?.unwrap_or(1);
    if j != den.len() || den_order != order {
        return None;
    }
    if let Some(allowed) = allowed_wrt {
        if !allowed.contains(&wrt.as_str()) {
            return None;
        }
    }
    Some((name, wrt, order))
}

fn expect_char(chars: &[char], i: &mut usize, c: char) -> Option<()> {
    if chars.get(*i) == Some(&c) {
        *i += 1;
        Some(())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_first_order_decay() {
        let result = parse("dy/dt = -k*y");
        assert!(result.valid, "{:?}", result.error);
        assert!(!result.is_system);
        assert_eq!(result.variables(), set(&["y"]));
        assert_eq!(result.parameters, set(&["k"]));
        assert_eq!(result.equations[0].order, 1);
        assert_eq!(result.equations[0].independent.as_deref(), Some("t"));
    }

    #[test]
    fn time_is_a_variable_only_when_referenced() {
        let result = parse("dy/dt = -k*y + sin(t)");
        assert_eq!(result.independent_vars, set(&["t"]));
        assert_eq!(result.dependent_vars, set(&["y"]));
        assert_eq!(result.parameters, set(&["k"]));
    }

    #[test]
    fn recognizes_every_second_order_notation() {
        for text in [
            "d^2y/dt^2 = -k*y",
            "d²y/dt² = -k*y",
            "y'' = -k*y",
            "d^2 y / dt^2 = -k*y",
        ] {
            let result = parse(text);
            assert!(result.valid, "{text}: {:?}", result.error);
            assert_eq!(result.equations[0].order, 2, "{text}");
            assert_eq!(result.equations[0].dependent.as_deref(), Some("y"), "{text}");
        }
        let third = parse("d^3y/dx^3 = y");
        assert_eq!(third.equations[0].order, 3);
        assert_eq!(third.equations[0].independent.as_deref(), Some("x"));
    }

    #[test]
    fn damped_oscillator_velocity_is_not_a_parameter() {
        let result = parse("d²y/dt² = -k*y - c*dy/dt");
        assert!(result.valid);
        assert_eq!(result.parameters, set(&["c", "k"]));
        assert_eq!(result.variables(), set(&["y"]));
    }

    #[test]
    fn greek_dependent_variable_and_physical_parameters() {
        let result = parse("d^2θ/dt^2 = -(g/L)*sin(θ)");
        assert!(result.valid);
        assert_eq!(result.dependent_vars, set(&["θ"]));
        assert_eq!(result.parameters, set(&["L", "g"]));
    }

    #[test]
    fn algebraic_and_partial_left_sides() {
        let algebraic = parse("y = a*x + b");
        assert!(algebraic.valid);
        assert_eq!(algebraic.equations[0].form, EquationForm::Algebraic);
        assert_eq!(algebraic.independent_vars, set(&["x"]));
        assert_eq!(algebraic.parameters, set(&["a", "b"]));

        let partial = parse("∂u/∂t = alpha*u");
        assert!(partial.valid);
        assert_eq!(partial.equations[0].form, EquationForm::Partial);
        assert_eq!(partial.dependent_vars, set(&["u"]));

        let latex = parse("\\partial u / \\partial x = u");
        assert_eq!(latex.equations[0].form, EquationForm::Partial);
    }

    #[test]
    fn partial_derivatives_on_the_right_side() {
        let heat = parse("∂u/∂t = alpha*∂²u/∂x²");
        assert!(heat.valid, "{:?}", heat.error);
        assert_eq!(heat.equations[0].form, EquationForm::Partial);
        assert_eq!(heat.dependent_vars, set(&["u"]));
        assert_eq!(heat.independent_vars, set(&["x"]));
        assert_eq!(heat.parameters, set(&["alpha"]));
        assert_eq!(
            heat.equations[0].expr,
            Expr::Binary(
                Box::new(Expr::Variable("alpha".into())),
                equation_engine::BinaryOp::Mul,
                Box::new(Expr::PartialDerivative("u".into(), vec!["x".into(), "x".into()])),
            )
        );

        let mixed = parse("∂u/∂t = ∂²u/∂x∂y");
        assert_eq!(
            mixed.equations[0].expr,
            Expr::PartialDerivative("u".into(), vec!["x".into(), "y".into()])
        );

        for text in ["∂u/∂t = ∂u", "∂u/∂t = ∂²u/∂x", "∂u/∂t = ∂²u/∂x³"] {
            let result = parse(text);
            assert!(!result.valid, "{text}");
            assert!(matches!(
                result.failures[0],
                EquationError::MalformedExpression(_)
            ));
        }
    }

    #[test]
    fn parses_lotka_volterra_system() {
        let result = parse("dx/dt = a*x - b*x*y\ndy/dt = c*x*y - d*y");
        assert!(result.valid, "{:?}", result.error);
        assert!(result.is_system);
        assert_eq!(result.variables(), set(&["x", "y"]));
        assert!(result.independent_vars.is_empty());
        assert_eq!(result.parameters, set(&["a", "b", "c", "d"]));
        assert!(result.equations.iter().all(|eq| eq.order == 1));
    }

    #[test]
    fn blank_lines_do_not_make_a_system() {
        let result = parse("\n   dy/dt = y  \n\n");
        assert!(result.valid);
        assert!(!result.is_system);
    }

    #[test]
    fn reports_typed_failures() {
        let missing = parse("dy/dt -k*y");
        assert!(!missing.valid);
        assert!(matches!(
            missing.failures[0],
            EquationError::MissingEqualsSign { .. }
        ));

        let double = parse("dy/dt = y = 2");
        assert!(matches!(
            double.failures[0],
            EquationError::MultipleEqualsSigns { .. }
        ));

        let notation = parse("d/dt = y");
        assert!(matches!(
            notation.failures[0],
            EquationError::InvalidDifferentialNotation { .. }
        ));

        let mismatched = parse("d^2y/dt = y");
        assert!(matches!(
            mismatched.failures[0],
            EquationError::InvalidDifferentialNotation { .. }
        ));

        for (text, construct) in [
            ("dy/dt = [1, 2]", "matrix"),
            ("dy/dt = {y, 0}", "piecewise"),
            ("dy/dt = |y|", "absolute value bars"),
            ("dy/dt = sum(y)", "big operator"),
        ] {
            let result = parse(text);
            assert_eq!(
                result.failures,
                vec![EquationError::UnsupportedExpression {
                    construct,
                    rhs: text.split('=').nth(1).unwrap().trim().to_string(),
                }],
                "{text}"
            );
        }
    }

    #[test]
    fn system_errors_are_concatenated() {
        let result = parse("dx/dt = y\ndy/dt -x\ndz/dt = (");
        assert!(!result.valid);
        assert!(result.is_system);
        assert_eq!(result.failures.len(), 2);
        let message = result.error.expect("error message");
        assert!(message.starts_with("Invalid system of equations:"));
        assert!(message.contains("; "));
    }
}

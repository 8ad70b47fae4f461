use thiserror::Error;

/// Structural problems found while splitting and classifying an equation line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EquationError {
    #[error("Equation must contain an equals sign (=): `{line}`")]
    MissingEqualsSign { line: String },
    #[error("Equation must contain exactly one equals sign (=): `{line}`")]
    MultipleEqualsSigns { line: String },
    #[error("Invalid differential notation on the left side: `{lhs}`")]
    InvalidDifferentialNotation { lhs: String },
    #[error("Unsupported expression ({construct}) in `{rhs}`")]
    UnsupportedExpression { construct: &'static str, rhs: String },
    #[error("Error parsing right side of equation: {0}")]
    MalformedExpression(String),
}

/// Failures raised while parsing, compiling or evaluating an arithmetic expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Unknown symbol `{0}`")]
    UnknownSymbol(String),
    #[error("Unknown function `{0}`")]
    UnknownFunction(String),
    #[error("Malformed expression: {0}")]
    MalformedExpression(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Domain error: {function} is undefined for {argument}")]
    DomainError { function: &'static str, argument: f64 },
}

/// Failures of the order-reduction adapter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReductionError {
    #[error("Order {order} equations are not supported (maximum is 2)")]
    UnsupportedOrder { order: usize },
    #[error("Missing initial condition for {variable} (derivative order {order})")]
    MissingInitialCondition { variable: String, order: usize },
    #[error("Variable `{0}` is not a dependent variable of the equation")]
    UnknownVariable(String),
    #[error("Equation is invalid: {0}")]
    InvalidEquation(String),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// Failures of the fixed-step integrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("Invalid solver configuration: {0}")]
    InvalidConfig(String),
    #[error("State dimension mismatch. Expected {expected}, got {actual}.")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Solver failed at t = {at_time}: {source}")]
    SolverFailed {
        at_time: f64,
        #[source]
        source: EvaluationError,
    },
    #[error("Integration needs {required} steps but the step budget is {budget}")]
    StepBudgetExceeded { required: usize, budget: usize },
}

/// Top-level error of the end-to-end `solve` pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("Equation is invalid: {0}")]
    InvalidEquation(String),
    #[error("{kind} equations cannot be integrated")]
    UnsupportedEquation { kind: &'static str },
    #[error("Missing parameter `{0}`")]
    MissingParameter(String),
    #[error(transparent)]
    Reduction(#[from] ReductionError),
    #[error(transparent)]
    Solver(#[from] SolverError),
}

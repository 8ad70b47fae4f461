pub mod analyzer;
pub mod autodiff;
pub mod equation_engine;
pub mod error;
pub mod library;
pub mod parser;
pub mod reduction;
pub mod simulation;
pub mod solvers;
pub mod stiffness;
/// The `diffsim_core` crate is the analysis and integration engine behind diffsim.
/// It turns equation text into a classified, integrable first-order system and
/// advances it with a fixed-step rule.
///
/// Key components:
/// - **Parser / Analyzer**: derivative-notation recognition, symbol classification,
///   structural analysis (order, linearity, homogeneity, archetype) and method recommendation.
/// - **Equation Engine**: expression parser plus a bytecode VM that evaluates right-hand sides.
/// - **Reduction / Library**: order reduction to `[y, y']` state slots, and closed-form
///   right-hand sides for the recognized archetypes.
/// - **Solvers**: Euler, Midpoint, Heun and RK4 over the fallible `DynamicalSystem` trait.
/// - **Simulation**: serializable state, a pure action reducer, and the end-to-end `solve`.
pub mod traits;

pub use analyzer::{analyze, Analysis};
pub use parser::{parse, ParseResult};
pub use simulation::{Action, SimulationState, Solution};
pub use solvers::{integrate, Method, SolverConfig, Trajectory};

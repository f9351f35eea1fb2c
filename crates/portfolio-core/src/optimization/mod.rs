pub mod assembler;
#[cfg(feature = "frontier")]
pub mod frontier;
pub mod linalg;
pub mod objective;
pub mod optimizer;
pub mod qp;
pub mod solver;
pub mod sqp;

pub use assembler::{assemble, Allocation, OptimizationResult};
#[cfg(feature = "frontier")]
pub use frontier::{efficient_frontier, EfficientFrontier, FrontierPoint, DEFAULT_FRONTIER_POINTS};
pub use objective::{
    negative_sharpe, portfolio_return, portfolio_volatility, zero_volatility_floor, Objective,
};
pub use optimizer::{optimize, OptimizationOutcome};
pub use solver::{Bound, ConstrainedSolver, LinearConstraint, SolverDiagnostics, SolverReport};
pub use sqp::SqpSolver;

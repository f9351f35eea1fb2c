pub mod config;
pub mod engine;
pub mod error;
pub mod estimation;
pub mod optimization;
pub mod selection;
pub mod types;

pub use config::{
    EngineConfig, FrontierRequest, OptimizationMethod, OptimizationRequest, PoolRanking,
    SolverSettings,
};
pub use engine::PortfolioEngine;
pub use error::PortfolioError;
pub use estimation::{AssetStatistics, PriceRow, PriceTable};
pub use optimization::{Allocation, OptimizationResult};
pub use types::*;

/// Standard result type for all portfolio operations
pub type PortfolioResult<T> = Result<T, PortfolioError>;

pub mod pool;

pub use pool::{
    ranking_for, select, select_pool, ExpectedReturnRanking, LowVolatilityRanking, RankingKey,
    SharpeRanking,
};

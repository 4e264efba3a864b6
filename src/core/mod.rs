pub mod clock;
pub mod normalize;
pub mod orchestrator;
pub mod planner;
pub mod rate_limiter;
pub mod seeder;
pub mod timeseries;

pub mod aggregator;
pub mod calculations;
pub mod detector;
pub mod engine;
pub mod normalizer;
pub mod recommendation;
pub mod vri;
pub mod water_balance;

pub use aggregator::{Discard, SessionAggregator};
pub use detector::{SessionDetector, Step, Transition};
pub use engine::{DropReason, FlowEngine, IngestOutcome};
pub use recommendation::{RecommendationEngine, RecommendationInputs};
pub use water_balance::WaterBalanceCalculator;

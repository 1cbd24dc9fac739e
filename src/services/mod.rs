pub mod corpus;
pub mod ranker;
pub mod recommendation;

// Re-export public types
pub use corpus::CorpusIndex;
pub use ranker::{rank, RankedResult};
pub use recommendation::RecommendationService;

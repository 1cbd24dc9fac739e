pub mod embedder;
pub mod features;
pub mod vocabulary;

pub use embedder::{Embedder, HttpEmbedder};
pub use features::{EncodedFeatures, FeatureEncoder, SequenceLengths};
pub use vocabulary::{Field, VocabularyStore, UNKNOWN_ID};

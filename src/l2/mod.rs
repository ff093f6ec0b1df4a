//! L2 ML classification: pluggable classifier backends and the
//! five-head voting engine.

pub mod adapter;
pub mod voting;

pub use adapter::{ClassificationResult, ClassifierError, L2Classifier, L2Result, StubClassifier};
pub use voting::{FinalClassification, HeadVoteDetail, RecommendedAction, Vote, VotingConfig, VotingError, VotingResult, vote};

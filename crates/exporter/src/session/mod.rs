//! Grouping records into transactions and classifying them.

pub mod classifier;
pub mod fact;
pub mod model;

pub use classifier::SessionClassifier;
pub use fact::{HeaderFact, ProbeSample, SessionFacts, StatusFact, TagFact, VersionFact};
pub use model::{Direction, HeaderField, Outcome, Session, UNKNOWN_LABEL};

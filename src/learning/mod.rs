//! Usage learning
//!
//! Captures navigation, dwell time, interactions, form activity and errors
//! into capped histories, analyzes them for patterns, and turns the patterns
//! into suggestions, predictions and optimization notes.

pub mod analyzer;
pub mod automation;
pub mod context;
pub mod store;
pub mod suggestions;

pub use analyzer::{PatternAnalysis, PatternAnalyzer, RankedCount, SlowPage};
pub use automation::{AutomationRule, AutomationRules};
pub use context::BoundedEventContext;
pub use store::{LearningCategory, LearningData, LearningRecord, LearningStore};
pub use suggestions::{
    predict_next_actions, route_prefix_predicate, FormPredicate, OptimizationKind,
    OptimizationRecord, PredictionKind, PredictionRecord, Priority, SuggestionEngine,
    SuggestionKind, SuggestionRecord,
};

//! Suggestion engine
//!
//! Turns the short-term event context and pattern analysis into typed
//! suggestions, next-step predictions and optimization notes for the
//! presentation layer. Every rule is evaluated; there is no early exit.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::analyzer::{self, PatternAnalysis};
use super::store::LearningRecord;
use crate::types::{Event, EventKind};

/// Presentation priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    FormHelp,
    ErrorPrevention,
    QuickAccess,
    Performance,
}

/// A suggestion shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRecord {
    pub kind: SuggestionKind,
    pub title: String,
    pub description: String,
    pub action: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    Navigation,
}

/// A likely next action with its empirical probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub kind: PredictionKind,
    pub action: String,
    pub confidence: f64,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    Performance,
    Reliability,
    Usability,
}

/// A note about something the portal could do better
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    pub kind: OptimizationKind,
    pub message: String,
    pub priority: Priority,
}

/// Decides whether a location is a form-bearing surface
pub type FormPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Predicate matching locations under any of the given route prefixes
pub fn route_prefix_predicate(prefixes: Vec<String>) -> FormPredicate {
    Arc::new(move |location: &str| prefixes.iter().any(|p| location.starts_with(p.as_str())))
}

/// Maximum number of predictions returned
const MAX_PREDICTIONS: usize = 3;
/// Destinations listed in a quick-access suggestion
const QUICK_ACCESS_LIMIT: usize = 3;
/// Error count from which an error becomes a reliability note
const RELIABILITY_MIN_COUNT: usize = 3;

/// Rule-based suggestion engine
pub struct SuggestionEngine {
    form_predicate: FormPredicate,
    slow_page_threshold_ms: f64,
    form_friction_threshold: usize,
    generated: u64,
}

impl SuggestionEngine {
    pub fn new(form_predicate: FormPredicate, slow_page_threshold_ms: f64, form_friction_threshold: usize) -> Self {
        Self {
            form_predicate,
            slow_page_threshold_ms,
            form_friction_threshold,
            generated: 0,
        }
    }

    /// Whether the current surface carries a form, either by the host
    /// predicate or because the user just typed into a form there
    pub fn is_form_bearing(&self, context: &[Event]) -> bool {
        let Some(location) = context.iter().find_map(|e| e.location()) else {
            return false;
        };
        (self.form_predicate)(location)
            || context
                .iter()
                .any(|e| e.kind() == EventKind::FormInput && e.location() == Some(location))
    }

    /// Generate suggestions, highest priority first
    pub fn generate(&mut self, context: &[Event], analysis: &PatternAnalysis) -> Vec<SuggestionRecord> {
        let mut suggestions = Vec::new();

        if self.is_form_bearing(context) {
            suggestions.push(SuggestionRecord {
                kind: SuggestionKind::FormHelp,
                title: "Precisa de ajuda com o formulário?".to_string(),
                description: "Campos obrigatórios estão marcados e o rascunho pode ser salvo a qualquer momento.".to_string(),
                action: "show_form_help".to_string(),
                priority: Priority::High,
            });
        }

        if let Some(top) = analysis.errors.first() {
            suggestions.push(SuggestionRecord {
                kind: SuggestionKind::ErrorPrevention,
                title: "Erro recorrente detectado".to_string(),
                description: format!("O erro \"{}\" ocorreu {} vez(es) recentemente.", top.key, top.count),
                action: "show_error_tips".to_string(),
                priority: Priority::Medium,
            });
        }

        if !analysis.destinations.is_empty() {
            let listed: Vec<&str> = analysis
                .destinations
                .iter()
                .take(QUICK_ACCESS_LIMIT)
                .map(|d| d.key.as_str())
                .collect();
            suggestions.push(SuggestionRecord {
                kind: SuggestionKind::QuickAccess,
                title: "Acesso rápido".to_string(),
                description: format!("Páginas mais visitadas: {}", listed.join(", ")),
                action: "show_quick_access".to_string(),
                priority: Priority::Low,
            });
        }

        if let Some(slowest) = analysis.slow_pages.first() {
            suggestions.push(SuggestionRecord {
                kind: SuggestionKind::Performance,
                title: "Páginas lentas".to_string(),
                description: format!(
                    "{} página(s) levam mais de {:.0}ms em média; a mais lenta é {} ({:.0}ms).",
                    analysis.slow_pages.len(),
                    self.slow_page_threshold_ms,
                    slowest.page,
                    slowest.mean_ms
                ),
                action: "review_slow_pages".to_string(),
                priority: Priority::Medium,
            });
        }

        // Stable: rules keep their order within a priority
        suggestions.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.generated += suggestions.len() as u64;
        suggestions
    }

    /// Optimization notes derived from the analysis
    pub fn optimizations(&self, analysis: &PatternAnalysis) -> Vec<OptimizationRecord> {
        let mut notes = Vec::new();

        for page in &analysis.slow_pages {
            let priority = if page.mean_ms > self.slow_page_threshold_ms * 2.0 {
                Priority::High
            } else {
                Priority::Medium
            };
            notes.push(OptimizationRecord {
                kind: OptimizationKind::Performance,
                message: format!(
                    "Page {} averages {:.0}ms over {} visit(s)",
                    page.page, page.mean_ms, page.samples
                ),
                priority,
            });
        }

        for error in analysis.errors.iter().filter(|e| e.count >= RELIABILITY_MIN_COUNT) {
            notes.push(OptimizationRecord {
                kind: OptimizationKind::Reliability,
                message: format!("\"{}\" occurred {} times", error.key, error.count),
                priority: Priority::High,
            });
        }

        for field in analysis
            .form_fields
            .iter()
            .filter(|f| f.count >= self.form_friction_threshold)
        {
            notes.push(OptimizationRecord {
                kind: OptimizationKind::Usability,
                message: format!("Field {} was edited {} times; consider clearer guidance", field.key, field.count),
                priority: Priority::Low,
            });
        }

        notes.sort_by(|a, b| b.priority.cmp(&a.priority));
        notes
    }

    /// Total suggestions produced so far
    pub fn generated(&self) -> u64 {
        self.generated
    }
}

/// Predict the next destinations from `location` using every recorded
/// transition that started there
pub fn predict_next_actions<'a, I>(navigation: I, location: &str) -> Vec<PredictionRecord>
where
    I: IntoIterator<Item = &'a LearningRecord>,
    I::IntoIter: DoubleEndedIterator,
{
    let transitions = analyzer::transitions_from(navigation, location);
    let total: usize = transitions.iter().map(|t| t.count).sum();
    if total == 0 {
        return Vec::new();
    }

    transitions
        .into_iter()
        .take(MAX_PREDICTIONS)
        .map(|t| {
            let confidence = t.count as f64 / total as f64;
            PredictionRecord {
                kind: PredictionKind::Navigation,
                action: t.key.clone(),
                confidence,
                data: serde_json::json!({
                    "from": location,
                    "to": t.key,
                    "occurrences": t.count,
                    "transitions": total,
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::analyzer::{RankedCount, SlowPage};
    use crate::learning::store::LearningCategory;
    use crate::types::{fields, EventPayload};
    use chrono::Utc;

    fn engine() -> SuggestionEngine {
        SuggestionEngine::new(route_prefix_predicate(vec!["/peticionamento".into()]), 5000.0, 5)
    }

    fn nav_event(to: &str) -> Event {
        Event::new(EventPayload::Navigation {
            from: "/".into(),
            to: to.into(),
        })
    }

    fn nav(from: &str, to: &str) -> LearningRecord {
        LearningRecord::new(
            LearningCategory::Navigation,
            fields([("from", from), ("to", to)]),
            Utc::now(),
        )
    }

    fn full_analysis() -> PatternAnalysis {
        PatternAnalysis {
            destinations: vec![
                RankedCount { key: "/a".into(), count: 9 },
                RankedCount { key: "/b".into(), count: 5 },
                RankedCount { key: "/c".into(), count: 3 },
                RankedCount { key: "/d".into(), count: 1 },
            ],
            slow_pages: vec![SlowPage { page: "/lenta".into(), mean_ms: 12000.0, samples: 2 }],
            errors: vec![RankedCount { key: "Network Error".into(), count: 5 }],
            form_fields: vec![RankedCount { key: "peticao/cpf".into(), count: 7 }],
        }
    }

    #[test]
    fn test_empty_inputs_yield_nothing() {
        let mut engine = engine();
        assert!(engine.generate(&[], &PatternAnalysis::default()).is_empty());
        assert!(engine.optimizations(&PatternAnalysis::default()).is_empty());
        assert!(predict_next_actions(&Vec::<LearningRecord>::new(), "/").is_empty());
        assert_eq!(engine.generated(), 0);
    }

    #[test]
    fn test_all_rules_fire_in_priority_order() {
        let mut engine = engine();
        let context = vec![nav_event("/peticionamento/novo")];
        let suggestions = engine.generate(&context, &full_analysis());

        let kinds: Vec<SuggestionKind> = suggestions.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SuggestionKind::FormHelp,
                SuggestionKind::ErrorPrevention,
                SuggestionKind::Performance,
                SuggestionKind::QuickAccess,
            ]
        );
        assert_eq!(suggestions[0].priority, Priority::High);
        assert!(suggestions[1].description.contains("Network Error"));
        let quick = &suggestions[3];
        assert!(quick.description.contains("/a, /b, /c"));
        assert!(!quick.description.contains("/d"));
        assert_eq!(engine.generated(), 4);
    }

    #[test]
    fn test_form_bearing_from_recent_input() {
        let engine = engine();
        let context = vec![Event::new(EventPayload::FormInput {
            form: "reclamacao".into(),
            field: "descricao".into(),
            value: "texto".into(),
            location: "/reclamacao".into(),
        })];
        assert!(engine.is_form_bearing(&context));
        assert!(!engine.is_form_bearing(&[nav_event("/inicio")]));
    }

    #[test]
    fn test_predictions_distribution() {
        let records = vec![
            nav("/inicio", "/protocolos"),
            nav("/inicio", "/protocolos"),
            nav("/inicio", "/protocolos"),
            nav("/inicio", "/peticao"),
            nav("/protocolos", "/inicio"),
            nav("/inicio", "/ouvidoria"),
            nav("/inicio", "/ajuda"),
        ];

        let predictions = predict_next_actions(&records, "/inicio");
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].action, "/protocolos");
        assert!((predictions[0].confidence - 0.5).abs() < 1e-9);
        // Ties at 1/6 ranked most recent first
        assert_eq!(predictions[1].action, "/ajuda");
        assert_eq!(predictions[2].action, "/ouvidoria");
        assert!(predictions.iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
        assert_eq!(predictions[0].data["occurrences"], 3);
    }

    #[test]
    fn test_optimizations() {
        let engine = engine();
        let notes = engine.optimizations(&full_analysis());
        let kinds: Vec<OptimizationKind> = notes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![OptimizationKind::Performance, OptimizationKind::Reliability, OptimizationKind::Usability]
        );
        assert_eq!(notes[0].priority, Priority::High);
        assert_eq!(notes[2].priority, Priority::Low);
    }

    #[test]
    fn test_priority_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Priority::Medium).unwrap(), "\"medium\"");
        assert!(Priority::Low < Priority::Medium && Priority::Medium < Priority::High);
    }
}

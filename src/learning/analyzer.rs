//! Pattern analysis over learning snapshots
//!
//! Pure, deterministic functions: the same records always produce the same
//! output, and nothing here reads the clock. Ties are broken by recency,
//! the key seen most recently ranking first.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::store::{LearningData, LearningRecord};

/// A key with its occurrence count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCount {
    pub key: String,
    pub count: usize,
}

/// A page whose mean dwell time exceeds the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowPage {
    pub page: String,
    pub mean_ms: f64,
    pub samples: usize,
}

/// Everything the suggestion engine needs from history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub destinations: Vec<RankedCount>,
    pub slow_pages: Vec<SlowPage>,
    pub errors: Vec<RankedCount>,
    /// Most edited form fields, keyed `form/field`
    pub form_fields: Vec<RankedCount>,
}

/// Analyzer parameters
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    pub top_destinations: usize,
    pub slow_page_threshold_ms: f64,
    pub top_slow_pages: usize,
    pub top_errors: usize,
    pub top_form_fields: usize,
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self {
            top_destinations: 5,
            slow_page_threshold_ms: 5000.0,
            top_slow_pages: 3,
            top_errors: 3,
            top_form_fields: 3,
        }
    }
}

impl PatternAnalyzer {
    pub fn from_config(config: &crate::config::LearningConfig) -> Self {
        Self {
            top_destinations: config.top_destinations,
            slow_page_threshold_ms: config.slow_page_threshold_ms,
            top_slow_pages: config.top_slow_pages,
            top_errors: config.top_errors,
            top_form_fields: 3,
        }
    }

    /// Run every analysis over a snapshot
    pub fn analyze(&self, data: &LearningData) -> PatternAnalysis {
        PatternAnalysis {
            destinations: frequent_destinations(&data.navigation, self.top_destinations),
            slow_pages: slow_pages(&data.page_time, self.slow_page_threshold_ms, self.top_slow_pages),
            errors: frequent_errors(&data.errors, self.top_errors),
            form_fields: busiest_form_fields(&data.form_interactions, self.top_form_fields),
        }
    }
}

/// Most visited destinations, by count of the `to` field
pub fn frequent_destinations<'a, I>(records: I, n: usize) -> Vec<RankedCount>
where
    I: IntoIterator<Item = &'a LearningRecord>,
    I::IntoIter: DoubleEndedIterator,
{
    rank_by_count(records.into_iter().rev().filter_map(|r| r.text("to")), n)
}

/// Most frequent error messages, by exact `message`
pub fn frequent_errors<'a, I>(records: I, n: usize) -> Vec<RankedCount>
where
    I: IntoIterator<Item = &'a LearningRecord>,
    I::IntoIter: DoubleEndedIterator,
{
    rank_by_count(records.into_iter().rev().filter_map(|r| r.text("message")), n)
}

/// Most edited form fields, keyed `form/field`
pub fn busiest_form_fields<'a, I>(records: I, n: usize) -> Vec<RankedCount>
where
    I: IntoIterator<Item = &'a LearningRecord>,
    I::IntoIter: DoubleEndedIterator,
{
    let keys: Vec<String> = records
        .into_iter()
        .rev()
        .filter_map(|r| Some(format!("{}/{}", r.text("form")?, r.text("field")?)))
        .collect();
    rank_by_count(keys.iter().map(String::as_str), n)
}

/// Pages whose mean `duration` is strictly above `threshold_ms`
pub fn slow_pages<'a, I>(records: I, threshold_ms: f64, n: usize) -> Vec<SlowPage>
where
    I: IntoIterator<Item = &'a LearningRecord>,
    I::IntoIter: DoubleEndedIterator,
{
    // page -> (recency rank, total ms, samples)
    let mut groups: HashMap<&str, (usize, f64, usize)> = HashMap::new();

    for record in records.into_iter().rev() {
        let (Some(page), Some(duration)) = (record.text("page"), record.number("duration")) else {
            continue;
        };
        let rank = groups.len();
        let group = groups.entry(page).or_insert((rank, 0.0, 0));
        group.1 += duration;
        group.2 += 1;
    }

    let mut slow: Vec<(usize, SlowPage)> = groups
        .into_iter()
        .map(|(page, (rank, total, samples))| {
            (
                rank,
                SlowPage {
                    page: page.to_string(),
                    mean_ms: total / samples as f64,
                    samples,
                },
            )
        })
        .filter(|(_, p)| p.mean_ms > threshold_ms)
        .collect();

    slow.sort_by(|a, b| {
        b.1.mean_ms
            .partial_cmp(&a.1.mean_ms)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    slow.into_iter().take(n).map(|(_, p)| p).collect()
}

/// Next destinations observed after leaving `location`, most frequent first
pub fn transitions_from<'a, I>(records: I, location: &str) -> Vec<RankedCount>
where
    I: IntoIterator<Item = &'a LearningRecord>,
    I::IntoIter: DoubleEndedIterator,
{
    rank_by_count(
        records
            .into_iter()
            .rev()
            .filter(|r| r.text("from") == Some(location))
            .filter_map(|r| r.text("to")),
        usize::MAX,
    )
}

/// Count keys given newest first; sort by count desc, then first-seen order
fn rank_by_count<'a>(keys: impl Iterator<Item = &'a str>, n: usize) -> Vec<RankedCount> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for key in keys {
        let count = counts.entry(key).or_insert_with(|| {
            order.push(key);
            0
        });
        *count += 1;
    }

    let mut ranked: Vec<RankedCount> = order
        .into_iter()
        .map(|key| RankedCount {
            key: key.to_string(),
            count: counts[key],
        })
        .collect();
    // Stable sort keeps first-seen order among equal counts
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::store::LearningCategory;
    use crate::types::{fields, Scalar};
    use chrono::Utc;

    fn nav(from: &str, to: &str) -> LearningRecord {
        LearningRecord::new(
            LearningCategory::Navigation,
            fields([("from", from), ("to", to)]),
            Utc::now(),
        )
    }

    fn page_time(page: &str, ms: f64) -> LearningRecord {
        LearningRecord::new(
            LearningCategory::PageTime,
            fields([("page", Scalar::from(page)), ("duration", Scalar::from(ms))]),
            Utc::now(),
        )
    }

    fn error(message: &str) -> LearningRecord {
        LearningRecord::new(
            LearningCategory::Errors,
            fields([("message", message), ("source", "api")]),
            Utc::now(),
        )
    }

    #[test]
    fn test_frequent_destinations_counts_and_order() {
        let mut records = Vec::new();
        for _ in 0..100 {
            records.push(nav("/", "/a"));
        }
        for _ in 0..50 {
            records.push(nav("/", "/b"));
        }

        let top = frequent_destinations(&records, 2);
        assert_eq!(
            top,
            vec![
                RankedCount { key: "/a".into(), count: 100 },
                RankedCount { key: "/b".into(), count: 50 },
            ]
        );
    }

    #[test]
    fn test_frequent_destinations_tie_prefers_most_recent() {
        let records = vec![nav("/", "/x"), nav("/", "/y"), nav("/", "/z")];
        let top = frequent_destinations(&records, 5);
        let keys: Vec<&str> = top.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["/z", "/y", "/x"]);
    }

    #[test]
    fn test_frequent_errors() {
        let mut records: Vec<LearningRecord> = (0..5).map(|_| error("Network Error")).collect();
        records.push(error("Validation Error"));

        let top = frequent_errors(&records, 3);
        assert_eq!(
            top,
            vec![
                RankedCount { key: "Network Error".into(), count: 5 },
                RankedCount { key: "Validation Error".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_slow_pages_mean_and_threshold() {
        let records = vec![
            page_time("/a", 4000.0),
            page_time("/a", 8000.0),  // mean 6000
            page_time("/b", 5000.0),  // mean 5000, not strictly above
            page_time("/c", 9000.0),  // mean 9000
            page_time("/d", 7000.0),  // mean 7000
            page_time("/e", 12000.0), // mean 12000
        ];

        let slow = slow_pages(&records, 5000.0, 3);
        let pages: Vec<&str> = slow.iter().map(|p| p.page.as_str()).collect();
        assert_eq!(pages, vec!["/e", "/c", "/d"]);
        assert_eq!(slow[0].samples, 1);

        let all = slow_pages(&records, 5000.0, 10);
        let a = all.iter().find(|p| p.page == "/a").unwrap();
        assert_eq!(a.mean_ms, 6000.0);
        assert_eq!(a.samples, 2);
        assert!(all.iter().all(|p| p.page != "/b"));
    }

    #[test]
    fn test_slow_pages_ignores_malformed_records() {
        let records = vec![
            LearningRecord::new(LearningCategory::PageTime, fields([("page", "/a")]), Utc::now()),
            page_time("/b", 6000.0),
        ];
        let slow = slow_pages(&records, 5000.0, 3);
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].page, "/b");
    }

    #[test]
    fn test_transitions_from() {
        let records = vec![
            nav("/inicio", "/protocolos"),
            nav("/protocolos", "/inicio"),
            nav("/inicio", "/peticao"),
            nav("/inicio", "/protocolos"),
        ];
        let next = transitions_from(&records, "/inicio");
        assert_eq!(next[0], RankedCount { key: "/protocolos".into(), count: 2 });
        assert_eq!(next[1], RankedCount { key: "/peticao".into(), count: 1 });
        assert!(transitions_from(&records, "/nowhere").is_empty());
    }

    #[test]
    fn test_analyze_empty_is_empty() {
        let analysis = PatternAnalyzer::default().analyze(&LearningData::default());
        assert_eq!(analysis, PatternAnalysis::default());
    }

    #[test]
    fn test_deterministic_output() {
        let records: Vec<LearningRecord> = ["/a", "/b", "/a", "/c", "/b", "/d"]
            .iter()
            .map(|to| nav("/", to))
            .collect();
        let first = frequent_destinations(&records, 5);
        for _ in 0..10 {
            assert_eq!(frequent_destinations(&records, 5), first);
        }
    }
}

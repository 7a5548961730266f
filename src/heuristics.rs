//! Text fallback for severity counting.
//!
//! Used only when structured findings are unavailable. The counts are an
//! estimate: markers are not deduplicated, so the same issue can be counted
//! once for its severity keyword and again by the escalation keywords.

use crate::classifier::{Severity, SeverityCounts};
use crate::config::{CountMode, EscalationMode, HeuristicsConfig};

pub trait TextHeuristic: Send + Sync {
    fn name(&self) -> &'static str;

    /// Add estimated counts for `raw` to `counts`.
    fn classify_text(&self, raw: &str, counts: &mut SeverityCounts);
}

pub struct KeywordHeuristic {
    count_mode: CountMode,
    escalation: EscalationMode,
    markers: Vec<(Severity, String)>,
    escalation_keywords: Vec<String>,
}

impl KeywordHeuristic {
    pub fn new(config: &HeuristicsConfig) -> Self {
        let mut markers = Vec::new();
        for (severity, list) in [
            (Severity::High, &config.high_markers),
            (Severity::Medium, &config.medium_markers),
            (Severity::Low, &config.low_markers),
        ] {
            markers.extend(list.iter().filter(|m| !m.is_empty()).map(|m| (severity, m.clone())));
        }

        Self {
            count_mode: config.count_mode,
            escalation: config.escalation,
            markers,
            escalation_keywords: config.escalation_keywords.iter().filter(|k| !k.is_empty()).cloned().collect(),
        }
    }

    fn hits(&self, raw: &str, needle: &str) -> usize {
        match self.count_mode {
            CountMode::Presence => usize::from(raw.contains(needle)),
            CountMode::Occurrences => raw.matches(needle).count(),
        }
    }
}

impl TextHeuristic for KeywordHeuristic {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn classify_text(&self, raw: &str, counts: &mut SeverityCounts) {
        for (severity, marker) in &self.markers {
            counts.add(*severity, self.hits(raw, marker));
        }

        match self.escalation {
            EscalationMode::Off => {}
            EscalationMode::Any => {
                if self.escalation_keywords.iter().any(|k| raw.contains(k.as_str())) {
                    counts.record(Severity::High);
                }
            }
            EscalationMode::Each => {
                let hits: usize = self.escalation_keywords.iter().map(|k| raw.matches(k.as_str()).count()).sum();
                counts.add(Severity::High, hits);
            }
        }
    }
}

/// Leaves counts untouched.
pub struct DisabledHeuristic;

impl TextHeuristic for DisabledHeuristic {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn classify_text(&self, _raw: &str, _counts: &mut SeverityCounts) {}
}

pub fn from_config(config: &HeuristicsConfig) -> Box<dyn TextHeuristic> {
    if config.enabled {
        Box::new(KeywordHeuristic::new(config))
    } else {
        Box::new(DisabledHeuristic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
INFO:Detectors:
Reentrancy in Vault.withdraw() (high severity)
Vault.pay() sends eth to arbitrary user (high severity)
Missing events (low severity)
Reentrancy in Vault.deposit()
";

    fn counts_for(config: &HeuristicsConfig, text: &str) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        KeywordHeuristic::new(config).classify_text(text, &mut counts);
        counts
    }

    #[test]
    fn test_presence_with_any_escalation() {
        let counts = counts_for(&HeuristicsConfig::default(), SAMPLE);
        // one for "high severity", one escalation
        assert_eq!(counts.high, 2);
        assert_eq!(counts.medium, 0);
        assert_eq!(counts.low, 1);
    }

    #[test]
    fn test_occurrences_with_each_escalation() {
        let config = HeuristicsConfig {
            count_mode: CountMode::Occurrences,
            escalation: EscalationMode::Each,
            ..HeuristicsConfig::default()
        };
        let counts = counts_for(&config, SAMPLE);
        // 2 "high severity" + 2 "Reentrancy" + 1 "arbitrary user" + 1 "sends eth to arbitrary"
        assert_eq!(counts.high, 6);
        assert_eq!(counts.low, 1);
    }

    #[test]
    fn test_escalation_off() {
        let config = HeuristicsConfig {
            escalation: EscalationMode::Off,
            ..HeuristicsConfig::default()
        };
        assert_eq!(counts_for(&config, "Reentrancy everywhere").high, 0);
    }

    #[test]
    fn test_escalation_without_severity_keyword() {
        let counts = counts_for(&HeuristicsConfig::default(), "Reentrancy in Bank.claim()");
        assert_eq!(counts.high, 1);
    }

    #[test]
    fn test_counts_accumulate_across_calls() {
        let heuristic = KeywordHeuristic::new(&HeuristicsConfig::default());
        let mut counts = SeverityCounts::default();
        heuristic.classify_text("medium severity", &mut counts);
        heuristic.classify_text("medium severity", &mut counts);
        assert_eq!(counts.medium, 2);
    }

    #[test]
    fn test_disabled_from_config() {
        let config = HeuristicsConfig {
            enabled: false,
            ..HeuristicsConfig::default()
        };
        let heuristic = from_config(&config);
        let mut counts = SeverityCounts::default();
        heuristic.classify_text(SAMPLE, &mut counts);
        assert_eq!(counts, SeverityCounts::default());
        assert_eq!(heuristic.name(), "disabled");
    }
}

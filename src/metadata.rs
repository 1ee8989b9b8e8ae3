//! Factual-metadata answers: a closed rule set over laureate records.
//!
//! No retrieval, no embeddings, no LLM. A query either matches one of the
//! recognized question shapes and gets a structured record back, or the
//! handler returns `None` and the caller falls through to retrieval.

use crate::corpus::{LaureateIndex, LaureateRecord};
use crate::utils::text::{contains_whole_word, normalize_query};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier of the rule that produced an answer
#[derive(Debug, Clone, Serialize)]
pub struct MetadataSource {
    pub rule: String,
}

/// Structured metadata answer; the `answer` sentence is what users see
#[derive(Debug, Clone, Serialize)]
pub struct MetadataAnswer {
    #[serde(skip)]
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub laureate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_awarded: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize_motivation: Option<String>,
    pub source: MetadataSource,
}

impl MetadataAnswer {
    fn from_record(record: &LaureateRecord, rule: &str, answer: String) -> Self {
        Self {
            answer,
            laureate: Some(record.laureate.clone()),
            year_awarded: Some(record.year_awarded),
            country: Some(record.country.clone()),
            country_flag: Some(record.country_flag.clone()),
            category: Some(record.category.clone()),
            prize_motivation: Some(record.prize_motivation.clone()),
            source: MetadataSource {
                rule: rule.to_string(),
            },
        }
    }
}

static YEAR_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"\b((?:18|19|20)\d{2})\b").expect("year regex compiles"));

pub struct MetadataHandler {
    laureates: Arc<LaureateIndex>,
}

impl MetadataHandler {
    pub fn new(laureates: Arc<LaureateIndex>) -> Self {
        Self { laureates }
    }

    /// Try the closed rule set, in order. `None` means no rule matched.
    pub fn answer(&self, query: &str) -> Option<MetadataAnswer> {
        let normalized = normalize_query(query);
        let named = self.laureates.find_in_query(&normalized);

        // Rules keyed on a named laureate
        if let Some(record) = named {
            if any_cue(&normalized, &["when did", "what year", "which year"]) {
                return Some(MetadataAnswer::from_record(
                    record,
                    "laureate_year",
                    format!(
                        "{} won the Nobel Prize in {} in {}.",
                        record.laureate, record.category, record.year_awarded
                    ),
                ));
            }
            if any_cue(&normalized, &["where is", "where was", "what country", "which country"]) {
                return Some(MetadataAnswer::from_record(
                    record,
                    "laureate_country",
                    format!(
                        "{} is from {} {}.",
                        record.laureate, record.country, record.country_flag
                    ),
                ));
            }
            if any_cue(&normalized, &["why did", "awarded for", "win for", "motivation"]) {
                return Some(MetadataAnswer::from_record(
                    record,
                    "laureate_motivation",
                    format!(
                        "{} was awarded the prize \u{201c}{}\u{201d}.",
                        record.laureate, record.prize_motivation
                    ),
                ));
            }
        }

        // Year rule: "who won in 1965"
        if let Some(year) = YEAR_RE
            .captures(&normalized)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i32>().ok())
        {
            if any_cue(&normalized, &["who won", "who received", "who was awarded", "winner"]) {
                return self.answer_by_year(year);
            }
        }

        // Country aggregations
        if any_cue(&normalized, &["which country", "what country"])
            && contains_whole_word(&normalized, "most")
        {
            return self.answer_most_country();
        }
        if any_cue(&normalized, &["how many"]) {
            if let Some(country) = self.find_country(&normalized) {
                return self.answer_country_count(&country);
            }
        }

        // Category: a single-category corpus makes this a constant
        if any_cue(&normalized, &["what category", "which category", "what prize"]) {
            let category = self
                .laureates
                .records()
                .first()
                .map(|r| r.category.clone())
                .unwrap_or_else(|| "Literature".to_string());
            return Some(MetadataAnswer {
                answer: format!("Every laureate in this corpus won in {}.", category),
                laureate: None,
                year_awarded: None,
                country: None,
                country_flag: None,
                category: Some(category),
                prize_motivation: None,
                source: MetadataSource {
                    rule: "category_presence".to_string(),
                },
            });
        }

        None
    }

    fn answer_by_year(&self, year: i32) -> Option<MetadataAnswer> {
        let mut winners = self.laureates.by_year(year);
        if winners.is_empty() {
            return None;
        }
        winners.sort_by(|a, b| a.laureate.cmp(&b.laureate));
        let record = winners[0];
        let answer = if winners.len() == 1 {
            format!(
                "{} won the Nobel Prize in {} in {}.",
                record.laureate, record.category, year
            )
        } else {
            let names: Vec<&str> = winners.iter().map(|r| r.laureate.as_str()).collect();
            format!(
                "The {} Nobel Prize in {} was shared by {}.",
                year,
                record.category,
                names.join(" and ")
            )
        };
        Some(MetadataAnswer::from_record(record, "by_year", answer))
    }

    /// Country with the most laureates. Ties break alphabetically by
    /// country name; BTreeMap iteration makes that the natural order.
    fn answer_most_country(&self) -> Option<MetadataAnswer> {
        let mut counts: BTreeMap<&str, (usize, &LaureateRecord)> = BTreeMap::new();
        for r in self.laureates.records() {
            let entry = counts.entry(r.country.as_str()).or_insert((0, r));
            entry.0 += 1;
            if r.year_awarded < entry.1.year_awarded {
                entry.1 = r;
            }
        }
        let (country, (count, earliest)) = counts
            .into_iter()
            .max_by(|(ca, (na, _)), (cb, (nb, _))| na.cmp(nb).then(cb.cmp(ca)))?;
        Some(MetadataAnswer {
            answer: format!(
                "{} {} has the most laureates in this corpus, with {}.",
                country, earliest.country_flag, count
            ),
            laureate: None,
            year_awarded: None,
            country: Some(country.to_string()),
            country_flag: Some(earliest.country_flag.clone()),
            category: Some(earliest.category.clone()),
            prize_motivation: None,
            source: MetadataSource {
                rule: "country_most".to_string(),
            },
        })
    }

    fn answer_country_count(&self, country: &str) -> Option<MetadataAnswer> {
        let matching: Vec<&LaureateRecord> = self
            .laureates
            .records()
            .iter()
            .filter(|r| normalize_query(&r.country) == normalize_query(country))
            .collect();
        if matching.is_empty() {
            return None;
        }
        let flag = matching[0].country_flag.clone();
        Some(MetadataAnswer {
            answer: format!(
                "{} {} has {} Nobel literature laureate{} in this corpus.",
                matching[0].country,
                flag,
                matching.len(),
                if matching.len() == 1 { "" } else { "s" }
            ),
            laureate: None,
            year_awarded: None,
            country: Some(matching[0].country.clone()),
            country_flag: Some(flag),
            category: Some(matching[0].category.clone()),
            prize_motivation: None,
            source: MetadataSource {
                rule: "country_count".to_string(),
            },
        })
    }

    /// Find a corpus country named in the query
    fn find_country(&self, normalized: &str) -> Option<String> {
        let mut countries: Vec<&str> = self
            .laureates
            .records()
            .iter()
            .map(|r| r.country.as_str())
            .collect();
        countries.sort_unstable();
        countries.dedup();
        countries
            .into_iter()
            .find(|c| contains_whole_word(normalized, c))
            .map(|c| c.to_string())
    }
}

fn any_cue(normalized: &str, cues: &[&str]) -> bool {
    cues.iter().any(|c| contains_whole_word(normalized, c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, year: i32, country: &str) -> LaureateRecord {
        LaureateRecord {
            laureate: name.to_string(),
            year_awarded: year,
            country: country.to_string(),
            country_flag: "🏳".to_string(),
            gender: "unknown".to_string(),
            category: "Literature".to_string(),
            prize_motivation: "for art".to_string(),
        }
    }

    fn handler() -> MetadataHandler {
        MetadataHandler::new(Arc::new(LaureateIndex::new(vec![
            record("Mikhail Sholokhov", 1965, "Russia"),
            record("Toni Morrison", 1993, "United States"),
            record("William Faulkner", 1949, "United States"),
            record("Seamus Heaney", 1995, "Ireland"),
        ])))
    }

    #[test]
    fn by_year_rule_names_the_1965_winner() {
        let a = handler()
            .answer("Who won the Nobel Prize in Literature in 1965?")
            .unwrap();
        assert_eq!(a.laureate.as_deref(), Some("Mikhail Sholokhov"));
        assert_eq!(a.year_awarded, Some(1965));
        assert_eq!(a.source.rule, "by_year");
    }

    #[test]
    fn laureate_year_rule_answers_when_did() {
        let a = handler()
            .answer("When did Toni Morrison win the prize?")
            .unwrap();
        assert_eq!(a.year_awarded, Some(1993));
        assert_eq!(a.source.rule, "laureate_year");
    }

    #[test]
    fn laureate_country_rule_answers_where_from() {
        let a = handler().answer("Where is Seamus Heaney from?").unwrap();
        assert_eq!(a.country.as_deref(), Some("Ireland"));
        assert_eq!(a.source.rule, "laureate_country");
    }

    #[test]
    fn country_most_aggregation_is_deterministic() {
        let a = handler()
            .answer("Which country has the most laureates?")
            .unwrap();
        assert_eq!(a.country.as_deref(), Some("United States"));
        assert_eq!(a.source.rule, "country_most");
        assert!(a.answer.contains("2"));
    }

    #[test]
    fn country_count_rule_counts_matches() {
        let a = handler()
            .answer("How many laureates are from Ireland?")
            .unwrap();
        assert_eq!(a.country.as_deref(), Some("Ireland"));
        assert!(a.answer.contains("1 "));
    }

    #[test]
    fn most_country_tie_breaks_alphabetically() {
        let h = MetadataHandler::new(Arc::new(LaureateIndex::new(vec![
            record("B Writer", 1950, "Sweden"),
            record("A Writer", 1960, "France"),
        ])));
        let a = h.answer("Which country has the most laureates?").unwrap();
        assert_eq!(a.country.as_deref(), Some("France"));
    }

    #[test]
    fn unmatched_shapes_return_none() {
        assert!(handler()
            .answer("What do laureates say about hope?")
            .is_none());
        assert!(handler().answer("Who won in 1807?").is_none());
    }
}

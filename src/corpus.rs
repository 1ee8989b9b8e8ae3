//! Corpus data model: chunks, laureate records, and their loaders.
//!
//! The corpus is a frozen input. Both files are loaded once at startup,
//! validated against the active model, and never mutated at query time.

use crate::error::{NobelLmError, Result};
use crate::utils::text::{contains_whole_word, normalize_query};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::BufRead;

/// Where a chunk's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    NobelLecture,
    AcceptanceSpeech,
    CeremonySpeech,
    PrizeMotivation,
    LifeBlurb,
    WorkBlurb,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::NobelLecture => "nobel_lecture",
            SourceType::AcceptanceSpeech => "acceptance_speech",
            SourceType::CeremonySpeech => "ceremony_speech",
            SourceType::PrizeMotivation => "prize_motivation",
            SourceType::LifeBlurb => "life_blurb",
            SourceType::WorkBlurb => "work_blurb",
        }
    }
}

/// A single embedded passage with full structural metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub source_type: SourceType,
    pub laureate: String,
    pub year_awarded: i32,
    pub country: String,
    pub country_flag: String,
    pub gender: String,
    pub category: String,
    pub prize_motivation: String,
    #[serde(default)]
    pub specific_work_cited: bool,
    pub embedding: Vec<f32>,
}

/// One record per (year, laureate) pair; the metadata handler answers
/// factual queries from these alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaureateRecord {
    pub laureate: String,
    pub year_awarded: i32,
    pub country: String,
    pub country_flag: String,
    pub gender: String,
    pub category: String,
    pub prize_motivation: String,
}

/// Load the chunk corpus from JSONL, one chunk per line.
/// Validates chunk_id uniqueness, complete structural metadata, and the
/// embedding dimension against the active model.
pub fn load_chunks(path: &str, expected_dim: usize) -> Result<Vec<Chunk>> {
    let file = std::fs::File::open(path)
        .map_err(|e| NobelLmError::config(format!("cannot open corpus {}: {}", path, e)))?;
    let reader = std::io::BufReader::new(file);

    let mut chunks = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line).map_err(|e| {
            NobelLmError::config(format!("{}:{}: malformed chunk: {}", path, line_no + 1, e))
        })?;
        validate_chunk(&chunk, expected_dim)
            .map_err(|e| NobelLmError::config(format!("{}:{}: {}", path, line_no + 1, e)))?;
        if !seen_ids.insert(chunk.chunk_id.clone()) {
            return Err(NobelLmError::config(format!(
                "{}:{}: duplicate chunk_id '{}'",
                path,
                line_no + 1,
                chunk.chunk_id
            )));
        }
        chunks.push(chunk);
    }
    if chunks.is_empty() {
        return Err(NobelLmError::config(format!("corpus {} is empty", path)));
    }
    tracing::info!("loaded {} chunks from {}", chunks.len(), path);
    Ok(chunks)
}

fn validate_chunk(chunk: &Chunk, expected_dim: usize) -> std::result::Result<(), String> {
    if chunk.chunk_id.is_empty() {
        return Err("empty chunk_id".into());
    }
    if chunk.text.trim().is_empty() {
        return Err(format!("chunk '{}' has empty text", chunk.chunk_id));
    }
    if chunk.laureate.is_empty() || chunk.country.is_empty() || chunk.category.is_empty() {
        return Err(format!(
            "chunk '{}' has incomplete structural metadata",
            chunk.chunk_id
        ));
    }
    if chunk.embedding.len() != expected_dim {
        return Err(format!(
            "chunk '{}' embedding dim {} != active model dim {}",
            chunk.chunk_id,
            chunk.embedding.len(),
            expected_dim
        ));
    }
    Ok(())
}

/// Load laureate records from a JSON array file
pub fn load_laureates(path: &str) -> Result<Vec<LaureateRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| NobelLmError::config(format!("cannot open laureates {}: {}", path, e)))?;
    let records: Vec<LaureateRecord> = serde_json::from_str(&content)
        .map_err(|e| NobelLmError::config(format!("{}: malformed laureate file: {}", path, e)))?;
    if records.is_empty() {
        return Err(NobelLmError::config(format!(
            "laureate file {} is empty",
            path
        )));
    }
    tracing::info!("loaded {} laureate records from {}", records.len(), path);
    Ok(records)
}

/// Read-only laureate name index for scoped-entity detection and
/// metadata lookups. Supports exact, last-name, and fuzzy matching.
pub struct LaureateIndex {
    records: Vec<LaureateRecord>,
}

/// Jaro-Winkler floor for fuzzy full-name matches
const FUZZY_NAME_THRESHOLD: f64 = 0.88;

impl LaureateIndex {
    pub fn new(records: Vec<LaureateRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[LaureateRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact case-insensitive full-name lookup
    pub fn by_name(&self, name: &str) -> Option<&LaureateRecord> {
        let wanted = normalize_query(name);
        self.records
            .iter()
            .find(|r| normalize_query(&r.laureate) == wanted)
    }

    /// All records for a given award year
    pub fn by_year(&self, year: i32) -> Vec<&LaureateRecord> {
        self.records
            .iter()
            .filter(|r| r.year_awarded == year)
            .collect()
    }

    /// Fuzzy resolution of a free-form name: exact, then unique last-name,
    /// then Jaro-Winkler above the floor.
    pub fn resolve(&self, name: &str) -> Option<&LaureateRecord> {
        if let Some(r) = self.by_name(name) {
            return Some(r);
        }
        let wanted = normalize_query(name);

        // Unique last-name match ("Morrison" -> "Toni Morrison")
        let last_matches: Vec<&LaureateRecord> = self
            .records
            .iter()
            .filter(|r| {
                normalize_query(&r.laureate)
                    .rsplit(' ')
                    .next()
                    .map(|last| last == wanted)
                    .unwrap_or(false)
            })
            .collect();
        if last_matches.len() == 1 {
            return Some(last_matches[0]);
        }

        // Fuzzy full-name match; best score wins
        let mut best: Option<(&LaureateRecord, f64)> = None;
        for r in &self.records {
            let score = strsim::jaro_winkler(&wanted, &normalize_query(&r.laureate));
            if score >= FUZZY_NAME_THRESHOLD && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((r, score));
            }
        }
        best.map(|(r, _)| r)
    }

    /// Find a laureate named in free-form query text. Full names are matched
    /// as whole phrases; bare surnames resolve when unambiguous.
    pub fn find_in_query(&self, query: &str) -> Option<&LaureateRecord> {
        // Whole full-name mention wins
        for r in &self.records {
            if contains_whole_word(query, &r.laureate) {
                return Some(r);
            }
        }
        // Bare surname mention, if it maps to exactly one laureate
        let mut found: Option<&LaureateRecord> = None;
        for r in &self.records {
            let last = match normalize_query(&r.laureate).rsplit(' ').next() {
                Some(l) => l.to_string(),
                None => continue,
            };
            if last.len() >= 4 && contains_whole_word(query, &last) {
                if found.is_some() {
                    return None; // ambiguous surname
                }
                found = Some(r);
            }
        }
        found
    }
}

//! Matching engine: name normalization, token-set scoring, best-candidate
//! selection, and batched orchestration over the source x candidate
//! cross-join.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use plink_core::{CandidateRecord, MatchResult, SourceRecord};
use serde::Serialize;
use strsim::normalized_levenshtein;
use thiserror::Error;
use tracing::{info, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

pub const CRATE_NAME: &str = "plink-engine";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    /// Scores at or below this value are discarded, not downgraded.
    pub match_threshold: u8,
    /// Ceiling on |batch sources| x |candidates| per batch.
    pub max_batch_size: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: 90,
            max_batch_size: 10_000,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.match_threshold > 100 {
            return Err(EngineError::InvalidConfig(format!(
                "match_threshold {} out of range 0-100",
                self.match_threshold
            )));
        }
        if self.max_batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
    /// Malformed name data aborts the whole run: dropping the row instead
    /// would break the one-result-per-source guarantee.
    #[error("source '{source_id}': no usable name after normalization")]
    MalformedName { source_id: String },
    #[error("querying previously resolved matches: {0}")]
    ResolvedLookup(String),
    #[error("merged results carry {0} duplicate source id(s)")]
    DuplicateSourceIds(usize),
}

// ---------------------------------------------------------------------------
// Incremental state seam
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResolvedLookupError {
    /// The downstream match table does not exist yet. Recovered by the
    /// pipeline as "nothing resolved".
    #[error("no resolved-match state available")]
    MissingState,
    #[error("{0}")]
    Query(String),
}

/// Supplies the set of source ids already present in a previously persisted
/// match table. Backed by whatever the persistence collaborator is.
pub trait ResolvedLookup {
    fn resolved_source_ids(&self) -> Result<BTreeSet<String>, ResolvedLookupError>;
}

/// Lookup for a first run: nothing resolved yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolvedMatches;

impl ResolvedLookup for NoResolvedMatches {
    fn resolved_source_ids(&self) -> Result<BTreeSet<String>, ResolvedLookupError> {
        Ok(BTreeSet::new())
    }
}

// ---------------------------------------------------------------------------
// Name normalization
// ---------------------------------------------------------------------------

/// Canonical comparison form: accents folded to their base letter, then
/// lower-cased and stripped to `a-z` plus single spaces. Both catalogs pass
/// through this identically, so formatting differences never produce false
/// negatives.
pub fn normalize_name(name: &str) -> String {
    let folded: String = name.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    folded
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphabetic() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Fuzzy scoring
// ---------------------------------------------------------------------------

/// Similarity between two normalized names, 0-100.
pub trait Scorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> u8;
}

/// Token-set similarity: order- and duplicate-insensitive. Identical token
/// sets score 100 regardless of ordering or repetition; the remainder falls
/// back to character-level ratios over the set intersection and differences.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenSetScorer;

impl Scorer for TokenSetScorer {
    fn score(&self, a: &str, b: &str) -> u8 {
        token_set_ratio(a, b)
    }
}

fn ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    (normalized_levenshtein(a, b) * 100.0).round() as u8
}

fn join_tokens(sect: &str, diff: &[&str]) -> String {
    if diff.is_empty() {
        sect.to_string()
    } else if sect.is_empty() {
        diff.join(" ")
    } else {
        format!("{sect} {}", diff.join(" "))
    }
}

pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    match (tokens_a.is_empty(), tokens_b.is_empty()) {
        (true, true) => return 100,
        (true, false) | (false, true) => return 0,
        (false, false) => {}
    }

    let sect: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let diff_ab: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let diff_ba: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let sect = sect.join(" ");
    let combined_ab = join_tokens(&sect, &diff_ab);
    let combined_ba = join_tokens(&sect, &diff_ba);

    ratio(&sect, &combined_ab)
        .max(ratio(&sect, &combined_ba))
        .max(ratio(&combined_ab, &combined_ba))
}

// ---------------------------------------------------------------------------
// Per-batch matching
// ---------------------------------------------------------------------------

/// Candidate name variants in canonical form. Computed once per batch so
/// the inner scoring loop compares prepared strings only.
struct NormalizedCandidate {
    idx: usize,
    norm_short: String,
    norm_long: String,
}

/// Matches one batch of source records against the full candidate set.
/// Pure: the output depends only on the arguments, so batches can run in
/// any order (or in parallel) and concatenate.
pub fn match_batch(
    sources: &[SourceRecord],
    candidates: &[CandidateRecord],
    scorer: &dyn Scorer,
    threshold: u8,
) -> Result<Vec<MatchResult>, EngineError> {
    let normalized: Vec<NormalizedCandidate> = candidates
        .iter()
        .enumerate()
        .map(|(idx, c)| NormalizedCandidate {
            idx,
            norm_short: normalize_name(&c.name_short),
            norm_long: normalize_name(&c.name_long),
        })
        .collect();

    sources
        .iter()
        .map(|source| match_one(source, candidates, &normalized, scorer, threshold))
        .collect()
}

fn match_one(
    source: &SourceRecord,
    candidates: &[CandidateRecord],
    normalized: &[NormalizedCandidate],
    scorer: &dyn Scorer,
    threshold: u8,
) -> Result<MatchResult, EngineError> {
    let source_name = normalize_name(&source.display_name);
    if source_name.is_empty() {
        return Err(EngineError::MalformedName {
            source_id: source.source_id.clone(),
        });
    }

    // Prefilter: drop candidates whose fine tags cannot correspond to the
    // source's coarse role.
    let eligible: Vec<&NormalizedCandidate> = normalized
        .iter()
        .filter(|n| candidates[n.idx].plays_role(source.position))
        .collect();

    // Long-name pass first; long names carry more disambiguating
    // information. Exact equality short-circuits the scorer.
    let long_scores: Vec<u8> = eligible
        .iter()
        .map(|n| {
            if n.norm_long == source_name {
                100
            } else {
                scorer.score(&source_name, &n.norm_long)
            }
        })
        .collect();

    // A perfect long-name score anywhere in the candidate set marks this
    // entity complete; the short-name pass is then skipped except for
    // exact short-name equality, which costs nothing to detect.
    let complete = long_scores.iter().any(|&s| s == 100);

    let mut best: Option<(usize, u8)> = None;
    for (i, candidate) in eligible.iter().enumerate() {
        let short_score = if candidate.norm_short == source_name {
            Some(100)
        } else if complete {
            None
        } else {
            Some(scorer.score(&source_name, &candidate.norm_short))
        };
        let pair_best = match short_score {
            Some(short) => short.max(long_scores[i]),
            None => long_scores[i],
        };
        // Strict comparison keeps the first-seen candidate on ties.
        if best.map_or(true, |(_, score)| pair_best > score) {
            best = Some((i, pair_best));
        }
    }

    let result = match best {
        Some((i, score)) if score > threshold => {
            let winner = &candidates[eligible[i].idx];
            MatchResult {
                source_id: source.source_id.clone(),
                candidate_id: Some(winner.candidate_id.clone()),
                confidence: Some(score),
                matched_name_short: Some(winner.name_short.clone()),
                matched_name_long: Some(winner.name_long.clone()),
            }
        }
        _ => MatchResult::unmatched(source.source_id.clone()),
    };
    Ok(result)
}

// ---------------------------------------------------------------------------
// Batch planning
// ---------------------------------------------------------------------------

/// How a run's source set is partitioned to bound cross-join cost. Only the
/// source side is split; every batch joins against the full candidate set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub batches: usize,
    pub sizes: Vec<usize>,
}

/// `ceil(source_count x candidate_count / max_batch_size)` contiguous
/// near-even batches, clamped to one batch per source at most. The earlier
/// batches take the remainder, so sizes differ by at most one.
pub fn plan_batches(source_count: usize, candidate_count: usize, max_batch_size: usize) -> BatchPlan {
    if source_count == 0 {
        return BatchPlan {
            batches: 0,
            sizes: Vec::new(),
        };
    }
    let cross = source_count * candidate_count;
    let batches = cross.div_ceil(max_batch_size).clamp(1, source_count);

    let base = source_count / batches;
    let remainder = source_count % batches;
    let sizes = (0..batches)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect();
    BatchPlan { batches, sizes }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Skip source entities already present in the persisted match table.
    Incremental,
    /// Re-match every source entity, ignoring prior state.
    FullRebuild,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: RunMode,
    pub source_total: usize,
    pub already_resolved: usize,
    pub candidate_count: usize,
    pub batches: usize,
    pub matched: usize,
    pub unmatched: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchRun {
    pub summary: MatchRunSummary,
    pub results: Vec<MatchResult>,
}

pub struct MatchPipeline {
    config: MatchConfig,
    scorer: Box<dyn Scorer>,
}

impl MatchPipeline {
    pub fn new(config: MatchConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            scorer: Box::new(TokenSetScorer),
        })
    }

    pub fn with_scorer(mut self, scorer: Box<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Runs a full match: incremental filter, batch planning, per-batch
    /// matching, concatenation. Fails fast on any batch error rather than
    /// returning a partial result set.
    pub fn run(
        &self,
        sources: &[SourceRecord],
        candidates: &[CandidateRecord],
        resolved: &dyn ResolvedLookup,
        mode: RunMode,
    ) -> Result<MatchRun, EngineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let resolved_ids = match mode {
            RunMode::FullRebuild => BTreeSet::new(),
            RunMode::Incremental => match resolved.resolved_source_ids() {
                Ok(ids) => ids,
                Err(ResolvedLookupError::MissingState) => {
                    warn!(%run_id, "no resolved-match state yet; running a full match");
                    BTreeSet::new()
                }
                Err(ResolvedLookupError::Query(message)) => {
                    return Err(EngineError::ResolvedLookup(message));
                }
            },
        };

        let pending: Vec<SourceRecord> = sources
            .iter()
            .filter(|s| !resolved_ids.contains(&s.source_id))
            .cloned()
            .collect();
        let already_resolved = sources.len() - pending.len();

        let mut results = Vec::with_capacity(pending.len());
        let plan = if candidates.is_empty() {
            BatchPlan {
                batches: 0,
                sizes: Vec::new(),
            }
        } else {
            plan_batches(pending.len(), candidates.len(), self.config.max_batch_size)
        };

        if candidates.is_empty() {
            // Absence of reference data is a valid, if degenerate, state.
            info!(%run_id, sources = pending.len(), "empty candidate catalog; emitting null matches");
            results.extend(pending.iter().map(|s| MatchResult::unmatched(s.source_id.clone())));
        } else {
            let mut offset = 0;
            for (i, &size) in plan.sizes.iter().enumerate() {
                info!(batch = i + 1, batches = plan.batches, size, "matching batch");
                let batch = &pending[offset..offset + size];
                results.extend(match_batch(
                    batch,
                    candidates,
                    self.scorer.as_ref(),
                    self.config.match_threshold,
                )?);
                offset += size;
            }
        }

        let distinct: BTreeSet<&str> = results.iter().map(|r| r.source_id.as_str()).collect();
        if distinct.len() != results.len() {
            return Err(EngineError::DuplicateSourceIds(results.len() - distinct.len()));
        }

        let matched = results.iter().filter(|r| r.is_matched()).count();
        let summary = MatchRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            mode,
            source_total: sources.len(),
            already_resolved,
            candidate_count: candidates.len(),
            batches: plan.batches,
            matched,
            unmatched: results.len() - matched,
        };
        info!(
            %run_id,
            matched = summary.matched,
            unmatched = summary.unmatched,
            batches = summary.batches,
            "match run complete"
        );
        Ok(MatchRun { summary, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plink_core::Position;

    fn src(id: &str, name: &str, position: Position) -> SourceRecord {
        SourceRecord {
            source_id: id.into(),
            display_name: name.into(),
            position,
            team: None,
        }
    }

    fn cand(id: &str, short: &str, long: &str, roles: [bool; 4]) -> CandidateRecord {
        CandidateRecord {
            candidate_id: id.into(),
            name_short: short.into(),
            name_long: long.into(),
            team: None,
            fine_position_tags: Vec::new(),
            is_goalkeeper: roles[0],
            is_defender: roles[1],
            is_midfielder: roles[2],
            is_forward: roles[3],
        }
    }

    const ANY_ROLE: [bool; 4] = [true, true, true, true];

    #[test]
    fn normalize_folds_accents_and_strips_noise() {
        assert_eq!(normalize_name("Mohamed Salah"), "mohamed salah");
        assert_eq!(normalize_name("N'Golo Kanté"), "n golo kante");
        assert_eq!(normalize_name("Müller-Wohlfahrt 3rd"), "muller wohlfahrt rd");
        assert_eq!(normalize_name("  Son   Heung-min "), "son heung min");
        assert_eq!(normalize_name("42"), "");
    }

    #[test]
    fn token_set_ratio_ignores_order_and_duplicates() {
        assert_eq!(token_set_ratio("salah mohamed", "mohamed salah"), 100);
        assert_eq!(token_set_ratio("salah salah mohamed", "mohamed salah"), 100);
        assert_eq!(token_set_ratio("", ""), 100);
        assert_eq!(token_set_ratio("mohamed", ""), 0);
    }

    #[test]
    fn token_set_ratio_rewards_partial_overlap() {
        let shared = token_set_ratio("jon smith", "jon smithson");
        assert!(shared > 50, "score was {shared}");
        assert!(shared < 100, "score was {shared}");

        let disjoint = token_set_ratio("aaa bbb", "xyz qrs");
        assert!(disjoint < 30, "score was {disjoint}");
    }

    #[test]
    fn exact_long_name_wins_with_confidence_100() {
        let sources = [src("7", "Mohamed Salah", Position::Forward)];
        let candidates = [
            cand("100", "J. Doe", "Jonathan Doe", ANY_ROLE),
            cand("101", "M. Salah", "Mohamed Salah", ANY_ROLE),
        ];
        let results = match_batch(&sources, &candidates, &TokenSetScorer, 90).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].candidate_id.as_deref(), Some("101"));
        assert_eq!(results[0].confidence, Some(100));
        assert_eq!(results[0].matched_name_long.as_deref(), Some("Mohamed Salah"));
    }

    #[test]
    fn position_filter_removes_incompatible_candidates() {
        let sources = [src("9", "Jon Smith", Position::Defender)];
        let candidates = [cand("200", "J. Smith", "Jon Smith", [true, false, false, false])];
        let results = match_batch(&sources, &candidates, &TokenSetScorer, 90).unwrap();
        assert!(!results[0].is_matched(), "goalkeeper pool cannot match a DEF");
        assert!(results[0].confidence.is_none());
    }

    #[test]
    fn scores_at_or_below_threshold_are_nulled() {
        let sources = [src("3", "Jon Smith", Position::Midfielder)];
        let candidates = [cand("300", "J. Smyth", "Jonathan Smythe", ANY_ROLE)];
        let results = match_batch(&sources, &candidates, &TokenSetScorer, 90).unwrap();
        assert!(!results[0].is_matched());

        // Same pool, permissive threshold: the candidate survives.
        let results = match_batch(&sources, &candidates, &TokenSetScorer, 10).unwrap();
        assert!(results[0].is_matched());
        let confidence = results[0].confidence.unwrap();
        assert!(confidence > 10 && confidence < 100, "confidence {confidence}");
    }

    #[test]
    fn ties_keep_the_first_seen_candidate() {
        let sources = [src("5", "Jon Smith", Position::Forward)];
        let candidates = [
            cand("400", "J. Smith", "Jon Smith", ANY_ROLE),
            cand("401", "J. Smith", "Jon Smith", ANY_ROLE),
        ];
        let results = match_batch(&sources, &candidates, &TokenSetScorer, 90).unwrap();
        assert_eq!(results[0].candidate_id.as_deref(), Some("400"));
    }

    #[test]
    fn complete_entities_skip_short_name_scoring() {
        struct ShortNamePanic;
        impl Scorer for ShortNamePanic {
            fn score(&self, a: &str, b: &str) -> u8 {
                // The long-name pass compares against long names only; any
                // other comparison means the short pass ran.
                assert!(
                    b.contains("long"),
                    "short-name scoring ran for a complete entity: {a} vs {b}"
                );
                token_set_ratio(a, b)
            }
        }
        let sources = [src("7", "exact long", Position::Forward)];
        let candidates = [
            cand("500", "shortish name", "Exact Long", ANY_ROLE),
            cand("501", "another short", "different long", ANY_ROLE),
        ];
        let results = match_batch(&sources, &candidates, &ShortNamePanic, 90).unwrap();
        assert_eq!(results[0].candidate_id.as_deref(), Some("500"));
        assert_eq!(results[0].confidence, Some(100));
    }

    #[test]
    fn exact_short_name_still_scores_when_not_complete() {
        let sources = [src("8", "J Smith", Position::Forward)];
        let candidates = [cand("600", "J Smith", "Jonathan Smith the Elder", ANY_ROLE)];
        let results = match_batch(&sources, &candidates, &TokenSetScorer, 90).unwrap();
        assert_eq!(results[0].confidence, Some(100));
    }

    #[test]
    fn malformed_source_name_fails_the_batch() {
        let sources = [
            src("1", "Jon Smith", Position::Forward),
            src("2", "1234 !!", Position::Forward),
        ];
        let candidates = [cand("700", "J. Smith", "Jon Smith", ANY_ROLE)];
        let err = match_batch(&sources, &candidates, &TokenSetScorer, 90).unwrap_err();
        assert!(matches!(err, EngineError::MalformedName { ref source_id } if source_id == "2"));
    }

    #[test]
    fn batch_plan_matches_cost_formula() {
        // ceil(10 * 20 / 50) = 4 batches over 10 sources.
        let plan = plan_batches(10, 20, 50);
        assert_eq!(plan.batches, 4);
        assert_eq!(plan.sizes, vec![3, 3, 2, 2]);
        assert_eq!(plan.sizes.iter().sum::<usize>(), 10);
    }

    #[test]
    fn batch_plan_edge_cases() {
        assert_eq!(plan_batches(0, 20, 50).batches, 0);
        // Everything fits in one batch.
        assert_eq!(plan_batches(5, 10, 10_000).sizes, vec![5]);
        // Ceiling smaller than one source row's cost: clamp to one source
        // per batch rather than planning empty batches.
        assert_eq!(plan_batches(2, 100, 10).sizes, vec![1, 1]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = MatchPipeline::new(MatchConfig {
            match_threshold: 101,
            max_batch_size: 100,
        })
        .err()
        .expect("threshold over 100 must be rejected");
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        assert!(MatchPipeline::new(MatchConfig {
            match_threshold: 90,
            max_batch_size: 0,
        })
        .is_err());
    }
}

//! Core domain model for player linkage: catalog records and match output.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "plink-core";

/// Coarse role classification used by the fantasy catalog. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GKP",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "GKP" => Some(Position::Goalkeeper),
            "DEF" => Some(Position::Defender),
            "MID" => Some(Position::Midfielder),
            "FWD" => Some(Position::Forward),
            _ => None,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One entity from the catalog being resolved. Carries no stable
/// cross-reference id; immutable during a matching run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub display_name: String,
    pub position: Position,
    pub team: Option<String>,
}

/// One entity from the reference catalog being matched against.
///
/// The `is_*` role flags are precomputed at load time by intersecting
/// `fine_position_tags` with the configured per-role tag sets, so the
/// position prefilter is a boolean test rather than a set operation per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub candidate_id: String,
    pub name_short: String,
    pub name_long: String,
    pub team: Option<String>,
    pub fine_position_tags: Vec<String>,
    pub is_goalkeeper: bool,
    pub is_defender: bool,
    pub is_midfielder: bool,
    pub is_forward: bool,
}

impl CandidateRecord {
    /// Whether this candidate's fine position tags overlap the coarse role.
    pub fn plays_role(&self, position: Position) -> bool {
        match position {
            Position::Goalkeeper => self.is_goalkeeper,
            Position::Defender => self.is_defender,
            Position::Midfielder => self.is_midfielder,
            Position::Forward => self.is_forward,
        }
    }
}

/// Final linkage decision for one source entity. Exactly one of these is
/// produced per source record; a no-match carries all-null candidate fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub source_id: String,
    pub candidate_id: Option<String>,
    pub confidence: Option<u8>,
    pub matched_name_short: Option<String>,
    pub matched_name_long: Option<String>,
}

impl MatchResult {
    pub fn unmatched(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            candidate_id: None,
            confidence: None,
            matched_name_short: None,
            matched_name_long: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.candidate_id.is_some()
    }
}

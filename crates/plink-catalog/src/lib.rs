//! Catalog ingestion: raw tabular rows from both catalogs become validated
//! `SourceRecord` / `CandidateRecord` collections ready for matching.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use plink_core::{CandidateRecord, Position, SourceRecord};
use serde::Deserialize;
use thiserror::Error;

pub const CRATE_NAME: &str = "plink-catalog";

/// Configuration-level failures. All of these abort a run before any batch
/// executes; nothing downstream ever sees a half-built catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{path}: missing required column '{column}'")]
    MissingColumn { path: String, column: String },
    #[error("reading {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("source row '{id}': unknown position code '{code}'")]
    UnknownPositionCode { id: String, code: String },
    #[error("role tag set for '{0}' has no tags")]
    EmptyRoleTagSet(&'static str),
    #[error("team name mapping has no entries")]
    EmptyTeamMap,
}

// ---------------------------------------------------------------------------
// Raw row schemas
// ---------------------------------------------------------------------------

/// One row of the fantasy catalog's player table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourcePlayerRow {
    pub id: String,
    pub position_code: String,
    pub team_id: String,
    pub first_name: String,
    pub last_name: String,
}

/// One row of the fantasy catalog's team vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TeamRow {
    pub team_id: String,
    pub team_name: String,
}

/// One row of the reference catalog export. `fine_position_tags` is the
/// comma-separated granular position list as shipped in the export.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CandidateRow {
    pub candidate_id: String,
    pub name_short: String,
    pub name_long: String,
    pub club_name: String,
    pub fine_position_tags: String,
}

// ---------------------------------------------------------------------------
// Fixed lookup configuration
// ---------------------------------------------------------------------------

/// Maps free-text club names from the reference catalog onto the fantasy
/// catalog's team vocabulary. Unmapped clubs are tolerated: club affinity is
/// a soft signal, not a hard filter.
#[derive(Debug, Clone)]
pub struct TeamNameMap {
    clubs: BTreeMap<String, String>,
}

impl TeamNameMap {
    pub fn new<I, K, V>(entries: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let clubs: BTreeMap<String, String> = entries
            .into_iter()
            .map(|(club, team)| (club.into().trim().to_string(), team.into()))
            .collect();
        if clubs.is_empty() {
            return Err(CatalogError::EmptyTeamMap);
        }
        Ok(Self { clubs })
    }

    /// The stock Premier League mapping shipped with the engine.
    pub fn premier_league() -> Self {
        let entries = [
            ("Arsenal", "Arsenal"),
            ("Aston Villa", "Aston Villa"),
            ("Bournemouth", "Bournemouth"),
            ("Brighton & Hove Albion", "Brighton"),
            ("Burnley", "Burnley"),
            ("Chelsea", "Chelsea"),
            ("Crystal Palace", "Crystal Palace"),
            ("Everton", "Everton"),
            ("Leicester City", "Leicester"),
            ("Liverpool", "Liverpool"),
            ("Manchester City", "Man City"),
            ("Manchester United", "Man Utd"),
            ("Newcastle United", "Newcastle"),
            ("Norwich City", "Norwich"),
            ("Sheffield United", "Sheffield Utd"),
            ("Southampton", "Southampton"),
            ("Tottenham Hotspur", "Spurs"),
            ("Watford", "Watford"),
            ("West Ham United", "West Ham"),
            ("Wolverhampton Wanderers", "Wolves"),
        ];
        Self::new(entries).expect("stock mapping is non-empty")
    }

    /// Club names in some exports carry stray whitespace; lookups trim.
    pub fn team_for_club(&self, club: &str) -> Option<&str> {
        self.clubs.get(club.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clubs.is_empty()
    }
}

/// Per-role sets of acceptable fine position tags. Intentionally generous:
/// the prefilter built from these must never discard a true match.
#[derive(Debug, Clone)]
pub struct RoleTagSets {
    pub goalkeeper: BTreeSet<String>,
    pub defender: BTreeSet<String>,
    pub midfielder: BTreeSet<String>,
    pub forward: BTreeSet<String>,
}

fn tag_set(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

impl Default for RoleTagSets {
    fn default() -> Self {
        Self {
            goalkeeper: tag_set(&["GK"]),
            defender: tag_set(&["CB", "LCB", "RCB", "LB", "RB", "LWB", "RWB"]),
            midfielder: tag_set(&[
                "CM", "LCM", "RCM", "CDM", "LDM", "RDM", "CAM", "LAM", "RAM", "LM", "RM", "LW",
                "RW",
            ]),
            forward: tag_set(&["ST", "CF", "LS", "RS", "LF", "RF"]),
        }
    }
}

impl RoleTagSets {
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (role, tags) in [
            ("goalkeeper", &self.goalkeeper),
            ("defender", &self.defender),
            ("midfielder", &self.midfielder),
            ("forward", &self.forward),
        ] {
            if tags.is_empty() {
                return Err(CatalogError::EmptyRoleTagSet(role));
            }
        }
        Ok(())
    }

    fn overlaps(&self, position: Position, tags: &[String]) -> bool {
        let accepted = match position {
            Position::Goalkeeper => &self.goalkeeper,
            Position::Defender => &self.defender,
            Position::Midfielder => &self.midfielder,
            Position::Forward => &self.forward,
        };
        tags.iter().any(|tag| accepted.contains(tag))
    }
}

// ---------------------------------------------------------------------------
// Record building
// ---------------------------------------------------------------------------

/// Builds the source-side record set: joins the team vocabulary, concatenates
/// name parts, and parses coarse position codes. Unknown codes fail fast;
/// a team id absent from the vocabulary yields a null team. Duplicate source
/// ids keep the first-seen row.
pub fn build_source_records(
    players: &[SourcePlayerRow],
    teams: &[TeamRow],
) -> Result<Vec<SourceRecord>, CatalogError> {
    let team_names: BTreeMap<&str, &str> = teams
        .iter()
        .map(|t| (t.team_id.as_str(), t.team_name.as_str()))
        .collect();

    let mut seen = BTreeSet::new();
    let mut records = Vec::with_capacity(players.len());
    for row in players {
        if !seen.insert(row.id.as_str()) {
            continue;
        }
        let position =
            Position::from_code(&row.position_code).ok_or_else(|| CatalogError::UnknownPositionCode {
                id: row.id.clone(),
                code: row.position_code.clone(),
            })?;
        let display_name = format!("{} {}", row.first_name.trim(), row.last_name.trim())
            .trim()
            .to_string();
        records.push(SourceRecord {
            source_id: row.id.clone(),
            display_name,
            position,
            team: team_names.get(row.team_id.as_str()).map(|t| t.to_string()),
        });
    }
    Ok(records)
}

/// Builds the candidate-side record set: splits the granular tag list, maps
/// club names onto the source team vocabulary, and precomputes the per-role
/// overlap flags used by the position prefilter.
pub fn build_candidate_records(
    rows: &[CandidateRow],
    team_map: &TeamNameMap,
    tag_sets: &RoleTagSets,
) -> Result<Vec<CandidateRecord>, CatalogError> {
    tag_sets.validate()?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let tags: Vec<String> = row
            .fine_position_tags
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        records.push(CandidateRecord {
            candidate_id: row.candidate_id.clone(),
            name_short: row.name_short.clone(),
            name_long: row.name_long.clone(),
            team: team_map.team_for_club(&row.club_name).map(str::to_string),
            is_goalkeeper: tag_sets.overlaps(Position::Goalkeeper, &tags),
            is_defender: tag_sets.overlaps(Position::Defender, &tags),
            is_midfielder: tag_sets.overlaps(Position::Midfielder, &tags),
            is_forward: tag_sets.overlaps(Position::Forward, &tags),
            fine_position_tags: tags,
        });
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// CSV ingestion
// ---------------------------------------------------------------------------

const SOURCE_COLUMNS: [&str; 5] = ["id", "position_code", "team_id", "first_name", "last_name"];
const TEAM_COLUMNS: [&str; 2] = ["team_id", "team_name"];
const CANDIDATE_COLUMNS: [&str; 5] = [
    "candidate_id",
    "name_short",
    "name_long",
    "club_name",
    "fine_position_tags",
];

fn read_rows<T: serde::de::DeserializeOwned>(
    path: &Path,
    required: &[&str],
) -> Result<Vec<T>, CatalogError> {
    let display = path.display().to_string();

    let mut reader = csv::Reader::from_path(path).map_err(|source| CatalogError::Csv {
        path: display.clone(),
        source,
    })?;
    let headers = reader
        .headers()
        .map_err(|source| CatalogError::Csv {
            path: display.clone(),
            source,
        })?
        .clone();
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(CatalogError::MissingColumn {
                path: display,
                column: column.to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.map_err(|source| CatalogError::Csv {
            path: display.clone(),
            source,
        })?);
    }
    Ok(rows)
}

pub fn load_source_rows(path: impl AsRef<Path>) -> Result<Vec<SourcePlayerRow>, CatalogError> {
    read_rows(path.as_ref(), &SOURCE_COLUMNS)
}

pub fn load_team_rows(path: impl AsRef<Path>) -> Result<Vec<TeamRow>, CatalogError> {
    read_rows(path.as_ref(), &TEAM_COLUMNS)
}

/// Loads the reference catalog export, projecting just the columns the
/// matcher needs; extra columns in the export are ignored.
pub fn load_candidate_rows(path: impl AsRef<Path>) -> Result<Vec<CandidateRow>, CatalogError> {
    read_rows(path.as_ref(), &CANDIDATE_COLUMNS)
}

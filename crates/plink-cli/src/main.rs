use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plink_catalog::{
    build_candidate_records, build_source_records, load_candidate_rows, load_source_rows,
    load_team_rows, RoleTagSets, TeamNameMap,
};
use plink_core::MatchResult;
use plink_engine::{
    MatchConfig, MatchPipeline, NoResolvedMatches, ResolvedLookup, ResolvedLookupError, RunMode,
};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "plink-cli")]
#[command(about = "Player linkage command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Match the fantasy catalog against the reference catalog.
    Match {
        /// Fantasy catalog player CSV (id, position_code, team_id, first_name, last_name).
        #[arg(long)]
        players: PathBuf,
        /// Fantasy catalog team vocabulary CSV (team_id, team_name).
        #[arg(long)]
        teams: PathBuf,
        /// Reference catalog CSV (candidate_id, name_short, name_long, club_name, fine_position_tags).
        #[arg(long)]
        candidates: PathBuf,
        /// Output JSON path for the run (summary + results).
        #[arg(long)]
        out: PathBuf,
        /// Previous run output; its source ids are skipped unless --rebuild.
        #[arg(long)]
        previous: Option<PathBuf>,
        /// Re-match everything, ignoring any previous run.
        #[arg(long)]
        rebuild: bool,
        #[arg(long, default_value_t = 90)]
        threshold: u8,
        #[arg(long, default_value_t = 10_000)]
        max_batch_size: usize,
    },
}

/// File-backed resolved-match state: the source ids of a previous run's
/// output. A missing file is the absent-downstream-table case and is
/// recovered by the engine as "nothing resolved yet".
struct PreviousRunLookup {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PreviousRun {
    results: Vec<MatchResult>,
}

impl ResolvedLookup for PreviousRunLookup {
    fn resolved_source_ids(&self) -> Result<BTreeSet<String>, ResolvedLookupError> {
        if !self.path.exists() {
            return Err(ResolvedLookupError::MissingState);
        }
        let text = fs::read_to_string(&self.path)
            .map_err(|e| ResolvedLookupError::Query(format!("{}: {e}", self.path.display())))?;
        let previous: PreviousRun = serde_json::from_str(&text)
            .map_err(|e| ResolvedLookupError::Query(format!("{}: {e}", self.path.display())))?;
        Ok(previous
            .results
            .into_iter()
            .map(|result| result.source_id)
            .collect())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Match {
            players,
            teams,
            candidates,
            out,
            previous,
            rebuild,
            threshold,
            max_batch_size,
        } => run_match(
            &players,
            &teams,
            &candidates,
            &out,
            previous,
            rebuild,
            threshold,
            max_batch_size,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_match(
    players: &PathBuf,
    teams: &PathBuf,
    candidates: &PathBuf,
    out: &PathBuf,
    previous: Option<PathBuf>,
    rebuild: bool,
    threshold: u8,
    max_batch_size: usize,
) -> Result<()> {
    let player_rows = load_source_rows(players).context("loading player catalog")?;
    let team_rows = load_team_rows(teams).context("loading team vocabulary")?;
    let candidate_rows = load_candidate_rows(candidates).context("loading reference catalog")?;

    let sources = build_source_records(&player_rows, &team_rows)?;
    let candidate_records = build_candidate_records(
        &candidate_rows,
        &TeamNameMap::premier_league(),
        &RoleTagSets::default(),
    )?;

    let pipeline = MatchPipeline::new(MatchConfig {
        match_threshold: threshold,
        max_batch_size,
    })?;

    let mode = if rebuild {
        RunMode::FullRebuild
    } else {
        RunMode::Incremental
    };
    let run = match previous {
        Some(path) => pipeline.run(
            &sources,
            &candidate_records,
            &PreviousRunLookup { path },
            mode,
        )?,
        None => pipeline.run(&sources, &candidate_records, &NoResolvedMatches, mode)?,
    };

    let json = serde_json::to_vec_pretty(&run).context("serializing match run")?;
    fs::write(out, json).with_context(|| format!("writing {}", out.display()))?;

    println!(
        "match complete: run_id={} sources={} matched={} unmatched={} batches={} out={}",
        run.summary.run_id,
        run.summary.source_total,
        run.summary.matched,
        run.summary.unmatched,
        run.summary.batches,
        out.display()
    );
    Ok(())
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rcl_merge::attributes::backfill_person_attributes;
use rcl_merge::classify::prune_single_show;
use rcl_merge::engine::collect_appearance_records;
use rcl_merge::normalize::normalize_show_names;
use rcl_merge::person_table::{build_person_rows, person_table_payload, PERSON_TABLE_HEADER};
use rcl_merge::schema::{
    AppearanceColumns, PersonAttributeColumns, PersonTableColumns, ShowTableColumns,
    ViableColumns,
};
use rcl_merge::transfer::transfer_episodes_seasons;
use rcl_merge::{
    aggregate_records, EligibilityPolicy, IdentityResolver, MergeConfig, MergeEngine,
};
use rcl_providers::{FixtureProvider, HttpMetadataProvider, PersonMetadataProvider};
use rcl_store::{SheetClient, SheetClientConfig, StoreError, TabularStore};

#[derive(Debug, Parser)]
#[command(name = "rcl-cli")]
#[command(about = "Reality Cast Ledger command-line interface")]
struct Cli {
    /// Compute everything, write nothing.
    #[arg(long, global = true)]
    dry_run: bool,
    /// Eligibility policy file; compiled-in defaults when absent.
    #[arg(long)]
    rules: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the incremental merge into the viable table.
    Merge,
    /// Rebuild the person-level table from appearance data.
    BuildPersons {
        /// Target table for the rebuilt rows.
        #[arg(long, default_value = "UpdateInfo_Rebuilt")]
        output: String,
    },
    /// Correct divergent show names in the appearance table.
    NormalizeNames,
    /// Copy curated episode/season cells back to the appearance table.
    Transfer,
    /// Fill person attribute cells (gender, birthday) from the metadata API,
    /// or from a fixture file when one is given.
    BackfillAttributes {
        /// JSON map of numeric person id to attributes; skips the live API.
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },
    /// List people whose whole aggregate spans a single show.
    PruneReport,
    /// Parse a saved full-credits HTML page and print episode counts.
    ParseCredits {
        #[arg(long)]
        html: PathBuf,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_policy(rules: &Option<PathBuf>) -> Result<EligibilityPolicy> {
    match rules {
        Some(path) => EligibilityPolicy::from_yaml_file(path),
        None => Ok(EligibilityPolicy::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = SheetClient::new(SheetClientConfig::from_env()?)?;
    let mut config = MergeConfig::from_env();
    config.dry_run = cli.dry_run;
    let policy = load_policy(&cli.rules)?;

    match cli.command {
        Commands::Merge => {
            let engine = MergeEngine::new(&store, config, policy);
            let summary = engine.run().await?;
            println!(
                "merge complete: run_id={} appends={} patches={} dry_run={}",
                summary.run_id, summary.appends_planned, summary.patches_planned, summary.dry_run
            );
        }
        Commands::BuildPersons { output } => {
            let resolver = build_resolver(&store, &config).await?;
            let outcome = aggregate_appearances(&store, &config, &resolver).await?;
            let rows = build_person_rows(&outcome.stats);
            println!(
                "person table: {} rows (header: {})",
                rows.len(),
                PERSON_TABLE_HEADER.join(", ")
            );
            if !config.dry_run {
                let target = match store.read_table(&output).await {
                    Ok(table) => Some(table),
                    Err(StoreError::TableNotFound(_)) => None,
                    Err(err) => return Err(err.into()),
                };
                let payload = person_table_payload(target.as_ref(), rows);
                store
                    .append_rows(&output, &payload)
                    .await
                    .with_context(|| format!("appending to {output}"))?;
            }
        }
        Commands::NormalizeNames => {
            let resolver = build_resolver(&store, &config).await?;
            let table = store.read_table(&config.appearance_table).await?;
            let cols = AppearanceColumns::resolve(&table)?;
            let outcome = normalize_show_names(&table, cols.show_alnum, cols.show_name, &resolver);
            println!(
                "normalize: {} corrections, {} already canonical, {} unknown show ids",
                outcome.patches.len(),
                outcome.already_canonical,
                outcome.unknown_show_ids
            );
            if !config.dry_run {
                store
                    .apply_patches(&config.appearance_table, &outcome.patches)
                    .await?;
            }
        }
        Commands::Transfer => {
            let appearance = store.read_table(&config.appearance_table).await?;
            let appearance_cols = AppearanceColumns::resolve(&appearance)?;
            let viable = store.read_table(&config.viable_table).await?;
            let viable_cols = ViableColumns::resolve(&viable)?;
            let outcome =
                transfer_episodes_seasons(&appearance, &appearance_cols, &viable, &viable_cols);
            println!(
                "transfer: {} fills, {} cells preserved, {} rows without annotation",
                outcome.patches.len(),
                outcome.cells_preserved,
                outcome.rows_without_match
            );
            if !config.dry_run {
                store
                    .apply_patches(&config.appearance_table, &outcome.patches)
                    .await?;
            }
        }
        Commands::BackfillAttributes { fixtures } => {
            let provider: Box<dyn PersonMetadataProvider> = match &fixtures {
                Some(path) => Box::new(FixtureProvider::from_json_file(path)?),
                None => Box::new(HttpMetadataProvider::from_env()?),
            };
            let table = store.read_table(&config.person_table).await?;
            let cols = PersonAttributeColumns::resolve(&table)?;
            let outcome = backfill_person_attributes(&table, &cols, provider.as_ref()).await;
            println!(
                "backfill: {} patches, {} people fetched, {} lookups failed",
                outcome.patches.len(),
                outcome.people_fetched,
                outcome.lookups_failed
            );
            if !config.dry_run {
                store
                    .apply_patches(&config.person_table, &outcome.patches)
                    .await?;
            }
        }
        Commands::PruneReport => {
            let resolver = build_resolver(&store, &config).await?;
            let outcome = aggregate_appearances(&store, &config, &resolver).await?;
            let mut count = 0usize;
            for (key, stats) in &outcome.stats {
                if prune_single_show(stats) {
                    count += 1;
                    println!("{key}\t{}\t{} eps", stats.name, stats.total_episodes);
                }
            }
            println!("prune candidates: {count} of {}", outcome.stats.len());
        }
        Commands::ParseCredits { html } => {
            let text = std::fs::read_to_string(&html)
                .with_context(|| format!("reading {}", html.display()))?;
            let index = rcl_providers::parse_credits_page(&text)
                .map_err(|e| anyhow::anyhow!("parsing credits page: {e}"))?;
            let mut entries: Vec<_> = index.episodes_by_id.iter().collect();
            entries.sort();
            for (person_id, episodes) in entries {
                println!("{person_id}\t{episodes} episodes");
            }
            println!("people with counts: {}", index.episodes_by_id.len());
        }
    }

    Ok(())
}

async fn build_resolver(
    store: &dyn TabularStore,
    config: &MergeConfig,
) -> Result<IdentityResolver> {
    let person_table = store.read_table(&config.person_table).await?;
    let person_cols = PersonTableColumns::resolve(&person_table)?;
    let show_table = store.read_table(&config.show_table).await?;
    let show_cols = ShowTableColumns::resolve(&show_table)?;
    Ok(IdentityResolver::from_tables(
        &person_table,
        &person_cols,
        &show_table,
        &show_cols,
    ))
}

async fn aggregate_appearances(
    store: &dyn TabularStore,
    config: &MergeConfig,
    resolver: &IdentityResolver,
) -> Result<rcl_merge::AggregateOutcome> {
    let table = store.read_table(&config.appearance_table).await?;
    let cols = AppearanceColumns::resolve(&table)?;
    let records = collect_appearance_records(&table, &cols, resolver);
    Ok(aggregate_records(&records))
}

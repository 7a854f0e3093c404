//! gbc CLI - Global Biodata catalogue store

use clap::{Parser, Subcommand, ValueEnum};
use gbc_store::config::{self, GbcConfig};
use gbc_store::fetch::{self, FetchOptions};
use gbc_store::ui;
use gbc_store::{Entity, Input, Publication, Resource, ResourceMention, Session, SqliteStore, Url};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gbc")]
#[command(version = "0.1.0")]
#[command(about = "Global Biodata catalogue store - resources, publications, grants and accessions")]
#[command(long_about = r#"
gbc keeps a versioned graph of biodata resources in a SQLite database:
  • Resources with their URLs, connection statuses and versions
  • Publications describing or citing them, and the grants behind them
  • Accessions issued by resources and mentions found in literature

Example usage:
  gbc init
  gbc write resource --file uniprot.json
  gbc show resource uniprot
  gbc stats
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and, optionally, a config file
    Init {
        /// Write a config file next to the database settings
        #[arg(long)]
        write_config: bool,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show row counts per table
    Stats,

    /// Write entities from a JSON object or array of objects
    Write {
        /// Entity kind (resource, publication, accession, mention, ...)
        kind: String,

        /// JSON file to read
        #[arg(short, long)]
        file: PathBuf,

        /// Write everything in one transaction, rolled back on the first error
        #[arg(long)]
        atomic: bool,
    },

    /// Look up entities
    Show {
        #[command(subcommand)]
        target: ShowTarget,

        /// Print JSON instead of text
        #[arg(long, global = true)]
        json: bool,
    },

    /// List every entity of a kind
    List {
        kind: ListKind,

        /// Only resources whose latest URL status is online
        #[arg(long)]
        online: bool,

        /// Skip nested publications and grants
        #[arg(long)]
        shallow: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Resources matching a short, common or full name
    Resource { name: String },

    /// A publication by id, PubMed id or PMC id
    Publication {
        #[arg(long, conflicts_with_all = ["pubmed", "pmc"])]
        id: Option<i64>,
        #[arg(long, conflicts_with = "pmc")]
        pubmed: Option<i64>,
        #[arg(long)]
        pmc: Option<String>,
    },

    /// An accession with its resource, version and citing publications
    Accession { accession: String },

    /// Mentions of a resource in the literature
    Mentions { name: String },

    /// A URL with its connection history
    Url { url: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListKind {
    Resources,
    Urls,
    Statuses,
    Versions,
    Publications,
    Grants,
    Agencies,
    Accessions,
    Mentions,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        tracing::error!("{:#}", e);
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let loaded = config::load_config(Some(&config_path))?;
    let has_config = loaded.is_some();
    let settings = loaded.unwrap_or_default();
    let database = resolve_database(cli.database.as_deref(), &settings)?;

    match cli.command {
        Commands::Init { write_config, force } => {
            ui::header("Initializing catalogue");
            let store = open_store(&database, &settings)?;
            ui::status(ui::Icons::DATABASE, "Database", &database.display().to_string());
            ui::status(ui::Icons::STATS, "Tables", &store.table_counts()?.len().to_string());

            if write_config {
                let written = GbcConfig {
                    database: Some(database.display().to_string()),
                    store: settings.store.clone(),
                };
                config::write_config(&config_path, &written, force)?;
                ui::status(ui::Icons::INFO, "Config", &config_path.display().to_string());
            } else if !has_config {
                tracing::debug!("No config at {}, using defaults", config_path.display());
            }
            ui::success("Catalogue ready");
        }

        Commands::Stats => {
            let store = open_store(&database, &settings)?;
            ui::section(" Catalogue ");
            println!("{}", ui::counts_table(&store.table_counts()?));
        }

        Commands::Write { kind, file, atomic } => {
            let started = Instant::now();
            let store = open_store(&database, &settings)?;
            let contents = std::fs::read_to_string(&file)?;
            let inputs = parse_inputs(&contents)?;
            tracing::info!("Writing {} {} record(s) from {}", inputs.len(), kind, file.display());

            let written = if atomic {
                let txn = store.begin()?;
                let count = write_all(&txn.session(), &kind, inputs)?;
                txn.commit()?;
                count
            } else {
                write_all(&store.session(), &kind, inputs)?
            };

            ui::success(&format!("Wrote {} {} record(s)", written, kind));
            ui::timing(&format!("{:.2?}", started.elapsed()));
        }

        Commands::Show { target, json } => {
            let store = open_store(&database, &settings)?;
            let session = store.session();
            show(&session, target, json)?;
        }

        Commands::List {
            kind,
            online,
            shallow,
            json,
        } => {
            let store = open_store(&database, &settings)?;
            let session = store.session();
            let options = if shallow {
                FetchOptions::shallow()
            } else {
                FetchOptions::default()
            };
            list(&session, kind, online, &options, json)?;
        }
    }

    Ok(())
}

fn resolve_database(flag: Option<&Path>, settings: &GbcConfig) -> anyhow::Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = &settings.database {
        return Ok(PathBuf::from(path));
    }
    Ok(config::default_database_path_in(&std::env::current_dir()?))
}

fn open_store(database: &Path, settings: &GbcConfig) -> anyhow::Result<SqliteStore> {
    config::ensure_db_dir(database)?;
    tracing::debug!("Opening {}", database.display());
    let store = SqliteStore::open_with(database, settings.store.retry_policy(), settings.store.busy_timeout())?;
    Ok(store)
}

/// One input per object; a top-level array yields one per element
fn parse_inputs(contents: &str) -> anyhow::Result<Vec<Input>> {
    let value: serde_json::Value = serde_json::from_str(contents)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    let inputs = items.into_iter().map(Input::from_json).collect::<gbc_store::Result<Vec<_>>>()?;
    Ok(inputs)
}

fn write_all(session: &Session<'_>, kind: &str, inputs: Vec<Input>) -> anyhow::Result<usize> {
    let mut written = 0;
    for input in inputs {
        let mut entity = Entity::from_kind(kind, &input)?;
        entity.write(session)?;
        tracing::debug!("Wrote {}", entity);
        written += 1;
    }
    Ok(written)
}

fn show(session: &Session<'_>, target: ShowTarget, json: bool) -> anyhow::Result<()> {
    match target {
        ShowTarget::Resource { name } => {
            let found = Resource::fetch_by_name(session, &name)?;
            print_all(&found, json)?;
        }
        ShowTarget::Publication { id, pubmed, pmc } => {
            let found = match (id, pubmed, pmc) {
                (Some(id), _, _) => Publication::fetch_by_id(session, id)?,
                (_, Some(pubmed), _) => Publication::fetch_by_pubmed_id(session, pubmed)?,
                (_, _, Some(pmc)) => Publication::fetch_by_pmc_id(session, &pmc)?,
                _ => anyhow::bail!("give one of --id, --pubmed or --pmc"),
            };
            print_all(&Vec::from_iter(found), json)?;
        }
        ShowTarget::Accession { accession } => {
            let found = fetch::fetch_accession(
                session,
                &gbc_store::Filters::new().eq("accession", accession),
                &FetchOptions::default(),
            )?;
            print_all(&found, json)?;
        }
        ShowTarget::Mentions { name } => {
            let mut mentions: Vec<ResourceMention> = Vec::new();
            for resource in Resource::fetch_by_name(session, &name)? {
                if let Some(id) = resource.id {
                    mentions.extend(ResourceMention::fetch_by_resource_id(session, id)?);
                }
            }
            print_all(&mentions, json)?;
        }
        ShowTarget::Url { url } => {
            let found = Url::fetch_by_url(session, &url)?;
            if !json {
                if let Some(u) = &found {
                    for status in &u.status {
                        ui::summary_row(&ui::online_marker(status.is_online).to_string(), &status.to_string());
                    }
                }
            }
            print_all(&Vec::from_iter(found), json)?;
        }
    }
    Ok(())
}

fn list(session: &Session<'_>, kind: ListKind, online: bool, options: &FetchOptions, json: bool) -> anyhow::Result<()> {
    match kind {
        ListKind::Resources if online => print_all(&fetch::fetch_all_online_resources(session, options)?, json),
        ListKind::Resources => print_all(&fetch::fetch_all_resources(session, options)?, json),
        ListKind::Urls => print_all(&fetch::fetch_all_urls(session, options)?, json),
        ListKind::Statuses => print_all(&fetch::fetch_all_connection_statuses(session, options)?, json),
        ListKind::Versions => print_all(&fetch::fetch_all_versions(session, options)?, json),
        ListKind::Publications => print_all(&fetch::fetch_all_publications(session, options)?, json),
        ListKind::Grants => print_all(&fetch::fetch_all_grants(session, options)?, json),
        ListKind::Agencies => print_all(&fetch::fetch_all_grant_agencies(session, options)?, json),
        ListKind::Accessions => print_all(&fetch::fetch_all_accessions(session, options)?, json),
        ListKind::Mentions => print_all(&fetch::fetch_all_resource_mentions(session, options)?, json),
    }
}

fn print_all<T>(items: &[T], json: bool) -> anyhow::Result<()>
where
    T: Serialize + Clone + Into<Entity>,
{
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }
    if items.is_empty() {
        ui::warn("Nothing found");
        return Ok(());
    }
    for item in items {
        println!("{}", ui::entity_line(&item.clone().into()));
    }
    println!("{}", ui::muted(&format!("{} result(s)", items.len())));
    Ok(())
}

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use node_version::{
    config::VersionConfig,
    logging,
    store::{EventStore, dialect::DialectKind, migration::RevisionMigration},
};
use tracing::info;

#[derive(Parser)]
#[command(name = "node-version")]
#[command(about = "Create or drop the node revision tables", long_about = None)]
struct Cli {
    /// JSON config with table/column name overrides.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file. Overrides `database_path` from the config.
    #[arg(long, short, global = true)]
    database: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    dialect: Option<DialectArg>,

    /// Print the statements instead of executing them.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every revision table and seed the implementor types.
    #[command(name = "migrate:revision-table")]
    Migrate,
    /// Drop every revision table.
    #[command(name = "rollback:revision-table")]
    Rollback,
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Sqlite,
    Postgres,
    Mysql,
}

impl From<DialectArg> for DialectKind {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Sqlite => DialectKind::Sqlite,
            DialectArg::Postgres => DialectKind::Postgres,
            DialectArg::Mysql => DialectKind::Mysql,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => VersionConfig::load(path)?,
        None => VersionConfig::default(),
    };
    let dialect = cli.dialect.map(DialectKind::from).unwrap_or(config.dialect);
    let forward = matches!(cli.command, Commands::Migrate);

    if cli.dry_run {
        let migration = RevisionMigration::new(&config.names, dialect.dialect());
        let statements = if forward {
            migration.up_statements()
        } else {
            migration.down_statements()
        };
        for statement in statements {
            println!("{statement};");
        }
        return Ok(());
    }

    if dialect != DialectKind::Sqlite {
        bail!("{dialect:?} can only be used with --dry-run; pipe the output into your database client");
    }

    let path = cli
        .database
        .or_else(|| config.database_path.clone().map(PathBuf::from))
        .context("no database given; pass --database or set database_path in the config")?;
    let store = EventStore::open_with_timeout(
        &path,
        config.names.clone(),
        Duration::from_millis(config.transaction_timeout_ms),
    )
    .with_context(|| format!("opening {}", path.display()))?;

    if forward {
        store.migrate().await.context("migrating revision tables")?;
    } else {
        store.rollback().await.context("rolling back revision tables")?;
    }
    info!(database = %path.display(), forward, "done");
    Ok(())
}

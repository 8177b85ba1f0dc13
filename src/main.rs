//! m4m-sync CLI
//!
//! Exit codes: 0 when every sensor synced, 1 when at least one sensor
//! failed, 2 when the run could not start (configuration, database or
//! storage unreachable).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use m4m_sync::database::{DataSource, SqliteDataSource};
use m4m_sync::error::{SyncError, SyncResult};
use m4m_sync::models::{SyncSettings, TimeRange};
use m4m_sync::services::{
    ArchiveStore, LocalBackend, RetrievalEngine, SerializerFormat, StorageBackend,
    StreamTransform, SyncEngine, WebDavBackend,
};

#[derive(Parser)]
#[command(name = "m4m-sync")]
#[command(about = "Archive sensor readings into per-day files")]
#[command(version)]
struct Cli {
    /// SQLite database with controllers, sensors and readings
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Archive format (raw, verbose)
    #[arg(long, global = true)]
    format: Option<SerializerFormat>,

    /// TOML settings file, command line flags take precedence
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sensors synced concurrently
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Store archives unencrypted
    #[arg(long, global = true)]
    plain: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync into a local directory
    SyncLocal {
        #[arg(long)]
        root: PathBuf,
    },
    /// Sync to a WebDAV server
    SyncWebdav {
        /// Server URL, or a bare host combined with --protocol
        #[arg(long)]
        uri: Option<String>,
        #[arg(long)]
        protocol: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Sync to the cloud drive
    SyncCloud {
        /// OAuth token, defaults to the one stored in the database
        #[arg(long)]
        token: Option<String>,
    },
    /// Read archived days from a local directory
    ReadLocal {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        controller: String,
        #[arg(long)]
        sensor_id: String,
        /// First day, DD-MM-YYYY
        #[arg(long, value_parser = parse_day)]
        date: NaiveDate,
        /// Last day, DD-MM-YYYY (defaults to --date)
        #[arg(long, value_parser = parse_day)]
        to: Option<NaiveDate>,
        /// Passphrase, archives are read as plain text without it
        #[arg(long)]
        key: Option<String>,
        #[arg(short, long, default_value = "out.tsv")]
        output: PathBuf,
    },
    /// List controllers and sensors archived in a local directory
    Ls {
        #[arg(long)]
        root: PathBuf,
    },
}

fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%d-%m-%Y")
        .map_err(|_| format!("Not a valid date: '{}', expected DD-MM-YYYY", raw))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether every sensor succeeded
async fn run(cli: Cli) -> SyncResult<bool> {
    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::SyncLocal { root } => {
            tokio::fs::create_dir_all(&root).await?;
            let source = open_source(cli.db.as_deref())?;
            sync(source, Arc::new(LocalBackend::new(root)), &settings).await
        }
        Commands::SyncWebdav {
            uri,
            protocol,
            username,
            password,
        } => {
            let configured = settings.webdav.clone();
            let uri = uri
                .or_else(|| configured.as_ref().map(|w| w.uri.clone()))
                .ok_or_else(|| SyncError::Configuration("--uri is required".to_string()))?;
            let username = username.or_else(|| configured.as_ref().and_then(|w| w.username.clone()));
            let password = password.or_else(|| configured.as_ref().and_then(|w| w.password.clone()));

            let backend = WebDavBackend::new(
                &uri,
                protocol.as_deref(),
                username.as_deref(),
                password.as_deref(),
            )?;
            let source = open_source(cli.db.as_deref())?;
            sync(source, Arc::new(backend), &settings).await
        }
        Commands::SyncCloud { token } => {
            let source = open_source(cli.db.as_deref())?;
            let token = match token.or_else(|| settings.cloud.as_ref().and_then(|c| c.token.clone())) {
                Some(token) => token,
                None => source.cloud_token()?.ok_or_else(|| {
                    SyncError::Configuration("no cloud token given or stored".to_string())
                })?,
            };
            sync(source, Arc::new(WebDavBackend::cloud(&token)?), &settings).await
        }
        Commands::ReadLocal {
            root,
            controller,
            sensor_id,
            date,
            to,
            key,
            output,
        } => {
            let transform = match key {
                Some(key) => StreamTransform::aes(key),
                None => StreamTransform::identity(),
            };
            let store = ArchiveStore::open(Arc::new(LocalBackend::new(root))).await?;
            let range = TimeRange::covering(date, to.unwrap_or(date));

            let days = RetrievalEngine::new(store, transform)
                .fetch(&controller, &sensor_id, &range)
                .await?;
            if days.is_empty() {
                log::warn!("No archives of sensor {} for {}", sensor_id, range);
                return Ok(true);
            }
            tokio::fs::write(&output, days.concat()).await?;
            log::info!("Wrote {} days to {}", days.len(), output.display());
            Ok(true)
        }
        Commands::Ls { root } => {
            let store = ArchiveStore::open(Arc::new(LocalBackend::new(root))).await?;
            for controller in store.controllers().await? {
                println!("{}", controller);
                for sensor in store.sensors(&controller).await? {
                    println!("  {}  {}", sensor.id, sensor.name);
                }
            }
            Ok(true)
        }
    }
}

fn load_settings(cli: &Cli) -> SyncResult<SyncSettings> {
    let mut settings = match &cli.config {
        Some(path) => SyncSettings::load(path)?,
        None => SyncSettings::default(),
    };
    if let Some(format) = cli.format {
        settings.format = format;
    }
    if let Some(workers) = cli.workers {
        settings.workers = workers;
    }
    if cli.plain {
        settings.encrypt = false;
    }
    settings.validate()?;
    Ok(settings)
}

fn open_source(db: Option<&Path>) -> SyncResult<Arc<dyn DataSource>> {
    let path = db.ok_or_else(|| SyncError::Configuration("--db is required".to_string()))?;
    Ok(Arc::new(SqliteDataSource::open(path)?))
}

async fn sync(
    source: Arc<dyn DataSource>,
    backend: Arc<dyn StorageBackend>,
    settings: &SyncSettings,
) -> SyncResult<bool> {
    // Fetched once; every archive gets its own cipher state from it
    let transform = if settings.encrypt {
        let key = source.encryption_key()?.ok_or_else(|| {
            SyncError::Configuration(
                "no encryption key stored, pass --plain to sync unencrypted".to_string(),
            )
        })?;
        StreamTransform::aes(key)
    } else {
        log::warn!("Encryption disabled, archives are stored in clear");
        StreamTransform::identity()
    };

    let store = ArchiveStore::open(backend).await?;
    let report = SyncEngine::new(source, store, settings.format, transform)
        .with_workers(settings.workers)
        .run()
        .await?;
    Ok(report.is_success())
}

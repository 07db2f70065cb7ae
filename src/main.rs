//! dmedia daemon.
//!
//! Opens the account stores under the data root, runs the idle-handle sweep
//! and the sync engine until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! dmedia                     # Run in foreground
//! dmedia --once              # Sync every active account once and exit
//! dmedia --import alice      # Import alice's upload directory, sync, exit
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use dmedia::accounts::AccountKey;
use dmedia::config::Config;
use dmedia::media::metadata::DefaultExtractor;
use dmedia::sync::backend::DefaultResolver;
use dmedia::sync::Reconciler;
use dmedia::{logging, MediaStore, SyncCatalog, SyncEngine, TenantId, TenantStore};

#[derive(Default)]
struct Args {
    config_path: Option<PathBuf>,
    once: bool,
    import: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--import" | "-i" => {
                if i + 1 < args.len() {
                    parsed.import = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("dmedia {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"dmedia - Per-account media storage and remote mirroring

USAGE:
    dmedia [OPTIONS]

OPTIONS:
    --once, -1            Sync every active account once and exit
    --import, -i ACCOUNT  Import ACCOUNT's upload directory (name or id), sync it, exit
    --config, -c PATH     Path to config file
    --version, -V         Show version
    --help, -h            Show this help message

ENVIRONMENT:
    DMEDIA_CONFIG         Path to config file (overrides default location)
    DMEDIA_DATA           Data root (overrides the config file)
    DMEDIA_LOG            Log level (trace, debug, info, warn, error)
"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let config_path = args.config_path.clone().unwrap_or_else(Config::config_path);
    let (config, notices) = Config::load(Some(&config_path)).context("Failed to load config")?;

    logging::init(Some(config.log_dir())).context("Failed to initialize logging")?;
    for notice in &notices {
        warn!("{}", notice);
    }
    info!("dmedia {} starting, data root {:?}", env!("CARGO_PKG_VERSION"), config.data_root);

    let stores = Arc::new(TenantStore::new(config.store_options()));
    let catalog = Arc::new(SyncCatalog::new(stores.clone()));
    let resolver = Arc::new(DefaultResolver::new(config.request_timeout()));

    if let Some(account) = args.import.as_deref() {
        let tenant = resolve_account(&stores, account)?;
        let media = MediaStore::new(stores.clone())
            .with_extractor(Arc::new(DefaultExtractor::new(config.ffprobe())))
            .with_max_page_size(config.media.max_page_size);
        let report = tokio::task::spawn_blocking(move || media.import_upload_dir(tenant))
            .await
            .context("Import task failed")??;
        info!(
            "Imported {} files for account {} ({} duplicates, {} failed)",
            report.imported,
            tenant,
            report.duplicates,
            report.failed.len()
        );

        let reconciler = Arc::new(Reconciler::new(catalog, resolver, config.retry_policy()));
        reconciler.reconcile_tenant(tenant).await;
        stores.close_all()?;
        return Ok(());
    }

    if args.once {
        info!("Running in single-shot mode");
        let reconciler = Arc::new(Reconciler::new(catalog, resolver, config.retry_policy()));
        for tenant in active_accounts(&stores)? {
            reconciler.reconcile_tenant(tenant).await;
        }
        stores.close_all()?;
        return Ok(());
    }

    let sweeper = stores.spawn_sweeper();
    let engine = SyncEngine::start(catalog, resolver, config.retry_policy());

    if config.sync.schedule_on_startup {
        let tenants = active_accounts(&stores)?;
        for tenant in &tenants {
            engine.schedule(*tenant);
        }
        info!("Scheduled sync for {} accounts", tenants.len());
    }

    info!("Running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for shutdown signal: {}", e);
    }

    info!("Shutting down");
    engine.shutdown().await;
    sweeper.shutdown();
    if let Err(e) = stores.close_all() {
        warn!("Failed to close tenant stores: {}", e);
    }
    info!("dmedia stopped");
    Ok(())
}

fn resolve_account(stores: &TenantStore, account: &str) -> Result<TenantId> {
    let key = match account.parse::<TenantId>() {
        Ok(id) => AccountKey::Id(id),
        Err(_) => AccountKey::Name(account),
    };
    let found = stores
        .get_account(key)
        .with_context(|| format!("Unknown account {account}"))?;
    Ok(found.id)
}

fn active_accounts(stores: &TenantStore) -> Result<Vec<TenantId>> {
    let accounts = stores.list_accounts().context("Failed to list accounts")?;
    Ok(accounts
        .into_iter()
        .filter(|a| a.active)
        .map(|a| a.id)
        .collect())
}

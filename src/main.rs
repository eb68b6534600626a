use anyhow::{Context, Result, bail};
use bucket_relay::{
    app,
    config::{AppConfig, Backend, Command, PremiumCommand},
    services::{
        gate::UploadGate,
        premium::PremiumStore,
        progress::{format_eta, human_bytes},
        relay_service::RelayService,
        stats::UploadStats,
        uploader::ChunkedUploader,
    },
    store::{self, LocalStore},
};
use chrono::Utc;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config, migrate flag and command ---
    let (cfg, migrate, command) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting bucket-relay with config: {:?}", cfg);

    // --- Handle migration mode ---
    if migrate {
        if cfg.store.backend != Backend::Local {
            bail!("--migrate only applies to the local backend");
        }
        LocalStore::open(&cfg.store.local_dir, &cfg.store.database_url, &cfg.store.bucket)
            .await
            .with_context(|| format!("migrating {}", cfg.store.database_url))?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // Premium management only touches the premium file.
    let command = match command {
        Command::Premium(cmd) => {
            let premium = PremiumStore::load(&cfg.gate.premium_file).await?;
            return run_premium(&premium, cmd).await;
        }
        other => other,
    };

    let service = build_service(&cfg).await?;

    match command {
        Command::Serve => serve(&cfg, service).await,
        Command::Upload { path, key, user } => {
            let watcher = print_progress(&service);
            let result = service.upload(&path, key.as_deref(), user).await;
            watcher.abort();
            let report = result?;
            println!(
                "uploaded {} ({}, {} part(s), {:?}) in {}",
                report.key,
                human_bytes(report.size),
                report.parts,
                report.mode,
                format_eta(report.elapsed)
            );
            Ok(())
        }
        Command::Download { key, dest } => {
            let watcher = print_progress(&service);
            let result = service.download(&key, &dest).await;
            watcher.abort();
            let bytes = result?;
            println!("downloaded {} to {} ({})", key, dest.display(), human_bytes(bytes));
            Ok(())
        }
        Command::Link { key, expires_in } => {
            let link = service
                .link(&key, expires_in.map(Duration::from_secs))
                .await?;
            println!("{}", link.url);
            Ok(())
        }
        Command::Delete { key } => {
            service.delete(&key).await?;
            println!("deleted {}", key);
            Ok(())
        }
        Command::Premium(_) => Ok(()),
    }
}

/// Wire store, uploader, gate and counters together.
async fn build_service(cfg: &AppConfig) -> Result<RelayService> {
    let store = store::connect(&cfg.store)
        .await
        .context("connecting to the object store")?;
    let premium = PremiumStore::load(&cfg.gate.premium_file)
        .await
        .with_context(|| format!("loading {}", cfg.gate.premium_file.display()))?;

    tokio::fs::create_dir_all(&cfg.gate.spool_dir)
        .await
        .with_context(|| format!("creating {}", cfg.gate.spool_dir.display()))?;

    let uploader = ChunkedUploader::new(store.clone(), cfg.upload.clone());
    let gate = UploadGate::new(cfg.gate.clone(), Arc::new(premium));
    Ok(RelayService::new(
        store,
        uploader,
        gate,
        Arc::new(UploadStats::new()),
        cfg.link_expiry,
    ))
}

async fn serve(cfg: &AppConfig, service: RelayService) -> Result<()> {
    let app = app(service);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Echo progress snapshots to stderr while a CLI transfer runs.
fn print_progress(service: &RelayService) -> tokio::task::JoinHandle<()> {
    let mut rx = service.subscribe_progress();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if let Some(snapshot) = rx.borrow_and_update().clone() {
                eprintln!("{}", snapshot);
            }
        }
    })
}

async fn run_premium(premium: &PremiumStore, cmd: PremiumCommand) -> Result<()> {
    let now = Utc::now();
    match cmd {
        PremiumCommand::Grant { user_id, days } => {
            let record = premium.grant(user_id, days, now).await?;
            println!(
                "user {} is premium until {} ({} days left)",
                user_id,
                record.expires_at.format("%Y-%m-%d %H:%M UTC"),
                record.days_left(now)
            );
        }
        PremiumCommand::Revoke { user_id } => {
            if premium.revoke(user_id).await? {
                println!("revoked premium for user {}", user_id);
            } else {
                println!("user {} had no premium record", user_id);
            }
        }
        PremiumCommand::Check { user_id } => match premium.record(user_id).await {
            Some(record) if record.is_active(now) => println!(
                "user {} is premium, {} days left",
                user_id,
                record.days_left(now)
            ),
            Some(record) => println!(
                "user {} premium expired on {}",
                user_id,
                record.expires_at.format("%Y-%m-%d")
            ),
            None => println!("user {} is not premium", user_id),
        },
        PremiumCommand::List => {
            let active = premium.active(now).await;
            if active.is_empty() {
                println!("no active premium users");
            }
            for record in active {
                println!(
                    "{}\texpires {}\t{} days left",
                    record.user_id,
                    record.expires_at.format("%Y-%m-%d"),
                    record.days_left(now)
                );
            }
        }
    }
    Ok(())
}

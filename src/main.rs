//! voc-ingest - VOC spreadsheet ingestion
//!
//! Decodes uploaded spreadsheets, normalizes their rows into canonical
//! records and keeps the chipset and app keyword tables in shape.

mod cli;
mod config;
mod db;
mod defaults;
mod error;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use db::JsonFileStore;
use services::decode::FormatDecoder;
use services::ingest::{IngestService, IngestSettings, Repositories};
use types::{DocumentKind, RawDocument};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "voc-ingest.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Reports go to stdout, so console logging goes to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,voc_ingest=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let store = Arc::new(JsonFileStore::open(&config.store_path)?);
    let service = IngestService::new(
        FormatDecoder::standard(&config.converter),
        Repositories::from_store(store),
        IngestSettings {
            chunk_size: config.chunk_size,
        },
    );

    if let Err(e) = run(cli.command, &service, &config).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(command: Command, service: &IngestService, config: &config::Config) -> Result<()> {
    match command {
        Command::IngestVoc { file } => {
            let report = service.ingest_voc(&document(&file, DocumentKind::General)).await?;
            print_json(&report)
        }
        Command::IngestQdata { file } => {
            let report = service.ingest_qdata(&document(&file, DocumentKind::QData)).await?;
            print_json(&report)
        }
        Command::ImportChipsets { file, similar } => {
            let report = service
                .import_chipsets(&document(&file, DocumentKind::General), config.merge_mode_for(similar))
                .await?;
            print_json(&report)
        }
        Command::ImportAppKeywords { file } => {
            let report = service
                .import_app_keywords(&document(&file, DocumentKind::General))
                .await?;
            print_json(&report)
        }
        Command::AddChipset { model, chipset } => print_json(&service.add_chipset(&model, &chipset).await?),
        Command::MergeChipsets { similar } => {
            print_json(&service.merge_chipsets(config.merge_mode_for(similar)).await?)
        }
        Command::RenameChipset { from, to } => print_json(&service.rename_chipset(&from, &to).await?),
        Command::RefreshModels => print_json(&service.refresh_models().await?),
        Command::Unmapped => print_json(&service.unmapped_models().await?),
        Command::ListChipsets => print_json(&service.chipset_mappings().await?),
        Command::QdataDuplicates { remove } => print_json(&service.qdata_duplicates(remove).await?),
        Command::Decode { file, qdata } => {
            let kind = if qdata { DocumentKind::QData } else { DocumentKind::General };
            print_json(&service.decode(&document(&file, kind)).await?)
        }
    }
}

fn document(path: &Path, kind: DocumentKind) -> RawDocument {
    RawDocument::from_path(path, kind)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

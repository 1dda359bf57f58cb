//! CLI argument parsing for the voc-ingest binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "voc-ingest", about = "VOC spreadsheet ingestion and normalization")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Ingest a general VOC export
    IngestVoc {
        file: PathBuf,
    },
    /// Ingest a Q-data service log export
    IngestQdata {
        file: PathBuf,
    },
    /// Import a model/chipset mapping sheet
    ImportChipsets {
        file: PathBuf,
        /// Also merge names that are similar but not identical after normalization
        #[arg(long)]
        similar: bool,
    },
    /// Replace the third-party app keyword rules
    ImportAppKeywords {
        file: PathBuf,
    },
    /// Add or replace a single model's chipset
    AddChipset {
        #[arg(long)]
        model: String,
        #[arg(long)]
        chipset: String,
    },
    /// Merge near-duplicate chipset names already in the store
    MergeChipsets {
        #[arg(long)]
        similar: bool,
    },
    /// Rename a chipset everywhere
    RenameChipset {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Re-apply watch detection and model aliases to stored records
    RefreshModels,
    /// List models without a chipset mapping
    Unmapped,
    /// List the model → chipset mappings
    ListChipsets,
    /// Report serial numbers stored on more than one Q-data row
    QdataDuplicates {
        /// Keep only the latest row of each duplicated serial number
        #[arg(long)]
        remove: bool,
    },
    /// Decode a spreadsheet and report which strategy succeeded
    Decode {
        file: PathBuf,
        /// Use the Q-data sheet layout
        #[arg(long)]
        qdata: bool,
    },
}

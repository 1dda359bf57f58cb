//! Office automation channels: hand the file to an external spreadsheet
//! application, let it re-save the first sheet as CSV, then read that.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::delimited::read_delimited;
use super::DecodeStrategy;
use crate::error::DecodeError;
use crate::types::DecodedTable;

/// UTF-8 (76), comma separated, double-quoted
const SOFFICE_CSV_FILTER: &str = "csv:Text - txt - csv (StarCalc):44,34,76,1";

/// Converter output goes here, apart from the input copy
const OUTPUT_DIR: &str = "converted";

/// External converter binaries and their time limit
#[derive(Debug, Clone)]
pub struct ConverterSettings {
    pub soffice_bin: String,
    pub ssconvert_bin: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    /// LibreOffice headless
    Soffice,
    /// Gnumeric
    Ssconvert,
}

pub struct ConverterStrategy {
    name: &'static str,
    kind: ConverterKind,
    program: String,
    timeout_secs: u64,
}

impl ConverterStrategy {
    pub fn soffice(settings: &ConverterSettings) -> Self {
        Self {
            name: "soffice-convert",
            kind: ConverterKind::Soffice,
            program: settings.soffice_bin.clone(),
            timeout_secs: settings.timeout_secs,
        }
    }

    pub fn ssconvert(settings: &ConverterSettings) -> Self {
        Self {
            name: "ssconvert-convert",
            kind: ConverterKind::Ssconvert,
            program: settings.ssconvert_bin.clone(),
            timeout_secs: settings.timeout_secs,
        }
    }

    fn command(&self, input: &Path, workdir: &Path) -> (Command, PathBuf) {
        let outdir = workdir.join(OUTPUT_DIR);
        let mut cmd = Command::new(&self.program);
        cmd.kill_on_drop(true);
        match self.kind {
            ConverterKind::Soffice => {
                cmd.arg("--headless")
                    .arg("--convert-to")
                    .arg(SOFFICE_CSV_FILTER)
                    .arg("--outdir")
                    .arg(&outdir)
                    .arg(input);
                let stem = input.file_stem().unwrap_or_default();
                (cmd, outdir.join(stem).with_extension("csv"))
            }
            ConverterKind::Ssconvert => {
                let output = outdir.join("converted.csv");
                cmd.arg("--export-type=Gnumeric_stf:stf_csv")
                    .arg(input)
                    .arg(&output);
                (cmd, output)
            }
        }
    }

    async fn run(&self, cmd: &mut Command) -> Result<(), DecodeError> {
        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| DecodeError::ConverterTimeout {
                program: self.program.clone(),
                secs: self.timeout_secs,
            })?
            .map_err(|e| DecodeError::Converter {
                program: self.program.clone(),
                message: format!("failed to execute: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DecodeError::Converter {
                program: self.program.clone(),
                message: format!("exit {}: {}", output.status, stderr.trim()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DecodeStrategy for ConverterStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn decode(&self, bytes: &[u8], filename: &str) -> Result<DecodedTable, DecodeError> {
        // Removed with the directory on every return path
        let workdir = tempfile::Builder::new().prefix("voc-convert-").tempdir()?;

        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| "xlsx".to_string());
        let input = workdir.path().join(format!("upload.{}", ext));
        tokio::fs::write(&input, bytes).await?;
        tokio::fs::create_dir(workdir.path().join(OUTPUT_DIR)).await?;

        let (mut cmd, output) = self.command(&input, workdir.path());
        debug!(program = %self.program, strategy = self.name, "Running spreadsheet converter");
        self.run(&mut cmd).await?;

        let csv = tokio::fs::read(&output).await.map_err(|e| DecodeError::Converter {
            program: self.program.clone(),
            message: format!("produced no output: {}", e),
        })?;
        read_delimited(&csv)
    }
}

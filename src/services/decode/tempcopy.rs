//! Decode from an on-disk copy instead of the in-memory buffer.
//!
//! Some protection layers only release content when the workbook is opened
//! as a file with the expected extension.

use std::io::{BufReader, Write};
use std::path::PathBuf;

use async_trait::async_trait;

use super::{DecodeStrategy, Engine};
use crate::error::DecodeError;
use crate::types::DecodedTable;

pub struct TempCopyStrategy {
    name: &'static str,
    engine: Engine,
    dir: Option<PathBuf>,
}

impl TempCopyStrategy {
    pub fn new(name: &'static str, engine: Engine) -> Self {
        Self {
            name,
            engine,
            dir: None,
        }
    }

    /// Place copies in `dir` instead of the system temp directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl DecodeStrategy for TempCopyStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn decode(&self, bytes: &[u8], _filename: &str) -> Result<DecodedTable, DecodeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("voc-upload-").suffix(self.engine.suffix());
        // Deleted when `copy` drops, whichever way this returns
        let mut copy = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        copy.write_all(bytes)?;
        copy.flush()?;

        let file = copy.reopen()?;
        self.engine.read(BufReader::new(file))
    }
}

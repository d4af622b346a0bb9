use log::debug;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

const HTTP_USER_AGENT: &str = "genoclass-http-client/1.0";

/// Builds the blocking HTTP client used for artifact downloads. `timeout` bounds the
/// whole exchange, body included.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(HTTP_USER_AGENT)
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
}

/// True when `path` names an existing regular file. This is a presence check only;
/// content is not inspected.
pub fn is_materialized(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// A file being written under a temporary name next to its final destination.
///
/// Nothing appears at the final path until [`StagedFile::commit`] renames the
/// temporary file into place. Dropping an uncommitted `StagedFile` deletes the
/// temporary file, so an interrupted write never leaves a partial file behind.
pub struct StagedFile {
    temp: NamedTempFile,
    final_path: PathBuf,
}

impl StagedFile {
    /// Creates the destination's parent directories and a temporary file inside the
    /// same directory, so the final rename never crosses a filesystem boundary.
    pub fn create(final_path: &Path) -> io::Result<Self> {
        let parent = match final_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let prefix = match final_path.file_name() {
            Some(name) => format!(".{}.", name.to_string_lossy()),
            None => ".staged.".to_string(),
        };
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".part")
            .tempfile_in(parent)?;
        debug!(
            "Staging {} at {}",
            final_path.display(),
            temp.path().display()
        );

        Ok(Self {
            temp,
            final_path: final_path.to_path_buf(),
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Flushes, syncs and atomically renames the staged file to its final path.
    pub fn commit(mut self) -> io::Result<PathBuf> {
        let file = self.temp.as_file_mut();
        file.flush()?;
        file.sync_all()?;
        self.temp
            .persist(&self.final_path)
            .map_err(|e| e.error)?;
        Ok(self.final_path)
    }
}

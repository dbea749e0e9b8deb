//! FTP transfer client
//!
//! Each operation opens its own session on a blocking task: connect, Extended
//! Passive Mode, login, binary transfers, quit. Listing and archiving retry
//! with linear backoff; single fetches do not, the coordinator owns that retry.
//!
//! Archiving is an FTP rename from the source directory into the archive
//! directory. A fetch that misses in the source directory falls back to the
//! archive, so an already-consumed file can still be re-derived.

use async_trait::async_trait;
use std::io::Read;
use std::time::Duration;
use suppaftp::{FtpError, FtpStream, Status};
use tracing::{debug, info, warn};

use super::{Cursor, FileDescriptor, TransferClient, TransferError};

/// Maximum number of attempts for listing and archiving
pub const MAX_RETRIES: u32 = 3;

/// Base delay between attempts; attempt `n` waits `n` times this
pub const RETRY_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Directory readers upload into
    pub source_dir: String,
    /// Directory consumed files are moved to
    pub archive_dir: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: "anonymous@".to_string(),
            source_dir: "uploads".to_string(),
            archive_dir: "processed".to_string(),
        }
    }
}

impl FtpConfig {
    fn source_path(&self, filename: &str) -> String {
        join(&self.source_dir, filename)
    }

    fn archive_path(&self, filename: &str) -> String {
        join(&self.archive_dir, filename)
    }

    /// `ftp://host/source_dir/filename`
    pub fn location(&self, filename: &str) -> String {
        format!("ftp://{}/{}", self.host, self.source_path(filename))
    }
}

fn join(dir: &str, filename: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", dir, filename)
    }
}

/// Map an FTP failure: 550 means the path is gone, everything else is transient
fn classify(err: FtpError, path: &str) -> TransferError {
    match err {
        FtpError::UnexpectedResponse(ref response) if response.status == Status::FileUnavailable => {
            TransferError::NotFound(path.to_string())
        },
        other => TransferError::Unavailable(format!("{}: {}", path, other)),
    }
}

pub struct FtpTransferClient {
    config: FtpConfig,
    retry_delay: Duration,
}

impl FtpTransferClient {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
        }
    }

    pub fn config(&self) -> &FtpConfig {
        &self.config
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&FtpConfig) -> Result<T, TransferError> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || op(&config))
            .await
            .map_err(|e| TransferError::Unavailable(format!("FTP task panicked: {}", e)))?
    }

    /// Retry transient failures up to [`MAX_RETRIES`] times
    async fn with_retry<T, F>(&self, what: &str, op: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: Fn(&FtpConfig) -> Result<T, TransferError> + Clone + Send + 'static,
    {
        let mut attempt = 1;
        loop {
            debug!("{} attempt {}/{}", what, attempt, MAX_RETRIES);
            match self.run_blocking(op.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = self.retry_delay * attempt;
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        what, attempt, MAX_RETRIES, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn connect(config: &FtpConfig) -> Result<FtpStream, TransferError> {
        debug!("Connecting to FTP server: {}:{}", config.host, config.port);

        let mut ftp_stream = FtpStream::connect(format!("{}:{}", config.host, config.port))
            .map_err(|e| TransferError::Unavailable(format!("connect failed: {}", e)))?;

        // Extended Passive Mode works through NAT and container networking
        ftp_stream.set_mode(suppaftp::Mode::ExtendedPassive);

        ftp_stream
            .login(&config.username, &config.password)
            .map_err(|e| TransferError::Unavailable(format!("login failed: {}", e)))?;

        ftp_stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .map_err(|e| TransferError::Unavailable(format!("binary mode failed: {}", e)))?;

        Ok(ftp_stream)
    }

    fn quit(mut ftp_stream: FtpStream) {
        if let Err(e) = ftp_stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }
    }

    fn list_sync(config: &FtpConfig, since: Cursor) -> Result<Vec<FileDescriptor>, TransferError> {
        let mut ftp_stream = Self::connect(config)?;

        let lines = ftp_stream
            .list(Some(&config.source_dir))
            .map_err(|e| classify(e, &config.source_dir))?;

        let mut files = Vec::new();
        for entry in lines.iter().filter_map(|line| FtpEntry::parse(line)) {
            if entry.is_directory {
                continue;
            }
            let path = config.source_path(&entry.name);
            let modified_at = ftp_stream.mdtm(&path).ok().map(|dt| dt.and_utc());
            if !since.admits(modified_at) {
                continue;
            }
            files.push(FileDescriptor {
                location: config.location(&entry.name),
                filename: entry.name,
                size: entry.size,
                modified_at,
            });
        }

        Self::quit(ftp_stream);

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    fn retrieve(ftp_stream: &mut FtpStream, path: &str) -> Result<Vec<u8>, TransferError> {
        let mut reader = ftp_stream.retr_as_buffer(path).map_err(|e| classify(e, path))?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| TransferError::Unavailable(format!("{}: read failed: {}", path, e)))?;
        Ok(data)
    }

    fn fetch_sync(config: &FtpConfig, filename: &str) -> Result<Vec<u8>, TransferError> {
        let mut ftp_stream = Self::connect(config)?;

        let source = config.source_path(filename);
        let result = match Self::retrieve(&mut ftp_stream, &source) {
            Err(TransferError::NotFound(_)) => {
                debug!("{} not in source directory, trying archive", filename);
                Self::retrieve(&mut ftp_stream, &config.archive_path(filename))
                    .map_err(|e| match e {
                        TransferError::NotFound(_) => TransferError::NotFound(source.clone()),
                        other => other,
                    })
            },
            other => other,
        };

        Self::quit(ftp_stream);
        result
    }

    fn archive_sync(config: &FtpConfig, filename: &str) -> Result<(), TransferError> {
        let mut ftp_stream = Self::connect(config)?;

        // Already exists on every run after the first
        let _ = ftp_stream.mkdir(&config.archive_dir);

        let from = config.source_path(filename);
        let to = config.archive_path(filename);
        let result = match ftp_stream.rename(&from, &to) {
            Ok(()) => Ok(()),
            Err(e) => match classify(e, &from) {
                // Consumed by an earlier run whose bookkeeping did not finish
                TransferError::NotFound(_) if ftp_stream.size(&to).is_ok() => Ok(()),
                other => Err(other),
            },
        };

        Self::quit(ftp_stream);
        result
    }
}

#[async_trait]
impl TransferClient for FtpTransferClient {
    async fn list_new_files(&self, since: &Cursor) -> Result<Vec<FileDescriptor>, TransferError> {
        let since = *since;
        let files = self
            .with_retry("LIST", move |config| Self::list_sync(config, since))
            .await?;
        info!("Listed {} file(s) in {}", files.len(), self.config.source_dir);
        Ok(files)
    }

    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>, TransferError> {
        let filename = file.filename.clone();
        let data = self
            .run_blocking(move |config| Self::fetch_sync(config, &filename))
            .await?;
        debug!("Downloaded {} ({} bytes)", file.filename, data.len());
        Ok(data)
    }

    async fn mark_consumed(&self, file: &FileDescriptor) -> Result<(), TransferError> {
        let filename = file.filename.clone();
        self.with_retry("RENAME", move |config| Self::archive_sync(config, &filename))
            .await?;
        info!("Archived {} to {}", file.filename, self.config.archive_dir);
        Ok(())
    }
}

/// One parsed line of a Unix-style `LIST` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

impl FtpEntry {
    /// `-rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 202109150646-0001-IHT0001_0022.csv`
    ///
    /// Names containing spaces are kept whole when the line has the full
    /// nine columns.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }

        let is_directory = parts[0].starts_with('d');
        let name = if parts.len() >= 9 {
            parts[8..].join(" ")
        } else {
            parts.last()?.to_string()
        };
        if name == "." || name == ".." {
            return None;
        }

        let size = if parts.len() >= 5 {
            parts[4].parse().ok()
        } else {
            None
        };

        Some(Self {
            name,
            is_directory,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_entry() {
        let entry = FtpEntry::parse(
            "-rw-r--r--   1 ftp ftp  1521 Sep 15 06:46 202109150646-0001-IHT0001_0022.csv",
        )
        .unwrap();
        assert_eq!(entry.name, "202109150646-0001-IHT0001_0022.csv");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, Some(1521));
    }

    #[test]
    fn test_parse_directory_and_dots() {
        let entry = FtpEntry::parse("drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 processed").unwrap();
        assert!(entry.is_directory);
        assert!(FtpEntry::parse("drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 ..").is_none());
        assert!(FtpEntry::parse("   ").is_none());
    }

    #[test]
    fn test_parse_name_with_spaces() {
        let entry =
            FtpEntry::parse("-rw-r--r--   1 ftp ftp  10 Jan 15 12:00 train data copy.csv").unwrap();
        assert_eq!(entry.name, "train data copy.csv");
    }

    #[test]
    fn test_paths_and_location() {
        let config = FtpConfig {
            host: "reader.example.com".to_string(),
            source_dir: "/uploads/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.source_path("a.csv"), "uploads/a.csv");
        assert_eq!(config.archive_path("a.csv"), "processed/a.csv");
        assert_eq!(config.location("a.csv"), "ftp://reader.example.com/uploads/a.csv");
        assert_eq!(join("", "a.csv"), "a.csv");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let client = FtpTransferClient::new(FtpConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        });
        let err = client
            .fetch(&FileDescriptor::new("a.csv", "ftp://127.0.0.1/uploads/a.csv"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

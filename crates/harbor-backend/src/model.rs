//! Model download.

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::BackendError;

/// Hugging Face repository holding the default GGUF model.
pub const DEFAULT_MODEL_REPO: &str = "eccheng/Phi-3-mini-128k-instruct-Q4_0-GGUF";

/// File inside [`DEFAULT_MODEL_REPO`].
pub const DEFAULT_MODEL_FILE: &str = "phi-3-mini-128k-instruct-q4_0.gguf";

const HF_ENDPOINT: &str = "https://huggingface.co";

/// Where a model file comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSource {
    /// Repository id, e.g. `owner/name`.
    pub repo_id: String,
    /// File within the repository.
    pub filename: String,
    /// Branch, tag or commit.
    pub revision: String,
    /// Expected SHA256 checksum (optional).
    pub sha256: Option<String>,
    /// Size in bytes (for progress display when the server omits it).
    pub size_bytes: Option<u64>,
    /// Overrides the Hugging Face resolve URL.
    pub url_override: Option<String>,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::hugging_face(DEFAULT_MODEL_REPO, DEFAULT_MODEL_FILE)
    }
}

impl ModelSource {
    pub fn hugging_face(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
            revision: "main".to_string(),
            sha256: None,
            size_bytes: None,
            url_override: None,
        }
    }

    /// Download from an arbitrary URL instead of the model hub.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let filename = url.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            repo_id: String::new(),
            filename,
            revision: String::new(),
            sha256: None,
            size_bytes: None,
            url_override: Some(url),
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into().to_lowercase());
        self
    }

    /// Download URL.
    pub fn url(&self) -> String {
        match &self.url_override {
            Some(url) => url.clone(),
            None => format!(
                "{}/{}/resolve/{}/{}",
                HF_ENDPOINT, self.repo_id, self.revision, self.filename
            ),
        }
    }
}

/// Outcome of [`ModelManager::ensure`].
#[derive(Debug, Clone, PartialEq)]
pub enum Downloaded {
    /// The file was already on disk; nothing was transferred.
    AlreadyPresent(PathBuf),
    Fetched { path: PathBuf, bytes: u64 },
}

impl Downloaded {
    pub fn path(&self) -> &Path {
        match self {
            Downloaded::AlreadyPresent(path) => path,
            Downloaded::Fetched { path, .. } => path,
        }
    }
}

/// Manager for downloading model files.
pub struct ModelManager {
    client: reqwest::Client,
    show_progress: bool,
}

impl ModelManager {
    /// Create a new model manager.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            show_progress: true,
        }
    }

    /// Disable the terminal progress bar.
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Make sure `dest` exists, downloading it from `source` if absent.
    pub async fn ensure(&self, source: &ModelSource, dest: &Path) -> Result<Downloaded, BackendError> {
        if fs::try_exists(dest).await? {
            info!("Model already exists: {}", dest.display());
            return Ok(Downloaded::AlreadyPresent(dest.to_path_buf()));
        }

        let bytes = self.download(source, dest).await?;
        Ok(Downloaded::Fetched {
            path: dest.to_path_buf(),
            bytes,
        })
    }

    /// Download `source` to `dest`, replacing any existing file.
    pub async fn download(&self, source: &ModelSource, dest: &Path) -> Result<u64, BackendError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let url = source.url();
        info!("Downloading {} to {}", url, dest.display());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::DownloadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::DownloadFailed(format!(
                "HTTP {}: {}",
                response.status(),
                url
            )));
        }

        let partial = partial_path(dest);
        let mut file = File::create(&partial).await?;
        let total_size = response.content_length().or(source.size_bytes);
        let pb = self.progress_bar(total_size);
        let mut hasher = Sha256::new();

        let written = write_body(&mut file, response, &mut hasher, &pb).await;
        drop(file);
        let downloaded = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                pb.abandon();
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        pb.finish_with_message("Download complete");

        if let Some(expected) = &source.sha256 {
            let actual = hex::encode(hasher.finalize());
            if actual != *expected {
                let _ = fs::remove_file(&partial).await;
                return Err(BackendError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            debug!("Checksum verified: {}", actual);
        }

        fs::rename(&partial, dest).await?;

        info!("Downloaded {} ({})", dest.display(), format_size(downloaded));
        Ok(downloaded)
    }

    fn progress_bar(&self, total_size: Option<u64>) -> ProgressBar {
        let pb = match total_size {
            Some(size) => {
                let pb = ProgressBar::new(size);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {bytes}/{total_bytes} ({eta})",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {bytes} downloaded")
                {
                    pb.set_style(style);
                }
                pb
            }
        };
        if !self.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb
    }
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream the response body into `file`, hashing as it goes.
async fn write_body(
    file: &mut File,
    response: reqwest::Response,
    hasher: &mut Sha256,
    pb: &ProgressBar,
) -> Result<u64, BackendError> {
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BackendError::DownloadFailed(e.to_string()))?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }
    file.flush().await?;
    Ok(downloaded)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Human readable size in GiB, e.g. `2.17 GB`.
pub fn format_size(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

//! Model download command.

use harbor_backend::{format_size, BackendConfig, Downloaded, ModelManager, ModelSource};
use std::path::{Path, PathBuf};

pub(crate) struct PullArgs {
    pub repo: Option<String>,
    pub file: Option<String>,
    pub url: Option<String>,
    pub dest: Option<PathBuf>,
    pub sha256: Option<String>,
}

impl PullArgs {
    fn source(&self) -> ModelSource {
        let source = match &self.url {
            Some(url) => ModelSource::from_url(url.clone()),
            None => {
                let defaults = ModelSource::default();
                ModelSource::hugging_face(
                    self.repo.clone().unwrap_or(defaults.repo_id),
                    self.file.clone().unwrap_or(defaults.filename),
                )
            }
        };
        match &self.sha256 {
            Some(sha) => source.with_sha256(sha.clone()),
            None => source,
        }
    }
}

/// Pull/download the model.
pub(crate) async fn run(args: PullArgs) -> miette::Result<()> {
    let dest = args
        .dest
        .clone()
        .unwrap_or_else(|| BackendConfig::from_env().model_path);
    ensure_model(&args.source(), &dest).await
}

/// Download the model to `dest` unless it is already there.
pub(crate) async fn ensure_model(source: &ModelSource, dest: &Path) -> miette::Result<()> {
    if dest.exists() {
        println!("Model already exists: {}", dest.display());
        return Ok(());
    }

    println!("Downloading model...");
    if !source.repo_id.is_empty() {
        println!("   Repository: {}", source.repo_id);
    }
    println!("   Filename: {}", source.filename);
    println!("   Destination: {}", dest.display());
    println!();

    match ModelManager::new().ensure(source, dest).await {
        Ok(Downloaded::AlreadyPresent(path)) => {
            println!("Model already exists: {}", path.display());
        }
        Ok(Downloaded::Fetched { path, bytes }) => {
            println!();
            println!("Model downloaded successfully to: {}", path.display());
            println!("Model size: {}", format_size(bytes));
        }
        Err(e) => {
            return Err(miette::miette!("Failed to download model: {}", e));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_backend::{DEFAULT_MODEL_FILE, DEFAULT_MODEL_REPO};

    fn args() -> PullArgs {
        PullArgs {
            repo: None,
            file: None,
            url: None,
            dest: None,
            sha256: None,
        }
    }

    #[test]
    fn test_default_source() {
        let source = args().source();
        assert_eq!(source.repo_id, DEFAULT_MODEL_REPO);
        assert_eq!(source.filename, DEFAULT_MODEL_FILE);
        assert!(source.sha256.is_none());
    }

    #[test]
    fn test_overrides() {
        let source = PullArgs {
            file: Some("other.gguf".to_string()),
            sha256: Some("ABCD".to_string()),
            ..args()
        }
        .source();
        assert_eq!(source.repo_id, DEFAULT_MODEL_REPO);
        assert_eq!(source.filename, "other.gguf");
        assert_eq!(source.sha256.as_deref(), Some("abcd"));
    }

    #[test]
    fn test_url_source() {
        let source = PullArgs {
            url: Some("http://mirror/models/m.gguf".to_string()),
            ..args()
        }
        .source();
        assert_eq!(source.url(), "http://mirror/models/m.gguf");
    }
}

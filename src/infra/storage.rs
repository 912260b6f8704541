use anyhow::{anyhow, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::AppConfig;

/// Uploaded files on the local filesystem, addressed by a path relative to
/// the media root (`posts/small.gif`).
#[derive(Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

const MAX_NAME_ATTEMPTS: usize = 100;

impl MediaStorage {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        Self::at(&config.media_root).await
    }

    pub async fn at(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|err| anyhow!("cannot create media root {}: {}", root.display(), err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `bytes` under `<root>/<dir>/<name>` and returns the relative path.
    /// An existing file is never overwritten; a random suffix is added instead.
    pub async fn save(&self, dir: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let target_dir = self.root.join(dir);
        fs::create_dir_all(&target_dir).await?;

        let name = sanitize_file_name(file_name);
        let mut candidate = name.clone();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = target_dir.join(&candidate);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    return Ok(format!("{}/{}", dir, candidate));
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = with_random_suffix(&name);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(anyhow!("could not find a free name for {}", name))
    }

    #[cfg(test)]
    pub async fn exists(&self, relative: &str) -> bool {
        fs::metadata(self.root.join(relative)).await.is_ok()
    }
}

/// Keeps the basename only and replaces anything outside `[A-Za-z0-9._-]`.
fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

fn with_random_suffix(name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, suffix, ext),
        None => format!("{}_{}", name, suffix),
    }
}

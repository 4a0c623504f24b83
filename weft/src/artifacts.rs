//! Artifact writer: declared outputs rendered with the final scope and
//! written under one output directory.
//!
//! Both `from` and `path` are templates. Paths must stay inside the output
//! directory: absolute paths, `..` components, and symlinks are rejected.
//! Overwriting an existing file requires an explicit force flag.

use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::scope::Scope;
use crate::spec::ArtifactSpec;
use crate::template::render;
use crate::tools;

pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes every declared artifact. Returns the paths written, in
    /// declaration order.
    pub async fn write_all(
        &self,
        artifacts: &[ArtifactSpec],
        scope: &Scope,
        force: bool,
    ) -> Result<Vec<PathBuf>, EngineError> {
        if artifacts.is_empty() {
            return Ok(Vec::new());
        }
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let content = render(&artifact.from, scope)?;
            let rel = render(&artifact.path, scope)?;
            let path = tools::file::resolve_write_path(&self.output_dir, &rel)
                .map_err(|e| EngineError::Io(format!("artifact {:?}: {}", rel, e)))?;
            if path.exists() && !(force || artifact.force) {
                return Err(EngineError::Io(format!(
                    "artifact {} exists; pass force to overwrite",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content.as_bytes()).await?;
            tracing::debug!(path = %path.display(), bytes = content.len(), "artifact written");
            written.push(path);
        }
        Ok(written)
    }
}

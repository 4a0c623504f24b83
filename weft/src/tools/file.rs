//! File tools: sandboxed write, guarded read, grep.
//!
//! Writes resolve under the artifacts directory and reject absolute paths,
//! `..` components, and symlinks. Reads take absolute paths only, reject
//! symlinks and binary files, and bound output size.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, SideEffect, Tool, ToolContext, ToolError, ToolOutput, ToolSpec};

/// Read and grep output caps.
const MAX_READ_BYTES: usize = 65_536;
const MAX_GREP_MATCHES: usize = 100;

/// Null byte in the first chunk marks a file as binary.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8_192).any(|b| *b == 0)
}

/// Normalizes `.` and `..` without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut buf = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => buf = PathBuf::from(p.as_os_str()),
            Component::RootDir => buf.push(comp),
            Component::CurDir => {}
            Component::ParentDir => {
                buf.pop();
            }
            Component::Normal(s) => buf.push(s),
        }
    }
    buf
}

/// Resolves a write path under the sandbox root.
///
/// The parameter must be relative, free of `..` components, and the resolved
/// path must stay under the canonical root. An existing symlink at the target
/// is rejected.
pub(crate) fn resolve_write_path(root: &Path, param: &str) -> Result<PathBuf, ToolError> {
    let rel = Path::new(param);
    if rel.is_absolute() {
        return Err(ToolError::Blocked(format!(
            "absolute path {:?} not allowed",
            param
        )));
    }
    if rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ToolError::Blocked(format!(
            "path {:?} contains '..'",
            param
        )));
    }
    let root_canonical = root
        .canonicalize()
        .map_err(|e| ToolError::Io(format!("sandbox root {}: {}", root.display(), e)))?;
    let full = normalize_path(&root_canonical.join(rel));
    if !full.starts_with(&root_canonical) {
        return Err(ToolError::Blocked(format!(
            "path {:?} escapes the sandbox",
            param
        )));
    }
    if matches!(full.symlink_metadata().map(|m| m.file_type().is_symlink()), Ok(true)) {
        return Err(ToolError::Blocked(format!("path {:?} is a symlink", param)));
    }
    Ok(full)
}

/// Validates a read path: absolute, existing, not a symlink.
fn resolve_read_path(param: &str) -> Result<PathBuf, ToolError> {
    let path = Path::new(param);
    if !path.is_absolute() {
        return Err(ToolError::Blocked(format!(
            "read path {:?} must be absolute",
            param
        )));
    }
    let meta = path
        .symlink_metadata()
        .map_err(|e| ToolError::Io(format!("{}: {}", param, e)))?;
    if meta.file_type().is_symlink() {
        return Err(ToolError::Blocked(format!("path {:?} is a symlink", param)));
    }
    Ok(path.to_path_buf())
}

/// `read_file`: bounded read of an absolute, non-symlink, text file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".into(),
            description: Some("Read a text file by absolute path".into()),
            input_schema: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        }
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::FilesystemRead
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = resolve_read_path(required_str(&args, "path")?)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::Io(format!("{}: {}", path.display(), e)))?;
        if looks_binary(&bytes) {
            return Err(ToolError::InvalidInput(format!(
                "{} is a binary file",
                path.display()
            )));
        }
        let text = String::from_utf8_lossy(&bytes);
        let out = if text.len() > MAX_READ_BYTES {
            let mut end = MAX_READ_BYTES;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}\n[truncated {} bytes]", &text[..end], text.len() - end)
        } else {
            text.into_owned()
        };
        Ok(ToolOutput { text: out })
    }
}

/// `write_file`: create or overwrite a file under the artifacts directory.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".into(),
            description: Some("Write a file under the artifacts directory".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::FilesystemWrite
    }

    fn idempotent(&self) -> bool {
        false
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let param = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let path = resolve_write_path(&ctx.artifacts_dir, param)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Io(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(ToolOutput {
            text: format!("wrote {} bytes to {}", content.len(), path.display()),
        })
    }
}

/// `grep`: regex search under an absolute directory, bounded match count.
pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep".into(),
            description: Some("Search files under an absolute directory for a regex".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "pattern": { "type": "string" }
                },
                "required": ["path", "pattern"]
            }),
        }
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::FilesystemRead
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let root = resolve_read_path(required_str(&args, "path")?)?;
        let pattern = regex::Regex::new(required_str(&args, "pattern")?)
            .map_err(|e| ToolError::InvalidInput(format!("pattern: {}", e)))?;

        let mut matches = Vec::new();
        'files: for entry in walkdir::WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            if looks_binary(&bytes) {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes);
            for (lineno, line) in text.lines().enumerate() {
                if pattern.is_match(line) {
                    matches.push(format!(
                        "{}:{}: {}",
                        entry.path().display(),
                        lineno + 1,
                        line.trim_end()
                    ));
                    if matches.len() >= MAX_GREP_MATCHES {
                        matches.push(format!("[stopped at {} matches]", MAX_GREP_MATCHES));
                        break 'files;
                    }
                }
            }
        }
        Ok(ToolOutput {
            text: if matches.is_empty() {
                "no matches".to_string()
            } else {
                matches.join("\n")
            },
        })
    }
}

//! Workspace file operations exposed over the socket
//!
//! Every path argument goes through [`resolve_in_root`] (or
//! [`resolve_strictly_inside`] for writes, deletes and each upload target)
//! before the filesystem is touched.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::config::FileApiConfig;
use crate::fs_utils::relative_slash_path;
use crate::paths::{ensure_directory, resolve_in_root, resolve_strictly_inside};
use crate::socket_server::protocol::{EntryType, FileEntry, UploadedFile};
use crate::{Result, WorkspaceError};

/// Result of `list_files`
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub items: Vec<FileEntry>,
    pub current_path: String,
}

/// Result of `read_file`
#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    /// UTF-8 text, or base64 when `encoding` is set
    pub content: String,
    pub path: String,
    pub size: u64,
    pub modified: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// File operations bound to one workspace root
#[derive(Debug, Clone)]
pub struct WorkspaceFiles {
    root: PathBuf,
    config: FileApiConfig,
}

impl WorkspaceFiles {
    pub fn new(root: impl Into<PathBuf>, config: FileApiConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `abs` as shown to clients (`.` for the root itself)
    fn display_path(&self, abs: &Path) -> String {
        relative_slash_path(&self.root, abs).unwrap_or_else(|| ".".to_string())
    }

    /// List a directory: directories first, then by case-insensitive name
    pub async fn list_files(&self, path: &str) -> Result<Listing> {
        let dir = resolve_in_root(path, &self.root)?;
        ensure_directory(&dir)?;

        let mut items = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let metadata = match tokio::fs::metadata(&entry_path).await {
                Ok(metadata) => metadata,
                // Dangling symlink or entry removed while listing
                Err(_) => continue,
            };
            let is_dir = metadata.is_dir();
            let name = entry.file_name().to_string_lossy().into_owned();
            let extension = if is_dir {
                None
            } else {
                entry_path
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
            };

            items.push(FileEntry {
                path: self.display_path(&entry_path),
                name,
                entry_type: if is_dir {
                    EntryType::Directory
                } else {
                    EntryType::File
                },
                size: if is_dir { 0 } else { metadata.len() },
                modified: modified_secs(&metadata),
                extension,
            });
        }

        items.sort_by(|a, b| {
            let rank = |e: &FileEntry| e.entry_type != EntryType::Directory;
            rank(a)
                .cmp(&rank(b))
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        Ok(Listing {
            items,
            current_path: self.display_path(&dir),
        })
    }

    /// Read a file as UTF-8 text, or as base64 bytes with a guessed MIME type when `raw`
    pub async fn read_file(&self, path: &str, raw: bool) -> Result<FileContent> {
        let file = resolve_in_root(path, &self.root)?;
        let metadata = match tokio::fs::metadata(&file).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkspaceError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(WorkspaceError::NotAFile {
                path: path.to_string(),
            });
        }
        if metadata.len() > self.config.max_file_size {
            return Err(WorkspaceError::FileTooLarge {
                size: metadata.len(),
                limit: self.config.max_file_size,
            });
        }

        let bytes = tokio::fs::read(&file).await?;
        let (content, encoding, mime_type) = if raw {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            (
                BASE64.encode(&bytes),
                Some("base64"),
                Some(mime.essence_str().to_string()),
            )
        } else {
            let text = String::from_utf8(bytes).map_err(|_| WorkspaceError::BinaryFile)?;
            (text, None, None)
        };

        Ok(FileContent {
            content,
            path: self.display_path(&file),
            size: metadata.len(),
            modified: modified_secs(&metadata),
            encoding,
            mime_type,
        })
    }

    /// Create or overwrite a text file. The parent directory must exist.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<String> {
        let file = resolve_strictly_inside(path, &self.root)?;
        if file.is_dir() {
            return Err(WorkspaceError::NotAFile {
                path: path.to_string(),
            });
        }
        match file.parent() {
            Some(parent) if parent.is_dir() => {}
            _ => {
                return Err(WorkspaceError::NotFound {
                    path: format!("parent directory of {}", path),
                })
            }
        }

        tokio::fs::write(&file, content).await?;
        tracing::debug!("[FILES] Wrote {} bytes to {:?}", content.len(), file);
        Ok(self.display_path(&file))
    }

    /// Delete a file, or a directory recursively. The root itself cannot be deleted.
    pub async fn delete_file(&self, path: &str) -> Result<String> {
        let target = resolve_strictly_inside(path, &self.root)?;
        let metadata = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkspaceError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        tracing::debug!("[FILES] Deleted {:?}", target);
        Ok(self.display_path(&target))
    }

    /// Write uploaded files into a directory. Only the final component of
    /// each filename is used; entries without one are skipped.
    pub async fn upload_files(&self, path: &str, files: &[UploadedFile]) -> Result<Vec<String>> {
        let dir = resolve_in_root(path, &self.root)?;
        ensure_directory(&dir)?;

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let Some(name) = Path::new(&file.filename).file_name() else {
                tracing::debug!("[FILES] Skipping upload without a filename: {:?}", file.filename);
                continue;
            };
            let data = BASE64
                .decode(file.content_base64.as_bytes())
                .map_err(|e| WorkspaceError::InvalidRequest {
                    message: format!("{}: invalid base64: {}", file.filename, e),
                })?;

            // An existing entry with this name may be a symlink out of the root
            let relative = format!("{}/{}", path.trim_end_matches('/'), name.to_string_lossy());
            let target = resolve_strictly_inside(&relative, &self.root)?;
            tokio::fs::write(&target, data).await?;
            uploaded.push(self.display_path(&target));
        }

        Ok(uploaded)
    }
}

fn modified_secs(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

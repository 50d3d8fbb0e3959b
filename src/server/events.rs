//! File events pushed to live-update subscribers
//!
//! The observer thread receives raw `notify` events; [`EventTranslator`]
//! turns them into [`FileEvent`]s relative to the workspace root.
//!
//! # Wire format
//!
//! ```json
//! {"event":"moved","path":"docs/b.txt","is_directory":false}
//! ```
//!
//! # Renames
//!
//! Backends report renames differently:
//!
//! ```text
//! inotify   Name(From) -> Name(To) -> Name(Both)   (shared tracker cookie)
//! Windows   Name(From) -> Name(To)
//! FSEvents  Name(Any)  -> Name(Any)                 (source, then destination)
//! ```
//!
//! The translator pairs `From` with the matching `To` and emits a single
//! `moved` carrying the destination path. A `From` with no partner is a move
//! out of the workspace and becomes `deleted`; a lone `To` is a move in and
//! becomes `created`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use serde::{Deserialize, Serialize};

use crate::fs_utils::{normalize_path, relative_slash_path};

/// How many completed rename cookies to remember for de-duplicating `Both`
const RECENT_RENAMES: usize = 64;

/// Kind of change observed in a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl FileEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
        }
    }
}

impl std::fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change inside a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    #[serde(rename = "event")]
    pub kind: FileEventKind,
    /// Path relative to the workspace root, `/`-separated. For moves this is the destination.
    pub path: String,
    pub is_directory: bool,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<String>, is_directory: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            is_directory,
        }
    }

    /// Serialize to the JSON text frame sent to clients
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"event":"{}","path":{:?},"is_directory":{}}}"#,
                self.kind, self.path, self.is_directory
            )
        })
    }
}

/// Half of a rename waiting for its partner
#[derive(Debug)]
struct PendingRename {
    tracker: Option<usize>,
    path: PathBuf,
}

/// Converts raw `notify` events into [`FileEvent`]s for one workspace root.
///
/// Stateful: rename halves are buffered until their partner arrives or
/// [`flush`](Self::flush) is called.
#[derive(Debug)]
pub struct EventTranslator {
    root: PathBuf,
    pending: Vec<PendingRename>,
    completed: VecDeque<usize>,
}

impl EventTranslator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize_path(&root.into()),
            pending: Vec::new(),
            completed: VecDeque::with_capacity(RECENT_RENAMES),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Translate one raw event. May also emit buffered rename halves.
    pub fn translate(&mut self, event: &notify::Event) -> Vec<FileEvent> {
        let mut out = Vec::new();

        match event.kind {
            EventKind::Modify(ModifyKind::Name(mode)) => self.rename(mode, event, &mut out),
            EventKind::Create(kind) => {
                self.drain_pending(&mut out);
                for path in &event.paths {
                    let is_dir = match kind {
                        CreateKind::Folder => true,
                        CreateKind::File => false,
                        _ => path.is_dir(),
                    };
                    self.push(&mut out, FileEventKind::Created, path, is_dir);
                }
            }
            EventKind::Modify(_) => {
                self.drain_pending(&mut out);
                for path in &event.paths {
                    self.push(&mut out, FileEventKind::Modified, path, path.is_dir());
                }
            }
            EventKind::Remove(kind) => {
                self.drain_pending(&mut out);
                let is_dir = matches!(kind, RemoveKind::Folder);
                for path in &event.paths {
                    self.push(&mut out, FileEventKind::Deleted, path, is_dir);
                }
            }
            // Access, Any and Other carry no mutation
            _ => {}
        }

        out
    }

    /// Emit every unpaired `From` as a deletion
    pub fn flush(&mut self) -> Vec<FileEvent> {
        let mut out = Vec::new();
        self.drain_pending(&mut out);
        out
    }

    fn rename(&mut self, mode: RenameMode, event: &notify::Event, out: &mut Vec<FileEvent>) {
        let tracker = event.tracker();

        match mode {
            RenameMode::From => {
                for path in &event.paths {
                    self.pending.push(PendingRename {
                        tracker,
                        path: path.clone(),
                    });
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    if self.take_pending(tracker).is_some() {
                        if let Some(cookie) = tracker {
                            self.remember(cookie);
                        }
                        self.push(out, FileEventKind::Moved, path, path.is_dir());
                    } else {
                        self.push(out, FileEventKind::Created, path, path.is_dir());
                    }
                }
            }
            RenameMode::Both => {
                if let Some(cookie) = tracker {
                    if self.completed.contains(&cookie) {
                        return;
                    }
                }
                self.take_pending(tracker);
                if let Some(dest) = event.paths.last() {
                    self.push(out, FileEventKind::Moved, dest, dest.is_dir());
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    // Only the destination half still exists
                    if path.exists() {
                        self.push(out, FileEventKind::Moved, path, path.is_dir());
                    }
                }
            }
        }
    }

    /// Remove the pending `From` matching `tracker` (or the oldest untracked one)
    fn take_pending(&mut self, tracker: Option<usize>) -> Option<PendingRename> {
        let idx = self.pending.iter().position(|p| p.tracker == tracker)?;
        Some(self.pending.remove(idx))
    }

    fn remember(&mut self, cookie: usize) {
        if self.completed.len() == RECENT_RENAMES {
            self.completed.pop_front();
        }
        self.completed.push_back(cookie);
    }

    fn drain_pending(&mut self, out: &mut Vec<FileEvent>) {
        for pending in std::mem::take(&mut self.pending) {
            self.push(out, FileEventKind::Deleted, &pending.path, false);
        }
    }

    fn push(&self, out: &mut Vec<FileEvent>, kind: FileEventKind, path: &Path, is_dir: bool) {
        let path = normalize_path(path);
        match relative_slash_path(&self.root, &path) {
            Some(rel) => out.push(FileEvent::new(kind, rel, is_dir)),
            None => tracing::trace!("[WATCHER] Ignoring {} outside root: {:?}", kind, path),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

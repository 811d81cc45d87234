//! Workspace I/O — safe file read/write/tree-walk under a project root,
//! with path containment and the workspace layout `init` materialises.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::warn;

/// Directory/file entries omitted from the filtered tree renderer.
const FILTERED_ENTRIES: &[&str] = &[
    "node_modules",
    ".git",
    ".DS_Store",
    "dist",
    "build",
    "target",
    ".next",
    "package-lock.json",
    ".ralph",
];

fn is_filtered(name: &str) -> bool {
    FILTERED_ENTRIES.contains(&name) || name.ends_with(".tsbuildinfo")
}

/// Resolve `relative` against `root`, refusing any path that normalises
/// outside the root.
pub fn resolve_contained(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = root.join(relative);
    let normalised = normalise(&candidate);
    let root_normalised = normalise(root);
    if !normalised.starts_with(&root_normalised) {
        bail!("path escapes project root: {relative}");
    }
    Ok(normalised)
}

/// Lexical normalisation (no filesystem access, since the path may not
/// exist yet) that resolves `.` and `..` components.
fn normalise(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Materialise the standard workspace layout.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).context("Failed to create project root")?;
        std::fs::create_dir_all(self.root.join("plans"))?;
        std::fs::create_dir_all(self.root.join(".ralph/logs"))?;

        let prd_path = self.root.join("plans/prd.json");
        if !prd_path.exists() {
            std::fs::write(&prd_path, "{\"stages\":[]}\n")?;
        }
        let agents_path = self.root.join("agents.md");
        if !agents_path.exists() {
            std::fs::write(&agents_path, "")?;
        }
        let progress_path = self.root.join("progress.txt");
        if !progress_path.exists() {
            std::fs::write(&progress_path, "")?;
        }
        let status_path = self.root.join(".ralph/internal_status.txt");
        if !status_path.exists() {
            std::fs::write(&status_path, "")?;
        }
        let gitignore_path = self.root.join(".gitignore");
        if !gitignore_path.exists() {
            std::fs::write(
                &gitignore_path,
                "node_modules\n.ralph/\nagents.md\nprogress.txt\n",
            )?;
        }
        Ok(())
    }

    pub fn read_to_string(&self, relative: &str) -> Result<String> {
        let path = resolve_contained(&self.root, relative)?;
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {relative}"))
    }

    /// Write `content` at `relative`, refusing writes that escape the
    /// root. Returns `Ok(())` even when the write is refused — callers
    /// that need to know should check containment themselves; this
    /// matches the spec's "skip the offending file; log; continue"
    /// disposition for the LLM Client's file-block writer.
    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = match resolve_contained(&self.root, relative) {
            Ok(p) => p,
            Err(e) => {
                warn!("refusing write outside project root: {relative} ({e})");
                return Ok(());
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content).with_context(|| format!("Failed to write {relative}"))
    }

    pub fn append(&self, relative: &str, content: &str) -> Result<()> {
        use std::io::Write;
        let path = resolve_contained(&self.root, relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Full recursive file listing, following the same filter the tree
    /// renderer uses.
    pub fn list_files(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    /// Filtered directory tree string in the familiar
    /// `├──/└──/│   /    ` ASCII layout.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        render_dir(&self.root, "", &mut out);
        out
    }
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.flatten().collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_filtered(&name) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out);
        } else {
            out.push(path);
        }
    }
}

fn render_dir(dir: &Path, prefix: &str, out: &mut String) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries
        .flatten()
        .filter(|e| !is_filtered(&e.file_name().to_string_lossy()))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let count = entries.len();
    for (i, entry) in entries.iter().enumerate() {
        let is_last = i == count - 1;
        let connector = if is_last { "└── " } else { "├── " };
        let name = entry.file_name().to_string_lossy().to_string();
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(&name);
        out.push('\n');

        if entry.path().is_dir() {
            let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
            render_dir(&entry.path(), &child_prefix, out);
        }
    }
}

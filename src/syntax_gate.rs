//! Syntax Gate — fast external-tool syntax validation of emitted source.
//! Fail-open: a diagnostic defect in the gate itself must never block the
//! pipeline, mirroring the teacher's pluggable-validator-registry idiom
//! from the hard checklist.

use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxGateResult {
    pub valid: bool,
    pub file: Option<PathBuf>,
    pub error: Option<String>,
}

impl SyntaxGateResult {
    fn pass() -> Self {
        Self {
            valid: true,
            file: None,
            error: None,
        }
    }

    fn fail(file: PathBuf, error: String) -> Self {
        Self {
            valid: false,
            file: Some(file),
            error: Some(error),
        }
    }
}

/// The checker command is invoked as `<checker> <file>`; a non-zero exit
/// status is treated as a syntax failure, with stderr as the error text.
pub struct SyntaxGate {
    checker: String,
    extension: &'static str,
}

impl SyntaxGate {
    pub fn new(checker: String) -> Self {
        Self {
            checker,
            extension: "js",
        }
    }

    /// Enumerate all files with the configured extension outside
    /// `node_modules` under `root` and run the checker on each, returning
    /// on the first failure. Enumeration failure fails open.
    pub fn validate(&self, root: &Path) -> SyntaxGateResult {
        let files = match collect_files(root, self.extension) {
            Ok(files) => files,
            Err(_) => return SyntaxGateResult::pass(),
        };

        for file in files {
            match Command::new(&self.checker).arg(&file).output() {
                Ok(output) if !output.status.success() => {
                    let error = String::from_utf8_lossy(&output.stderr).to_string();
                    return SyntaxGateResult::fail(file, error);
                }
                Ok(_) => continue,
                Err(_) => {
                    // Checker binary missing or unrunnable: fail open rather
                    // than stall every project on missing tooling.
                    return SyntaxGateResult::pass();
                }
            }
        }

        SyntaxGateResult::pass()
    }
}

fn collect_files(root: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect_files_inner(root, extension, &mut out)?;
    Ok(out)
}

fn collect_files_inner(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name == "node_modules" {
            continue;
        }
        if path.is_dir() {
            collect_files_inner(&path, extension, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fails_open_when_checker_missing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "const x = 1;").unwrap();
        let gate = SyntaxGate::new("definitely-not-a-real-binary".to_string());
        let result = gate.validate(dir.path());
        assert!(result.valid);
    }

    #[test]
    fn skips_node_modules() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/bad.js"), "((").unwrap();
        let files = collect_files(dir.path(), "js").unwrap();
        assert!(files.is_empty());
    }
}

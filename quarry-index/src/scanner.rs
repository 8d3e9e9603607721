use crate::error::Result;
use ignore::WalkBuilder;
use log::{debug, warn};
use quarry_chunker::{classify_path, FileKind, MAX_FILE_SIZE};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Directories excluded regardless of gitignore contents.
const HARDCODED_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    ".venv",
    "__pycache__",
    "target",
    "build",
    "dist",
    ".cache",
];

/// A candidate file produced by a working-tree scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the project root, forward-slash separated.
    pub rel_path: String,

    /// Absolute path for reading.
    pub abs_path: PathBuf,

    /// Modification time, seconds since the epoch.
    pub mtime_s: i64,

    /// Sub-second part of the modification time.
    pub mtime_ns: u32,

    /// Size in bytes.
    pub size: u64,

    /// Windowing rule for the file.
    pub kind: FileKind,
}

/// Walk a project root and yield candidate files.
///
/// Applies `.gitignore` semantics plus the hardcoded excludes, drops files
/// over the size cap and files in neither extension set, and follows
/// symlinks only while they stay inside the root. Ordering is whatever the
/// walker produces; callers must not rely on it.
pub fn scan_project(root: &Path) -> Result<Vec<ScannedFile>> {
    let canonical_root = root.canonicalize()?;

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .follow_links(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !HARDCODED_EXCLUDES.contains(&name.as_ref())
        });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("scan error: {err}");
                continue;
            }
        };
        let path = entry.path();

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        // Symlinked files must resolve inside the root; anything escaping is
        // ignored to avoid cycles and reads outside the project.
        if metadata.file_type().is_symlink() || entry.path_is_symlink() {
            match path.canonicalize() {
                Ok(resolved) if resolved.starts_with(&canonical_root) => {}
                _ => {
                    debug!("skipping symlink escaping root: {}", path.display());
                    continue;
                }
            }
        }

        if metadata.len() > MAX_FILE_SIZE {
            debug!("skipping oversized file: {}", path.display());
            continue;
        }

        let Some(kind) = classify_path(path) else {
            continue;
        };

        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel_path.is_empty() {
            continue;
        }

        let (mtime_s, mtime_ns) = match metadata.modified() {
            Ok(modified) => match modified.duration_since(UNIX_EPOCH) {
                Ok(since) => (since.as_secs() as i64, since.subsec_nanos()),
                Err(_) => (0, 0),
            },
            Err(_) => (0, 0),
        };

        files.push(ScannedFile {
            rel_path,
            abs_path: path.to_path_buf(),
            mtime_s,
            mtime_ns,
            size: metadata.len(),
            kind,
        });
    }

    debug!("scanned {}: {} candidate files", root.display(), files.len());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn scans_code_and_doc_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "src/main.rs", "fn main() {}");
        touch(dir.path(), "README.md", "# readme");
        touch(dir.path(), "image.png", "not really an image");

        let mut files = scan_project(dir.path()).unwrap();
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.rs"]);
        assert_eq!(files[0].kind, FileKind::Doc);
        assert_eq!(files[1].kind, FileKind::Code);
    }

    #[test]
    fn honors_gitignore_and_hardcoded_excludes() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".gitignore", "generated/\n");
        touch(dir.path(), "generated/out.rs", "fn gen() {}");
        touch(dir.path(), "node_modules/pkg/index.js", "module.exports = 1;");
        touch(dir.path(), "kept.rs", "fn kept() {}");

        let files = scan_project(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["kept.rs"]);
    }

    #[test]
    fn size_cap_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let exactly = "a".repeat(MAX_FILE_SIZE as usize);
        touch(dir.path(), "exact.rs", &exactly);
        let over = "a".repeat(MAX_FILE_SIZE as usize + 1);
        touch(dir.path(), "over.rs", &over);

        let files = scan_project(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["exact.rs"]);
    }

    #[test]
    fn empty_project_scans_to_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(scan_project(dir.path()).unwrap().is_empty());
    }
}

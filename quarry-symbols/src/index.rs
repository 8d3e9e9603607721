use crate::error::{Result, SymbolError};
use crate::lang::{self, Lang};
use crate::{Symbol, SymbolKind};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;

/// Where a symbol or reference lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Serialize, Deserialize)]
struct SymbolSnapshot {
    version: u32,
    files: BTreeMap<String, Vec<Symbol>>,
    identifiers: HashMap<String, BTreeSet<String>>,
}

/// Per-project symbol map, refreshed in the same pass as the other indexes.
///
/// `identifiers` maps every identifier occurring in a file (not just
/// definitions) to the files containing it, so reference search only
/// re-parses files that can possibly match.
#[derive(Debug, Default)]
pub struct SymbolIndex {
    path: PathBuf,
    files: BTreeMap<String, Vec<Symbol>>,
    identifiers: HashMap<String, BTreeSet<String>>,
}

impl SymbolIndex {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                ..Default::default()
            });
        }
        let data = fs::read(path)?;
        let snapshot: SymbolSnapshot = bincode::deserialize(&data)
            .map_err(|e| SymbolError::Corrupt(format!("unreadable symbol snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SymbolError::Corrupt(format!(
                "unknown symbol snapshot version {}",
                snapshot.version
            )));
        }
        debug!("loaded symbol index: {} files", snapshot.files.len());
        Ok(Self {
            path: path.to_path_buf(),
            files: snapshot.files,
            identifiers: snapshot.identifiers,
        })
    }

    /// Refresh one file from its current text.
    ///
    /// Unsupported languages are a no-op; parse failures drop the file's
    /// previous symbols and are otherwise silent, since symbol extraction is
    /// optional per file.
    pub fn update_file(&mut self, rel_path: &str, source: &str) {
        let Some(lang) = Lang::from_path(Path::new(rel_path)) else {
            return;
        };
        self.remove_file(rel_path);

        let Some(symbols) = lang::extract_symbols(lang, source) else {
            warn!("symbol extraction failed for {rel_path}, skipping");
            return;
        };
        let names = lang::identifier_names(lang, source).unwrap_or_default();

        for name in names {
            self.identifiers
                .entry(name)
                .or_default()
                .insert(rel_path.to_string());
        }
        self.files.insert(rel_path.to_string(), symbols);
    }

    pub fn remove_file(&mut self, rel_path: &str) {
        self.files.remove(rel_path);
        self.identifiers.retain(|_, paths| {
            paths.remove(rel_path);
            !paths.is_empty()
        });
    }

    /// Definitions in one file, ascending by line.
    pub fn symbols(&self, rel_path: &str) -> Option<&[Symbol]> {
        self.files.get(rel_path).map(|v| v.as_slice())
    }

    /// All definitions named `name`, optionally narrowed by kind.
    pub fn find_definition(&self, name: &str, kind: Option<SymbolKind>) -> Vec<Location> {
        let mut out = Vec::new();
        for (path, symbols) in &self.files {
            for symbol in symbols {
                if symbol.name != name {
                    continue;
                }
                if let Some(kind) = kind {
                    if symbol.kind != kind {
                        continue;
                    }
                }
                out.push(Location {
                    path: path.clone(),
                    start_line: symbol.start_line,
                    end_line: symbol.end_line,
                });
            }
        }
        out
    }

    /// AST-matched reference sites for `name` across the project.
    ///
    /// Candidate files come from the identifier map; each is re-parsed from
    /// the working tree so results reflect current file contents. Files that
    /// disappeared or no longer parse are skipped.
    pub fn find_references(&self, name: &str, root: &Path, limit: usize) -> Vec<Location> {
        let Some(candidates) = self.identifiers.get(name) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for rel_path in candidates {
            if out.len() >= limit {
                break;
            }
            let Some(lang) = Lang::from_path(Path::new(rel_path)) else {
                continue;
            };
            let Ok(source) = fs::read_to_string(root.join(rel_path)) else {
                continue;
            };
            let Some(spans) = lang::identifier_lines(lang, &source, name) else {
                continue;
            };
            for (start_line, end_line) in spans {
                if out.len() >= limit {
                    break;
                }
                out.push(Location {
                    path: rel_path.clone(),
                    start_line,
                    end_line,
                });
            }
        }
        out
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.files.values().map(|v| v.len()).sum()
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.identifiers.clear();
    }

    /// Atomic snapshot write: temp file then rename.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = SymbolSnapshot {
            version: SNAPSHOT_VERSION,
            files: self.files.clone(),
            identifiers: self.identifiers.clone(),
        };
        let data = bincode::serialize(&snapshot)
            .map_err(|e| SymbolError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("db.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn index(dir: &TempDir) -> SymbolIndex {
        SymbolIndex::load(&dir.path().join("symbols.db")).unwrap()
    }

    #[test]
    fn update_and_query_symbols() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.update_file("auth.py", "def login(u, p):\n    return True\n");

        let symbols = idx.symbols("auth.py").unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "login");
        assert_eq!(symbols[0].kind, SymbolKind::Function);
    }

    #[test]
    fn find_definition_filters_by_kind() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.update_file("a.py", "class login:\n    pass\n");
        idx.update_file("b.py", "def login():\n    pass\n");

        let all = idx.find_definition("login", None);
        assert_eq!(all.len(), 2);

        let classes = idx.find_definition("login", Some(SymbolKind::Class));
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].path, "a.py");
    }

    #[test]
    fn references_are_ast_matched_from_disk() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("caller.py"),
            "from auth import login\n\nlogin(1, 2)\nprint(\"login\")\n",
        )
        .unwrap();

        let mut idx = index(&dir);
        idx.update_file(
            "caller.py",
            &fs::read_to_string(dir.path().join("caller.py")).unwrap(),
        );

        let refs = idx.find_references("login", dir.path(), 50);
        // Import line and call line; the string literal does not match.
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.path == "caller.py"));
        assert!(refs.iter().any(|r| r.start_line == 3));
    }

    #[test]
    fn remove_file_clears_symbols_and_identifiers() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.update_file("a.py", "def gone():\n    pass\n");
        idx.remove_file("a.py");

        assert!(idx.symbols("a.py").is_none());
        assert!(idx.find_definition("gone", None).is_empty());
        assert!(idx.find_references("gone", dir.path(), 10).is_empty());
    }

    #[test]
    fn unsupported_language_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut idx = index(&dir);
        idx.update_file("data.json", "{\"key\": 1}");
        assert_eq!(idx.file_count(), 0);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("symbols.db");
        {
            let mut idx = SymbolIndex::load(&path).unwrap();
            idx.update_file("m.rs", "pub fn kept() {}\n");
            idx.persist().unwrap();
        }
        let idx = SymbolIndex::load(&path).unwrap();
        assert_eq!(idx.symbol_count(), 1);
        assert_eq!(idx.find_definition("kept", None).len(), 1);
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("symbols.db");
        fs::write(&path, b"\x00\x01garbage").unwrap();
        assert!(matches!(
            SymbolIndex::load(&path),
            Err(SymbolError::Corrupt(_))
        ));
    }
}

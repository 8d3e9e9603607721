use crate::context::CoreContext;
use crate::error::{CoreError, Result};
use crate::proto::{
    FileEntry, FileFindParams, FileFindResponse, FileListParams, FileListResponse, FileReadParams,
    FileReadResponse, PatternMatch, PatternParams, PatternResponse,
};
use globset::GlobBuilder;
use quarry_chunker::{is_binary, MAX_FILE_SIZE};
use quarry_index::scan_project;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-file ceiling on pattern matches so one generated file cannot eat the
/// whole result budget.
const PATTERN_PER_FILE_LIMIT: usize = 20;

impl CoreContext {
    /// `search.pattern`: regex scan over the project's candidate files.
    pub async fn search_pattern(&self, params: PatternParams) -> Result<PatternResponse> {
        let (project, _) = self.resolve_handle(&params.project, None).await?;
        let regex = Regex::new(&params.pattern)
            .map_err(|e| CoreError::InvalidArgument(format!("bad pattern: {e}")))?;

        let files = scan_project(&project.root).map_err(CoreError::from)?;
        let mut matches = Vec::new();
        let mut truncated = false;

        'files: for file in files {
            let Ok(bytes) = fs::read(&file.abs_path) else {
                continue;
            };
            if is_binary(&bytes) {
                continue;
            }
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            let mut in_file = 0;
            for (idx, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    if matches.len() >= params.limit {
                        truncated = true;
                        break 'files;
                    }
                    matches.push(PatternMatch {
                        path: file.rel_path.clone(),
                        line: idx as u32 + 1,
                        text: line.trim_end().to_string(),
                    });
                    in_file += 1;
                    if in_file >= PATTERN_PER_FILE_LIMIT {
                        break;
                    }
                }
            }
        }

        Ok(PatternResponse { matches, truncated })
    }

    /// `file.read`: contents of one file under the project root.
    pub async fn file_read(&self, params: FileReadParams) -> Result<FileReadResponse> {
        let (project, _) = self.resolve_handle(&params.project, None).await?;
        let path = resolve_inside_root(&project.root, &params.path)?;

        let metadata = fs::metadata(&path)
            .map_err(|_| CoreError::NotFound(format!("no such file: {}", params.path)))?;
        if !metadata.is_file() {
            return Err(CoreError::NotFound(format!(
                "not a file: {}",
                params.path
            )));
        }
        if metadata.len() > MAX_FILE_SIZE {
            return Err(CoreError::InvalidArgument(format!(
                "file exceeds the {} byte cap",
                MAX_FILE_SIZE
            )));
        }

        let content = fs::read_to_string(&path)
            .map_err(|_| CoreError::InvalidArgument("file is not UTF-8 text".to_string()))?;

        let (content, truncated) = match (params.start_line, params.end_line) {
            (None, None) => (content, false),
            (start, end) => {
                let start = start.unwrap_or(1).max(1) as usize;
                let lines: Vec<&str> = content.lines().collect();
                let end = end.map(|e| e as usize).unwrap_or(lines.len()).min(lines.len());
                if start > end {
                    return Err(CoreError::InvalidArgument(
                        "start_line is past end_line".to_string(),
                    ));
                }
                (lines[start - 1..end].join("\n"), end < lines.len() || start > 1)
            }
        };

        Ok(FileReadResponse {
            path: params.path,
            content,
            truncated,
        })
    }

    /// `file.list`: one directory level under the project root.
    pub async fn file_list(&self, params: FileListParams) -> Result<FileListResponse> {
        let (project, _) = self.resolve_handle(&params.project, None).await?;
        let dir = match &params.dir {
            Some(rel) => resolve_inside_root(&project.root, rel)?,
            None => project.root.clone(),
        };

        let entries = fs::read_dir(&dir)
            .map_err(|_| CoreError::NotFound(format!("no such directory: {}", dir.display())))?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            out.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(FileListResponse { entries: out })
    }

    /// `file.find`: glob over the scanner's candidate file set.
    pub async fn file_find(&self, params: FileFindParams) -> Result<FileFindResponse> {
        let (project, _) = self.resolve_handle(&params.project, None).await?;
        let glob = GlobBuilder::new(&params.glob)
            .literal_separator(false)
            .build()
            .map_err(|e| CoreError::InvalidArgument(format!("bad glob: {e}")))?
            .compile_matcher();

        let files = scan_project(&project.root).map_err(CoreError::from)?;
        let mut paths: Vec<String> = files
            .into_iter()
            .filter(|f| glob.is_match(&f.rel_path))
            .map(|f| f.rel_path)
            .collect();
        paths.sort();
        Ok(FileFindResponse { paths })
    }
}

/// Join a caller-supplied relative path onto the root, refusing escapes.
fn resolve_inside_root(root: &Path, rel: &str) -> Result<PathBuf> {
    let joined = root.join(rel);
    let canonical = joined
        .canonicalize()
        .map_err(|_| CoreError::NotFound(format!("no such path: {rel}")))?;
    let canonical_root = root
        .canonicalize()
        .map_err(|e| CoreError::Transient(e.to_string()))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(CoreError::InvalidArgument(format!(
            "path escapes the project root: {rel}"
        )));
    }
    Ok(canonical)
}

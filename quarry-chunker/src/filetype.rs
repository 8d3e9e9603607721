use crate::FileKind;
use std::path::Path;

/// Files larger than this are skipped entirely.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// How far into a file we look for a NUL byte before declaring it binary.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Source-file extensions, general-purpose and markup/config languages.
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "pyi", "js", "mjs", "cjs", "ts", "tsx", "jsx", "go", "java",
    "kt", "kts", "scala", "c", "h", "cc", "cpp", "cxx", "hpp", "hxx", "cs",
    "rb", "php", "swift", "m", "mm", "pl", "pm", "lua", "r", "jl", "ex",
    "exs", "erl", "hrl", "hs", "ml", "mli", "fs", "fsx", "clj", "cljs",
    "cljc", "groovy", "dart", "zig", "nim", "v", "sql", "sh", "bash", "zsh",
    "fish", "ps1", "bat", "cmd", "json", "jsonc", "yaml", "yml", "toml",
    "ini", "cfg", "conf", "css", "scss", "sass", "less", "vue", "svelte",
    "proto", "graphql", "gql", "tf", "hcl", "cmake", "make", "mk",
    "dockerfile", "gradle", "xml", "xsl",
];

/// Prose extensions, chunked by token windows instead of line windows.
const DOC_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "rst", "html", "adoc", "org", "tex",
];

/// Classify a path by extension into the code set or the doc set.
///
/// Returns `None` for files in neither set; those are not indexed.
pub fn classify_path(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if DOC_EXTENSIONS.contains(&ext.as_str()) {
        return Some(FileKind::Doc);
    }
    if CODE_EXTENSIONS.contains(&ext.as_str()) {
        return Some(FileKind::Code);
    }
    None
}

/// A file is binary if its first 8 KiB contain a NUL byte.
pub fn is_binary(bytes: &[u8]) -> bool {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    sniff.contains(&0)
}

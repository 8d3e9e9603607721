use crate::error::{ChunkerError, Result};
use crate::{Chunk, FileKind};
use log::debug;

/// Line window applied to code files.
pub const CODE_WINDOW_LINES: usize = 50;
/// Lines shared between adjacent code windows.
pub const CODE_WINDOW_OVERLAP: usize = 10;

/// Token window applied to prose files.
pub const DOC_WINDOW_TOKENS: usize = 256;
/// Tokens shared between adjacent doc windows.
pub const DOC_WINDOW_OVERLAP: usize = 32;

/// Split a file's bytes into retrieval windows.
///
/// Pure: the only input is the byte slice. Fails only on invalid UTF-8, in
/// which case the caller skips the whole file; no partial chunk list is
/// produced.
pub fn chunk_bytes(path: &str, bytes: &[u8], kind: FileKind) -> Result<Vec<Chunk>> {
    let text = std::str::from_utf8(bytes).map_err(|_| ChunkerError::InvalidUtf8 {
        path: path.to_string(),
    })?;

    let chunks = match kind {
        FileKind::Code => chunk_code(path, text),
        FileKind::Doc => chunk_doc(path, text),
    };

    debug!("chunked {path}: {} windows ({kind:?})", chunks.len());
    Ok(chunks)
}

fn chunk_code(path: &str, text: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let stride = CODE_WINDOW_LINES - CODE_WINDOW_OVERLAP;
    let mut chunks = Vec::new();
    let mut offset = 0usize;

    loop {
        let end = (offset + CODE_WINDOW_LINES).min(lines.len());
        let window = lines[offset..end].join("\n");
        if !window.trim().is_empty() {
            chunks.push((offset + 1, end, window));
        }
        if end >= lines.len() {
            break;
        }
        offset += stride;
    }

    finalize(path, FileKind::Code, chunks)
}

fn chunk_doc(path: &str, text: &str) -> Vec<Chunk> {
    let tokens = tokenize_offsets(text);
    if tokens.is_empty() {
        return Vec::new();
    }

    let stride = DOC_WINDOW_TOKENS - DOC_WINDOW_OVERLAP;
    let mut chunks = Vec::new();
    let mut offset = 0usize;

    loop {
        let end = (offset + DOC_WINDOW_TOKENS).min(tokens.len());
        let byte_start = tokens[offset].0;
        let byte_end = tokens[end - 1].1;
        let window = &text[byte_start..byte_end];
        if !window.trim().is_empty() {
            let start_line = 1 + text[..byte_start].matches('\n').count();
            let end_line = 1 + text[..byte_end].matches('\n').count();
            chunks.push((start_line, end_line, window.to_string()));
        }
        if end >= tokens.len() {
            break;
        }
        offset += stride;
    }

    finalize(path, FileKind::Doc, chunks)
}

/// Assign contiguous ordinals after empty windows were dropped.
fn finalize(path: &str, kind: FileKind, windows: Vec<(usize, usize, String)>) -> Vec<Chunk> {
    windows
        .into_iter()
        .enumerate()
        .map(|(ordinal, (start_line, end_line, text))| Chunk {
            path: path.to_string(),
            ordinal: ordinal as u32,
            start_line: start_line as u32,
            end_line: end_line as u32,
            text,
            kind,
        })
        .collect()
}

/// Whitespace-separated token spans, with each CJK character its own token.
fn tokenize_offsets(text: &str) -> Vec<(usize, usize)> {
    let mut tokens = Vec::new();
    let mut run_start: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(start) = run_start.take() {
                tokens.push((start, idx));
            }
        } else if is_cjk(ch) {
            if let Some(start) = run_start.take() {
                tokens.push((start, idx));
            }
            tokens.push((idx, idx + ch.len_utf8()));
        } else if run_start.is_none() {
            run_start = Some(idx);
        }
    }
    if let Some(start) = run_start {
        tokens.push((start, text.len()));
    }
    tokens
}

/// CJK characters tokenize standalone in both chunking and keyword search.
pub fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xAC00..=0xD7AF    // Hangul syllables
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0x20000..=0x2A6DF  // CJK Extension B
    )
}

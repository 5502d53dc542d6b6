//! Filename extraction and sanitization for page files and work directories.
//!
//! Page files keep the name the host serves them under (`0012-003.png`), so a
//! re-run can tell what is already on disk without any network traffic. Work
//! directory names are derived from user input and must be safe on every
//! common filesystem.

use std::path::{Component, Path};

use url::Url;

/// Name used when sanitization leaves nothing behind.
const UNTITLED: &str = "untitled";

/// Derives a filesystem-safe work directory name from a slug or title.
///
/// Word separators (`-`, `_`), characters invalid on common filesystems
/// (`< > : " / \ | ? *`) and control characters become spaces; runs of
/// whitespace collapse to one space; leading and trailing spaces and dots are
/// trimmed. An empty result becomes `untitled`.
///
/// The function is idempotent: `sanitize_work_name(sanitize_work_name(x)) ==
/// sanitize_work_name(x)`.
///
/// # Examples
///
/// ```
/// use manga_core::download::filename::sanitize_work_name;
///
/// assert_eq!(sanitize_work_name("one-piece_colored"), "one piece colored");
/// assert_eq!(sanitize_work_name("Re:Zero / Ex?"), "Re Zero Ex");
/// assert_eq!(sanitize_work_name(" ..."), "untitled");
/// ```
#[must_use]
pub fn sanitize_work_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;

    for ch in name.chars() {
        let is_separator = matches!(
            ch,
            '-' | '_' | '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'
        ) || ch.is_control()
            || ch.is_whitespace();

        if is_separator {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }

    let trimmed = out.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitizes a single filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Returns the sanitized, percent-decoded last path segment of `url`.
///
/// Returns `None` for unparseable URLs and URLs whose path ends in `/`.
#[must_use]
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(sanitize_filename(&decoded))
}

//! Virtual-path utilities.
//!
//! Every path crossing the crate boundary is a forward-slash virtual path
//! rooted at `/`, NFC-normalized, with no `.` or `..` segments. This module
//! owns the mapping between that space and real filesystem paths, plus the
//! name-validity, ordering, and upload-suffix helpers the transport layer
//! consumes.

use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Marker inserted into in-flight upload names, after the first name segment.
pub const UPLOAD_SUFFIX: &str = ".filetree-upload";

/// Normalizes a raw path into canonical virtual form.
///
/// Backslashes become `/`, the string is NFC-normalized, empty and `.`
/// segments are dropped, and `..` pops the previous segment (never above
/// the root). The result always starts with `/` and has no trailing slash
/// except for the root itself.
pub fn normalize(raw: &str) -> String {
    let unified: String = raw.replace('\\', "/").nfc().collect();
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Parent of a virtual path; the root is its own parent.
pub fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Final segment of a virtual path; empty for the root.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a name onto a virtual directory path.
pub fn join(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Number of segments below the root; `/` is depth 0.
pub fn depth(path: &str) -> usize {
    if path == "/" {
        0
    } else {
        count_occurrences(path, "/")
    }
}

/// Non-overlapping occurrence count of `needle` in `haystack`.
pub fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut rest = haystack;
    while let Some(idx) = rest.find(needle) {
        count += 1;
        rest = &rest[idx + needle.len()..];
    }
    count
}

/// True when `candidate` is strictly below `ancestor`.
pub fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    if candidate == ancestor {
        return false;
    }
    if ancestor == "/" {
        return candidate.starts_with('/');
    }
    candidate.starts_with(ancestor) && candidate.as_bytes().get(ancestor.len()) == Some(&b'/')
}

/// True when `candidate` sits directly inside `parent`.
pub fn is_direct_child(candidate: &str, parent: &str) -> bool {
    candidate != "/" && candidate != parent && parent_of(candidate) == parent
}

const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Validates one name segment: length, forbidden characters, reserved
/// Windows device names, and the `.`/`..` specials.
pub fn is_name_sane(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 || name == "." || name == ".." {
        return false;
    }
    if name
        .chars()
        .any(|c| c < '\u{20}' || FORBIDDEN_NAME_CHARS.contains(&c))
    {
        return false;
    }
    !is_reserved_device_name(name)
}

fn is_reserved_device_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "con" | "prn" | "aux" | "nul" => true,
        _ => {
            (lower.len() == 4)
                && (lower.starts_with("com") || lower.starts_with("lpt"))
                && lower.as_bytes()[3].is_ascii_digit()
        }
    }
}

/// Validates a whole path: every segment must pass [`is_name_sane`]. The
/// URL form additionally rejects any `..` segment and restricts the
/// character set to the RFC 3986 unreserved/reserved repertoire.
pub fn is_path_sane(path: &str, is_url: bool) -> bool {
    if is_url {
        if path.split('/').any(|segment| segment == "..") {
            return false;
        }
        if !path.chars().all(is_rfc3986_char) {
            return false;
        }
    }
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .all(is_name_sane)
}

fn is_rfc3986_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '.'
                | '_'
                | '~'
                | '%'
                | ':'
                | '/'
                | '?'
                | '#'
                | '['
                | ']'
                | '@'
                | '!'
                | '$'
                | '&'
                | '\''
                | '('
                | ')'
                | '*'
                | '+'
                | ','
                | ';'
                | '='
        )
}

/// Maps a virtual path onto a real path under `root`.
///
/// Symlinks and lexical `..` in the joined result are resolved; when the
/// resolved path escapes the root, the root itself is returned so
/// containment is enforced by clamping rather than by error.
pub fn to_real(root: &Path, virtual_path: &str) -> PathBuf {
    let normalized = normalize(virtual_path);
    if normalized == "/" {
        return root.to_path_buf();
    }
    let joined = root.join(normalized.trim_start_matches('/'));
    let resolved = resolve_lexical(&joined);
    let resolved = std::fs::canonicalize(&resolved).unwrap_or(resolved);
    if resolved.starts_with(root) {
        resolved
    } else {
        root.to_path_buf()
    }
}

fn resolve_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Maps a real path under `root` back to virtual form; `root` itself maps
/// to `/`.
pub fn to_virtual(root: &Path, real: &Path) -> String {
    match real.strip_prefix(root) {
        Ok(rest) if rest.as_os_str().is_empty() => "/".to_string(),
        Ok(rest) => normalize(&format!("/{}", rest.to_string_lossy())),
        Err(_) => "/".to_string(),
    }
}

/// Compares digit runs numerically and everything else lexicographically.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a;
    let mut right = b;
    loop {
        match (left.is_empty(), right.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        let (l_run, l_rest, l_digits) = take_run(left);
        let (r_run, r_rest, r_digits) = take_run(right);
        let ord = if l_digits && r_digits {
            cmp_digit_runs(l_run, r_run)
        } else {
            l_run.cmp(r_run)
        };
        if ord != Ordering::Equal {
            return ord;
        }
        left = l_rest;
        right = r_rest;
    }
}

fn take_run(s: &str) -> (&str, &str, bool) {
    let digits = s.chars().next().is_some_and(|c| c.is_ascii_digit());
    let end = s
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit() != digits)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len());
    (&s[..end], &s[end..], digits)
}

fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        .then_with(|| a.len().cmp(&b.len()))
}

/// Inserts [`UPLOAD_SUFFIX`] after the first segment of a filename.
pub fn add_upload_suffix(name: &str) -> String {
    match name.find('.') {
        Some(idx) => format!("{}{}{}", &name[..idx], UPLOAD_SUFFIX, &name[idx..]),
        None => format!("{name}{UPLOAD_SUFFIX}"),
    }
}

/// Removes the first occurrence of [`UPLOAD_SUFFIX`] from a filename.
pub fn strip_upload_suffix(name: &str) -> String {
    name.replacen(UPLOAD_SUFFIX, "", 1)
}

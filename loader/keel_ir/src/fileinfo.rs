//! Path helpers over string paths.
//!
//! The loader manipulates many user-supplied paths from description files;
//! keeping them as strings with `/` separators makes locations, persisted
//! data and tests platform-stable.

/// True if the path is absolute (`/...` or `C:/...`).
pub fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(c), Some(':'), Some('/' | '\\')) if c.is_ascii_alphabetic()
    )
}

/// Resolves `path` relative to `base`; absolute paths pass through.
/// The result is cleaned (no `.` or `..` components, no doubled slashes).
pub fn resolve_path(base: &str, path: &str) -> String {
    if path.is_empty() {
        return clean_path(base);
    }
    if is_absolute(path) {
        return clean_path(path);
    }
    clean_path(&format!("{base}/{path}"))
}

/// Normalizes a path: collapses `.` and `..`, strips doubled and trailing
/// slashes.
pub fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// The directory part of a path (everything before the last `/`).
pub fn path(file_path: &str) -> String {
    match file_path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => file_path[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// The file-name part of a path.
pub fn file_name(file_path: &str) -> &str {
    match file_path.rfind('/') {
        Some(idx) => &file_path[idx + 1..],
        None => file_path,
    }
}

/// The file name without its last extension.
pub fn base_name(file_path: &str) -> &str {
    let name = file_name(file_path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// True if the string contains wildcard metacharacters (`*` or `?`;
/// bracket classes are not supported, so `[` stays literal).
pub fn is_pattern(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

/// Matches a file name against a glob-style pattern (`*`, `?`, no classes).
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    glob_match(pattern.as_bytes(), name.as_bytes())
}

fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.first(), name.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], name)
                || (!name.is_empty() && glob_match(pattern, &name[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &name[1..]),
        (Some(p), Some(n)) if p == n => glob_match(&pattern[1..], &name[1..]),
        _ => false,
    }
}

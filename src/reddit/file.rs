use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use url::Url;

/// The longest title, in characters, that `sanitize` will produce
pub const MAX_TITLE_LEN: usize = 250;

const ELLIPSIS: char = '…';
const INVALID_CHARS: &[char] = &['<', '>', ':', '/', '\\', '|', '?', '*'];

/// Turns a post title into something every filesystem accepts as a file name
pub fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c == '"' { '\'' } else { c })
        .filter(|c| !INVALID_CHARS.contains(c) && (c.is_whitespace() || !c.is_control()))
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c| matches!(c, '.' | ',' | ' '));

    shorten(trimmed, MAX_TITLE_LEN)
}

/// Shortens `s` to at most `max_len` characters, cutting at a word where possible
pub fn shorten(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len == 0 {
        return String::new();
    }

    // room for the ellipsis
    let budget = max_len - 1;
    let mut cut = s;
    while cut.chars().count() > budget {
        match cut.rfind(' ') {
            Some(idx) => cut = &cut[..idx],
            None => break,
        }
    }

    let mut short: String = if cut.is_empty() || cut.chars().count() > budget {
        s.chars().take(budget).collect()
    } else {
        cut.to_string()
    };
    short.push(ELLIPSIS);
    short
}

/// Capitalizes the first character and every character that follows a space
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize = true;
    for c in s.chars() {
        if capitalize {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        capitalize = c == ' ';
    }
    out
}

/// Returns a file name built from `title` and `extension` that does not exist
/// in `directory` right now.
///
/// The directory is listed on every call, so names handed out earlier in the
/// run are seen as soon as their files are written.
pub fn unique_name(directory: &Path, title: &str, extension: &str) -> io::Result<String> {
    let existing: HashSet<String> = match fs::read_dir(directory) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
        Err(e) => return Err(e),
    };

    let first = format!("{}{}", title, extension);
    if !existing.contains(&first) {
        return Ok(first);
    }

    let mut k = 1;
    loop {
        let candidate = format!("{} ({}){}", title, k, extension);
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
        k += 1;
    }
}

/// Picks a file extension from a content type, falling back to the url's path
pub fn extension_for(content_type: Option<&str>, url: &Url) -> String {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    if let Some(sub) = mime.as_deref().and_then(|m| m.split_once('/')).map(|(_, s)| s) {
        return match sub {
            "jpeg" | "pjpeg" => String::from(".jpg"),
            "" => String::new(),
            sub => format!(".{}", sub),
        };
    }

    path_extension(url)
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

/// The lowercase extension of the last path segment, ignoring the query string
pub fn path_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.last()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Appends `record` to the log file as a single JSON line
pub fn append_log<T: Serialize>(path: &Path, record: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

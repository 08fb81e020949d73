//! Default file names proposed when saving

use std::path::Path;

/// Suffix on a file stem asking for the lowest free three-digit number
pub const NUMBER_PLACEHOLDER: &str = "?000";

/// Highest number tried before giving up on finding a free name
pub const MAX_SUFFIX: u32 = 999;

/// Replace characters that are not allowed in file names with `_`
pub fn scrub_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Split the last path component of `name` into stem and lowercased extension
fn split_name(name: &str) -> (&str, Option<String>) {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rfind('.') {
        Some(dot) if dot > 0 => (&base[..dot], Some(base[dot + 1..].to_ascii_lowercase())),
        _ => (base, None),
    }
}

/// Default file name for a save dialog opening in `folder`.
///
/// A stem ending in `?000` is replaced by `<stem>_NNN.<ext>` using the
/// lowest number whose file does not exist in `folder` yet. After
/// [`MAX_SUFFIX`] the last candidate is used even if it exists.
pub fn save_file_name(filename: &str, folder: &Path) -> String {
    let scrubbed = scrub_file_name(filename);
    let (stem, _) = split_name(filename);
    let Some(prefix) = stem.strip_suffix(NUMBER_PLACEHOLDER) else {
        return scrubbed;
    };

    let prefix = scrub_file_name(prefix);
    let (_, extension) = split_name(&scrubbed);
    let mut candidate = String::new();
    for n in 0..=MAX_SUFFIX {
        candidate = match &extension {
            Some(ext) => format!("{}_{:03}.{}", prefix, n, ext),
            None => format!("{}_{:03}", prefix, n),
        };
        if !folder.join(&candidate).exists() {
            break;
        }
    }
    candidate
}

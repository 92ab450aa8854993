// Helpers for remote paths and `stat` output
use std::path::Path;

/// Parent directory of a remote path, if it has a non-empty one.
pub fn parent_dir(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(|parent| parent.to_string_lossy().into_owned())
}

/// Normalizes an octal mode the way `stat -c %a` output is stored: newlines
/// stripped and left-padded with a `0` when shorter than four digits.
pub fn normalize_permissions(raw: &str) -> String {
    let mode = raw.replace('\n', "");
    if !mode.is_empty() && mode.len() < 4 {
        format!("0{}", mode)
    } else {
        mode
    }
}

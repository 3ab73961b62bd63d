//! Directory listing for the client's remote file browser.

use std::path::Path;

/// Folders and files of one directory, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub folders: Vec<String>,
    pub files: Vec<String>,
}

/// List a directory. Returns `None` when the path does not exist or is not
/// readable — callers report that as a result, never as an error.
#[must_use]
pub fn list_dir(path: &Path) -> Option<DirListing> {
    let entries = std::fs::read_dir(path).ok()?;
    let mut listing = DirListing::default();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            listing.folders.push(name);
        } else {
            listing.files.push(name);
        }
    }
    Some(listing)
}

#[cfg(test)]
#[path = "files_test.rs"]
mod tests;

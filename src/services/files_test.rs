use std::path::Path;

use super::*;

#[test]
fn listing_separates_folders_and_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("images")).expect("mkdir");
    std::fs::create_dir(dir.path().join("projects")).expect("mkdir");
    std::fs::write(dir.path().join("notes.txt"), "x").expect("write");
    std::fs::write(dir.path().join("run_001.npy"), "x").expect("write");

    let listing = list_dir(dir.path()).expect("listing");
    assert_eq!(listing.folders.len(), 2);
    assert_eq!(listing.files.len(), 2);
    assert!(listing.folders.iter().any(|f| f == "images"));
    assert!(listing.folders.iter().any(|f| f == "projects"));
    assert!(listing.files.iter().any(|f| f == "notes.txt"));
    assert!(listing.files.iter().any(|f| f == "run_001.npy"));
}

#[test]
fn empty_directory_lists_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let listing = list_dir(dir.path()).expect("listing");
    assert!(listing.folders.is_empty());
    assert!(listing.files.is_empty());
}

#[test]
fn missing_path_is_none_not_an_error() {
    assert!(list_dir(Path::new("/nonexistent/surely/not")).is_none());
}

#[test]
fn file_path_is_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "x").expect("write");
    assert!(list_dir(&file).is_none());
}

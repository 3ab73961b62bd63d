use std::path::Path;

use super::*;

const PROJECT_JSON: &str = r#"{
    "calibration": {
        "wavelength": 3.3435e-11,
        "distance": 0.2,
        "center_x": 16.0,
        "center_y": 16.0,
        "pixel_size": 1e-4
    },
    "image": "images/run_001.npy",
    "pattern": {
        "filename": "run_001.xy",
        "x": [0.1, 0.2, 0.3],
        "y": [5.0, 9.0, 4.0]
    }
}"#;

#[test]
fn read_parses_all_sections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.json");
    std::fs::write(&path, PROJECT_JSON).expect("write project");

    let project = ProjectFile::read(&path).expect("read");
    let calibration = project.calibration.expect("calibration");
    assert!((calibration.wavelength - 3.3435e-11).abs() < 1e-20);
    assert!((calibration.distance - 0.2).abs() < f64::EPSILON);

    let pattern = project.pattern.expect("pattern");
    assert_eq!(pattern.filename.as_deref(), Some("run_001.xy"));
    assert_eq!(pattern.x.len(), 3);

    assert_eq!(project.image.as_deref(), Some("images/run_001.npy"));
}

#[test]
fn sections_are_optional() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("empty.json");
    std::fs::write(&path, "{}").expect("write project");

    let project = ProjectFile::read(&path).expect("read");
    assert!(project.calibration.is_none());
    assert!(project.image.is_none());
    assert!(project.pattern.is_none());
    assert!(project.image_path(&path).is_none());
}

#[test]
fn image_path_resolves_relative_to_the_project() {
    let project = ProjectFile {
        calibration: None,
        image: Some("images/run_001.npy".into()),
        pattern: None,
    };
    let resolved = project
        .image_path(Path::new("/data/projects/run.json"))
        .expect("image path");
    assert_eq!(resolved, Path::new("/data/projects/images/run_001.npy"));
}

#[test]
fn missing_file_is_io_error() {
    let result = ProjectFile::read(Path::new("/nonexistent/run.json"));
    assert!(matches!(result, Err(ProjectError::Io(_))));
}

#[test]
fn malformed_json_is_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{not json").expect("write");
    assert!(matches!(ProjectFile::read(&path), Err(ProjectError::Parse(_))));
}

use cancerdetect_daemon::intake::{DirectoryImageSource, ImageSource};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_lists_only_image_files_sorted() {
    let dir = tempdir().unwrap();
    for name in ["scan_b.PNG", "scan_a.jpg", "notes.txt", "scan_c.webp", "archive.zip"] {
        fs::write(dir.path().join(name), b"data").unwrap();
    }
    fs::create_dir(dir.path().join("nested.png")).unwrap();

    let files = DirectoryImageSource::default().list_images(dir.path()).unwrap();
    let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["scan_a.jpg", "scan_b.PNG", "scan_c.webp"]);
    assert!(files.iter().all(|f| f.size_bytes == 4 && f.path.is_some()));
}

#[test]
fn test_custom_extensions() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.bmp"), b"x").unwrap();
    fs::write(dir.path().join("b.tiff"), b"x").unwrap();

    let source = DirectoryImageSource::new(&[".tiff".to_string()]);
    let files = source.list_images(dir.path()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "b.tiff");
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    assert!(DirectoryImageSource::default().list_images(&missing).is_err());
}

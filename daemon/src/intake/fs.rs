use super::{ImageSource, InputFile, DEFAULT_IMAGE_EXTENSIONS};
use std::fs;
use std::path::Path;
use tracing::debug;

pub struct DirectoryImageSource {
    extensions: Vec<String>,
}

impl DirectoryImageSource {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect(),
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }
}

impl Default for DirectoryImageSource {
    fn default() -> Self {
        let exts: Vec<String> = DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        Self::new(&exts)
    }
}

impl ImageSource for DirectoryImageSource {
    fn list_images(&self, dir: &Path) -> std::io::Result<Vec<InputFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if !path.is_file() || !self.accepts(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                debug!("Skipping non-UTF-8 file name {:?}", path);
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(InputFile { name, path: Some(path), size_bytes });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

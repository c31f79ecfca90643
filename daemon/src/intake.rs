//! Input files handed to a training or analysis run

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod fs;
pub use fs::DirectoryImageSource;

/// Extensions accepted by the upload surface.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// One uploaded image. Only `name` is carried into results; content is never read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub size_bytes: u64,
}

impl InputFile {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), path: None, size_bytes: 0 }
    }
}

pub trait ImageSource: Send + Sync {
    fn list_images(&self, dir: &Path) -> std::io::Result<Vec<InputFile>>;
}

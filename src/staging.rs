//! Local staging directory for files exchanged with a sandbox

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A staged file. `content` is `None` in directory listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub name: String,
    pub content: Option<Vec<u8>>,
}

/// File store rooted at one directory
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory if needed
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Plain file names only; no separators or parent references
    fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(name)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid staged file name: {name:?}"),
            )),
        }
    }

    /// Write `content` under `name`, replacing any previous file
    pub fn upload(&self, name: &str, content: &[u8]) -> io::Result<String> {
        let path = self.path_for(name)?;
        self.ensure()?;
        std::fs::write(path, content)?;
        Ok(format!("{name} uploaded successfully"))
    }

    pub fn download(&self, name: &str) -> io::Result<StagedFile> {
        let content = std::fs::read(self.path_for(name)?)?;
        Ok(StagedFile {
            name: name.to_string(),
            content: Some(content),
        })
    }

    /// Names of the staged files, sorted
    pub fn list_files(&self) -> io::Result<Vec<StagedFile>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(StagedFile {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    content: None,
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_download_list() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join(".codebox"));

        assert!(staging.list_files().unwrap().is_empty());
        let status = staging.upload("test_file.txt", b"Hello World!").unwrap();
        assert!(status.contains("test_file.txt"));
        staging.upload("a.csv", b"x,y").unwrap();

        assert_eq!(staging.download("test_file.txt").unwrap().content.unwrap(), b"Hello World!");
        let names: Vec<_> = staging.list_files().unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a.csv", "test_file.txt"]);
    }

    #[test]
    fn test_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        for name in ["../escape", "nested/file", "/abs", "", ".."] {
            assert!(staging.upload(name, b"x").is_err(), "{name:?} accepted");
        }
    }

    #[test]
    fn test_download_missing() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        assert_eq!(
            staging.download("nope").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}

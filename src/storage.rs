use std::path::{Path, PathBuf};

use crate::eid::Eid;

/// Object storage boundary. Idents may contain `/` separators; the local
/// backend maps them onto a directory tree.
pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
}

#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: &str) -> std::io::Result<Self> {
        let path = PathBuf::from(storage_dir);
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    fn resolve(&self, ident: &str) -> std::io::Result<PathBuf> {
        // reject traversal out of the base dir
        let rel = Path::new(ident);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid storage ident: {ident}"),
            ));
        }
        Ok(self.base_dir.join(rel))
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        self.resolve(ident)
            .map(|path| std::fs::metadata(path).is_ok())
            .unwrap_or(false)
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.resolve(ident)?)
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.resolve(ident)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // write to a sibling temp file, then rename into place
        let temp_name = format!(
            "{}-{}",
            Eid::new(),
            path.file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("blob")
        );
        let temp_path = path.with_file_name(temp_name);

        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &path)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.resolve(ident)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_nested_ident() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path().to_str().unwrap()).unwrap();

        store.write("user-1/photo.png", b"bytes").unwrap();
        assert!(store.exists("user-1/photo.png"));
        assert_eq!(store.read("user-1/photo.png").unwrap(), b"bytes");

        store.delete("user-1/photo.png").unwrap();
        assert!(!store.exists("user-1/photo.png"));
    }

    #[test]
    fn test_traversal_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path().to_str().unwrap()).unwrap();

        assert!(store.write("../escape", b"x").is_err());
        assert!(!store.exists("../escape"));
    }
}

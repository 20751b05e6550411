use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

pub const UPLOADS_ROUTE: &str = "/uploads";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload name has no usable characters")]
    EmptyName,
    #[error("Failed to create upload directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to save upload {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Local directory holding every analyzed upload under its sanitized name.
#[derive(Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    /// Opens the store, creating the directory if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| UploadError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` as `filename`, replacing any earlier upload of the same name.
    pub fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, UploadError> {
        if filename.is_empty() {
            return Err(UploadError::EmptyName);
        }
        let path = self.dir.join(filename);
        std::fs::write(&path, bytes).map_err(|source| UploadError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn public_url(filename: &str) -> String {
        format!("{}/{}", UPLOADS_ROUTE, filename)
    }
}

/// Reduces a client supplied filename to a flat, ASCII-only name that cannot
/// escape the upload directory. Accented letters keep their base letter.
/// May return an empty string.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_path_traversal() {
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("..\\..\\windows\\scan.png"), "windows_scan.png");
        assert_eq!(secure_filename("/abs/path/ct.jpg"), "abs_path_ct.jpg");
    }

    #[test]
    fn joins_whitespace_and_drops_specials() {
        assert_eq!(secure_filename("my chest scan.jpg"), "my_chest_scan.jpg");
        assert_eq!(secure_filename("scan (1)?.jpeg"), "scan_1.jpeg");
        assert_eq!(secure_filename("tümör.png"), "tumor.png");
        assert_eq!(secure_filename("café scan.jpg"), "cafe_scan.jpg");
        assert_eq!(secure_filename("_.hidden_"), "hidden");
    }

    #[test]
    fn can_sanitize_to_nothing() {
        assert_eq!(secure_filename("../.."), "");
        assert_eq!(secure_filename("???"), "");
    }

    #[test]
    fn empty_name_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();

        assert!(matches!(store.save("", b"bytes"), Err(UploadError::EmptyName)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn same_name_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path().join("uploads")).unwrap();

        let first = store.save("scan.jpg", b"first").unwrap();
        let second = store.save("scan.jpg", b"second upload").unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), b"second upload");
        assert_eq!(UploadStore::public_url("scan.jpg"), "/uploads/scan.jpg");
    }
}

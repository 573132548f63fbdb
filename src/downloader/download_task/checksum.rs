//! MD5 of files on disk.

use std::io::Read;
use std::path::{Path, PathBuf};

const READ_BUFFER: usize = 64 * 1024;

/// Lower-case hex MD5 of a whole file
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_file_md5(file_path: &Path) -> crate::Result<String> {
    let mut file = std::fs::File::open(file_path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; READ_BUFFER];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// [`compute_file_md5`] on the blocking pool
pub async fn file_md5(file_path: PathBuf) -> crate::Result<String> {
    tokio::task::spawn_blocking(move || compute_file_md5(&file_path))
        .await
        .map_err(|e| {
            crate::Error::Io(std::io::Error::other(format!(
                "checksum task failed: {}",
                e
            )))
        })?
}

/// Source checksums are compared case-insensitively
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    !expected.is_empty() && expected.trim().eq_ignore_ascii_case(actual)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn hashes_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        // Larger than one read buffer
        let data = vec![7u8; READ_BUFFER * 2 + 13];
        std::fs::write(&path, &data).unwrap();

        let hash = file_md5(path).await.unwrap();
        assert_eq!(hash, format!("{:x}", md5::compute(&data)));
    }

    #[test]
    fn known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        assert_eq!(
            compute_file_md5(&path).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(compute_file_md5(Path::new("/nonexistent/file.flac")).is_err());
    }

    #[test]
    fn comparison_ignores_case_but_not_emptiness() {
        assert!(checksum_matches("5D41402ABC4B2A76B9719D911017C592", "5d41402abc4b2a76b9719d911017c592"));
        assert!(!checksum_matches("", "d41d8cd98f00b204e9800998ecf8427e"));
        assert!(!checksum_matches("aa", "bb"));
    }
}

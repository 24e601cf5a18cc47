//! Artifact directory provisioning

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Create every directory in `paths` along with missing ancestors
///
/// Existing directories are left alone. When `verbose`, one line is logged
/// per listed path (not per ancestor).
pub fn create_directories<P: AsRef<Path>>(paths: &[P], verbose: bool) -> Result<()> {
    for path in paths {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        if verbose {
            tracing::info!("Directory created at: {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_nested_directories() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("artifacts/training/checkpoints");

        create_directories(&[&nested], true).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_existing_directory_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("artifacts");

        create_directories(&[&dir, &dir], false).unwrap();
        create_directories(&[&dir], false).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_file_in_the_way_propagates_io_error() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("occupied");
        fs::write(&file, b"x").unwrap();

        let err = create_directories(&[file.join("child")], false).unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(_)));
    }
}

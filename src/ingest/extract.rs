//! Zip archive extraction

use std::fs::{self, File};
use std::path::Path;

use zip::ZipArchive;

use crate::error::Result;

/// Extract every entry of `archive` under `dest`, returning the entry count
///
/// Entry names that would escape `dest` are rejected by the archive reader.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;
    let entries = zip.len();
    zip.extract(dest)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::{SimpleFileOptions, ZipWriter};
    use zip::CompressionMethod;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, contents) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extracts_nested_entries() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("data.zip");
        write_zip(
            &archive,
            &[
                ("kidney-ct-scan-image/Normal/a.png", &b"n"[..]),
                ("kidney-ct-scan-image/Tumor/b.png", &b"t"[..]),
            ],
        );

        let dest = tmp.path().join("out");
        let count = extract_zip(&archive, &dest).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            fs::read(dest.join("kidney-ct-scan-image/Normal/a.png")).unwrap(),
            b"n"
        );
        assert!(dest.join("kidney-ct-scan-image/Tumor/b.png").is_file());
    }

    #[test]
    fn test_missing_archive_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = extract_zip(&tmp.path().join("absent.zip"), &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_corrupt_archive_is_archive_error() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("data.zip");
        fs::write(&archive, b"<html>not a zip</html>").unwrap();

        let err = extract_zip(&archive, &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }
}

//! Class-per-subfolder image datasets

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ValidationError;
use crate::error::Result;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "ppm"];

/// Which side of the validation split to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subset {
    Training,
    Validation,
}

impl Subset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subset::Training => "training",
            Subset::Validation => "validation",
        }
    }
}

/// One labelled image file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// Labelled image files found under `root/<class>/`
///
/// Classes are the subdirectory names in alphabetical order; the label of a
/// sample is its class's position in that order. Within each class, files are
/// sorted by name and the first `floor(split * n)` go to the validation
/// subset, the rest to training.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    class_names: Vec<String>,
    samples: Vec<Sample>,
}

impl ImageFolder {
    pub fn scan(root: impl AsRef<Path>, subset: Subset, validation_split: f64) -> Result<Self> {
        let root = root.as_ref();
        let class_dirs = sorted_entries(root, |p| p.is_dir())?;
        if class_dirs.is_empty() {
            return Err(ValidationError::EmptyDataset(root.display().to_string()).into());
        }

        let mut class_names = Vec::with_capacity(class_dirs.len());
        let mut samples = Vec::new();
        let mut total = 0;

        for (label, dir) in class_dirs.iter().enumerate() {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            class_names.push(name);

            let files = sorted_entries(dir, is_image_file)?;
            total += files.len();
            let n_valid = (validation_split * files.len() as f64).floor() as usize;
            let kept = match subset {
                Subset::Validation => &files[..n_valid],
                Subset::Training => &files[n_valid..],
            };
            samples.extend(kept.iter().map(|path| Sample {
                path: path.clone(),
                label,
            }));
        }

        if total == 0 {
            return Err(ValidationError::EmptyDataset(root.display().to_string()).into());
        }

        tracing::info!(
            "Found {} images belonging to {} classes ({} subset)",
            samples.len(),
            class_names.len(),
            subset.as_str()
        );

        Ok(Self {
            root: root.to_path_buf(),
            class_names,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if keep(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    fn touch_images(root: &Path, class: &str, count: usize) {
        let dir = root.join(class);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            fs::write(dir.join(format!("img_{i:03}.png")), b"").unwrap();
        }
    }

    #[test]
    fn test_classes_are_alphabetical() {
        let tmp = TempDir::new().unwrap();
        touch_images(tmp.path(), "Tumor", 5);
        touch_images(tmp.path(), "Normal", 5);

        let folder = ImageFolder::scan(tmp.path(), Subset::Training, 0.0).unwrap();
        assert_eq!(folder.class_names(), &["Normal".to_string(), "Tumor".to_string()]);
        assert_eq!(folder.samples()[0].label, 0);
        assert_eq!(folder.samples()[9].label, 1);
    }

    #[test]
    fn test_split_counts_per_class() {
        let tmp = TempDir::new().unwrap();
        touch_images(tmp.path(), "Normal", 50);
        touch_images(tmp.path(), "Tumor", 50);

        let train = ImageFolder::scan(tmp.path(), Subset::Training, 0.2).unwrap();
        let valid = ImageFolder::scan(tmp.path(), Subset::Validation, 0.2).unwrap();
        assert_eq!(train.len(), 80);
        assert_eq!(valid.len(), 20);

        // Validation takes the first files of each class
        assert!(valid.samples()[0].path.ends_with("Normal/img_000.png"));
        assert!(train.samples()[0].path.ends_with("Normal/img_010.png"));
    }

    #[test]
    fn test_split_floors_small_classes() {
        let tmp = TempDir::new().unwrap();
        touch_images(tmp.path(), "a", 7);
        touch_images(tmp.path(), "b", 3);

        let valid = ImageFolder::scan(tmp.path(), Subset::Validation, 0.2).unwrap();
        // floor(1.4) + floor(0.6)
        assert_eq!(valid.len(), 1);
    }

    #[test]
    fn test_non_images_ignored() {
        let tmp = TempDir::new().unwrap();
        touch_images(tmp.path(), "Normal", 2);
        fs::write(tmp.path().join("Normal/notes.txt"), b"").unwrap();
        fs::write(tmp.path().join("README"), b"").unwrap();

        let folder = ImageFolder::scan(tmp.path(), Subset::Training, 0.0).unwrap();
        assert_eq!(folder.len(), 2);
        assert_eq!(folder.class_names().len(), 1);
    }

    #[test]
    fn test_empty_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = ImageFolder::scan(tmp.path(), Subset::Training, 0.2).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = ImageFolder::scan(tmp.path().join("absent"), Subset::Training, 0.2).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

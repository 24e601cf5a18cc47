//! Batch iteration over image datasets

use ndarray::{Array3, Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::augment::Augmentation;
use super::decode::{load_image, ImageShape};
use super::folder::ImageFolder;
use crate::error::Result;

/// A batch of NHWC images with integer class labels
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Source of batches for training and evaluation
///
/// A pass ends when `next_batch` returns `None`; `reset` starts the next
/// pass (reshuffling when the iterator shuffles). The final batch of a pass
/// may be short.
pub trait DataIterator {
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    fn reset(&mut self);

    fn sample_count(&self) -> usize;

    fn batch_size(&self) -> usize;

    /// Class names in label order
    fn class_names(&self) -> &[String];

    /// Batches in one full pass, counting a short final batch
    fn batches_per_pass(&self) -> usize {
        self.sample_count().div_ceil(self.batch_size().max(1))
    }

    /// Next batch, starting a new pass when the current one is exhausted
    fn next_cycled(&mut self) -> Result<Option<Batch>> {
        match self.next_batch()? {
            Some(batch) => Ok(Some(batch)),
            None => {
                self.reset();
                self.next_batch()
            }
        }
    }
}

/// Streams batches from an [`ImageFolder`], decoding images lazily
pub struct ImageBatchIterator {
    folder: ImageFolder,
    shape: ImageShape,
    batch_size: usize,
    shuffle: bool,
    augmentation: Option<Augmentation>,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl ImageBatchIterator {
    pub fn new(folder: ImageFolder, shape: ImageShape, batch_size: usize, seed: u64) -> Self {
        let order = (0..folder.len()).collect();
        Self {
            folder,
            shape,
            batch_size: batch_size.max(1),
            shuffle: false,
            augmentation: None,
            rng: StdRng::seed_from_u64(seed),
            order,
            cursor: 0,
        }
    }

    /// Shuffle sample order at the start of every pass
    pub fn shuffled(mut self) -> Self {
        self.shuffle = true;
        self.order.shuffle(&mut self.rng);
        self
    }

    pub fn with_augmentation(mut self, augmentation: Augmentation) -> Self {
        self.augmentation = Some(augmentation);
        self
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn folder(&self) -> &ImageFolder {
        &self.folder
    }
}

impl DataIterator for ImageBatchIterator {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];

        let mut images = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            let sample = &self.folder.samples()[i];
            let mut image = load_image(&sample.path, self.shape)?;
            if let Some(aug) = &self.augmentation {
                image = aug.apply(&image, &mut self.rng);
            }
            images.push(image);
            labels.push(sample.label);
        }
        self.cursor = end;

        Ok(Some(Batch {
            images: stack_images(&images, self.shape),
            labels,
        }))
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    fn sample_count(&self) -> usize {
        self.folder.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn class_names(&self) -> &[String] {
        self.folder.class_names()
    }
}

/// Batches over tensors already in memory
#[derive(Debug, Clone)]
pub struct TensorIterator {
    images: Array4<f32>,
    labels: Vec<usize>,
    class_names: Vec<String>,
    batch_size: usize,
    cursor: usize,
}

impl TensorIterator {
    pub fn new(
        images: Array4<f32>,
        labels: Vec<usize>,
        class_names: Vec<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            images,
            labels,
            class_names,
            batch_size: batch_size.max(1),
            cursor: 0,
        }
    }
}

impl DataIterator for TensorIterator {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let n = self.labels.len().min(self.images.len_of(Axis(0)));
        if self.cursor >= n {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(n);
        let batch = Batch {
            images: self
                .images
                .slice_axis(Axis(0), (self.cursor..end).into())
                .to_owned(),
            labels: self.labels[self.cursor..end].to_vec(),
        };
        self.cursor = end;
        Ok(Some(batch))
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn sample_count(&self) -> usize {
        self.labels.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

fn stack_images(images: &[Array3<f32>], shape: ImageShape) -> Array4<f32> {
    let [h, w, c] = shape.dims();
    let mut out = Array4::zeros((images.len(), h, w, c));
    for (mut slot, image) in out.outer_iter_mut().zip(images) {
        slot.assign(image);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::folder::Subset;
    use image::{Rgb, RgbImage};
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_dataset(root: &Path, per_class: usize) {
        for (class, value) in [("Normal", 40u8), ("Tumor", 200u8)] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                RgbImage::from_pixel(8, 8, Rgb([value, value, value]))
                    .save(dir.join(format!("{i:03}.png")))
                    .unwrap();
            }
        }
    }

    fn iterator(root: &Path, batch: usize) -> ImageBatchIterator {
        let folder = ImageFolder::scan(root, Subset::Training, 0.0).unwrap();
        ImageBatchIterator::new(folder, ImageShape::new(4, 4, 3), batch, 42)
    }

    #[test]
    fn test_pass_covers_every_sample_once() {
        let tmp = TempDir::new().unwrap();
        write_dataset(tmp.path(), 5);
        let mut it = iterator(tmp.path(), 4);

        let mut sizes = Vec::new();
        while let Some(batch) = it.next_batch().unwrap() {
            assert_eq!(batch.images.shape(), &[batch.len(), 4, 4, 3]);
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(it.batches_per_pass(), 3);
    }

    #[test]
    fn test_labels_match_pixels() {
        let tmp = TempDir::new().unwrap();
        write_dataset(tmp.path(), 3);
        let mut it = iterator(tmp.path(), 6).shuffled();

        let batch = it.next_batch().unwrap().unwrap();
        for (i, &label) in batch.labels.iter().enumerate() {
            let expected = (if label == 0 { 40.0 } else { 200.0 }) / 255.0;
            assert!((batch.images[[i, 0, 0, 0]] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_shuffled_reset_keeps_sample_set() {
        let tmp = TempDir::new().unwrap();
        write_dataset(tmp.path(), 4);
        let mut it = iterator(tmp.path(), 8).shuffled();

        let first: Vec<usize> = it.next_batch().unwrap().unwrap().labels;
        assert!(it.next_batch().unwrap().is_none());
        it.reset();
        let second: Vec<usize> = it.next_batch().unwrap().unwrap().labels;

        assert_eq!(first.len(), second.len());
        assert_eq!(
            first.iter().filter(|&&l| l == 1).count(),
            second.iter().filter(|&&l| l == 1).count()
        );
    }

    #[test]
    fn test_cycled_restarts_pass() {
        let tmp = TempDir::new().unwrap();
        write_dataset(tmp.path(), 2);
        let mut it = iterator(tmp.path(), 4);

        assert!(it.next_cycled().unwrap().is_some());
        assert!(it.next_cycled().unwrap().is_some());
    }

    #[test]
    fn test_tensor_iterator_batches() {
        let images = Array4::from_shape_fn((5, 2, 2, 1), |(n, _, _, _)| n as f32);
        let classes = vec!["a".to_string(), "b".to_string()];
        let mut it = TensorIterator::new(images, vec![0, 1, 0, 1, 0], classes, 2);

        let mut seen = HashSet::new();
        while let Some(batch) = it.next_batch().unwrap() {
            for i in 0..batch.len() {
                seen.insert(batch.images[[i, 0, 0, 0]] as usize);
            }
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(it.batches_per_pass(), 3);
    }
}

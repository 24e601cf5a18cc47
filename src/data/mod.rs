//! Image datasets, batch iterators and augmentation

mod augment;
mod decode;
mod folder;
mod iterator;

pub use augment::Augmentation;
pub use decode::{decode_image, load_image, ImageShape, RESCALE};
pub use folder::{ImageFolder, Sample, Subset};
pub use iterator::{Batch, DataIterator, ImageBatchIterator, TensorIterator};

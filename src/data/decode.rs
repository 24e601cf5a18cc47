//! Image decoding into rescaled HWC tensors

use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array3;

use crate::config::ValidationError;
use crate::error::Result;

/// Pixel values are multiplied by this before entering the model
pub const RESCALE: f32 = 1.0 / 255.0;

/// Target tensor shape for decoded images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// From an `IMAGE_SIZE` triple `[h, w, c]`; only 1 or 3 channels decode
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match *dims {
            [h, w, c] if h > 0 && w > 0 && (c == 1 || c == 3) => Ok(Self::new(h, w, c)),
            _ => Err(ValidationError::InvalidImageSize(dims.to_vec()).into()),
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }
}

/// Read, resize (bilinear) and rescale an image file
pub fn load_image(path: &Path, shape: ImageShape) -> Result<Array3<f32>> {
    let img = image::open(path)?;
    Ok(to_tensor(img, shape))
}

/// Like [`load_image`] for an in-memory encoded image
pub fn decode_image(bytes: &[u8], shape: ImageShape) -> Result<Array3<f32>> {
    let img = image::load_from_memory(bytes)?;
    Ok(to_tensor(img, shape))
}

fn to_tensor(img: DynamicImage, shape: ImageShape) -> Array3<f32> {
    let resized = img.resize_exact(shape.width as u32, shape.height as u32, FilterType::Triangle);

    if shape.channels == 1 {
        let gray = resized.to_luma8();
        Array3::from_shape_fn((shape.height, shape.width, 1), |(y, x, _)| {
            f32::from(gray.get_pixel(x as u32, y as u32)[0]) * RESCALE
        })
    } else {
        let rgb = resized.to_rgb8();
        Array3::from_shape_fn((shape.height, shape.width, 3), |(y, x, c)| {
            f32::from(rgb.get_pixel(x as u32, y as u32)[c]) * RESCALE
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_load_resizes_and_rescales() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scan.png");
        RgbImage::from_pixel(64, 48, Rgb([255, 0, 51])).save(&path).unwrap();

        let tensor = load_image(&path, ImageShape::new(16, 16, 3)).unwrap();
        assert_eq!(tensor.shape(), &[16, 16, 3]);
        assert!((tensor[[0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[5, 5, 1]].abs() < 1e-6);
        assert!((tensor[[15, 15, 2]] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_grayscale_target() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scan.png");
        RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])).save(&path).unwrap();

        let tensor = load_image(&path, ImageShape::new(4, 4, 1)).unwrap();
        assert_eq!(tensor.shape(), &[4, 4, 1]);
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_undecodable_bytes() {
        let err = decode_image(b"not an image", ImageShape::new(4, 4, 3)).unwrap_err();
        assert!(matches!(err, crate::error::Error::Image(_)));
    }

    #[test]
    fn test_shape_from_dims() {
        assert_eq!(
            ImageShape::from_dims(&[224, 224, 3]).unwrap(),
            ImageShape::new(224, 224, 3)
        );
        assert!(ImageShape::from_dims(&[224, 224, 4]).is_err());
        assert!(ImageShape::from_dims(&[224, 224]).is_err());
    }
}

use anyhow::Result;
use ndarray::{Array2, Array3, ArrayView2, Axis};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("image dimensions must be non-zero, got {width}x{height}x{channels}")]
    EmptyImage {
        width: usize,
        height: usize,
        channels: usize,
    },
    #[error("target size must be non-zero, got {0}x{1}")]
    InvalidSize(usize, usize),
    #[error("rescale factor must be finite and positive, got {0}")]
    InvalidScale(f32),
}

/// A decoded raster held as `f32` planes in `(height, width, channel)` order.
///
/// Pixel values are expected in `[0, 1]`; nothing enforces it, but the mask
/// overlay saturates at `1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub(super) data: Array3<f32>,
}

impl Image {
    pub fn new(data: Array3<f32>) -> Result<Self> {
        let (height, width, channels) = data.dim();
        if height == 0 || width == 0 || channels == 0 {
            return Err(MediaError::EmptyImage {
                width,
                height,
                channels,
            }
            .into());
        }

        Ok(Self { data })
    }

    pub fn from_gray(plane: Array2<f32>) -> Result<Self> {
        Self::new(plane.insert_axis(Axis(2)))
    }

    pub fn zeros(size: (usize, usize), channels: usize) -> Result<Self> {
        Self::new(Array3::zeros((size.1, size.0, channels)))
    }

    pub fn get_width(&self) -> usize {
        self.data.dim().1
    }

    pub fn get_height(&self) -> usize {
        self.data.dim().0
    }

    /// `(width, height)`
    pub fn get_size(&self) -> (usize, usize) {
        (self.get_width(), self.get_height())
    }

    pub fn short_edge(&self) -> usize {
        self.get_width().min(self.get_height())
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    pub fn plane(&self, channel: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(2), channel)
    }

    pub fn raw_data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn raw_data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }
}

#[test]
fn test_empty_image_is_rejected() {
    let error = Image::new(Array3::zeros((0, 4, 3))).unwrap_err();
    assert!(error.downcast_ref::<MediaError>().is_some());
}

#[test]
fn test_size_is_width_then_height() {
    let image = Image::zeros((7, 3), 3).unwrap();
    assert_eq!(image.get_size(), (7, 3));
    assert_eq!(image.short_edge(), 3);
    assert_eq!(image.channels(), 3);
    assert_eq!(image.plane(0).dim(), (3, 7));
}

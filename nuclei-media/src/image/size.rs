use crate::interpolate::resize_plane;
use crate::{Image, MediaError};
use anyhow::Result;
use log::debug;
use ndarray::{stack, Axis};

pub trait ResizeImage {
    fn resize_to(&mut self, size: (usize, usize)) -> Result<()>;
    fn resize_into(&self, size: (usize, usize)) -> Result<Self>
    where
        Self: Sized;
}

impl ResizeImage for Image {
    fn resize_to(&mut self, size: (usize, usize)) -> Result<()> {
        *self = self.resize_into(size)?;

        Ok(())
    }

    fn resize_into(&self, size: (usize, usize)) -> Result<Self> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(MediaError::InvalidSize(width, height).into());
        }
        if self.get_size() == size {
            return Ok(self.clone());
        }

        let planes = self
            .data
            .axis_iter(Axis(2))
            .map(|plane| resize_plane(plane, (height, width)))
            .collect::<Vec<_>>();
        let views = planes.iter().map(|plane| plane.view()).collect::<Vec<_>>();

        Ok(Image {
            data: stack(Axis(2), &views)?,
        })
    }
}

impl Image {
    /// Scales both edges by `factor`, rounding to the nearest pixel and never
    /// below one pixel.
    pub fn rescale(&self, factor: f32) -> Result<Image> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(MediaError::InvalidScale(factor).into());
        }

        let (width, height) = self.get_size();
        let size = (
            ((width as f32 * factor).round() as usize).max(1),
            ((height as f32 * factor).round() as usize).max(1),
        );
        debug!(
            "Rescaling image from {}x{} to {}x{} (factor {:.3})",
            width, height, size.0, size.1, factor
        );

        self.resize_into(size)
    }
}

#[test]
fn test_rescale_rounds_edges() -> Result<()> {
    let image = Image::zeros((100, 51), 3)?;
    let scaled = image.rescale(1.5)?;
    assert_eq!(scaled.get_size(), (150, 77));
    assert_eq!(scaled.channels(), 3);

    assert!(image.rescale(0.0).is_err());
    assert!(image.rescale(f32::NAN).is_err());

    Ok(())
}

#[test]
fn test_resize_to_rejects_zero_size() {
    let mut image = Image::zeros((4, 4), 1).unwrap();
    assert!(image.resize_to((0, 4)).is_err());
    image.resize_to((2, 8)).unwrap();
    assert_eq!(image.get_size(), (2, 8));
}

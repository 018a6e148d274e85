use crate::inference::SourceTag;
use crate::{InstanceMask, RescaleConfig};
use anyhow::Result;
use nuclei_media::{Flip, Image};

/// One geometric step applied to an image before inference.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Transform {
    Identity,
    Flip(Flip),
    Rescale(f32),
}

impl Transform {
    pub fn apply(&self, image: &Image) -> Result<Image> {
        match self {
            Transform::Identity => Ok(image.clone()),
            Transform::Flip(flip) => Ok(image.flip(*flip)),
            Transform::Rescale(factor) => image.rescale(*factor),
        }
    }

    /// Maps a mask produced on the transformed image back onto the frame of
    /// the untransformed one, which is `target_size` (`(width, height)`).
    pub fn invert_instance(
        &self,
        mask: &InstanceMask,
        target_size: (usize, usize),
    ) -> Result<InstanceMask> {
        let mask = mask.resize_to(target_size)?;

        Ok(match self {
            Transform::Flip(flip) => mask.flip(*flip),
            Transform::Identity | Transform::Rescale(_) => mask,
        })
    }
}

/// An ordered chain of transforms tagged with the variant it represents.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformVariant {
    pub source: SourceTag,
    steps: Vec<Transform>,
}

impl TransformVariant {
    pub fn for_source(source: SourceTag, resize_target: f32) -> Self {
        let steps = match source {
            SourceTag::Identity => vec![Transform::Identity],
            SourceTag::FlipHorizontal => vec![Transform::Flip(Flip::Horizontal)],
            SourceTag::FlipVertical => vec![Transform::Flip(Flip::Vertical)],
            SourceTag::Rescale => vec![Transform::Rescale(resize_target)],
            SourceTag::FlipHorizontalRescale => vec![
                Transform::Flip(Flip::Horizontal),
                Transform::Rescale(resize_target),
            ],
            SourceTag::FlipVerticalRescale => vec![
                Transform::Flip(Flip::Vertical),
                Transform::Rescale(resize_target),
            ],
        };

        Self { source, steps }
    }

    pub fn steps(&self) -> &[Transform] {
        &self.steps
    }

    pub fn apply(&self, image: &Image) -> Result<Image> {
        self.steps
            .iter()
            .try_fold(image.clone(), |image, step| step.apply(&image))
    }

    /// Undoes the chain in reverse order. Every step preserves or restores
    /// the original size, so each inverse resizes to `target_size`.
    pub fn invert_instance(
        &self,
        mask: &InstanceMask,
        target_size: (usize, usize),
    ) -> Result<InstanceMask> {
        self.steps
            .iter()
            .rev()
            .try_fold(mask.clone(), |mask, step| {
                step.invert_instance(&mask, target_size)
            })
    }
}

/// Rescale factor for the rescaled variants.
///
/// Aims to bring the largest identity-pass object (`max_mask`, its longest
/// bounding-box side) to `target_object_size`, capped at `max_factor`; never
/// shrinks the short edge below `min_short_edge`; then clamps the result to
/// `[min_factor, max_factor]`. With no objects the object term is
/// `max_factor`.
pub fn resize_target(max_mask: usize, short_edge: usize, config: &RescaleConfig) -> f32 {
    let by_object = if max_mask == 0 {
        config.max_factor
    } else {
        (config.target_object_size / max_mask as f32).min(config.max_factor)
    };
    let by_edge = if short_edge == 0 {
        0.0
    } else {
        config.min_short_edge / short_edge as f32
    };

    by_object
        .max(by_edge)
        .max(config.min_factor)
        .min(config.max_factor)
}

#[test]
fn test_resize_target_follows_heuristic() {
    let config = RescaleConfig::default();

    // small objects on a large image: object term wins
    assert_eq!(resize_target(50, 512, &config), 1.6);
    // tiny objects: capped at 2.0
    assert_eq!(resize_target(10, 512, &config), 2.0);
    // large objects: floor of 0.75
    assert_eq!(resize_target(400, 1024, &config), 0.75);
    // short edge keeps the image at least 228 pixels
    assert_eq!(resize_target(200, 256, &config), 228.0 / 256.0);
    // no objects in the identity pass
    assert_eq!(resize_target(0, 512, &config), 2.0);
}

#[test]
fn test_resize_target_bounds() {
    let config = RescaleConfig::default();
    for max_mask in [1, 3, 17, 40, 80, 120, 500, 4000] {
        for short_edge in [1, 10, 64, 113, 114, 228, 256, 1000, 5000] {
            let factor = resize_target(max_mask, short_edge, &config);
            assert!((0.75..=2.0).contains(&factor), "{max_mask} {short_edge} {factor}");
        }
    }
}

#[test]
fn test_variant_inverts_onto_original_frame() -> Result<()> {
    let image = Image::zeros((64, 48), 3)?;
    let mask = InstanceMask::from_fn(64, 48, |x, y| (4..20).contains(&x) && (6..18).contains(&y));

    for source in SourceTag::ALL {
        let variant = TransformVariant::for_source(source, 1.5);
        let transformed = variant.apply(&image)?;

        // what a perfect network would report on the transformed image
        let seen = variant
            .steps()
            .iter()
            .try_fold(mask.clone(), |mask, step| -> Result<InstanceMask> {
                Ok(match step {
                    Transform::Identity => mask,
                    Transform::Flip(flip) => mask.flip(*flip),
                    Transform::Rescale(_) => mask.resize_to(transformed.get_size())?,
                })
            })?;

        let restored = variant.invert_instance(&seen, image.get_size())?;
        assert_eq!(restored.get_size(), (64, 48));
        assert!(crate::metric::iou(&restored, &mask)? > 0.9, "{source}");
    }

    Ok(())
}

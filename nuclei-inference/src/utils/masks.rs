use crate::utils::graph::BoundingBox;
use anyhow::Result;
use bitvec::prelude::*;
use ndarray::{Array2, ArrayView2};
use nuclei_media::interpolate::resize_plane;
use nuclei_media::{Flip, Image};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum MaskError {
    #[error("mask holds {actual} bits but {width}x{height} needs {expected}")]
    BitLength {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },
    #[error("mask sizes differ: {0:?} vs {1:?}")]
    SizeMismatch((usize, usize), (usize, usize)),
    #[error("mask target size must be non-zero, got {0}x{1}")]
    EmptyTarget(usize, usize),
}

/// One detected object as a row-major pixel membership bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMask {
    width: usize,
    height: usize,
    bits: BitVec,
}

impl InstanceMask {
    pub fn new(width: usize, height: usize, bits: BitVec) -> Result<Self> {
        if bits.len() != width * height {
            return Err(MaskError::BitLength {
                width,
                height,
                expected: width * height,
                actual: bits.len(),
            }
            .into());
        }

        Ok(Self {
            width,
            height,
            bits,
        })
    }

    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: bitvec![0; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Self {
        let bits = (0..width * height)
            .map(|index| f(index % width, index / width))
            .collect::<BitVec>();

        Self {
            width,
            height,
            bits,
        }
    }

    /// Binarises a `(height, width)` plane, keeping pixels `>= threshold`.
    pub fn from_plane(plane: ArrayView2<f32>, threshold: f32) -> Self {
        let (height, width) = plane.dim();
        let bits = plane.iter().map(|&value| value >= threshold).collect::<BitVec>();

        Self {
            width,
            height,
            bits,
        }
    }

    pub fn to_plane(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.height, self.width), |(y, x)| {
            if self.bits[y * self.width + x] {
                1.0
            } else {
                0.0
            }
        })
    }

    pub fn get_width(&self) -> usize {
        self.width
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    /// `(width, height)`
    pub fn get_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn bits(&self) -> &BitSlice {
        &self.bits
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.bits[y * self.width + x]
    }

    pub fn area(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub fn ensure_same_size(&self, other: &InstanceMask) -> Result<()> {
        if self.get_size() != other.get_size() {
            return Err(MaskError::SizeMismatch(self.get_size(), other.get_size()).into());
        }

        Ok(())
    }

    /// Number of pixels set in both masks. Sizes must already match.
    pub(crate) fn intersection(&self, other: &InstanceMask) -> usize {
        debug_assert_eq!(self.get_size(), other.get_size());
        let (small, large) = if self.area() <= other.area() {
            (self, other)
        } else {
            (other, self)
        };

        small.bits.iter_ones().filter(|&index| large.bits[index]).count()
    }

    /// Intersection over union; zero when both masks are empty.
    /// Sizes must already match.
    pub(crate) fn overlap(&self, other: &InstanceMask) -> f32 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;

        if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        }
    }

    /// Clears every pixel that is set in `claimed`.
    pub(crate) fn remove_pixels(&mut self, claimed: &BitSlice) {
        let contested = self
            .bits
            .iter_ones()
            .filter(|&index| claimed[index])
            .collect::<Vec<_>>();

        for index in contested {
            self.bits.set(index, false);
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox<usize>> {
        let mut min_x = usize::MAX;
        let mut min_y = usize::MAX;
        let mut max_x = 0;
        let mut max_y = 0;

        for index in self.bits.iter_ones() {
            let (x, y) = (index % self.width, index / self.width);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        if min_x == usize::MAX {
            return None;
        }

        Some(BoundingBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        })
    }

    /// Longest bounding-box side in pixels, zero for an empty mask.
    pub fn extent(&self) -> usize {
        self.bounding_box().map_or(0, |bbox| bbox.longest_side())
    }

    pub fn flip(&self, flip: Flip) -> Self {
        let (width, height) = self.get_size();
        match flip {
            Flip::Horizontal => Self::from_fn(width, height, |x, y| self.get(width - 1 - x, y)),
            Flip::Vertical => Self::from_fn(width, height, |x, y| self.get(x, height - 1 - y)),
        }
    }

    /// Resamples to `size` (`(width, height)`) and re-thresholds at one half,
    /// so the result stays binary.
    pub fn resize_to(&self, size: (usize, usize)) -> Result<Self> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(MaskError::EmptyTarget(width, height).into());
        }
        if self.get_size() == size {
            return Ok(self.clone());
        }

        let plane = resize_plane(self.to_plane().view(), (height, width));
        Ok(Self::from_plane(plane.view(), 0.5))
    }
}

pub fn resize_instances(
    instances: Vec<InstanceMask>,
    size: (usize, usize),
) -> Result<Vec<InstanceMask>> {
    instances
        .into_iter()
        .map(|instance| instance.resize_to(size))
        .collect()
}

/// Largest bounding-box side over all instances, zero when there are none.
pub fn max_extent<'a>(instances: impl IntoIterator<Item = &'a InstanceMask>) -> usize {
    instances
        .into_iter()
        .map(InstanceMask::extent)
        .max()
        .unwrap_or(0)
}

/// Splits a label map (`0` background, `k` the k-th object) into one mask per
/// label, ordered by label value. An all-background map has no instances.
pub fn instances_from_label_map(labels: ArrayView2<u32>) -> Vec<InstanceMask> {
    let (height, width) = labels.dim();
    let mut grouped: BTreeMap<u32, BitVec> = BTreeMap::new();

    for (index, &label) in labels.iter().enumerate() {
        if label == 0 {
            continue;
        }
        grouped
            .entry(label)
            .or_insert_with(|| bitvec![0; width * height])
            .set(index, true);
    }

    grouped
        .into_values()
        .map(|bits| InstanceMask {
            width,
            height,
            bits,
        })
        .collect()
}

pub trait ApplyMask {
    fn layering_mask(&mut self, mask: &InstanceMask, apply_color: [f32; 3]) -> Result<()>;
}

impl ApplyMask for Image {
    fn layering_mask(&mut self, mask: &InstanceMask, apply_color: [f32; 3]) -> Result<()> {
        if self.get_size() != mask.get_size() {
            return Err(MaskError::SizeMismatch(self.get_size(), mask.get_size()).into());
        }

        let channels = self.channels().min(3);
        let width = mask.get_width();
        let data = self.raw_data_mut();

        for index in mask.bits().iter_ones() {
            let (x, y) = (index % width, index / width);
            for channel in 0..channels {
                let value = &mut data[[y, x, channel]];
                *value = (*value + apply_color[channel]).min(1.0);
            }
        }

        Ok(())
    }
}

const PALETTE: [[f32; 3]; 6] = [
    [0.5, 0.0, 0.0],
    [0.0, 0.5, 0.0],
    [0.0, 0.0, 0.5],
    [0.5, 0.5, 0.0],
    [0.0, 0.5, 0.5],
    [0.5, 0.0, 0.5],
];

/// Copies `image` and tints each instance with a cycling palette colour.
pub fn visualize(image: &Image, instances: &[InstanceMask]) -> Result<Image> {
    let mut canvas = image.clone();
    for (index, instance) in instances.iter().enumerate() {
        canvas.layering_mask(instance, PALETTE[index % PALETTE.len()])?;
    }

    Ok(canvas)
}

#[test]
fn test_bounding_box_and_extent() {
    let mask = InstanceMask::from_fn(10, 8, |x, y| (2..5).contains(&x) && (1..7).contains(&y));
    let bbox = mask.bounding_box().unwrap();
    assert_eq!((bbox.x, bbox.y, bbox.width, bbox.height), (2, 1, 3, 6));
    assert_eq!(mask.extent(), 6);
    assert_eq!(mask.area(), 18);
    assert_eq!(InstanceMask::empty(4, 4).extent(), 0);
}

#[test]
fn test_flip_round_trips() {
    let mask = InstanceMask::from_fn(5, 3, |x, y| x == 0 && y == 2);
    let flipped = mask.flip(Flip::Horizontal);
    assert!(flipped.get(4, 2));
    assert_eq!(flipped.flip(Flip::Horizontal), mask);

    let flipped = mask.flip(Flip::Vertical);
    assert!(flipped.get(0, 0));
    assert_eq!(flipped.flip(Flip::Vertical), mask);
}

#[test]
fn test_resize_keeps_mask_binary_and_close() -> Result<()> {
    let mask = InstanceMask::from_fn(40, 40, |x, y| (10..30).contains(&x) && (10..30).contains(&y));

    let up = mask.resize_to((80, 80))?;
    assert_eq!(up.get_size(), (80, 80));
    assert!(up.area().abs_diff(1600) <= 80);

    let back = up.resize_to((40, 40))?;
    assert!(back.overlap(&mask) > 0.95);
    assert!(mask.resize_to((0, 3)).is_err());

    Ok(())
}

#[test]
fn test_label_map_split() {
    let labels = Array2::from_shape_vec((2, 3), vec![0, 2, 2, 1, 0, 2]).unwrap();
    let instances = instances_from_label_map(labels.view());
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].area(), 1);
    assert!(instances[0].get(0, 1));
    assert_eq!(instances[1].area(), 3);

    let background = Array2::<u32>::zeros((4, 4));
    assert!(instances_from_label_map(background.view()).is_empty());
}

#[test]
fn test_remove_pixels_clears_only_claimed() {
    let mut mask = InstanceMask::from_fn(4, 1, |_, _| true);
    let claimed = InstanceMask::from_fn(4, 1, |x, _| x < 2);
    mask.remove_pixels(claimed.bits());
    assert_eq!(mask.area(), 2);
    assert!(!mask.get(0, 0) && mask.get(3, 0));
}

#[test]
fn test_layering_mask_saturates() -> Result<()> {
    let mut image = Image::zeros((3, 3), 3)?;
    let mask = InstanceMask::from_fn(3, 3, |x, y| x == y);
    image.layering_mask(&mask, [0.75, 0.0, 0.0])?;
    image.layering_mask(&mask, [0.75, 0.0, 0.0])?;
    assert_eq!(image.raw_data()[[1, 1, 0]], 1.0);
    assert_eq!(image.raw_data()[[0, 1, 0]], 0.0);

    let wrong = InstanceMask::empty(2, 2);
    assert!(image.layering_mask(&wrong, [1.0; 3]).is_err());

    Ok(())
}

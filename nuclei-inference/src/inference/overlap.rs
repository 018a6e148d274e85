use crate::inference::Candidate;
use crate::InstanceMask;
use anyhow::Result;
use bitvec::prelude::*;
use log::debug;

/// Pixel-disjoint instances of one image with their parallel scores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalInstanceSet {
    instances: Vec<InstanceMask>,
    scores: Vec<f32>,
}

impl FinalInstanceSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[InstanceMask] {
        &self.instances
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InstanceMask, f32)> {
        self.instances.iter().zip(self.scores.iter().copied())
    }

    pub fn into_parts(self) -> (Vec<InstanceMask>, Vec<f32>) {
        (self.instances, self.scores)
    }
}

/// Assigns every contested pixel to the earliest candidate that claims it.
///
/// `ordered` is the NMS output, highest priority first. Candidates left with
/// no pixels are dropped along with their score. All masks must share a size.
pub fn remove_overlaps(ordered: Vec<Candidate>) -> Result<FinalInstanceSet> {
    let Some(first) = ordered.first() else {
        return Ok(FinalInstanceSet::empty());
    };
    for candidate in &ordered[1..] {
        first.mask.ensure_same_size(&candidate.mask)?;
    }

    let (width, height) = first.mask.get_size();
    let mut claimed = bitvec![0; width * height];
    let mut result = FinalInstanceSet::empty();
    let total = ordered.len();

    for Candidate { mut mask, score, .. } in ordered {
        mask.remove_pixels(&claimed);
        if mask.is_empty() {
            continue;
        }
        for index in mask.bits().iter_ones() {
            claimed.set(index, true);
        }

        result.instances.push(mask);
        result.scores.push(score);
    }

    if result.len() < total {
        debug!(
            "Overlap resolution dropped {} emptied instances",
            total - result.len()
        );
    }

    Ok(result)
}

#[cfg(test)]
use crate::inference::SourceTag;

#[cfg(test)]
fn candidate(mask: InstanceMask, score: f32, source: SourceTag) -> Candidate {
    Candidate {
        mask,
        score,
        source,
    }
}

#[test]
fn test_result_is_pixel_disjoint() -> Result<()> {
    let disc = |cx: f32, cy: f32, r: f32| {
        InstanceMask::from_fn(40, 40, move |x, y| {
            (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2) <= r * r
        })
    };
    let ordered = vec![
        candidate(disc(15.0, 15.0, 8.0), 0.9, SourceTag::Identity),
        candidate(disc(22.0, 15.0, 8.0), 0.8, SourceTag::Rescale),
        candidate(disc(18.0, 22.0, 8.0), 0.7, SourceTag::FlipVertical),
    ];
    let first_area = ordered[0].mask.area();

    let resolved = remove_overlaps(ordered)?;
    assert_eq!(resolved.len(), 3);
    assert_eq!(resolved.instances()[0].area(), first_area);
    assert_eq!(resolved.scores(), &[0.9, 0.8, 0.7]);

    for (i, a) in resolved.instances().iter().enumerate() {
        for b in &resolved.instances()[i + 1..] {
            assert_eq!(a.intersection(b), 0);
        }
    }

    Ok(())
}

#[test]
fn test_fully_covered_instance_is_dropped() -> Result<()> {
    let big = InstanceMask::from_fn(10, 10, |x, _| x < 6);
    let inner = InstanceMask::from_fn(10, 10, |x, y| x < 3 && y < 3);

    let resolved = remove_overlaps(vec![
        candidate(big, 0.9, SourceTag::Identity),
        candidate(inner, 0.4, SourceTag::FlipHorizontal),
    ])?;
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved.scores(), &[0.9]);

    assert!(remove_overlaps(Vec::new())?.is_empty());

    Ok(())
}

#[test]
fn test_mixed_mask_sizes_are_rejected() {
    let small = InstanceMask::from_fn(4, 4, |x, y| x < 2 && y < 2);
    let large = InstanceMask::from_fn(8, 8, |x, y| x >= 5 && y >= 5);

    let error = remove_overlaps(vec![
        candidate(small, 0.9, SourceTag::Identity),
        candidate(large, 0.8, SourceTag::Rescale),
    ])
    .unwrap_err();
    assert!(error.to_string().contains("mask sizes differ"));
}

use crate::inference::{Candidate, CandidatePool};
use anyhow::Result;

pub trait MaskNms {
    /// Greedy suppression by score. Returns accepted candidates in
    /// descending score order; equal scores keep their original order.
    fn non_maximum_suppression(self, iou_threshold: f32) -> Result<Vec<Candidate>>;
}

impl MaskNms for Vec<Candidate> {
    fn non_maximum_suppression(self, iou_threshold: f32) -> Result<Vec<Candidate>> {
        if let Some(first) = self.first() {
            for candidate in &self[1..] {
                first.mask.ensure_same_size(&candidate.mask)?;
            }
        }

        let mut remaining = self;
        // stable, so first-seen wins ties
        remaining.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut accepted: Vec<Candidate> = Vec::new();
        while !remaining.is_empty() {
            let best = remaining.remove(0);
            remaining.retain(|candidate| best.mask.overlap(&candidate.mask) < iou_threshold);
            accepted.push(best);
        }

        Ok(accepted)
    }
}

impl MaskNms for CandidatePool {
    fn non_maximum_suppression(self, iou_threshold: f32) -> Result<Vec<Candidate>> {
        self.into_inner().non_maximum_suppression(iou_threshold)
    }
}

#[cfg(test)]
use crate::{inference::SourceTag, InstanceMask};

#[cfg(test)]
fn bar(from: usize, to: usize, score: f32, source: SourceTag) -> Candidate {
    Candidate {
        mask: InstanceMask::from_fn(20, 4, |x, _| (from..to).contains(&x)),
        score,
        source,
    }
}

#[test]
fn test_duplicates_collapse_to_best() -> Result<()> {
    let pool = CandidatePool::from_iter([
        bar(0, 10, 0.6, SourceTag::Identity),
        bar(0, 10, 0.9, SourceTag::FlipHorizontal),
        bar(1, 10, 0.7, SourceTag::FlipVertical),
        bar(14, 20, 0.5, SourceTag::Rescale),
    ]);

    let kept = pool.non_maximum_suppression(0.3)?;
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].source, SourceTag::FlipHorizontal);
    assert_eq!(kept[1].source, SourceTag::Rescale);

    Ok(())
}

#[test]
fn test_equal_scores_keep_pool_order() -> Result<()> {
    let pool = CandidatePool::from_iter([
        bar(0, 10, 0.8, SourceTag::FlipVertical),
        bar(0, 10, 0.8, SourceTag::Identity),
    ]);

    let kept = pool.non_maximum_suppression(0.3)?;
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].source, SourceTag::FlipVertical);

    Ok(())
}

#[test]
fn test_partial_overlap_below_threshold_survives() -> Result<()> {
    // IoU of [0, 10) and [8, 18) is 2 / 18
    let kept = vec![
        bar(0, 10, 0.9, SourceTag::Identity),
        bar(8, 18, 0.8, SourceTag::Rescale),
    ]
    .non_maximum_suppression(0.3)?;
    assert_eq!(kept.len(), 2);

    assert!(Vec::<Candidate>::new().non_maximum_suppression(0.3)?.is_empty());

    Ok(())
}

use crate::inference::CandidatePool;
use crate::VotingConfig;
use anyhow::Result;
use log::debug;

/// Keeps candidates corroborated by enough of the pooled views.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VotingFilter {
    iou_threshold: f32,
    required_votes: usize,
}

impl VotingFilter {
    pub fn new(config: &VotingConfig, views: usize) -> Self {
        Self {
            iou_threshold: config.iou_threshold,
            required_votes: config.required_votes(views),
        }
    }

    pub fn required_votes(&self) -> usize {
        self.required_votes
    }

    /// Votes are counted self-inclusively: a candidate votes for itself and
    /// for every other candidate it overlaps above the IoU threshold.
    /// Survivors keep their pool order.
    pub fn filter(&self, pool: &CandidatePool) -> Result<CandidatePool> {
        pool.ensure_uniform_size()?;

        let candidates = pool.as_slice();
        let mut votes = vec![1usize; candidates.len()];
        for i in 0..candidates.len() {
            for j in i + 1..candidates.len() {
                if candidates[i].mask.overlap(&candidates[j].mask) > self.iou_threshold {
                    votes[i] += 1;
                    votes[j] += 1;
                }
            }
        }

        let voted = candidates
            .iter()
            .zip(votes)
            .filter(|(_, count)| *count >= self.required_votes)
            .map(|(candidate, _)| candidate.clone())
            .collect::<CandidatePool>();

        debug!(
            "Voting kept {}/{} candidates (need {} votes)",
            voted.len(),
            pool.len(),
            self.required_votes
        );

        Ok(voted)
    }
}

#[cfg(test)]
use crate::{inference::Candidate, inference::SourceTag, InstanceMask};

#[cfg(test)]
fn square(x: usize, y: usize, side: usize, source: SourceTag) -> Candidate {
    Candidate {
        mask: InstanceMask::from_fn(32, 32, |px, py| {
            (x..x + side).contains(&px) && (y..y + side).contains(&py)
        }),
        score: 0.9,
        source,
    }
}

#[test]
fn test_agreeing_views_are_kept() -> Result<()> {
    let pool = SourceTag::ALL
        .iter()
        .map(|&source| square(4, 4, 10, source))
        .collect::<CandidatePool>();
    let filter = VotingFilter::new(&VotingConfig::default(), SourceTag::ALL.len());

    assert_eq!(filter.required_votes(), 5);
    assert_eq!(filter.filter(&pool)?.len(), 6);

    Ok(())
}

#[test]
fn test_isolated_candidate_is_dropped() -> Result<()> {
    let mut pool = SourceTag::ALL[..5]
        .iter()
        .map(|&source| square(2, 2, 8, source))
        .collect::<CandidatePool>();
    pool.push(square(20, 20, 8, SourceTag::FlipVerticalRescale));

    let voted = VotingFilter::new(&VotingConfig::default(), 6).filter(&pool)?;
    assert_eq!(voted.len(), 5);
    assert_eq!(voted.count_from(SourceTag::FlipVerticalRescale), 0);

    Ok(())
}

#[test]
fn test_four_votes_are_not_enough() -> Result<()> {
    let pool = SourceTag::ALL[..4]
        .iter()
        .map(|&source| square(4, 4, 10, source))
        .collect::<CandidatePool>();

    let voted = VotingFilter::new(&VotingConfig::default(), 6).filter(&pool)?;
    assert!(voted.is_empty());

    Ok(())
}

#[test]
fn test_threshold_is_strict() -> Result<()> {
    // overlap equal to the threshold is not agreement
    let a = square(0, 0, 10, SourceTag::Identity);
    let b = square(5, 0, 10, SourceTag::FlipHorizontal);
    let overlap = a.mask.overlap(&b.mask);

    let config = VotingConfig {
        iou_threshold: overlap,
        min_votes: 2,
        reference_views: 2,
    };
    let pool = CandidatePool::from_iter([a, b]);
    assert!(VotingFilter::new(&config, 2).filter(&pool)?.is_empty());

    Ok(())
}

#[test]
fn test_mixed_sizes_are_rejected() {
    let mut pool = CandidatePool::new();
    pool.push(square(0, 0, 4, SourceTag::Identity));
    pool.push(Candidate {
        mask: InstanceMask::empty(16, 16),
        score: 0.5,
        source: SourceTag::Rescale,
    });

    assert!(VotingFilter::new(&VotingConfig::default(), 6)
        .filter(&pool)
        .is_err());
}

use crate::InstanceMask;
use anyhow::Result;
use std::fmt::{Display, Formatter};

pub mod evaluate;
pub mod multi_view;
pub mod nms;
pub mod overlap;
pub mod transform;
pub mod voting;

pub use evaluate::{ImageEvaluation, ImageEvaluator};
pub use multi_view::{MultiViewInference, MultiViewOutput};
pub use nms::MaskNms;
pub use overlap::{remove_overlaps, FinalInstanceSet};
pub use transform::{resize_target, Transform, TransformVariant};
pub use voting::VotingFilter;

/// Which transform variant produced a candidate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SourceTag {
    Identity = 1,
    FlipHorizontal = 2,
    FlipVertical = 3,
    Rescale = 4,
    FlipHorizontalRescale = 5,
    FlipVerticalRescale = 6,
}

impl SourceTag {
    /// Inference order of the multi-view pass.
    pub const ALL: [SourceTag; 6] = [
        SourceTag::Identity,
        SourceTag::FlipHorizontal,
        SourceTag::FlipVertical,
        SourceTag::Rescale,
        SourceTag::FlipHorizontalRescale,
        SourceTag::FlipVerticalRescale,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl Display for SourceTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceTag::Identity => write!(f, "identity"),
            SourceTag::FlipHorizontal => write!(f, "flip-h"),
            SourceTag::FlipVertical => write!(f, "flip-v"),
            SourceTag::Rescale => write!(f, "rescale"),
            SourceTag::FlipHorizontalRescale => write!(f, "flip-h+rescale"),
            SourceTag::FlipVerticalRescale => write!(f, "flip-v+rescale"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub mask: InstanceMask,
    pub score: f32,
    pub source: SourceTag,
}

/// Candidates of one image across all transform variants, in arrival order.
///
/// Only ever appended to; filtering builds a new pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePool {
    candidates: Vec<Candidate>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn count_from(&self, source: SourceTag) -> usize {
        self.candidates.iter().filter(|c| c.source == source).count()
    }

    /// Fails if candidates disagree on mask size.
    pub fn ensure_uniform_size(&self) -> Result<()> {
        if let Some(first) = self.candidates.first() {
            for candidate in &self.candidates[1..] {
                first.mask.ensure_same_size(&candidate.mask)?;
            }
        }

        Ok(())
    }

    pub fn into_inner(self) -> Vec<Candidate> {
        self.candidates
    }
}

impl Extend<Candidate> for CandidatePool {
    fn extend<T: IntoIterator<Item = Candidate>>(&mut self, iter: T) {
        self.candidates.extend(iter);
    }
}

impl FromIterator<Candidate> for CandidatePool {
    fn from_iter<T: IntoIterator<Item = Candidate>>(iter: T) -> Self {
        Self {
            candidates: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CandidatePool {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

#[test]
fn test_source_ids_follow_inference_order() {
    let ids = SourceTag::ALL.iter().map(|tag| tag.id()).collect::<Vec<_>>();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(SourceTag::FlipVerticalRescale.to_string(), "flip-v+rescale");
}

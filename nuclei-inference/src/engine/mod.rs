use crate::inference::{Candidate, SourceTag};
use crate::InstanceMask;
use anyhow::{ensure, Result};
use nuclei_media::Image;

pub mod session;

pub use session::SerialSession;

/// Raw result of one forward pass: masks at any resolution plus one
/// confidence per mask.
#[derive(Debug, Clone, Default)]
pub struct InferenceOutput {
    pub instances: Vec<InstanceMask>,
    pub scores: Vec<f32>,
}

impl InferenceOutput {
    pub fn new(instances: Vec<InstanceMask>, scores: Vec<f32>) -> Self {
        Self { instances, scores }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub(crate) fn into_candidates(self, source: SourceTag) -> Result<Vec<Candidate>> {
        ensure!(
            self.instances.len() == self.scores.len(),
            "network returned {} instances but {} scores",
            self.instances.len(),
            self.scores.len()
        );

        Ok(self
            .instances
            .into_iter()
            .zip(self.scores)
            .map(|(mask, score)| Candidate {
                mask,
                score,
                source,
            })
            .collect())
    }
}

/// The black-box segmentation network.
pub trait InstanceSegmentation {
    fn preprocess(&self, image: Image) -> Result<Image> {
        Ok(image)
    }

    fn inference(&self, image: &Image) -> Result<InferenceOutput>;
}

impl<T: InstanceSegmentation + ?Sized> InstanceSegmentation for Box<T> {
    fn preprocess(&self, image: Image) -> Result<Image> {
        (**self).preprocess(image)
    }

    fn inference(&self, image: &Image) -> Result<InferenceOutput> {
        (**self).inference(image)
    }
}

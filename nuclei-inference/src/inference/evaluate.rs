use crate::engine::InstanceSegmentation;
use crate::inference::{
    remove_overlaps, FinalInstanceSet, MaskNms, MultiViewInference, SourceTag, VotingFilter,
};
use crate::metric::{multiple_metric, ScoreReport};
use crate::utils::masks::resize_instances;
use crate::{InstanceMask, PipelineConfig};
use anyhow::Result;
use log::debug;
use nuclei_media::Image;

/// Outcome of the multi-view pipeline on one image.
#[derive(Debug, Clone)]
pub struct ImageEvaluation {
    pub instances: FinalInstanceSet,
    pub resize_target: f32,
    /// Pooled candidates before voting.
    pub candidates: usize,
    /// Candidates that survived voting.
    pub voted: usize,
    /// Present only when ground truth was supplied.
    pub report: Option<ScoreReport>,
}

impl ImageEvaluation {
    /// Mean score over the thresholds, zero without ground truth.
    pub fn score(&self) -> f64 {
        self.report.as_ref().map_or(0.0, |report| report.score)
    }
}

pub struct ImageEvaluator {
    config: PipelineConfig,
}

impl ImageEvaluator {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the whole pipeline on `image` and scores the result against
    /// `ground_truth` when given. Masks come back in the frame of the image
    /// as passed in, before any network preprocessing.
    pub fn evaluate<N: InstanceSegmentation + ?Sized>(
        &self,
        network: &N,
        image: Image,
        ground_truth: Option<&[InstanceMask]>,
    ) -> Result<ImageEvaluation> {
        let original_size = image.get_size();
        let image = network.preprocess(image)?;

        let output = MultiViewInference::new(&self.config.rescale).collect(
            network,
            &image,
            original_size,
        )?;
        let candidates = output.pool.len();

        let voted = VotingFilter::new(&self.config.voting, SourceTag::ALL.len())
            .filter(&output.pool)?;
        let voted_len = voted.len();

        let accepted = voted.non_maximum_suppression(self.config.nms.iou_threshold)?;
        let instances = remove_overlaps(accepted)?;

        debug!(
            "{} candidates, {} voted, {} final instances",
            candidates,
            voted_len,
            instances.len()
        );

        let report = match ground_truth {
            Some(ground_truth) => {
                let ground_truth = resize_instances(ground_truth.to_vec(), original_size)?;
                Some(self.score(instances.instances(), &ground_truth)?)
            }
            None => None,
        };

        Ok(ImageEvaluation {
            instances,
            resize_target: output.resize_target,
            candidates,
            voted: voted_len,
            report,
        })
    }

    /// Single identity pass without voting, the cheap path used while
    /// training. Masks are resized to `target_size` (`(width, height)`).
    pub fn infer_single<N: InstanceSegmentation + ?Sized>(
        &self,
        network: &N,
        image: Image,
        target_size: (usize, usize),
    ) -> Result<Vec<InstanceMask>> {
        let image = network.preprocess(image)?;
        let output = network.inference(&image)?;

        resize_instances(output.instances, target_size)
    }

    /// Both sides must already share a frame.
    pub fn score(
        &self,
        predictions: &[InstanceMask],
        ground_truth: &[InstanceMask],
    ) -> Result<ScoreReport> {
        let counts = multiple_metric(&self.config.thresholds, predictions, ground_truth)?;
        ScoreReport::new(&self.config.thresholds, &counts)
    }
}

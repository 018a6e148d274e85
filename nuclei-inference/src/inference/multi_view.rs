use crate::engine::InstanceSegmentation;
use crate::inference::transform::{resize_target, TransformVariant};
use crate::inference::{CandidatePool, SourceTag};
use crate::utils::masks::max_extent;
use crate::RescaleConfig;
use anyhow::Result;
use log::debug;
use nuclei_media::Image;

#[derive(Debug, Clone)]
pub struct MultiViewOutput {
    pub pool: CandidatePool,
    pub resize_target: f32,
}

/// Runs the network once per transform variant and pools every instance,
/// mapped back onto the source image, as a tagged candidate.
pub struct MultiViewInference<'a> {
    rescale: &'a RescaleConfig,
}

impl<'a> MultiViewInference<'a> {
    pub fn new(rescale: &'a RescaleConfig) -> Self {
        Self { rescale }
    }

    /// Six sequential inference calls in [`SourceTag::ALL`] order on the
    /// preprocessed `image`. Every candidate lands in `target_size`
    /// (`(width, height)`), the frame of the image before preprocessing, and
    /// the identity pass measured there decides the rescale factor.
    /// Inference errors abort the whole image.
    pub fn collect<N: InstanceSegmentation + ?Sized>(
        &self,
        network: &N,
        image: &Image,
        target_size: (usize, usize),
    ) -> Result<MultiViewOutput> {
        let mut pool = CandidatePool::new();

        let identity = TransformVariant::for_source(SourceTag::Identity, 1.0);
        self.infer_variant(network, image, &identity, target_size, &mut pool)?;

        let factor = resize_target(
            max_extent(pool.iter().map(|candidate| &candidate.mask)),
            target_size.0.min(target_size.1),
            self.rescale,
        );
        debug!(
            "Identity pass found {} instances on {}x{}, rescale factor {:.3}",
            pool.len(),
            target_size.0,
            target_size.1,
            factor
        );

        for source in &SourceTag::ALL[1..] {
            let variant = TransformVariant::for_source(*source, factor);
            self.infer_variant(network, image, &variant, target_size, &mut pool)?;
        }

        Ok(MultiViewOutput {
            pool,
            resize_target: factor,
        })
    }

    fn infer_variant<N: InstanceSegmentation + ?Sized>(
        &self,
        network: &N,
        image: &Image,
        variant: &TransformVariant,
        target_size: (usize, usize),
        pool: &mut CandidatePool,
    ) -> Result<()> {
        let transformed = variant.apply(image)?;
        let mut candidates = network
            .inference(&transformed)?
            .into_candidates(variant.source)?;

        for candidate in candidates.iter_mut() {
            candidate.mask = variant.invert_instance(&candidate.mask, target_size)?;
        }
        debug!("{}: {} candidates", variant.source, candidates.len());
        pool.extend(candidates);

        Ok(())
    }
}

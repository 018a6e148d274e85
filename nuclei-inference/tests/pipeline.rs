use anyhow::{bail, Result};
use ndarray::Array2;
use nuclei_inference::engine::{InferenceOutput, InstanceSegmentation, SerialSession};
use nuclei_inference::inference::{
    remove_overlaps, Candidate, CandidatePool, ImageEvaluator, MaskNms, MultiViewInference,
    SourceTag, VotingFilter,
};
use nuclei_inference::metric::{iou, multiple_metric};
use nuclei_inference::{InstanceMask, PipelineConfig, RescaleConfig, VotingConfig};
use nuclei_media::Image;

/// Reports every bright region of channel 0 as one instance.
struct Threshold {
    score: f32,
}

impl InstanceSegmentation for Threshold {
    fn inference(&self, image: &Image) -> Result<InferenceOutput> {
        let mask = InstanceMask::from_plane(image.plane(0), 0.5);
        if mask.is_empty() {
            return Ok(InferenceOutput::default());
        }

        Ok(InferenceOutput::new(vec![mask], vec![self.score]))
    }
}

/// Halves the image before segmenting it.
struct Downscaling(Threshold);

impl InstanceSegmentation for Downscaling {
    fn preprocess(&self, image: Image) -> Result<Image> {
        image.rescale(0.5)
    }

    fn inference(&self, image: &Image) -> Result<InferenceOutput> {
        self.0.inference(image)
    }
}

struct Broken;

impl InstanceSegmentation for Broken {
    fn inference(&self, _image: &Image) -> Result<InferenceOutput> {
        bail!("session lost")
    }
}

fn disc(size: usize, cx: f32, cy: f32, radius: f32) -> InstanceMask {
    InstanceMask::from_fn(size, size, |x, y| {
        (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2) <= radius * radius
    })
}

fn disc_image(size: usize, cx: f32, cy: f32, radius: f32) -> Result<Image> {
    Image::from_gray(disc(size, cx, cy, radius).to_plane())
}

#[test]
fn single_disc_survives_every_stage() -> Result<()> {
    let image = disc_image(256, 100.0, 140.0, 20.0)?;
    let truth = disc(256, 100.0, 140.0, 20.0);
    let network = SerialSession::new(Threshold { score: 0.9 });
    let config = PipelineConfig::default();

    let output =
        MultiViewInference::new(&config.rescale).collect(&network, &image, image.get_size())?;
    assert_eq!(output.pool.len(), 6);
    for source in SourceTag::ALL {
        assert_eq!(output.pool.count_from(source), 1);
    }
    assert!(output.resize_target > 1.9 && output.resize_target <= 2.0);
    for candidate in &output.pool {
        assert_eq!(candidate.mask.get_size(), (256, 256));
        assert!(iou(&candidate.mask, &truth)? > 0.9, "{}", candidate.source);
    }

    let voted = VotingFilter::new(&config.voting, 6).filter(&output.pool)?;
    assert_eq!(voted.len(), 6);

    let accepted = voted.non_maximum_suppression(config.nms.iou_threshold)?;
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].source, SourceTag::Identity);

    let resolved = remove_overlaps(accepted)?;
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved.instances()[0].area(), truth.area());

    let evaluation = ImageEvaluator::new(config).evaluate(&network, image, Some(&[truth][..]))?;
    assert_eq!(evaluation.candidates, 6);
    assert_eq!(evaluation.voted, 6);
    assert_eq!(evaluation.instances.len(), 1);
    let report = evaluation.report.as_ref().expect("ground truth was given");
    assert_eq!(report.score, 1.0);
    let first = &report.rows[0];
    assert_eq!(first.threshold, 0.5);
    assert_eq!(
        (first.true_positives, first.false_positives, first.false_negatives),
        (1, 0, 0)
    );

    Ok(())
}

#[test]
fn blank_image_scores_zero_without_error() -> Result<()> {
    let image = Image::zeros((64, 48), 1)?;
    let network = Threshold { score: 0.9 };
    let evaluator = ImageEvaluator::new(PipelineConfig::default());

    let evaluation = evaluator.evaluate(&network, image.clone(), None)?;
    assert!(evaluation.instances.is_empty());
    assert!(evaluation.report.is_none());
    assert_eq!(evaluation.score(), 0.0);
    assert_eq!(evaluation.resize_target, RescaleConfig::default().max_factor);

    let truth = InstanceMask::from_fn(64, 48, |x, y| x < 8 && y < 8);
    let evaluation = evaluator.evaluate(&network, image, Some(&[truth][..]))?;
    let report = evaluation.report.expect("ground truth was given");
    assert_eq!(report.score, 0.0);
    assert!(report.rows.iter().all(|row| row.false_negatives == 1));

    Ok(())
}

#[test]
fn ground_truth_is_brought_to_image_frame() -> Result<()> {
    let image = disc_image(128, 64.0, 64.0, 16.0)?;
    let half = disc(64, 32.0, 32.0, 8.0);

    let evaluation = ImageEvaluator::new(PipelineConfig::default()).evaluate(
        &Threshold { score: 0.7 },
        image,
        Some(&[half][..]),
    )?;
    assert_eq!(evaluation.instances.instances()[0].get_size(), (128, 128));
    assert!(evaluation.score() > 0.5);

    Ok(())
}

#[test]
fn downscaling_preprocess_pools_in_source_frame() -> Result<()> {
    let square = InstanceMask::from_fn(400, 400, |x, y| {
        (150..250).contains(&x) && (150..250).contains(&y)
    });
    let image = Image::from_gray(square.to_plane())?;
    let network = Downscaling(Threshold { score: 0.9 });
    let config = PipelineConfig::default();

    let preprocessed = network.preprocess(image.clone())?;
    assert_eq!(preprocessed.get_size(), (200, 200));

    // 80 / 100 measured in the 400 pixel frame, not 80 / 50
    let output =
        MultiViewInference::new(&config.rescale).collect(&network, &preprocessed, (400, 400))?;
    assert!((output.resize_target - 0.8).abs() < 1e-6, "{}", output.resize_target);
    assert_eq!(output.pool.len(), 6);
    assert!(output
        .pool
        .iter()
        .all(|candidate| candidate.mask.get_size() == (400, 400)));

    let evaluation = ImageEvaluator::new(config).evaluate(&network, image, Some(&[square][..]))?;
    assert!((evaluation.resize_target - 0.8).abs() < 1e-6);
    assert_eq!(evaluation.voted, 6);
    assert_eq!(evaluation.instances.len(), 1);
    assert_eq!(evaluation.instances.instances()[0].get_size(), (400, 400));
    assert_eq!(evaluation.score(), 1.0);

    Ok(())
}

#[test]
fn inference_failure_aborts_the_image() -> Result<()> {
    let image = Image::zeros((32, 32), 1)?;
    let result = ImageEvaluator::new(PipelineConfig::default()).evaluate(&Broken, image, None);
    assert!(result.is_err());

    Ok(())
}

#[test]
fn mismatched_network_output_is_an_error() -> Result<()> {
    struct Lopsided;
    impl InstanceSegmentation for Lopsided {
        fn inference(&self, image: &Image) -> Result<InferenceOutput> {
            let (width, height) = image.get_size();
            Ok(InferenceOutput::new(
                vec![InstanceMask::empty(width, height)],
                vec![0.1, 0.2],
            ))
        }
    }

    let image = Image::zeros((16, 16), 1)?;
    let config = RescaleConfig::default();
    assert!(MultiViewInference::new(&config)
        .collect(&Lopsided, &image, (16, 16))
        .is_err());

    Ok(())
}

#[test]
fn voting_never_keeps_isolated_candidates() -> Result<()> {
    // six views agree on one object, one view hallucinates another
    let mut pool = SourceTag::ALL
        .iter()
        .map(|&source| Candidate {
            mask: disc(64, 20.0, 20.0, 6.0),
            score: 0.8,
            source,
        })
        .collect::<CandidatePool>();
    pool.push(Candidate {
        mask: disc(64, 48.0, 48.0, 6.0),
        score: 0.99,
        source: SourceTag::Rescale,
    });

    for config in [
        VotingConfig::default(),
        VotingConfig {
            min_votes: 2,
            ..VotingConfig::default()
        },
    ] {
        let voted = VotingFilter::new(&config, 6).filter(&pool)?;
        assert!(voted
            .iter()
            .all(|candidate| candidate.mask.get(20, 20) && !candidate.mask.get(48, 48)));
    }

    Ok(())
}

#[test]
fn resolved_instances_are_pairwise_disjoint() -> Result<()> {
    let pool = (0..12)
        .map(|index| Candidate {
            mask: disc(
                96,
                20.0 + (index % 4) as f32 * 14.0,
                20.0 + (index / 4) as f32 * 14.0,
                11.0,
            ),
            score: 1.0 - index as f32 * 0.05,
            source: SourceTag::ALL[index % 6],
        })
        .collect::<CandidatePool>();

    let resolved = remove_overlaps(pool.non_maximum_suppression(0.9)?)?;
    assert_eq!(resolved.len(), 12);

    let instances = resolved.instances();
    for i in 0..instances.len() {
        for j in i + 1..instances.len() {
            assert_eq!(iou(&instances[i], &instances[j])?, 0.0);
        }
    }

    Ok(())
}

#[test]
fn metric_handles_empty_sides() -> Result<()> {
    let thresholds = [0.5, 0.75, 0.9];
    let some = vec![disc(32, 10.0, 10.0, 4.0), disc(32, 22.0, 22.0, 4.0)];

    let counts = multiple_metric(&thresholds, &some, &[])?;
    assert_eq!(counts.false_positives.to_vec(), vec![2, 2, 2]);
    assert_eq!(counts.score(), 0.0);

    let counts = multiple_metric(&thresholds, &[], &some)?;
    assert_eq!(counts.false_negatives.to_vec(), vec![2, 2, 2]);
    assert_eq!(counts.score(), 0.0);

    let counts = multiple_metric(&thresholds, &[], &[])?;
    assert_eq!(counts.score(), 0.0);

    Ok(())
}

#[test]
fn label_map_ground_truth_scores_like_masks() -> Result<()> {
    let mut labels = Array2::<u32>::zeros((32, 32));
    for y in 2..10 {
        for x in 2..10 {
            labels[[y, x]] = 1;
        }
    }
    for y in 20..28 {
        for x in 18..30 {
            labels[[y, x]] = 2;
        }
    }

    let truth = nuclei_inference::utils::masks::instances_from_label_map(labels.view());
    assert_eq!(truth.len(), 2);

    let counts = multiple_metric(&[0.5], &truth[..1], &truth)?;
    assert_eq!(counts.true_positives[0], 1);
    assert_eq!(counts.false_negatives[0], 1);
    assert_eq!(counts.score(), 0.5);

    Ok(())
}

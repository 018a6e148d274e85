use crate::engine::{InferenceOutput, InstanceSegmentation};
use anyhow::Result;
use log::debug;
use nuclei_media::Image;
use parking_lot::Mutex;
use std::ops::Deref;

/// Owns a network and lets at most one caller run it at a time.
pub struct SerialSession<N> {
    network: Mutex<N>,
}

impl<N> Deref for SerialSession<N> {
    type Target = Mutex<N>;

    fn deref(&self) -> &Self::Target {
        &self.network
    }
}

impl<N> SerialSession<N> {
    pub fn new(network: N) -> Self {
        Self {
            network: Mutex::new(network),
        }
    }

    pub fn get_mut(&mut self) -> &mut N {
        self.network.get_mut()
    }

    pub fn into_inner(self) -> N {
        self.network.into_inner()
    }
}

impl<N: InstanceSegmentation> InstanceSegmentation for SerialSession<N> {
    fn preprocess(&self, image: Image) -> Result<Image> {
        self.network.lock().preprocess(image)
    }

    fn inference(&self, image: &Image) -> Result<InferenceOutput> {
        let network = self.network.lock();
        debug!(
            "Running inference on {}x{} image",
            image.get_width(),
            image.get_height()
        );
        network.inference(image)
    }
}

#[test]
fn test_session_forwards_to_network() -> Result<()> {
    use crate::InstanceMask;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);
    impl InstanceSegmentation for Counting {
        fn inference(&self, image: &Image) -> Result<InferenceOutput> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let (width, height) = image.get_size();
            Ok(InferenceOutput::new(
                vec![InstanceMask::empty(width, height)],
                vec![0.5],
            ))
        }
    }

    let session = SerialSession::new(Counting(AtomicUsize::new(0)));
    let image = Image::zeros((4, 4), 1)?;
    assert_eq!(session.inference(&image)?.len(), 1);
    assert_eq!(session.inference(&image)?.len(), 1);
    assert_eq!(session.into_inner().0.load(Ordering::SeqCst), 2);

    Ok(())
}

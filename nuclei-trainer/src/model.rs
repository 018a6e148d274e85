use crate::error::TrainError;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Network architectures a [`NetworkFactory`](crate::ports::NetworkFactory)
/// may be asked to build.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Basic,
    SimpleUnet,
    Unet,
    DeepLabV3p,
    SimpleFusion,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Basic,
        ModelKind::SimpleUnet,
        ModelKind::Unet,
        ModelKind::DeepLabV3p,
        ModelKind::SimpleFusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Basic => "basic",
            ModelKind::SimpleUnet => "simple_unet",
            ModelKind::Unet => "unet",
            ModelKind::DeepLabV3p => "deeplabv3p",
            ModelKind::SimpleFusion => "simple_fusion",
        }
    }
}

impl FromStr for ModelKind {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TrainError::Configuration(format!("model name({s}) is not valid")))
    }
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[test]
fn test_model_names() {
    for kind in ModelKind::ALL {
        assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
    }

    let error = "resnet".parse::<ModelKind>().unwrap_err();
    assert!(matches!(error, TrainError::Configuration(_)));
    assert_eq!(error.to_string(), "invalid configuration: model name(resnet) is not valid");
}

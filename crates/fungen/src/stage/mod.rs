pub mod optical_flow;
pub mod progress;
pub mod replay;
pub mod scene;

pub use optical_flow::{Stage3Config, Stage3OpticalFlowProcessor, Stage3Output};
pub use replay::{CachedDetection, OverlayReplaySegmentation};
pub use scene::{LumaSceneDetector, SceneDetector};

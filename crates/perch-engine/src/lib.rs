pub mod capture;
pub mod gate;
pub mod inject;
pub mod locate;
pub mod ollama;
pub mod screen;

pub use capture::{
    encode_file_base64, encode_png_base64, CaptureOutcome, CapturePipeline, RegionCapture,
};
pub use gate::ChangeGate;
pub use locate::{locate_region, CaptureError, CaptureRegion, Marker, MarkerRole, MatchSet};
pub use ollama::OllamaClient;

mod preprocess;
mod sam;
pub mod types;

pub use preprocess::{Letterbox, Preprocessor};
pub use sam::{Sam2, SAM_INPUT_SIZE, SAM_MASK_SIZE};
pub use types::{
    ImageTensor, MaskTensor, PointLabel, PointPrompt, PriorMask, SegmentationModel,
};

use crate::assets::ModelAsset;
use crate::inference::{Backend, OrtSessionFactory, SessionManager};

/// Build the default model (SAM2) from downloaded encoder/decoder binaries
///
/// Each network gets its own session and may land on a different backend.
/// Returns `None` unless both sessions could be created.
pub fn create_default_model(
    sessions: &SessionManager<OrtSessionFactory>,
    encoder: &ModelAsset,
    decoder: &ModelAsset,
) -> Option<(Sam2, Backend)> {
    let (encoder, backend) = sessions.create_session(encoder)?;
    let (decoder, decoder_backend) = sessions.create_session(decoder)?;
    if decoder_backend != backend {
        tracing::info!("Encoder on {}, decoder on {}", backend, decoder_backend);
    }
    Some((Sam2::new(encoder, decoder), backend))
}

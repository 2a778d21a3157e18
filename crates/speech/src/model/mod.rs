use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "vosk")]
pub mod vosk;
#[cfg(feature = "vosk")]
pub use self::vosk::VoskModelLoader;

/// One step of feeding audio into an utterance decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeStep {
    /// Nothing new to report yet.
    Buffering,
    /// The interim hypothesis changed.
    Partial(String),
    /// End of utterance detected, with the final hypothesis.
    Final(String),
}

/// Streaming decoder for a single utterance. Owned by one session at a
/// time; never shared.
pub trait UtteranceDecoder: Send {
    /// Feeds one frame of mono PCM16 audio.
    fn accept_frame(&mut self, frame: &[i16]) -> anyhow::Result<DecodeStep>;

    /// Flushes at end of input. Returns the final hypothesis if the
    /// decoder recognized anything since the last final.
    fn finalize(&mut self) -> anyhow::Result<Option<String>>;
}

/// A loaded acoustic model. Long-lived: outlives individual sessions
/// and is only dropped when the orchestrator is destroyed.
pub trait AcousticModel: Send + Sync {
    /// Creates a decoder for one utterance at the given capture rate.
    fn create_decoder(&self, sample_rate: u32) -> anyhow::Result<Box<dyn UtteranceDecoder>>;
}

/// Loads an acoustic model from an extracted directory. Invoked on a
/// blocking task; may take seconds on large models.
pub trait ModelLoader: Send + Sync {
    fn load(&self, dir: &Path) -> anyhow::Result<Arc<dyn AcousticModel>>;
}

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::{debug, info};
use vosk::{DecodingState, Model, Recognizer};

use super::{AcousticModel, DecodeStep, ModelLoader, UtteranceDecoder};

/// Loads Vosk models from their extracted directory.
///
/// Decoding is one-best: recognizers run without alternatives, so every
/// hypothesis set the offline backend emits has exactly one entry.
#[derive(Debug, Default)]
pub struct VoskModelLoader;

impl ModelLoader for VoskModelLoader {
    fn load(&self, dir: &Path) -> anyhow::Result<Arc<dyn AcousticModel>> {
        let path = dir
            .to_str()
            .ok_or_else(|| anyhow!("model path is not valid UTF-8: {}", dir.display()))?;
        let model = Model::new(path)
            .ok_or_else(|| anyhow!("libvosk could not load the model at {}", dir.display()))?;
        info!(dir = %dir.display(), "Loaded vosk model");
        Ok(Arc::new(VoskModel {
            model: Arc::new(model),
        }))
    }
}

struct VoskModel {
    model: Arc<Model>,
}

impl AcousticModel for VoskModel {
    fn create_decoder(&self, sample_rate: u32) -> anyhow::Result<Box<dyn UtteranceDecoder>> {
        let recognizer = Recognizer::new(&self.model, sample_rate as f32)
            .ok_or_else(|| anyhow!("libvosk could not create a recognizer"))?;
        debug!(sample_rate, "Created vosk recognizer");
        Ok(Box::new(VoskDecoder {
            recognizer,
            // The recognizer points into the model; keep it alive for as
            // long as this decoder exists.
            _model: self.model.clone(),
            last_partial: String::new(),
        }))
    }
}

struct VoskDecoder {
    recognizer: Recognizer,
    _model: Arc<Model>,
    last_partial: String,
}

impl UtteranceDecoder for VoskDecoder {
    fn accept_frame(&mut self, frame: &[i16]) -> anyhow::Result<DecodeStep> {
        let state = self
            .recognizer
            .accept_waveform(frame)
            .context("recognizer rejected audio frame")?;
        match state {
            DecodingState::Running => {
                let partial = self.recognizer.partial_result().partial.to_string();
                if partial.is_empty() || partial == self.last_partial {
                    Ok(DecodeStep::Buffering)
                } else {
                    self.last_partial = partial.clone();
                    Ok(DecodeStep::Partial(partial))
                }
            }
            DecodingState::Finalized => {
                self.last_partial.clear();
                let text = self
                    .recognizer
                    .result()
                    .single()
                    .map(|r| r.text.to_string())
                    .unwrap_or_default();
                Ok(DecodeStep::Final(text))
            }
            DecodingState::Failed => Err(anyhow!("vosk decoding failed")),
        }
    }

    fn finalize(&mut self) -> anyhow::Result<Option<String>> {
        self.last_partial.clear();
        let text = self
            .recognizer
            .final_result()
            .single()
            .map(|r| r.text.to_string())
            .unwrap_or_default();
        if text.is_empty() { Ok(None) } else { Ok(Some(text)) }
    }
}

pub mod backend;
pub mod error;
pub mod events;
pub mod model;
pub mod platform;
pub mod provision;
pub mod recognizer;
pub mod selector;
pub mod session;

pub use backend::{BackendEvent, BackendKind, RecognitionBackend};
pub use error::{
    ErrorCode, ProvisionError, RecognitionError, RecognitionErrorKind, SpeechError, StartError,
};
pub use events::SpeechEvent;
pub use hearsay_config::SpeechSettings;
pub use provision::{ModelProvisioner, ReadyState};
pub use recognizer::{SpeechRecognizer, SpeechRecognizerBuilder};
pub use selector::BackendSelector;
pub use session::{SessionController, SessionLink, SessionPhase};

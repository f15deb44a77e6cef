use crate::config::ConfigError;

/// Errors reported synchronously to the application.
///
/// Everything that goes wrong inside the background pipelines (undecodable frames,
/// missing acknowledgments, transceiver hiccups) is logged and never shows up here.
#[derive(thiserror::Error, Debug)]
pub enum RadioError {
    #[error("Radio is not ready. Context: {}", .context)]
    NotReady { context: String },

    #[error("Invalid radio configuration.")]
    Config(#[from] ConfigError),

    #[error("Transceiver failed to initialize. Context: {}", .context)]
    Transceiver { context: String },

    #[error("Failed to spawn a radio worker.")]
    Spawn(#[from] std::io::Error),
}

impl RadioError {
    pub(crate) fn off_for_sending() -> Self {
        RadioError::NotReady {
            context: "radio is off, turn it on before sending a message".to_owned(),
        }
    }

    pub(crate) fn off_for_receiving() -> Self {
        RadioError::NotReady {
            context: "radio is off and receiver queue is empty, turn it on before receiving a message"
                .to_owned(),
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, RadioError::NotReady { .. })
    }
}

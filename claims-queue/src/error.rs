use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClaimsError {
    #[error("Claims API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Claims API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Claims API reported failure: {0}")]
    Api(String),

    #[error("Invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClaimsError {
    /// Text surfaced to operators in the error banner and notifications.
    pub fn user_message(&self) -> String {
        match self {
            ClaimsError::Transport(e) if e.is_timeout() => {
                "The claims service did not respond in time".to_string()
            }
            ClaimsError::Transport(e) if e.is_connect() => {
                "Unable to reach the claims service".to_string()
            }
            ClaimsError::Transport(_) => "Network error while contacting the claims service".to_string(),
            ClaimsError::Status { status, message } if message.is_empty() => {
                format!("Claims service responded with HTTP {}", status)
            }
            ClaimsError::Status { status, message } => {
                format!("Claims service responded with HTTP {}: {}", status, message)
            }
            ClaimsError::Api(message) => message.clone(),
            ClaimsError::Decode(_) => "Unexpected response from the claims service".to_string(),
            ClaimsError::Config(message) => format!("Configuration error: {}", message),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClaimsError>;

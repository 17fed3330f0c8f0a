/// Core error type for the bot.
///
/// Adapter crates map their transport errors into `External`; the core
/// components translate those into the user-facing variants below before
/// anything crosses the `AccessGate`/`SyncEngine` boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("subscription source unavailable: {0}")]
    SyncUnavailable(String),

    #[error("not entitled to {channel}")]
    NotEntitled { channel: String },

    #[error("invite limit of {limit} per day reached")]
    RateLimitExceeded { limit: u32 },

    #[error("invite creation failed: {0}")]
    InviteCreationFailed(String),

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),
}

impl Error {
    /// Plain-text explanation for errors the user is allowed to see.
    ///
    /// Internal failures collapse into a generic "try again later".
    pub fn user_message(&self) -> String {
        match self {
            Error::NotEntitled { channel } => {
                format!("⚠️ You don't have an active {channel} subscription.")
            }
            Error::RateLimitExceeded { limit } => {
                format!("⚠️ Daily invite limit reached ({limit} links per day). Try again tomorrow.")
            }
            Error::InviteCreationFailed(_) => {
                "⚠️ Could not create an invite link. Please try again later.".to_string()
            }
            Error::Validation(msg) => format!("⚠️ {msg}"),
            Error::UnknownUser(_) => {
                "⚠️ Please register first with /start and share your phone number.".to_string()
            }
            _ => "⚠️ Something went wrong. Please try again later.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

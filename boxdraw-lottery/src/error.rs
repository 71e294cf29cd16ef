use boxdraw_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LotteryError>;

#[derive(Error, Debug)]
pub enum LotteryError {
    #[error("Channel is full ({max_users} users)")]
    CapacityExceeded { max_users: u32 },

    #[error("Box {0} is not available")]
    BoxUnavailable(u32),

    #[error("Already holding box {box_index}")]
    AlreadySelected { box_index: u32 },

    #[error("Channel is not open for selections")]
    ChannelNotOpen,

    #[error("Only the channel admin can do that")]
    Unauthorized,

    #[error("No boxes have been selected")]
    NoSelections,

    #[error("Not a member of this channel: {0}")]
    NotAMember(String),

    #[error("Channel name cannot be empty")]
    InvalidName,

    #[error("Capacity {requested} outside allowed range {min}-{max}")]
    InvalidCapacity { requested: u32, min: u32, max: u32 },

    #[error("Box selections changed while the draw was settling")]
    SelectionsChanged,

    #[error("Draw was cancelled before it committed")]
    DrawCancelled,

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Store write failed: {0}")]
    StoreWriteFailure(String),

    #[error("Core error: {0}")]
    Core(CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LotteryError {
    /// Typed rejections: checked locally, nothing was written.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. }
                | Self::BoxUnavailable(_)
                | Self::AlreadySelected { .. }
                | Self::ChannelNotOpen
                | Self::Unauthorized
                | Self::NoSelections
                | Self::NotAMember(_)
                | Self::InvalidName
                | Self::InvalidCapacity { .. }
        )
    }
}

impl From<CoreError> for LotteryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ChannelNotFound(id) => Self::ChannelNotFound(id),
            CoreError::StoreWriteFailure(msg) => Self::StoreWriteFailure(msg),
            CoreError::VersionConflict { expected, actual } => Self::StoreWriteFailure(format!(
                "version conflict: expected {}, found {}",
                expected, actual
            )),
            other => Self::Core(other),
        }
    }
}

impl From<tokio::task::JoinError> for LotteryError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("draw task failed: {}", err))
    }
}

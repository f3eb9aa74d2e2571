use thiserror::Error as ThisError;

use crate::{AllocationError, Ticker, ValuationError};

/// Failure taxonomy for game operations. `kind` is the stable machine-readable
/// discriminant clients switch on; the display text is for humans and may
/// change.
#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum GameError {
    #[error("missing or invalid credentials")]
    Unauthorized,
    #[error("unsupported game duration (got={got} days, supported: 30, 60, 90)")]
    InvalidDuration { got: u32 },
    #[error("invalid allocation: {0}")]
    InvalidAllocation(#[from] AllocationError),
    #[error("no price snapshot available; retry later")]
    PriceUnavailable,
    #[error("no price data; settlement skipped")]
    NoPriceData,
    #[error("could not find an unused game code after {attempts} attempts")]
    CodeGenerationExhausted { attempts: u32 },
    #[error("game not found")]
    GameNotFound,
    #[error("already joined this game")]
    AlreadyJoined,
    #[error("cannot join your own game")]
    CannotJoinOwnGame,
    #[error("no entry price for {ticker}")]
    MissingEntryPrice { ticker: Ticker },
    #[error("no current price for {ticker}")]
    MissingCurrentPrice { ticker: Ticker },
    #[error("temporarily unavailable; retry later")]
    TemporarilyUnavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::InvalidDuration { .. } => "InvalidDuration",
            Self::InvalidAllocation(_) => "InvalidAllocation",
            Self::PriceUnavailable => "PriceUnavailable",
            Self::NoPriceData => "NoPriceData",
            Self::CodeGenerationExhausted { .. } => "CodeGenerationExhausted",
            Self::GameNotFound => "GameNotFound",
            Self::AlreadyJoined => "AlreadyJoined",
            Self::CannotJoinOwnGame => "CannotJoinOwnGame",
            Self::MissingEntryPrice { .. } => "MissingEntryPrice",
            Self::MissingCurrentPrice { .. } => "MissingCurrentPrice",
            Self::TemporarilyUnavailable => "TemporarilyUnavailable",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether the caller should retry the identical request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PriceUnavailable
                | Self::NoPriceData
                | Self::CodeGenerationExhausted { .. }
                | Self::TemporarilyUnavailable
        )
    }
}

impl From<ValuationError> for GameError {
    fn from(err: ValuationError) -> Self {
        match err {
            ValuationError::MissingEntryPrice { ticker } => Self::MissingEntryPrice { ticker },
            ValuationError::MissingCurrentPrice { ticker } => Self::MissingCurrentPrice { ticker },
        }
    }
}

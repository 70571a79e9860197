// ⚠️ Error taxonomy for the auction core
//
// Every Identity Store, Sale Ledger and Coordinator operation returns one of
// these. The HTTP layer maps them onto status codes; the core never retries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuctionError {
    /// Missing or malformed required fields (user-correctable)
    #[error("{0}")]
    Validation(String),

    /// Conflicting registration (same leader, mobile, team name, serial)
    #[error("{0}")]
    Duplicate(String),

    /// A ledger entry already exists for this player
    #[error("Player is already sold")]
    AlreadySold { player_id: String },

    /// Sale would push the team past its max amount
    #[error("Sale of {amount} exceeds remaining budget of {remaining} for team {team_id}")]
    BudgetExceeded {
        team_id: String,
        amount: f64,
        remaining: f64,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Persistence or object-storage failure (retryable by the caller)
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AuctionError>;

impl AuctionError {
    pub fn validation(message: impl Into<String>) -> Self {
        AuctionError::Validation(message.into())
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        AuctionError::Duplicate(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AuctionError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Storage failures may succeed on a second attempt; nothing else will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuctionError::Storage(_))
    }

    /// Conflicts and bad input that the caller can fix
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AuctionError::Validation(_)
                | AuctionError::Duplicate(_)
                | AuctionError::AlreadySold { .. }
                | AuctionError::BudgetExceeded { .. }
        )
    }
}

impl From<rusqlite::Error> for AuctionError {
    fn from(err: rusqlite::Error) -> Self {
        AuctionError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuctionError {
    fn from(err: serde_json::Error) -> Self {
        AuctionError::Internal(err.into())
    }
}

/// True when a SQLite failure is a UNIQUE/constraint violation.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

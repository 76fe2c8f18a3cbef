//! Simulation kernel error types.

use thiserror::Error;

/// Result type alias for kernel operations.
pub type SimResult<T> = Result<T, SimError>;

/// Errors raised by the kernel. All of them abort a run: they signal a
/// configuration defect or a broken invariant, never a transient condition.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("movement '{movement}' from {from} ({from_kind}) to {to} ({to_kind}): kinds differ")]
    KindMismatch {
        movement: String,
        from: String,
        from_kind: String,
        to: String,
        to_kind: String,
    },

    #[error("stock {stock} stocks {expected}, cannot hold {found} entity '{entity}'")]
    EntityKindRejected {
        stock: String,
        expected: String,
        found: String,
        entity: String,
    },

    #[error("cannot remove from sink stock {0}")]
    RemoveFromSink(String),

    #[error("cannot remove from empty stock {0}")]
    RemoveFromEmpty(String),

    #[error("cannot add to source stock {0}")]
    AddToSource(String),

    #[error("cannot decorate source stock {0}")]
    DecorateSource(String),

    #[error("hook on stock {stock} failed: {message}")]
    Hook { stock: String, message: String },
}

impl SimError {
    /// Wrap a domain failure raised inside a stock hook.
    pub fn hook(stock: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SimError::Hook {
            stock: stock.into(),
            message: err.to_string(),
        }
    }
}

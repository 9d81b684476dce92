//! Non-fatal conditions. They never fail an operation; they are logged and
//! mirrored into the devlog sink so callers and tests can observe them.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    /// A version change waits for other connections to close.
    /// `requested_version` is `None` when the database is being deleted.
    #[error(
        "version change of '{database}' from v{current_version} \
         blocked by {open_connections} open connection(s)"
    )]
    Blocked {
        database: String,
        current_version: u32,
        requested_version: Option<u32>,
        open_connections: usize,
    },

    #[error("unknown operator '{operator}' on field '{field}'; filter never matches")]
    UnknownOperator { field: String, operator: String },
}

impl Warning {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "blocked",
            Self::UnknownOperator { .. } => "unknown_operator",
        }
    }
}

/// Reports a warning through the `log` facade and the devlog sink.
pub fn emit(warning: &Warning) {
    log::warn!("{warning}");
    crate::utils::devlog::record(&format!("warning[{}]: {warning}", warning.code()));
}

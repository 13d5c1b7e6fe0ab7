//! Error types for the settings controller and the snapshot store.

use std::{path::PathBuf, process::ExitStatus};

/// Errors raised while driving one of the external tools.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The tool binary does not exist or is not executable.
    #[error("`{tool}` was not found, check the `tools` section of the preferences")]
    ToolNotFound {
        /// The program that was invoked.
        tool: String,
    },

    /// The tool ran but exited unsuccessfully.
    #[error("`{tool}` exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The tool output could not be understood.
    #[error("unexpected output from `{tool}`: {output:?}")]
    UnexpectedOutput { tool: String, output: String },

    /// The tool could not be spawned for a reason other than a missing binary.
    #[error("failed to run `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// A keyboard backlight level outside 0-16 was requested.
    #[error("invalid backlight level {0} (expected 0-16)")]
    InvalidBacklightLevel(u8),

    /// The HTTP client used for the wireless probe could not be built.
    #[error("failed to build wireless probe client: {0}")]
    ProbeClient(#[from] reqwest::Error),
}

/// Errors raised by the snapshot store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("snapshot file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    /// The snapshot exists but cannot be read back, so there is nothing to restore from.
    #[error(
        "snapshot file `{path}` is damaged ({reason}); exit without restoring or delete the file"
    )]
    DamagedSnapshot { path: PathBuf, reason: String },
}

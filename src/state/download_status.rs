/// Download status definitions for catalogued images
///
/// Every image record starts `Pending` and ends in `Completed` or `Failed`.
use std::fmt;

/// Represents the download state of an image record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStatus {
    // ===== Active States =====
    /// Record exists, no download attempted yet
    Pending,

    /// Download is in flight
    Downloading,

    // ===== Terminal States =====
    /// Bytes are on disk
    Completed,

    /// Download failed; the record carries the error message
    Failed,
}

impl DownloadStatus {
    /// Returns true if no further transition is expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if a later run may pick the record up again
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Pending | Self::Downloading)
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    ///
    /// Legal transitions:
    /// - `pending -> downloading`
    /// - `pending | downloading -> completed`
    /// - `pending | downloading -> failed`
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Downloading)
                | (Self::Pending | Self::Downloading, Self::Completed)
                | (Self::Pending | Self::Downloading, Self::Failed)
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Downloading,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

use thiserror::Error;

/// Failures surfaced by the preview pipeline.
///
/// Cancellation is deliberately absent: a superseded paint is reported as a
/// distinguished [`RenderOutcome`](crate::RenderOutcome) variant, never as an
/// error.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("document fetch failed: {message}")]
    Fetch {
        /// HTTP status when the transport produced one.
        status: Option<u16>,
        message: String,
    },

    #[error("rendering library not ready: {message}")]
    LibraryNotReady { message: String },

    #[error("document could not be parsed: {message}")]
    Parse { message: String },

    #[error("page {page_number} outside document range 1..={page_count}")]
    PageOutOfRange { page_number: u32, page_count: u32 },

    #[error("failed to render page {page_number}: {message}")]
    Render { page_number: u32, message: String },
}

impl PreviewError {
    pub fn fetch(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Fetch {
            status,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Whether re-activating the same reference is a sensible recovery.
    ///
    /// Parse failures are terminal: the fetched content itself is invalid.
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Self::Fetch { .. } | Self::LibraryNotReady { .. } | Self::Render { .. } => true,
            Self::Parse { .. } | Self::PageOutOfRange { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_terminal() {
        assert!(!PreviewError::parse("garbage").retryable());
        assert!(PreviewError::fetch(Some(502), "bad gateway").retryable());
        assert!(PreviewError::LibraryNotReady {
            message: "timed out".into()
        }
        .retryable());
    }

    #[test]
    fn page_out_of_range_names_both_bounds() {
        let err = PreviewError::PageOutOfRange {
            page_number: 99,
            page_count: 10,
        };
        assert_eq!(err.to_string(), "page 99 outside document range 1..=10");
    }
}

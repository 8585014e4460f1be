use super::model::ImageRef;

/// Every failure placeholder starts with this, exactly once per failed image.
pub const FAILURE_MARKER_PREFIX: &str = "<<< recognition failed";

/// Recognized text, or an explicit placeholder, for one input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Recognized {
        /// Zero-based position in reading order.
        position: usize,
        source: ImageRef,
        text: String,
    },
    Failed {
        position: usize,
        source: ImageRef,
        attempts: u32,
        error: String,
    },
}

impl Fragment {
    pub fn recognized(position: usize, source: ImageRef, text: String) -> Self {
        Fragment::Recognized {
            position,
            source,
            text,
        }
    }

    pub fn failed(position: usize, source: ImageRef, attempts: u32, error: String) -> Self {
        Fragment::Failed {
            position,
            source,
            attempts,
            error,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            Fragment::Recognized { position, .. } | Fragment::Failed { position, .. } => *position,
        }
    }

    pub fn source(&self) -> &ImageRef {
        match self {
            Fragment::Recognized { source, .. } | Fragment::Failed { source, .. } => source,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Fragment::Failed { .. })
    }

    /// Text as it appears in an artifact. Failures render as a single marker
    /// line naming the 1-based position, the image and the last error.
    pub fn render(&self) -> String {
        match self {
            Fragment::Recognized { text, .. } => text.clone(),
            Fragment::Failed {
                position,
                source,
                attempts,
                error,
            } => format!(
                "{} for image {} ({}) after {} attempt(s): {} >>>",
                FAILURE_MARKER_PREFIX,
                position + 1,
                source.file_name(),
                attempts,
                single_line(error)
            ),
        }
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

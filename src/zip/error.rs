use thiserror::Error;

/// The archive is structurally broken: not a zip, truncated, or corrupt.
///
/// Errors of this type are the only archive failures the workflow treats
/// as an expected outcome. Everything else (I/O failures, unsupported
/// features) propagates.
#[derive(Debug, Error)]
#[error("not a valid ZIP file: {reason}")]
pub struct InvalidArchive {
    reason: String,
}

impl InvalidArchive {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

// Fixed-size records are decoded through a Cursor; running off the end of
// one means the record was cut short.
impl From<std::io::Error> for InvalidArchive {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("truncated record ({err})"))
    }
}

use std::fmt;

/// A job-terminal fault.
///
/// Data errors are absorbed inside the phase runner and never surface
/// here; everything that does surface unwinds the whole job.
#[derive(Debug)]
pub enum Fault {
    /// The failure has already been described to the event log. The
    /// carried string is a short description for process logs only.
    Logged(String),

    /// Anything else. The job exits through the "failed unexpectedly"
    /// surface, which events the detail before tearing down.
    Unexpected(anyhow::Error),
}

impl Fault {
    pub fn logged(description: impl Into<String>) -> Self {
        Fault::Logged(description.into())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Logged(description) => write!(f, "{description}"),
            Fault::Unexpected(err) => write!(f, "{err:#}"),
        }
    }
}

impl std::error::Error for Fault {}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        Fault::Unexpected(err)
    }
}

use std::io::Write;

use recast_core::session_id;

/// Per-invocation state handed to every component: where user-facing output
/// goes and the correlation id stamped on log records.
pub struct RunContext<'a> {
    pub session_id: String,
    pub out: &'a mut dyn Write,
}

impl<'a> RunContext<'a> {
    pub fn new(session_id: impl Into<String>, out: &'a mut dyn Write) -> Self {
        Self {
            session_id: session_id.into(),
            out,
        }
    }

    pub fn for_branch(branch: &str, out: &'a mut dyn Write) -> Self {
        Self::new(session_id(branch, chrono::Utc::now().timestamp()), out)
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("rewrite", session = %self.session_id)
    }
}

//! Classification of pipeline status responses for the polling engine.

use crate::poller::PollOutcome;

use super::{PipelineClientError, UnitStatus};

/// SIP id reported when a completed transfer was sent to backlog.
const BACKLOG: &str = "BACKLOG";

/// Classify a client error. Network trouble and 5xx are transient; anything
/// else is terminal.
pub fn classify_error<T>(context: &str, err: &PipelineClientError) -> PollOutcome<T> {
    let message = format!("error checking {} status: {}", context, err);
    match err {
        PipelineClientError::Timeout | PipelineClientError::Network(_) => {
            PollOutcome::Transient(message)
        }
        PipelineClientError::Http { status, .. } if *status >= 500 => {
            PollOutcome::Transient(message)
        }
        PipelineClientError::Http { .. }
        | PipelineClientError::Authentication
        | PipelineClientError::InvalidResponse(_) => PollOutcome::Terminal(message),
    }
}

/// Classify a transfer status response. Success carries the SIP id.
pub fn classify_transfer(
    result: Result<UnitStatus, PipelineClientError>,
) -> PollOutcome<String> {
    let status = match result {
        Ok(status) => status,
        Err(err) => return classify_error("transfer", &err),
    };

    match status.status.as_str() {
        "" => PollOutcome::Terminal("error checking transfer status: status is empty".to_string()),
        "PROCESSING" => PollOutcome::InProgress,
        // The pipeline may report completion before the SIP id is populated.
        "COMPLETE" if status.sip_id.is_empty() => PollOutcome::InProgress,
        "COMPLETE" if status.sip_id != BACKLOG => PollOutcome::Success(status.sip_id),
        other => PollOutcome::Terminal(format!(
            "error checking transfer status: transfer is in a state that we can't handle: {}",
            describe(other, &status)
        )),
    }
}

/// Classify an ingest status response.
pub fn classify_ingest(result: Result<UnitStatus, PipelineClientError>) -> PollOutcome<()> {
    let status = match result {
        Ok(status) => status,
        Err(err) => return classify_error("ingest", &err),
    };

    match status.status.as_str() {
        "" => PollOutcome::Terminal("error checking ingest status: status is empty".to_string()),
        "PROCESSING" => PollOutcome::InProgress,
        "COMPLETE" => PollOutcome::Success(()),
        other => PollOutcome::Terminal(format!(
            "error checking ingest status: ingest is in a state that we can't handle: {}",
            describe(other, &status)
        )),
    }
}

fn describe(state: &str, status: &UnitStatus) -> String {
    if status.sip_id == BACKLOG {
        format!("{} (backlog)", state)
    } else {
        state.to_string()
    }
}

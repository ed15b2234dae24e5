use serde::de::DeserializeOwned;

/// Prefix marking a protocol event line.
pub const EVENT_LINE_PREFIX: &str = "data:";

/// Why a line produced no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkippedLine {
    /// Blank lines, SSE comments, `event:`/`id:` fields and other non-event text.
    NotAnEvent,
    /// An event line whose payload did not parse as a known event.
    Malformed(String),
}

/// Decodes one framed line into a typed event.
///
/// Skipped lines are never fatal: one bad frame must not end a long-lived stream.
pub fn decode_event_line<E: DeserializeOwned>(line: &str) -> Result<E, SkippedLine> {
    let Some(payload) = line.trim_start().strip_prefix(EVENT_LINE_PREFIX) else {
        return Err(SkippedLine::NotAnEvent);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(SkippedLine::Malformed("empty event payload".to_string()));
    }
    serde_json::from_str(payload).map_err(|error| SkippedLine::Malformed(error.to_string()))
}

/// Lenient decode that logs and drops anything that is not a valid event.
pub fn decode_event<E: DeserializeOwned>(protocol: &'static str, line: &str) -> Option<E> {
    match decode_event_line(line) {
        Ok(event) => Some(event),
        Err(SkippedLine::NotAnEvent) => None,
        Err(SkippedLine::Malformed(reason)) => {
            tracing::debug!(protocol, reason = reason.as_str(), "dropping malformed event line");
            None
        }
    }
}

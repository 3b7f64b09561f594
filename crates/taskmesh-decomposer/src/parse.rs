use serde::Deserialize;
use std::collections::HashSet;
use taskmesh_core::{channel_type, CandidateSubtask};

/// Why oracle output could not be turned into a subtask list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Nothing resembling a JSON object was found.
    #[error("no JSON object found in oracle output")]
    NoJson,
    /// A JSON object was found but does not have the expected shape.
    #[error("invalid decomposition JSON: {0}")]
    InvalidJson(String),
    /// The subtask list is empty.
    #[error("decomposition contains no subtasks")]
    Empty,
    /// Two subtasks share an id.
    #[error("duplicate subtask id {0}")]
    DuplicateId(u32),
    /// A subtask has no target channel.
    #[error("subtask {0} has an empty channel")]
    EmptyChannel(u32),
}

#[derive(Deserialize)]
struct DecompositionDoc {
    subtasks: Vec<CandidateSubtask>,
}

/// Parses oracle output into validated candidate subtasks.
///
/// Accepts a fenced ```` ```json ```` block (closing fence optional), a bare fence,
/// plain JSON, or a JSON object embedded in prose. Channels are normalized to bare
/// agent types.
pub fn parse_decomposition(raw: &str) -> Result<Vec<CandidateSubtask>, ParseError> {
    let mut last_error = ParseError::NoJson;
    let mut doc = None;

    for candidate in json_candidates(raw) {
        match serde_json::from_str::<DecompositionDoc>(candidate) {
            Ok(parsed) => {
                doc = Some(parsed);
                break;
            }
            Err(e) => last_error = ParseError::InvalidJson(e.to_string()),
        }
    }

    let doc = doc.ok_or(last_error)?;
    validate(doc.subtasks)
}

fn validate(mut subtasks: Vec<CandidateSubtask>) -> Result<Vec<CandidateSubtask>, ParseError> {
    if subtasks.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut seen = HashSet::new();
    for subtask in &mut subtasks {
        if !seen.insert(subtask.id) {
            return Err(ParseError::DuplicateId(subtask.id));
        }
        let bare = channel_type(&subtask.channel).to_string();
        if bare.is_empty() {
            return Err(ParseError::EmptyChannel(subtask.id));
        }
        subtask.channel = bare;
    }
    Ok(subtasks)
}

/// Slices of `raw` worth trying as JSON, most specific first.
fn json_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = Vec::new();

    if let Some(block) = fenced_block(raw, "```json").or_else(|| fenced_block(raw, "```")) {
        candidates.push(block);
    }

    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        candidates.push(trimmed);
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            candidates.push(&raw[start..=end]);
        }
    }

    candidates
}

fn fenced_block<'a>(raw: &'a str, fence: &str) -> Option<&'a str> {
    let start = raw.find(fence)? + fence.len();
    let rest = &raw[start..];
    let body = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    let body = body.trim();
    (!body.is_empty()).then_some(body)
}

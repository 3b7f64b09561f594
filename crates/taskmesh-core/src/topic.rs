/// Topic on which agents report resolved chains.
pub const COMPLETED_TOPIC: &str = "tasks/completed";

const CHANNEL_PREFIX: &str = "tasks/";

/// Request topic for an agent type, e.g. `tasks/code/request`.
pub fn request_topic(agent_type: &str) -> String {
    format!("{CHANNEL_PREFIX}{agent_type}/request")
}

/// Retained reputation topic for an agent type, e.g. `tasks/code/reputation`.
pub fn reputation_topic(agent_type: &str) -> String {
    format!("{CHANNEL_PREFIX}{agent_type}/reputation")
}

/// The completion topic.
pub fn completed_topic() -> &'static str {
    COMPLETED_TOPIC
}

/// Normalize a channel name to its bare agent type.
///
/// Accepts both `tasks/<type>` and `<type>`; a trailing `/request` is ignored.
pub fn channel_type(channel: &str) -> &str {
    let trimmed = channel.trim();
    let bare = trimmed.strip_prefix(CHANNEL_PREFIX).unwrap_or(trimmed);
    let bare = bare.strip_suffix("/request").unwrap_or(bare);
    bare.trim_matches('/')
}

use taskmesh_core::{TaskmeshError, TaskmeshResult};

/// Checks that a subscription filter is well formed.
///
/// `+` must occupy a whole level and `#` must be the whole last level.
pub fn validate_filter(filter: &str) -> TaskmeshResult<()> {
    if filter.is_empty() {
        return Err(TaskmeshError::Bus("empty topic filter".to_string()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let multi = level.contains('#');
        let single = level.contains('+');
        if multi && (*level != "#" || i != levels.len() - 1) {
            return Err(TaskmeshError::Bus(format!(
                "'#' must be the last level in filter '{filter}'"
            )));
        }
        if single && *level != "+" {
            return Err(TaskmeshError::Bus(format!(
                "'+' must occupy a whole level in filter '{filter}'"
            )));
        }
    }
    Ok(())
}

/// Whether `topic` matches the subscription `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("tasks/completed", "tasks/completed"));
        assert!(!topic_matches("tasks/completed", "tasks/completed/extra"));
        assert!(!topic_matches("tasks/completed/extra", "tasks/completed"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("tasks/+/request", "tasks/code/request"));
        assert!(topic_matches("tasks/+/reputation", "tasks/math/reputation"));
        assert!(!topic_matches("tasks/+/request", "tasks/code/reputation"));
        assert!(!topic_matches("tasks/+", "tasks/code/request"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("#", "tasks/code/request"));
        assert!(topic_matches("tasks/#", "tasks/completed"));
        assert!(topic_matches("tasks/#", "tasks"));
        assert!(!topic_matches("agents/#", "tasks/completed"));
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_filter("tasks/+/request").is_ok());
        assert!(validate_filter("tasks/#").is_ok());
        assert!(validate_filter("").is_err());
        assert!(validate_filter("tasks/#/request").is_err());
        assert!(validate_filter("tasks/co+de").is_err());
    }
}

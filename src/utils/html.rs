// src/utils/html.rs

/// Sanitises rich-text descriptions written by course and quiz authors.
///
/// Safe formatting tags survive; scripts, iframes and event-handler attributes
/// are stripped. Blank results collapse to `None`.
pub fn clean_description(input: Option<&str>) -> Option<String> {
    input
        .map(ammonia::clean)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

//! Topic naming for the brume relay.
//!
//! Topics are flat, case-sensitive strings with `/`-separated segments
//! (e.g. `meteo/temperature`). Matching is exact; there is no wildcard
//! support.

/// Maximum topic name length in bytes.
pub const MAX_TOPIC_NAME_LENGTH: usize = 256;

/// A topic identifier.
pub type TopicId = String;

/// Validate a topic name.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.len() > MAX_TOPIC_NAME_LENGTH {
        return Err("Topic name too long");
    }
    if name.starts_with('$') {
        return Err("Topic names starting with '$' are reserved");
    }
    // Check for valid ASCII printable characters
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic name contains invalid characters");
    }
    Ok(())
}

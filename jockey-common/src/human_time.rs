//! Track duration display formatting.
//!
//! Queue listings and now-playing embeds show durations as "M:SS",
//! switching to "H:MM:SS" at one hour.

/// Format a duration in whole seconds for track display.
///
/// # Examples
///
/// ```
/// use jockey_common::human_time::format_track_duration;
///
/// assert_eq!(format_track_duration(45), "0:45");
/// assert_eq!(format_track_duration(225), "3:45");
/// assert_eq!(format_track_duration(3661), "1:01:01");
/// ```
pub fn format_track_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

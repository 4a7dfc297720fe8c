//! Route helpers shared with the navigation layer.

use crate::ChannelId;

/// Base path of the chat view.
pub const CHAT_PAGE: &str = "/chat";

/// Path the router is asked to open when a channel is selected.
pub fn chat_path(id: ChannelId) -> String {
    format!("{}/{}", CHAT_PAGE, id)
}

/// Route parameters arrive as strings and are compared by numeric value, so
/// `"42"`, `" 42 "` and `"42.0"` all select channel 42. Empty, fractional or
/// non-numeric parameters select nothing.
pub fn parse_selected(param: Option<&str>) -> Option<ChannelId> {
    let p = param?.trim();
    if let Ok(id) = p.parse::<ChannelId>() {
        return Some(id);
    }
    let v = p.parse::<f64>().ok().filter(|v| v.is_finite() && v.fract() == 0.0)?;
    if v < i64::MIN as f64 || v >= i64::MAX as f64 {
        return None;
    }
    Some(ChannelId(v as i64))
}

pub fn is_active(selected: Option<&str>, id: ChannelId) -> bool {
    parse_selected(selected) == Some(id)
}

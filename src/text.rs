//! Text shaping between the feed, the model and the synthesizer.

/// Markdown emphasis marker stripped from model replies.
const EMPHASIS: char = '*';

/// Trim a feed post and drop every line break (`\r\n`, `\n`, `\r`).
pub fn normalize_post(text: &str) -> String {
    text.trim().chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

/// Wrap an inbound post in emphasis markers so the model can tell it apart
/// from its own earlier replies in the context.
pub fn wrap_inbound(text: &str) -> String {
    format!("**{text}**")
}

/// Remove every emphasis marker from a model reply.
///
/// Synthesizers read `*` aloud, and replies are stored the way they are
/// spoken.
pub fn strip_emphasis(reply: &str) -> String {
    reply.chars().filter(|&c| c != EMPHASIS).collect()
}

//! Normalization of output text before comparison.

use std::sync::LazyLock;

use regex::Regex;

/// Replacement for anything shaped like a memory address.
pub const HEX_PLACEHOLDER: &str = "0xFFFFFFFF";

/// Replacement for anything shaped like a UUID.
pub const UUID_PLACEHOLDER: &str = "U-U-I-D";

// `\r+\n` rather than `\r\n` so `\r\r\n` does not leave a new `\r\n` behind.
static LINE_ENDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r+\n").expect("line ending pattern is valid"));

static HEX_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[a-f0-9]+").expect("hex address pattern is valid"));

static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-f0-9]{8}(-[a-f0-9]{4}){3}-[a-f0-9]{12}").expect("uuid pattern is valid")
});

/// Sanitize text for comparison.
///
/// Normalizes line endings to `\n`, strips trailing newlines (not trailing
/// spaces), and replaces hex addresses and UUIDs with fixed placeholders.
/// Applying it twice gives the same result as applying it once.
pub fn sanitize(text: &str) -> String {
    let text = LINE_ENDING.replace_all(text, "\n");
    let text = text.trim_end_matches('\n');
    let text = HEX_ADDRESS.replace_all(text, HEX_PLACEHOLDER);
    UUID.replace_all(&text, UUID_PLACEHOLDER).into_owned()
}

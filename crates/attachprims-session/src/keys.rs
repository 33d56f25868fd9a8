//! Detach-key notation, e.g. `ctrl-p,ctrl-q`.

use crate::error::DetachKeysError;

/// Detach sequence used when the caller does not choose one.
pub const DEFAULT_DETACH_KEYS: &str = "ctrl-p,ctrl-q";

/// Parse comma-separated detach keys into the byte sequence typed on stdin.
///
/// Each element is a single ASCII character or `ctrl-<c>` where `<c>` is a
/// letter or one of `@ [ \ ] ^ _`. An empty string disables detaching.
pub fn parse_detach_keys(input: &str) -> Result<Vec<u8>, DetachKeysError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    input
        .split(',')
        .map(|key| {
            parse_key(key).ok_or_else(|| DetachKeysError {
                input: input.to_string(),
                key: key.to_string(),
            })
        })
        .collect()
}

fn parse_key(key: &str) -> Option<u8> {
    match key.as_bytes() {
        [c] if c.is_ascii() => Some(*c),
        _ => key.strip_prefix("ctrl-").and_then(control_code),
    }
}

fn control_code(key: &str) -> Option<u8> {
    let [c] = key.as_bytes() else {
        return None;
    };
    match c.to_ascii_lowercase() {
        c @ b'a'..=b'z' => Some(c - b'a' + 1),
        b'@' => Some(0x00),
        b'[' => Some(0x1b),
        b'\\' => Some(0x1c),
        b']' => Some(0x1d),
        b'^' => Some(0x1e),
        b'_' => Some(0x1f),
        _ => None,
    }
}

// src/sanitize.rs
//
// Log sanitization for untrusted input and scanner output.
// Rejected domains are attacker-controlled and scanner output is full of
// terminal escapes; neither may reach the log unfiltered.

use std::sync::OnceLock;

use regex::Regex;

/// Maximum number of characters of a rejected input kept in a log line.
pub const MAX_LOGGED_INPUT_CHARS: usize = 300;

/// Maximum number of bytes of scanner output kept for a failure log.
pub const MAX_LOGGED_OUTPUT_BYTES: usize = 2048;

/// Renders untrusted bytes for a single log line
///
/// Invalid UTF-8 is replaced lossily, control characters (including CR/LF)
/// are escaped so they cannot forge log records, and the result is truncated
/// to [`MAX_LOGGED_INPUT_CHARS`] characters.
///
/// # Arguments
/// * `input` - Raw bytes as received from the client
///
/// # Returns
/// * `String` - Printable, single-line rendering
pub fn escape_untrusted(input: &[u8]) -> String {
    let text = String::from_utf8_lossy(input);
    let mut out = String::with_capacity(text.len().min(MAX_LOGGED_INPUT_CHARS));

    for (count, c) in text.chars().enumerate() {
        if count == MAX_LOGGED_INPUT_CHARS {
            out.push_str("...[truncated]");
            break;
        }
        push_escaped(&mut out, c);
    }

    out
}

/// Removes ANSI colour and cursor escape sequences
///
/// # Arguments
/// * `text` - Terminal output of the scanner
///
/// # Returns
/// * `String` - The same text without escape sequences
pub fn strip_ansi(text: &str) -> String {
    match ansi_pattern() {
        Some(pattern) => pattern.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Condenses scanner stdout/stderr for a failure log
///
/// Strips ANSI sequences, escapes remaining control characters except
/// newlines and tabs, and keeps only the last [`MAX_LOGGED_OUTPUT_BYTES`]
/// bytes where the scanner usually prints its fatal error.
pub fn summarize_output(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let stripped = strip_ansi(&text);
    let trimmed = stripped.trim();

    let mut cut = trimmed.len().saturating_sub(MAX_LOGGED_OUTPUT_BYTES);
    while !trimmed.is_char_boundary(cut) {
        cut += 1;
    }
    let tail = &trimmed[cut..];

    let mut out = String::with_capacity(tail.len() + 16);
    if cut > 0 {
        out.push_str("[...] ");
    }
    for c in tail.chars() {
        match c {
            '\n' | '\t' => out.push(c),
            _ => push_escaped(&mut out, c),
        }
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    if c.is_control() {
        out.extend(c.escape_default());
    } else {
        out.push(c);
    }
}

fn ansi_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    // CSI sequences (colours, cursor movement) and OSC sequences (titles).
    PATTERN
        .get_or_init(|| {
            Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").ok()
        })
        .as_ref()
}

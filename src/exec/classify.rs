// src/exec/classify.rs

//! Decide which subprocess output lines count as errors.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::OutputStream;

static ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(error|fatal|panic|failed|failure|could not)\b")
        .expect("error pattern is a valid regex")
});

/// Anything on stderr is an error line; stdout lines only when they look
/// like one.
pub fn is_error_line(stream: OutputStream, text: &str) -> bool {
    match stream {
        OutputStream::Stderr => !text.trim().is_empty(),
        OutputStream::Stdout | OutputStream::Hub => ERROR_PATTERN.is_match(text),
    }
}

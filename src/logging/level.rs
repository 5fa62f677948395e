use crate::error::{Result, SunmineError};
use tracing::Level;

const LEVELS: [(Level, &str); 5] = [
    (Level::TRACE, "TRACE"),
    (Level::DEBUG, "DEBUG"),
    (Level::INFO, "INFO"),
    (Level::WARN, "WARN"),
    (Level::ERROR, "ERROR"),
];

/// Parse a level name; accepts the Python-style WARNING and CRITICAL aliases
pub fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.trim().to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" | "CRITICAL" => Ok(Level::ERROR),
        _ => Err(SunmineError::config(format!(
            "Invalid log level: {level_str}"
        ))),
    }
}

pub fn level_rank(level: Level) -> u8 {
    match level {
        Level::TRACE => 0,
        Level::DEBUG => 1,
        Level::INFO => 2,
        Level::WARN => 3,
        Level::ERROR => 4,
    }
}

pub fn min_level(a: Level, b: Level) -> Level {
    if level_rank(a) <= level_rank(b) { a } else { b }
}

/// Recover the level of an already formatted line, JSON or plain text.
pub fn parse_line_level(line: &str) -> Option<Level> {
    let line = strip_ansi_codes(line);
    LEVELS
        .iter()
        .find(|(_, name)| line.contains(&format!("\"level\":\"{name}\"")))
        .or_else(|| {
            LEVELS
                .iter()
                .find(|(_, name)| line.contains(&format!(" {name} ")))
        })
        .map(|(level, _)| *level)
}

// Console lines may carry CSI colour sequences around the level token
fn strip_ansi_codes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            for t in chars.by_ref() {
                if ('@'..='~').contains(&t) {
                    break;
                }
            }
        }
    }
    out
}

/// Parse and set the runtime web level from a string
pub fn set_web_log_level_str(level_str: &str) -> Result<()> {
    let lvl = parse_log_level(level_str)?;
    super::state::set_web_log_level(lvl);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_and_coloured_lines() {
        assert_eq!(
            parse_line_level("2025-06-01T10:00:00Z  WARN stale battery sample"),
            Some(Level::WARN)
        );
        assert_eq!(
            parse_line_level(r#"{"timestamp":"x","level":"ERROR","fields":{}}"#),
            Some(Level::ERROR)
        );
        assert_eq!(
            parse_line_level("2025-06-01T10:00:00Z \u{1b}[32m INFO\u{1b}[0m tick"),
            Some(Level::INFO)
        );
        assert_eq!(parse_line_level("no level here"), None);
    }
}

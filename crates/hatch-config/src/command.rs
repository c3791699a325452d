//! Shell-like splitting of helper command lines.
//!
//! Words are separated by unquoted whitespace. Single and double quotes group
//! characters (including whitespace) into one word; a backslash outside quotes
//! takes the next character literally. Empty words are dropped, so `""` on its
//! own produces nothing.

use thiserror::Error;

/// Errors raised when a command line cannot be split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandLineError {
    /// A double quote was opened but never closed.
    #[error("Unmatched \"")]
    UnmatchedDoubleQuote,
    /// A single quote was opened but never closed.
    #[error("Unmatched '")]
    UnmatchedSingleQuote,
    /// The command line ended with a bare backslash.
    #[error("Attempt to escape end-of-command")]
    TrailingEscape,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Splits `line` into words.
///
/// # Errors
///
/// Returns [`CommandLineError`] for unbalanced quotes or a trailing escape.
pub fn split_command_line(line: &str) -> Result<Vec<String>, CommandLineError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote = Quote::None;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }
        match (quote, ch) {
            (Quote::None, '\\') => escape = true,
            (Quote::None, '\'') => quote = Quote::Single,
            (Quote::None, '"') => quote = Quote::Double,
            (Quote::Single, '\'') | (Quote::Double, '"') => quote = Quote::None,
            (Quote::None, ' ' | '\t' | '\r' | '\n') => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    match quote {
        Quote::Double => return Err(CommandLineError::UnmatchedDoubleQuote),
        Quote::Single => return Err(CommandLineError::UnmatchedSingleQuote),
        Quote::None => {}
    }
    if escape {
        return Err(CommandLineError::TrailingEscape);
    }
    if !current.is_empty() {
        words.push(current);
    }
    Ok(words)
}

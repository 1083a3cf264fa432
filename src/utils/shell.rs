use crate::error::{Error, Result};

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for display as a shell word.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote and join multiple arguments.
pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a command line into words using POSIX-shell quoting rules
/// (single quotes, double quotes, backslash escapes).
///
/// Only word splitting is performed: no expansion, no operators. Text such
/// as `&&` or `|` stays a literal argument, so the result is always safe to
/// hand to an argument-vector spawn.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut mode = Mode::Plain;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Plain => match c {
                ' ' | '\t' | '\n' => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                '\'' => {
                    mode = Mode::Single;
                    in_word = true;
                }
                '"' => {
                    mode = Mode::Double;
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_word = true;
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
            Mode::Single => {
                if c == '\'' {
                    mode = Mode::Plain;
                } else {
                    current.push(c);
                }
            }
            Mode::Double => match c {
                '"' => mode = Mode::Plain,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => current.push('\\'),
                },
                _ => current.push(c),
            },
        }
    }

    if mode != Mode::Plain {
        return Err(Error::validation_invalid_argument(
            "command",
            "Unterminated quote in command",
            None,
            Some(vec![line.to_string()]),
        ));
    }

    if in_word {
        words.push(current);
    }

    Ok(words)
}

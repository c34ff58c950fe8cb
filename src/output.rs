//! Sourceable shell output: bound variables, positionals, help and errors.

use crate::args::ParseResult;
use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Heredoc delimiter for help output.
const HELP_DELIMITER: &str = "SCRIPTHUB_HELP";

/// Escape a string for safe use in a shell double-quoted context.
///
/// Escapes: $, `, \ and ". Everything else, newlines included, is literal
/// between double quotes.
fn escape_shell_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '$' => escaped.push_str("\\$"),
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Generate the output content as a string.
///
/// Each bound variable becomes an `export VAR="value"` line; the positional
/// residue replaces the script's arguments through `set --`.
pub fn generate_output_string(parsed: &ParseResult) -> String {
    let mut output = String::new();

    for (var, value) in parsed.values() {
        output.push_str(&format!(
            "export {}=\"{}\"\n",
            var,
            escape_shell_value(value.as_shell_str())
        ));
    }

    output.push_str("set --");
    for arg in parsed.positional() {
        output.push_str(&format!(" \"{}\"", escape_shell_value(arg)));
    }
    output.push('\n');

    output
}

/// Generate a temporary file with the parse result.
///
/// Returns the path to the temporary file. The file will persist
/// until the process exits or it's manually deleted.
pub fn generate_output(parsed: &ParseResult) -> Result<PathBuf> {
    write_temp_file(&generate_output_string(parsed))
}

/// Generate an error output file.
///
/// When sourced, the file will print the error message to stderr and exit 1.
pub fn generate_error_output(message: &str) -> Result<PathBuf> {
    write_temp_file(&generate_error_string(message))
}

/// Generate an error output as a string.
pub fn generate_error_string(message: &str) -> String {
    let escaped = escape_shell_value(message);
    format!("echo \"scripthub: {}\" >&2\nexit 1\n", escaped)
}

/// Generate a help output file.
///
/// When sourced, the file will print the help text and exit 0.
pub fn generate_help_output(help_text: &str) -> Result<PathBuf> {
    write_temp_file(&generate_help_output_string(help_text))
}

/// Generate a help output as a string.
pub fn generate_help_output_string(help_text: &str) -> String {
    let mut text = help_text.to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    format!(
        "cat <<'{delimiter}'\n{text}{delimiter}\nexit 0\n",
        delimiter = HELP_DELIMITER,
        text = text
    )
}

/// Write content to a temporary file and return its path.
fn write_temp_file(content: &str) -> Result<PathBuf> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    let path = file.into_temp_path().keep()?;
    Ok(path)
}

//! Splits a command string into the argument vector handed to `execvp`.

use std::ffi::CString;

use flowrun_types::{FlowError, Result};

/// Split `raw` on single ASCII spaces. Runs of spaces produce no empty
/// tokens. A token wrapped in matching single or double quotes loses one
/// layer of quotes; there is no escaping and no quoted spaces.
pub fn tokenize(block: &str, raw: &str) -> Result<Vec<String>> {
    let args: Vec<String> = raw
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(|t| strip_quotes(t).to_string())
        .collect();

    if args.is_empty() {
        return Err(FlowError::EmptyCommand {
            block: block.to_string(),
        });
    }
    Ok(args)
}

fn strip_quotes(token: &str) -> &str {
    let bytes = token.as_bytes();
    let len = bytes.len();
    if len >= 2 && bytes[0] == bytes[len - 1] && matches!(bytes[0], b'\'' | b'"') {
        &token[1..len - 1]
    } else {
        token
    }
}

/// Tokenize and convert to C strings for `execvp`.
pub fn argv(block: &str, raw: &str) -> Result<Vec<CString>> {
    tokenize(block, raw)?
        .into_iter()
        .map(|arg| {
            CString::new(arg).map_err(|e| FlowError::InvalidArgument {
                block: block.to_string(),
                arg: String::from_utf8_lossy(&e.into_vec()).into_owned(),
            })
        })
        .collect()
}

//! Parser for the `$send_msg` chat command.
//!
//! ```text
//! $send_msg [name1, name2] free-text message group[group1, group2]
//! ```
//!
//! Both bracketed parts are optional. The message is whatever remains once
//! they are stripped.

use crate::error::{RelayError, Result};
use crate::request::MessageRequest;
use once_cell::sync::Lazy;
use regex::Regex;

pub const SEND_MSG_PREFIX: &str = "$send_msg";

static SEND_MSG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$send_msg\s*(\[[^\]]*\])?\s*(.*?)\s*(group\[[^\]]*\])?$")
        .expect("send_msg pattern is valid")
});

/// Parse a `$send_msg` command line into a request
pub fn parse_send_msg(command: &str) -> Result<MessageRequest> {
    let command = command.trim();

    let rest = command
        .strip_prefix(SEND_MSG_PREFIX)
        .ok_or_else(|| RelayError::invalid("command must start with $send_msg"))?;
    if rest.chars().next().is_some_and(|c| !c.is_whitespace() && c != '[') {
        return Err(RelayError::invalid("unknown command"));
    }

    if !brackets_balanced(command) {
        return Err(RelayError::invalid("mismatched brackets in command"));
    }

    let caps = SEND_MSG_PATTERN
        .captures(command)
        .ok_or_else(|| RelayError::invalid("malformed $send_msg command"))?;

    let receiver_names = caps
        .get(1)
        .map(|m| split_names(m.as_str().trim_start_matches('[').trim_end_matches(']')))
        .unwrap_or_default();
    let message = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
    let group_names = caps
        .get(3)
        .map(|m| split_names(m.as_str().trim_start_matches("group[").trim_end_matches(']')))
        .unwrap_or_default();

    Ok(MessageRequest::new(receiver_names, message, group_names))
}

/// Whether a line is addressed to this parser
pub fn is_send_msg(line: &str) -> bool {
    line.trim_start().starts_with(SEND_MSG_PREFIX)
}

fn split_names(list: &str) -> Vec<String> {
    list.split([',', '，'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn brackets_balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
        if depth > 1 {
            return false;
        }
    }
    depth == 0
}

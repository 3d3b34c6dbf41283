//! RESP-subset wire codec for the Faktory Work Protocol.
//!
//! The server speaks a line-based protocol where every reply begins with a
//! type byte and ends with `CRLF`: simple strings (`+`), errors (`-`), and
//! bulk strings (`$`). This module only deals with the *reply* side of the
//! wire (commands are plain `VERB [payload]\r\n` lines built by callers).

use std::fmt;

/// Terminator used by every FWP line.
pub const CRLF: &str = "\r\n";

/// A decoded RESP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<text>` (a simple string, usually `OK`).
    Simple(String),
    /// `-<text>` (an error message from the server).
    Error(String),
    /// `$<n>\r\n<payload>` (a bulk string, or `None` for `$-1`).
    Bulk(Option<String>),
}

/// A reply line was malformed in a way that prevents classification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("empty reply")]
    Empty,
    #[error("unrecognized reply type byte {0:?}")]
    UnknownType(char),
}

impl Reply {
    /// Parse a complete reply (as produced by [`is_message_complete`]) into
    /// its typed form. The trailing `CRLF` must already be present.
    pub fn parse(line: &str) -> Result<Reply, WireError> {
        let mut chars = line.chars();
        let tag = chars.next().ok_or(WireError::Empty)?;
        match tag {
            '+' => Ok(Reply::Simple(trim_crlf(&line[1..]).to_string())),
            '-' => Ok(Reply::Error(trim_crlf(&line[1..]).to_string())),
            '$' => {
                let (n_bytes, data) = parse_bulk_string(line);
                if n_bytes < 0 {
                    Ok(Reply::Bulk(None))
                } else {
                    Ok(Reply::Bulk(Some(data.to_string())))
                }
            }
            other => Err(WireError::UnknownType(other)),
        }
    }
}

fn trim_crlf(s: &str) -> &str {
    s.strip_suffix(CRLF).unwrap_or(s)
}

/// Parse a `$<n>\r\n<payload>\r\n` bulk string reply.
///
/// Returns `(n_bytes, payload)`. `$-1\r\n` (nil) and any malformed bulk
/// string both decode to `(-1, "")`. Callers that must tell a genuine nil
/// apart from a parse failure should check the `$` prefix themselves before
/// calling this.
pub fn parse_bulk_string(s: &str) -> (i64, &str) {
    let Some(rest) = s.strip_prefix('$') else {
        return (-1, "");
    };
    let Some(header_end) = rest.find(CRLF) else {
        return (-1, "");
    };
    let Ok(n_bytes) = rest[..header_end].parse::<i64>() else {
        return (-1, "");
    };
    if n_bytes < 0 {
        return (-1, "");
    }
    let payload_start = header_end + CRLF.len();
    let n_bytes_usize = n_bytes as usize;
    if rest.len() < payload_start + n_bytes_usize {
        return (-1, "");
    }
    (n_bytes, &rest[payload_start..payload_start + n_bytes_usize])
}

/// Whether `buf` holds a complete reply and reading can stop.
///
/// A reply is complete iff it ends in `CRLF` and contains exactly one
/// `CRLF` for simple-string/error replies, or exactly two for bulk strings
/// whose length is not `-1` (a `$-1\r\n` nil reply needs only one).
pub fn is_message_complete(buf: &str) -> bool {
    if buf.len() < 2 || !buf.ends_with(CRLF) {
        return false;
    }

    let expected_crlfs = if buf.starts_with('$') && !buf[1..].starts_with('-') {
        2
    } else {
        1
    };

    buf.matches(CRLF).count() == expected_crlfs
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "+{s}"),
            Reply::Error(s) => write!(f, "-{s}"),
            Reply::Bulk(Some(s)) => write!(f, "${}\r\n{s}", s.len()),
            Reply::Bulk(None) => write!(f, "$-1"),
        }
    }
}

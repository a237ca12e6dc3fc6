//! Minimal RESP2 client codec.
//!
//! Commands are sent as arrays of bulk strings; replies are parsed into
//! [`RespValue`].
//!
//! ```text
//! Client → Server:
//!   *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n
//!
//! Server → Client:
//!   $5\r\nvalue\r\n      (bulk string)
//!   $-1\r\n              (nil)
//!   :42\r\n              (integer)
//!   +OK\r\n              (simple string)
//!   -ERR message\r\n     (error)
//!   *N\r\n...            (array)
//! ```

use std::io::{BufRead, Read};

use crate::error::{StateError, StateResult};

/// Largest bulk string accepted from the server (512 MiB, the RESP limit).
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn into_bulk(self) -> StateResult<Option<Vec<u8>>> {
        match self {
            RespValue::Bulk(value) => Ok(value),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    pub fn into_integer(self) -> StateResult<i64> {
        match self {
            RespValue::Integer(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    pub fn into_array(self) -> StateResult<Vec<RespValue>> {
        match self {
            RespValue::Array(Some(items)) => Ok(items),
            RespValue::Array(None) => Ok(Vec::new()),
            other => Err(unexpected("array", &other)),
        }
    }

    pub fn expect_ok(self) -> StateResult<()> {
        match self {
            RespValue::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected("+OK", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &RespValue) -> StateError {
    StateError::Protocol(format!("expected {wanted}, got {got:?}"))
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read one complete reply.
pub fn read_value<R: BufRead>(reader: &mut R) -> StateResult<RespValue> {
    let line = read_line(reader)?;
    let (tag, body) = line
        .split_first()
        .ok_or_else(|| StateError::Protocol("empty reply line".to_string()))?;
    let body = std::str::from_utf8(body)
        .map_err(|e| StateError::Protocol(format!("reply header is not utf-8: {e}")))?;

    match tag {
        b'+' => Ok(RespValue::Simple(body.to_string())),
        b'-' => Ok(RespValue::Error(body.to_string())),
        b':' => Ok(RespValue::Integer(parse_int(body)?)),
        b'$' => {
            let len = parse_int(body)?;
            if len < 0 {
                return Ok(RespValue::Bulk(None));
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(StateError::Protocol(format!("bulk length {len} too large")));
            }
            let mut buf = vec![0u8; len + 2];
            reader.read_exact(&mut buf).map_err(io_err)?;
            if !buf.ends_with(b"\r\n") {
                return Err(StateError::Protocol("bulk string not terminated".to_string()));
            }
            buf.truncate(len);
            Ok(RespValue::Bulk(Some(buf)))
        }
        b'*' => {
            let len = parse_int(body)?;
            if len < 0 {
                return Ok(RespValue::Array(None));
            }
            let mut items = Vec::with_capacity((len as usize).min(1024));
            for _ in 0..len {
                items.push(read_value(reader)?);
            }
            Ok(RespValue::Array(Some(items)))
        }
        other => Err(StateError::Protocol(format!(
            "unknown reply type byte 0x{other:02x}"
        ))),
    }
}

/// Read a CRLF-terminated line without the terminator.
fn read_line<R: BufRead>(reader: &mut R) -> StateResult<Vec<u8>> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).map_err(io_err)?;
    if n == 0 {
        return Err(StateError::Io("connection closed by server".to_string()));
    }
    if !line.ends_with(b"\r\n") {
        return Err(StateError::Protocol("reply line not terminated".to_string()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_int(s: &str) -> StateResult<i64> {
    s.parse()
        .map_err(|e| StateError::Protocol(format!("invalid integer {s:?}: {e}")))
}

pub(crate) fn io_err(e: std::io::Error) -> StateError {
    StateError::Io(e.to_string())
}

/// Escape glob metacharacters so `s` matches literally in `SCAN MATCH`.
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

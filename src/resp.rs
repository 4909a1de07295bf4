//! RESP wire values and framing.
//!
//! The append-only file is a concatenation of RESP multi-bulk frames, the
//! replication stream replays them verbatim, and the TCP front speaks the
//! same protocol plus inline (telnet-style) commands. Parsing is
//! incremental: feeders hand in however many bytes they have and get back
//! either a complete frame with its consumed length or `None`.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Simple(String),
    Error(String),
    Int(i64),
    Bulk(String),
    Null,
    Array(Vec<Value>),
}

impl Value {
    pub fn ok() -> Value {
        Value::Simple("OK".to_string())
    }

    /// Bulk string holding a float in its shortest display form.
    pub fn float(v: f64) -> Value {
        Value::Bulk(format_float(v))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Error(s) => {
                out.extend_from_slice(b"-ERR ");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Int(v) => {
                out.push(b':');
                out.extend_from_slice(v.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Bulk(s) => {
                out.push(b'$');
                out.extend_from_slice(s.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Null => out.extend_from_slice(b"$-1\r\n"),
            Value::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Loose JSON projection used by the JSON output mode.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Simple(s) | Value::Bulk(s) => {
                // bulk payloads that are themselves JSON pass through intact
                serde_json::from_str(s).unwrap_or(serde_json::Value::String(s.clone()))
            }
            Value::Error(s) => serde_json::Value::String(s.clone()),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Null => serde_json::Value::Null,
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

/// Display form without a trailing `.0` for whole numbers.
pub fn format_float(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Encode a command as the multi-bulk frame appended to the log and
/// streamed to followers.
pub fn encode_command(args: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 * args.len() + 16);
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].windows(2).position(|w| w == b"\r\n").map(|p| p + from)
}

fn parse_int(buf: &[u8]) -> Option<i64> {
    std::str::from_utf8(buf).ok()?.parse().ok()
}

/// Parse one command frame from `buf`.
///
/// Returns the argument list and bytes consumed, or `None` when the buffer
/// holds an incomplete frame. Leading zero bytes (legacy log padding) and
/// blank lines are consumed and reported as an empty argument list. When
/// `inline` is set, lines that do not start with `*` are split as
/// telnet-style commands; otherwise they are a framing error.
pub fn parse_command(buf: &[u8], inline: bool) -> Result<Option<(Vec<String>, usize)>> {
    let mut pos = 0;
    while pos < buf.len() && buf[pos] == 0 {
        pos += 1;
    }
    if pos > 0 {
        return Ok(Some((Vec::new(), pos)));
    }
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] != b'*' {
        if !inline {
            return Err(Error::Protocol(format!(
                "expected '*', got '{}'",
                printable(buf[0])
            )));
        }
        // inline command: one line, whitespace separated, double quotes honored
        let nl = match buf.iter().position(|&b| b == b'\n') {
            Some(n) => n,
            None => return Ok(None),
        };
        let line = String::from_utf8_lossy(&buf[..nl]);
        let args = split_inline(line.trim())?;
        return Ok(Some((args, nl + 1)));
    }

    let header_end = match find_crlf(buf, 1) {
        Some(n) => n,
        None => return Ok(None),
    };
    let count = parse_int(&buf[1..header_end])
        .ok_or_else(|| Error::Protocol("invalid multibulk length".to_string()))?;
    if !(0..=1024 * 1024).contains(&count) {
        return Err(Error::Protocol("invalid multibulk length".to_string()));
    }

    let mut pos = header_end + 2;
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != b'$' {
            return Err(Error::Protocol(format!(
                "expected '$', got '{}'",
                printable(buf[pos])
            )));
        }
        let len_end = match find_crlf(buf, pos + 1) {
            Some(n) => n,
            None => return Ok(None),
        };
        let len = parse_int(&buf[pos + 1..len_end])
            .ok_or_else(|| Error::Protocol("invalid bulk length".to_string()))?;
        if !(0..=512 * 1024 * 1024).contains(&len) {
            return Err(Error::Protocol("invalid bulk length".to_string()));
        }
        let data_start = len_end + 2;
        let data_end = data_start + len as usize;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(Error::Protocol("invalid bulk line ending".to_string()));
        }
        args.push(String::from_utf8_lossy(&buf[data_start..data_end]).into_owned());
        pos = data_end + 2;
    }
    Ok(Some((args, pos)))
}

fn printable(b: u8) -> String {
    if b.is_ascii_graphic() || b == b' ' {
        (b as char).to_string()
    } else {
        format!("\\x{b:02x}")
    }
}

/// Split an inline command line. Double-quoted tokens may contain spaces;
/// a `{` token swallows the rest of the line as one JSON argument.
fn split_inline(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut chars = line.char_indices().peekable();
    while let Some(&(idx, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '{' {
            args.push(line[idx..].trim_end().to_string());
            break;
        }
        if ch == '"' {
            chars.next();
            let mut token = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                token.push(c);
            }
            if !closed {
                return Err(Error::Protocol("unbalanced quotes in request".to_string()));
            }
            args.push(token);
            continue;
        }
        let mut token = String::new();
        for (_, c) in chars.by_ref() {
            if c.is_whitespace() {
                break;
            }
            token.push(c);
        }
        args.push(token);
    }
    Ok(args)
}

/// Parse one reply value (used by the follower when talking to its leader).
pub fn parse_value(buf: &[u8]) -> Result<Option<(Value, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let line_end = match find_crlf(buf, 1) {
        Some(n) => n,
        None => return Ok(None),
    };
    let line = &buf[1..line_end];
    let after = line_end + 2;
    match buf[0] {
        b'+' => Ok(Some((
            Value::Simple(String::from_utf8_lossy(line).into_owned()),
            after,
        ))),
        b'-' => Ok(Some((
            Value::Error(String::from_utf8_lossy(line).into_owned()),
            after,
        ))),
        b':' => {
            let v = parse_int(line)
                .ok_or_else(|| Error::Protocol("invalid integer".to_string()))?;
            Ok(Some((Value::Int(v), after)))
        }
        b'$' => {
            let len = parse_int(line)
                .ok_or_else(|| Error::Protocol("invalid bulk length".to_string()))?;
            if len < 0 {
                return Ok(Some((Value::Null, after)));
            }
            let end = after + len as usize;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            Ok(Some((
                Value::Bulk(String::from_utf8_lossy(&buf[after..end]).into_owned()),
                end + 2,
            )))
        }
        b'*' => {
            let count = parse_int(line)
                .ok_or_else(|| Error::Protocol("invalid multibulk length".to_string()))?;
            if count < 0 {
                return Ok(Some((Value::Null, after)));
            }
            let mut items = Vec::with_capacity(count as usize);
            let mut pos = after;
            for _ in 0..count {
                match parse_value(&buf[pos..])? {
                    Some((v, used)) => {
                        items.push(v);
                        pos += used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Array(items), pos)))
        }
        other => Err(Error::Protocol(format!(
            "expected '$', got '{}'",
            printable(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trip() {
        let args: Vec<String> = ["SET", "fleet", "truck1", "POINT", "33", "-115"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let frame = encode_command(&args);
        let (parsed, used) = parse_command(&frame, false).unwrap().unwrap();
        assert_eq!(parsed, args);
        assert_eq!(used, frame.len());
    }

    #[test]
    fn incomplete_frames_return_none() {
        let frame = encode_command(&["SET".to_string(), "k".to_string()]);
        for cut in 1..frame.len() {
            assert_eq!(parse_command(&frame[..cut], false).unwrap(), None);
        }
    }

    #[test]
    fn framing_error_message() {
        let err = parse_command(b"*2\r\n$1\r\nh\r\n+OK\r\n", false).unwrap_err();
        assert_eq!(err.to_string(), "Protocol error: expected '$', got '+'");
    }

    #[test]
    fn zero_padding_is_consumed_as_empty() {
        let mut buf = vec![0u8; 7];
        buf.extend_from_slice(&encode_command(&["PING".to_string()]));
        let (args, used) = parse_command(&buf, false).unwrap().unwrap();
        assert!(args.is_empty());
        assert_eq!(used, 7);
        let (args, _) = parse_command(&buf[used..], false).unwrap().unwrap();
        assert_eq!(args, vec!["PING".to_string()]);
    }

    #[test]
    fn inline_commands() {
        let (args, _) = parse_command(b"SET fleet truck1 POINT 33 -115\r\n", true)
            .unwrap()
            .unwrap();
        assert_eq!(args.len(), 6);

        let (args, _) = parse_command(b"SET fleet truck1 STRING \"hello world\"\r\n", true)
            .unwrap()
            .unwrap();
        assert_eq!(args[4], "hello world");

        let (args, _) =
            parse_command(b"SET fleet truck1 OBJECT {\"type\":\"Point\",\"coordinates\":[1, 2]}\n", true)
                .unwrap()
                .unwrap();
        assert_eq!(args[3], "OBJECT");
        assert_eq!(args[4], "{\"type\":\"Point\",\"coordinates\":[1, 2]}");
    }

    #[test]
    fn value_round_trip() {
        let v = Value::Array(vec![
            Value::Int(0),
            Value::Array(vec![Value::Bulk("truck1".into()), Value::float(33.5)]),
            Value::Null,
        ]);
        let mut out = Vec::new();
        v.encode(&mut out);
        let (parsed, used) = parse_value(&out).unwrap().unwrap();
        assert_eq!(parsed, v);
        assert_eq!(used, out.len());
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(33.0), "33");
        assert_eq!(format_float(-115.0), "-115");
        assert_eq!(format_float(33.5), "33.5");
        assert_eq!(format_float(152808.6793), "152808.6793");
    }
}

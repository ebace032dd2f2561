//! Text-frame codec for the broker's STOMP 1.2 dialect.
//!
//! A frame is a command line, header lines, a blank line and a NUL-terminated
//! body. A bare line feed is a heartbeat. Header values escape `\`, `\n`, `\r`
//! and `:` per the STOMP 1.2 rules.

use crate::error::{RealtimeError, RealtimeResult};

const NUL: char = '\u{0}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Connect {
        host: String,
        /// Milliseconds this client will send and expects to receive
        heartbeat_ms: u64,
    },
    Connected {
        heartbeat: Option<(u64, u64)>,
    },
    Subscribe {
        id: String,
        destination: String,
    },
    Unsubscribe {
        id: String,
    },
    Send {
        destination: String,
        body: String,
    },
    Message {
        subscription: Option<String>,
        destination: String,
        body: String,
    },
    Disconnect,
    Error {
        message: String,
        body: String,
    },
    Heartbeat,
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(value: &str) -> RealtimeResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(RealtimeError::Decode(format!(
                    "invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

fn write_frame(command: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = String::new();
    out.push_str(command);
    out.push('\n');
    for (name, value) in headers {
        out.push_str(name);
        out.push(':');
        out.push_str(&escape_header(value));
        out.push('\n');
    }
    out.push('\n');
    out.push_str(body);
    out.push(NUL);
    out
}

impl Frame {
    pub fn connect(host: &str, heartbeat_ms: u64) -> Frame {
        Frame::Connect {
            host: host.to_string(),
            heartbeat_ms,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Frame::Connect { host, heartbeat_ms } => {
                let beat = format!("{heartbeat_ms},{heartbeat_ms}");
                write_frame(
                    "CONNECT",
                    &[
                        ("accept-version", "1.2"),
                        ("host", host),
                        ("heart-beat", &beat),
                    ],
                    "",
                )
            }
            Frame::Connected { heartbeat } => {
                let beat = heartbeat.map(|(sx, sy)| format!("{sx},{sy}"));
                let mut headers: Vec<(&str, &str)> = vec![("version", "1.2")];
                if let Some(beat) = beat.as_deref() {
                    headers.push(("heart-beat", beat));
                }
                write_frame("CONNECTED", &headers, "")
            }
            Frame::Subscribe { id, destination } => write_frame(
                "SUBSCRIBE",
                &[("id", id), ("destination", destination), ("ack", "auto")],
                "",
            ),
            Frame::Unsubscribe { id } => write_frame("UNSUBSCRIBE", &[("id", id)], ""),
            Frame::Send { destination, body } => write_frame(
                "SEND",
                &[
                    ("destination", destination),
                    ("content-type", "application/json"),
                ],
                body,
            ),
            Frame::Message {
                subscription,
                destination,
                body,
            } => {
                let mut headers: Vec<(&str, &str)> = Vec::new();
                if let Some(sub) = subscription.as_deref() {
                    headers.push(("subscription", sub));
                }
                headers.push(("destination", destination));
                write_frame("MESSAGE", &headers, body)
            }
            Frame::Disconnect => write_frame("DISCONNECT", &[], ""),
            Frame::Error { message, body } => {
                write_frame("ERROR", &[("message", message)], body)
            }
            Frame::Heartbeat => "\n".to_string(),
        }
    }

    pub fn parse(raw: &str) -> RealtimeResult<Frame> {
        let trimmed_nul = raw.strip_suffix(NUL).unwrap_or(raw);
        if trimmed_nul.is_empty() || trimmed_nul == "\n" || trimmed_nul == "\r\n" {
            return Ok(Frame::Heartbeat);
        }

        // The header block ends at the first blank line, LF or CRLF.
        let lf = trimmed_nul.find("\n\n");
        let crlf = trimmed_nul.find("\r\n\r\n");
        let (head, body) = match (lf, crlf) {
            (Some(i), Some(j)) if j < i => (&trimmed_nul[..j], &trimmed_nul[j + 4..]),
            (Some(i), _) => (&trimmed_nul[..i], &trimmed_nul[i + 2..]),
            (None, Some(j)) => (&trimmed_nul[..j], &trimmed_nul[j + 4..]),
            (None, None) => {
                return Err(RealtimeError::Decode("frame missing header terminator".into()))
            }
        };

        let mut lines = head.lines();
        let command = lines
            .next()
            .ok_or_else(|| RealtimeError::Decode("empty frame".into()))?;

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RealtimeError::Decode(format!("malformed header: {line}")))?;
            // STOMP: repeated headers keep the first occurrence
            if !headers.iter().any(|(n, _)| n == name) {
                headers.push((name.to_string(), unescape_header(value)?));
            }
        }
        let header = |name: &str| -> Option<&str> {
            headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };
        let required = |name: &str| -> RealtimeResult<String> {
            header(name)
                .map(str::to_string)
                .ok_or_else(|| RealtimeError::Decode(format!("{command} missing {name} header")))
        };

        match command {
            "CONNECT" | "STOMP" => {
                let heartbeat_ms = header("heart-beat")
                    .and_then(|v| v.split(',').next().map(str::to_string))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                Ok(Frame::Connect {
                    host: header("host").unwrap_or_default().to_string(),
                    heartbeat_ms,
                })
            }
            "CONNECTED" => {
                let heartbeat = header("heart-beat").and_then(|v| {
                    let (sx, sy) = v.split_once(',')?;
                    Some((sx.parse().ok()?, sy.parse().ok()?))
                });
                Ok(Frame::Connected { heartbeat })
            }
            "SUBSCRIBE" => Ok(Frame::Subscribe {
                id: required("id")?,
                destination: required("destination")?,
            }),
            "UNSUBSCRIBE" => Ok(Frame::Unsubscribe { id: required("id")? }),
            "SEND" => Ok(Frame::Send {
                destination: required("destination")?,
                body: body.to_string(),
            }),
            "MESSAGE" => Ok(Frame::Message {
                subscription: header("subscription").map(str::to_string),
                destination: required("destination")?,
                body: body.to_string(),
            }),
            "DISCONNECT" => Ok(Frame::Disconnect),
            "ERROR" => Ok(Frame::Error {
                message: header("message").unwrap_or_default().to_string(),
                body: body.to_string(),
            }),
            other => Err(RealtimeError::Decode(format!("unknown command: {other}"))),
        }
    }
}

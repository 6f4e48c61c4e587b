//! Parser for the line-based CSV poll-list file.

use std::net::Ipv4Addr;
use std::str::FromStr;

use tracing::warn;

use crate::poll::{FunctionCode, Period, Poll, PollIdentity, Width};

const MAX_LINE_LEN: usize = 4096;

/// One successfully parsed line, paired with the device it targets.
#[derive(Debug, Clone)]
pub struct PollFileEntry {
    pub host: Ipv4Addr,
    pub port: u16,
    pub poll: Poll,
}

/// Parse every line of `text`, skipping comments, blank lines, and any
/// line that fails validation (each such line is logged and the file
/// parse continues — a malformed line never aborts the whole load).
pub fn parse(text: &str) -> Vec<PollFileEntry> {
    let mut entries = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if raw.len() > MAX_LINE_LEN {
            warn!(line = lineno + 1, len = raw.len(), "poll-list line too long, skipping");
            continue;
        }
        match parse_line(line) {
            Ok(entry) => entries.push(entry),
            Err(msg) => {
                warn!(line = lineno + 1, reason = %msg, "skipping invalid poll-list line");
            }
        }
    }
    entries
}

fn parse_line(line: &str) -> std::result::Result<PollFileEntry, String> {
    let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
    if fields.len() != 10 {
        return Err(format!("expected 10 fields, got {}", fields.len()));
    }
    let [ip, port, unit_id, ty, register, function, scale, poll_s, poll_ms, topic] =
        <[&str; 10]>::try_from(fields).map_err(|_| "field count mismatch".to_string())?;

    let host = Ipv4Addr::from_str(ip).map_err(|e| format!("bad ipv4 '{ip}': {e}"))?;
    if host == Ipv4Addr::UNSPECIFIED {
        return Err("ipv4 address must not be unspecified".to_string());
    }

    let port: u16 = port
        .parse()
        .map_err(|_| format!("bad port '{port}'"))
        .and_then(|p: u32| {
            if (1..=65535).contains(&p) {
                Ok(p as u16)
            } else {
                Err(format!("port {p} out of range [1,65535]"))
            }
        })?;

    let unit_id: u8 = unit_id
        .parse()
        .map_err(|_| format!("bad unit_id '{unit_id}'"))?;

    let (signed, width) = parse_type(ty)?;

    let register: u16 = register
        .parse()
        .map_err(|_| format!("bad register '{register}'"))?;

    let function_code: u8 = function
        .parse()
        .map_err(|_| format!("bad function '{function}'"))?;
    let function = FunctionCode::from_code(function_code)
        .ok_or_else(|| format!("unsupported function code {function_code}"))?;

    let scale: f32 = scale.parse().map_err(|_| format!("bad scale '{scale}'"))?;
    if !scale.is_finite() {
        return Err("scale must be finite".to_string());
    }

    let poll_s: u32 = poll_s
        .parse()
        .map_err(|_| format!("bad poll_s '{poll_s}'"))?;
    let poll_ms: u16 = poll_ms
        .parse()
        .map_err(|_| format!("bad poll_ms '{poll_ms}'"))?;
    let period = Period::new(poll_s, poll_ms).map_err(|e| e.to_string())?;

    if topic.is_empty() || topic.len() > 1024 || topic.contains(['+', '#']) {
        return Err(format!("invalid topic '{topic}'"));
    }

    let identity = PollIdentity {
        function,
        register,
        unit_id,
    };
    let poll = Poll::new(identity, signed, width, scale, period, topic.to_string())
        .map_err(|e| e.to_string())?;

    Ok(PollFileEntry {
        host,
        port,
        poll,
    })
}

fn parse_type(ty: &str) -> std::result::Result<(bool, Width), String> {
    let mut chars = ty.chars();
    let sign = chars.next().ok_or_else(|| "empty type field".to_string())?;
    let signed = match sign {
        '+' => false,
        '-' => true,
        other => return Err(format!("type must start with +/-, got '{other}'")),
    };
    let width_char: String = chars.collect();
    let width = match width_char.as_str() {
        "1" => Width::Single,
        "2" => Width::Double,
        other => return Err(format!("unsupported width '{other}'")),
    };
    Ok((signed, width))
}

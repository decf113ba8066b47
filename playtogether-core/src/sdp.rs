//! Video codec restriction for session descriptions
//!
//! A best-effort text rewrite, not an SDP parser: only the first `m=video`
//! section is touched and every other line passes through byte for byte.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::warn;

const LINE_SEPARATOR: &str = "\r\n";

mod patterns {
    use super::{LazyLock, Regex};

    /// `a=rtpmap:<pt> <encoding>/...`
    pub static RTPMAP: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^a=rtpmap:(\d+)\s+([^/\s]+)").expect("Invalid rtpmap regex")
    });

    /// Attribute lines scoped to a payload type
    pub static PAYLOAD_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^a=(?:rtpmap|fmtp|rtcp-fb):").expect("Invalid payload attribute regex")
    });

    /// Numeric payload type of such a line
    pub static PAYLOAD_TYPE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^a=(?:rtpmap|fmtp|rtcp-fb):(\d+)").expect("Invalid payload type regex")
    });
}

/// Keep only the payload types of `codec` in the video section of `sdp`.
///
/// The `m=video` line keeps its first three fields and the surviving payload
/// types in their original order. `a=rtpmap`, `a=fmtp` and `a=rtcp-fb` lines
/// survive only when they name a kept payload type, so wildcard and
/// non-numeric forms are dropped too. If there is
/// no video section, or the codec has no payload type in it, the input comes
/// back unchanged.
#[must_use]
pub fn restrict_codec(sdp: &str, codec: &str) -> String {
    let lines: Vec<&str> = sdp.split(LINE_SEPARATOR).collect();

    let Some(video_start) = lines.iter().position(|line| line.starts_with("m=video")) else {
        return sdp.to_string();
    };
    let video_end = lines
        .iter()
        .skip(video_start + 1)
        .position(|line| line.starts_with("m="))
        .map_or(lines.len(), |offset| video_start + 1 + offset);

    let section = &lines[video_start..video_end];
    let keep: HashSet<&str> = section
        .iter()
        .copied()
        .filter_map(|line| patterns::RTPMAP.captures(line))
        .filter_map(|caps| {
            let payload = caps.get(1)?.as_str();
            let encoding = caps.get(2)?.as_str();
            encoding.eq_ignore_ascii_case(codec).then_some(payload)
        })
        .collect();

    if keep.is_empty() {
        warn!(codec = %codec, "No payload types for codec in video section, SDP left unchanged");
        return sdp.to_string();
    }

    let m_fields: Vec<&str> = section[0].split(' ').collect();
    let payloads: Vec<&str> = m_fields
        .iter()
        .skip(3)
        .copied()
        .filter(|pt| keep.contains(pt))
        .collect();
    if payloads.is_empty() {
        warn!(codec = %codec, "Codec payload types missing from m=video line, SDP left unchanged");
        return sdp.to_string();
    }

    let m_line = m_fields
        .iter()
        .take(3)
        .chain(payloads.iter())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    let rewritten = section.iter().skip(1).copied().filter(|line| {
        !patterns::PAYLOAD_ATTRIBUTE.is_match(line)
            || patterns::PAYLOAD_TYPE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .is_some_and(|pt| keep.contains(pt.as_str()))
    });

    lines[..video_start]
        .iter()
        .copied()
        .chain(std::iter::once(m_line.as_str()))
        .chain(rewritten)
        .chain(lines[video_end..].iter().copied())
        .collect::<Vec<_>>()
        .join(LINE_SEPARATOR)
}

/// Rewrite the `sdp` field of a relayed description object in place.
///
/// Payloads without a string `sdp` field (candidates, foreign shapes) are left alone.
/// Returns whether the text changed.
pub fn restrict_description(payload: &mut Value, codec: &str) -> bool {
    let Some(Value::String(sdp)) = payload.get_mut("sdp") else {
        return false;
    };
    let rewritten = restrict_codec(sdp, codec);
    if rewritten == *sdp {
        return false;
    }
    *sdp = rewritten;
    true
}

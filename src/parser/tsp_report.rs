//! Parser for the text report of a `tsp` bitrate/tables/continuity pipeline.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::stream_types::resolve_stream_type;
use crate::errors::{ParseError, ParseResult};
use crate::models::{
    Bitrate, PidRecord, ServiceIdentity, ServiceKind, StreamSnapshot, StreamTarget, SubtitleKind,
};

/// Substring identifying the periodic bitrate report line that closes a cycle
pub const REPORT_MARKER: &str = "bitrate_monitor:";

const ELEMENTARY_STREAM: &str = "Elementary stream:";

/// Compiled line patterns of the report grammar
struct ReportPatterns {
    bitrate: Regex,
    elementary_stream: Regex,
    language: Regex,
    subtitling: Regex,
    service: Regex,
    tsid: Regex,
    service_type: Regex,
    continuity: Regex,
}

impl ReportPatterns {
    fn new() -> Self {
        // Patterns are literals; a failure here is a programming error
        let compile = |pattern: &str| Regex::new(pattern).expect("invalid report pattern");
        Self {
            bitrate: compile(r"TS bitrate: ([\d,]+) bits/s, net bitrate: ([\d,]+) bits/s"),
            elementary_stream: compile(
                r"Elementary stream: type (0x[0-9A-F]+) \(([^)]+)\), PID: (0x[0-9A-F]+) \((\d+)\)",
            ),
            language: compile(r"Language: (\w+), Type:"),
            subtitling: compile(r"- Descriptor \d+: Subtitling"),
            service: compile(r#"Service: "([^"]+)", Provider: "([^"]*)""#),
            tsid: compile(r"Transport Stream Id: (0x[0-9A-F]+) \((\d+)\)"),
            service_type: compile(r"Service type: (0x[0-9A-F]+) \(([^)]+)\)"),
            continuity: compile(r"continuity:.*PID: (0x[0-9A-Fa-f]+)"),
        }
    }

    fn global() -> &'static Self {
        static PATTERNS: OnceLock<ReportPatterns> = OnceLock::new();
        PATTERNS.get_or_init(ReportPatterns::new)
    }
}

/// Parse a window of analyzer output into a snapshot for `target`.
///
/// Only a malformed bitrate figure fails the parse. Missing sections leave
/// the corresponding fields empty.
pub fn parse_report(text: &str, target: &StreamTarget) -> ParseResult<StreamSnapshot> {
    let patterns = ReportPatterns::global();

    let bitrate = parse_bitrate(patterns, text)?;
    let pids = parse_pids(patterns, text);
    let service = parse_service(patterns, text);
    let cc_errors = count_cc_errors(patterns, newest_cycle(text));

    Ok(StreamSnapshot::new(target, bitrate, pids, service, cc_errors))
}

fn parse_bitrate(patterns: &ReportPatterns, text: &str) -> ParseResult<Bitrate> {
    let Some(caps) = patterns.bitrate.captures_iter(text).last() else {
        return Ok(Bitrate::default());
    };

    Ok(Bitrate {
        total_bps: parse_grouped_number("total", &caps[1])?,
        net_bps: parse_grouped_number("net", &caps[2])?,
    })
}

/// Parse an integer printed with thousands separators, e.g. `5,077,945`
fn parse_grouped_number(field: &'static str, value: &str) -> ParseResult<u64> {
    value
        .replace(',', "")
        .parse::<u64>()
        .map_err(|e| ParseError::Bitrate {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_pids(patterns: &ReportPatterns, text: &str) -> BTreeMap<u16, PidRecord> {
    let lines: Vec<&str> = text.lines().collect();
    let mut pids = BTreeMap::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = patterns.elementary_stream.captures(line) else {
            continue;
        };

        let pid_hex = &caps[3];
        let Some(pid) = caps[4]
            .parse::<u16>()
            .ok()
            .or_else(|| parse_hex_pid(pid_hex))
        else {
            continue;
        };

        if pids.contains_key(&pid) {
            continue;
        }

        let (class, codec) = resolve_stream_type(&caps[1], &caps[2]);
        let mut record = PidRecord {
            pid,
            pid_hex: pid_hex.to_string(),
            class,
            codec,
            language: None,
            subtitle: false,
            subtitle_kind: None,
        };

        let section = lines[i + 1..]
            .iter()
            .take_while(|l| !l.contains(ELEMENTARY_STREAM))
            .copied()
            .collect::<Vec<_>>();
        attach_attributes(patterns, &mut record, &section);

        pids.insert(pid, record);
    }

    pids
}

/// Language and subtitle descriptors following a PMT entry
fn attach_attributes(patterns: &ReportPatterns, record: &mut PidRecord, section: &[&str]) {
    for (j, line) in section.iter().enumerate() {
        if record.language.is_none() {
            if let Some(caps) = patterns.language.captures(line) {
                record.language = Some(caps[1].to_string());
            }
        }

        if !record.subtitle && patterns.subtitling.is_match(line) {
            record.subtitle = true;
            record.subtitle_kind = Some(SubtitleKind::DvbSubtitle);
            if let Some(caps) = section.get(j + 1).and_then(|next| patterns.language.captures(next)) {
                record.language = Some(caps[1].to_string());
            }
        }
    }
}

fn parse_hex_pid(hex: &str) -> Option<u16> {
    u16::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}

fn parse_service(patterns: &ReportPatterns, text: &str) -> ServiceIdentity {
    let mut service = ServiceIdentity::default();

    if let Some(caps) = patterns.service.captures_iter(text).last() {
        service.name = caps[1].to_string();
        service.provider = caps[2].to_string();
    }

    if let Some(caps) = patterns.tsid.captures_iter(text).last() {
        service.tsid = caps[1].to_string();
    }

    if let Some(caps) = patterns.service_type.captures_iter(text).last() {
        service.kind = ServiceKind::classify(&caps[2]);
    }

    service
}

/// Text following the second-to-last report marker, or all of it
fn newest_cycle(text: &str) -> &str {
    let markers: Vec<usize> = text.match_indices(REPORT_MARKER).map(|(i, _)| i).collect();
    if markers.len() < 2 {
        return text;
    }

    let previous = markers[markers.len() - 2];
    match text[previous..].find('\n') {
        Some(end) => &text[previous + end + 1..],
        None => "",
    }
}

fn count_cc_errors(patterns: &ReportPatterns, cycle: &str) -> BTreeMap<u16, u64> {
    let mut errors = BTreeMap::new();
    for caps in cycle.lines().filter_map(|l| patterns.continuity.captures(l)) {
        if let Some(pid) = parse_hex_pid(&caps[1]) {
            *errors.entry(pid).or_insert(0) += 1;
        }
    }
    errors
}

use chrono::Utc;
use std::collections::BTreeMap;
use tsmonitor::{
    metrics::MetricsSink,
    models::{
        Bitrate, PidClass, PidRecord, ServiceIdentity, ServiceKind, StreamSnapshot, StreamTarget,
    },
};

const FAMILIES: [&str; 7] = [
    "stream_status",
    "stream_bitrate_bps",
    "stream_pid_count",
    "stream_pid_info",
    "stream_service_info",
    "stream_cc_errors_total",
    "stream_snapshots_dropped_total",
];

fn target(n: u8) -> StreamTarget {
    StreamTarget::new(format!("233.198.134.{n}:3333"), format!("Stream {n}"), "10.0.0.1")
}

fn record(pid: u16, class: PidClass, codec: &str) -> PidRecord {
    PidRecord {
        pid,
        pid_hex: format!("0x{pid:04X}"),
        class,
        codec: codec.to_string(),
        language: None,
        subtitle: false,
        subtitle_kind: None,
    }
}

fn snapshot(target: &StreamTarget, pids: &[PidRecord], cc: &[(u16, u64)], service: &str) -> StreamSnapshot {
    StreamSnapshot::new(
        target,
        Bitrate {
            total_bps: 1_000_000,
            net_bps: 900_000,
        },
        pids.iter().map(|p| (p.pid, p.clone())).collect(),
        ServiceIdentity {
            name: service.to_string(),
            provider: "OTCNET".to_string(),
            tsid: "0x000C".to_string(),
            kind: ServiceKind::Sd,
        },
        cc.iter().copied().collect::<BTreeMap<_, _>>(),
    )
}

/// Number of samples per family carrying `stream="<address>"`
fn series_for(sink: &MetricsSink, address: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for family in sink.registry().gather() {
        let matching = family
            .get_metric()
            .iter()
            .filter(|m| {
                m.get_label()
                    .iter()
                    .any(|l| l.get_name() == "stream" && l.get_value() == address)
            })
            .count();
        if matching > 0 {
            counts.insert(family.get_name().to_string(), matching);
        }
    }
    counts
}

fn cc_value(sink: &MetricsSink, address: &str, pid: &str) -> f64 {
    sink.registry()
        .gather()
        .iter()
        .filter(|f| f.get_name() == "stream_cc_errors_total")
        .flat_map(|f| f.get_metric().iter())
        .find(|m| {
            let labels = m.get_label();
            labels.iter().any(|l| l.get_name() == "stream" && l.get_value() == address)
                && labels.iter().any(|l| l.get_name() == "pid" && l.get_value() == pid)
        })
        .map(|m| m.get_counter().get_value())
        .unwrap_or(-1.0)
}

#[test]
fn test_pid_info_follows_current_pid_set() {
    let sink = MetricsSink::new().unwrap();
    let stream = target(1);

    sink.update(&snapshot(
        &stream,
        &[
            record(102, PidClass::Video, "h264"),
            record(202, PidClass::Audio, "mpeg1audio"),
        ],
        &[],
        "Silk Way",
    ));
    assert_eq!(series_for(&sink, &stream.address)["stream_pid_info"], 2);

    for round in 0..5u16 {
        sink.update(&snapshot(
            &stream,
            &[record(300 + round, PidClass::Audio, "aac")],
            &[],
            "Silk Way",
        ));
    }

    assert_eq!(series_for(&sink, &stream.address)["stream_pid_info"], 1);
    let text = sink.render().unwrap();
    assert!(text.contains("pid=\"0x0130\""));
    assert!(!text.contains("codec=\"h264\""));
}

#[test]
fn test_service_change_replaces_series() {
    let sink = MetricsSink::new().unwrap();
    let stream = target(2);
    let pids = [record(102, PidClass::Video, "h264")];

    sink.update(&snapshot(&stream, &pids, &[], "Old Name"));
    sink.update(&snapshot(&stream, &pids, &[], "New Name"));

    assert_eq!(series_for(&sink, &stream.address)["stream_service_info"], 1);
    let text = sink.render().unwrap();
    assert!(text.contains("service_name=\"New Name\""));
    assert!(!text.contains("service_name=\"Old Name\""));
}

#[test]
fn test_cc_counter_is_monotonic() {
    let sink = MetricsSink::new().unwrap();
    let stream = target(3);
    let pids = [record(102, PidClass::Video, "h264")];

    sink.update(&snapshot(&stream, &pids, &[], "Silk Way"));
    assert_eq!(cc_value(&sink, &stream.address, "0x0066"), 0.0);

    sink.update(&snapshot(&stream, &pids, &[(102, 2)], "Silk Way"));
    let first = cc_value(&sink, &stream.address, "0x0066");
    sink.update(&snapshot(&stream, &pids, &[(102, 3)], "Silk Way"));
    let second = cc_value(&sink, &stream.address, "0x0066");
    assert_eq!(first, 2.0);
    assert_eq!(second, 5.0);

    // A cycle without errors, and one where the PID vanished, keep the total
    sink.update(&snapshot(&stream, &pids, &[], "Silk Way"));
    sink.update(&StreamSnapshot::offline(&stream, Utc::now()));
    assert_eq!(cc_value(&sink, &stream.address, "0x0066"), 5.0);
}

#[test]
fn test_remove_stream_deletes_every_family() {
    let sink = MetricsSink::new().unwrap();
    let removed = target(4);
    let kept = target(5);
    let pids = [
        record(102, PidClass::Video, "h264"),
        record(202, PidClass::Audio, "mpeg1audio"),
        record(400, PidClass::Data, "private"),
    ];

    for stream in [&removed, &kept] {
        sink.update(&snapshot(stream, &pids, &[(102, 1), (999, 4)], "Silk Way"));
        sink.record_dropped(stream, 2);
    }

    let before = series_for(&sink, &removed.address);
    for family in FAMILIES {
        assert!(before.contains_key(family), "{family} missing before removal");
    }

    sink.remove_stream(&removed.address);

    assert!(series_for(&sink, &removed.address).is_empty());
    assert_eq!(series_for(&sink, &kept.address).len(), FAMILIES.len());
    assert_eq!(sink.stream_count(), 1);
}

#[test]
fn test_offline_snapshot_clears_pid_info() {
    let sink = MetricsSink::new().unwrap();
    let stream = target(6);

    sink.update(&snapshot(&stream, &[record(102, PidClass::Video, "h264")], &[], "Silk Way"));
    sink.update(&StreamSnapshot::offline(&stream, Utc::now()));

    let series = series_for(&sink, &stream.address);
    assert!(!series.contains_key("stream_pid_info"));
    assert_eq!(series["stream_pid_count"], 4);

    let text = sink.render().unwrap();
    assert!(text
        .lines()
        .any(|l| l.starts_with("stream_status{") && l.contains(&stream.address) && l.ends_with(" 0")));
}

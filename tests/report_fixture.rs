use tsmonitor::{
    metrics::MetricsSink,
    models::{PidClass, ServiceKind, StreamTarget},
    parser::parse_report,
};

const SILK_WAY_REPORT: &str = include_str!("fixtures/silk_way_report.txt");

fn target() -> StreamTarget {
    StreamTarget::new("233.198.134.1:3333", "Silk Way", "172.22.2.154")
}

#[test]
fn test_fixture_parses_to_expected_snapshot() {
    let snapshot = parse_report(SILK_WAY_REPORT, &target()).unwrap();

    assert_eq!(snapshot.bitrate.total_bps, 5077945);
    assert_eq!(snapshot.bitrate.net_bps, 4758039);
    assert_eq!(snapshot.pids.len(), 3);
    assert_eq!(snapshot.service.tsid, "0x000C");
    assert_eq!(snapshot.service.kind, ServiceKind::Hd);
    assert_eq!(snapshot.service.name, "Silk Way");
    assert_eq!(snapshot.service.provider, "OTCNET");
    assert!(snapshot.online);

    assert_eq!(snapshot.pids[&102].codec, "h264");
    assert_eq!(snapshot.pid_count(PidClass::Video), 1);
    assert_eq!(snapshot.pid_count(PidClass::Audio), 2);

    let languages: Vec<_> = snapshot
        .pids
        .values()
        .filter_map(|p| p.language.as_deref())
        .collect();
    assert_eq!(languages, vec!["rus", "kaz"]);
}

#[test]
fn test_fixture_publishes_metrics() {
    let sink = MetricsSink::new().unwrap();
    let snapshot = parse_report(SILK_WAY_REPORT, &target()).unwrap();
    sink.update(&snapshot);

    let text = sink.render().unwrap();
    let sample = |family: &str, needles: &[&str]| {
        text.lines().any(|line| {
            line.starts_with(family) && needles.iter().all(|needle| line.contains(needle))
        })
    };

    assert!(sample("stream_status{", &["stream=\"233.198.134.1:3333\"", "} 1"]));
    assert!(sample("stream_bitrate_bps{", &["type=\"total\"", "} 5077945"]));
    assert!(sample("stream_bitrate_bps{", &["type=\"net\"", "} 4758039"]));
    assert!(sample("stream_pid_count{", &["class=\"audio\"", "} 2"]));
    assert!(sample("stream_pid_count{", &["class=\"other\"", "} 0"]));
    assert!(sample(
        "stream_pid_info{",
        &["pid=\"0x00CA\"", "codec=\"mpeg1audio\"", "language=\"rus\"", "} 1"]
    ));
    assert!(sample("stream_pid_info{", &["pid=\"0x0066\"", "language=\"none\""]));
    assert!(sample(
        "stream_service_info{",
        &["service_name=\"Silk Way\"", "provider=\"OTCNET\"", "service_type=\"HD\""]
    ));
    assert!(sample("stream_cc_errors_total{", &["pid=\"0x012F\"", "} 0"]));
}

#[test]
fn test_fixture_serializes_for_cli() {
    let snapshot = parse_report(SILK_WAY_REPORT, &target()).unwrap();
    let json = serde_json::to_value(&snapshot).unwrap();

    assert_eq!(json["bitrate"]["total_bps"], 5077945);
    assert_eq!(json["service"]["tsid"], "0x000C");
    assert_eq!(json["pids"]["303"]["language"], "kaz");
    assert_eq!(json["online"], true);
}

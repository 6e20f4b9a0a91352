//! Worker progress grammar

use test_case::test_case;

use stemwerk::job::ProgressParser;

#[test_case("PROGRESS:45:Processing chunk 3/8" => Some(45.0) ; "plain")]
#[test_case("PROGRESS: 45 : Loading model" => Some(45.0) ; "spaces around colons")]
#[test_case("  PROGRESS:12.5:Warmup" => Some(12.5) ; "fractional with indent")]
#[test_case("PROGRESS:7" => Some(7.0) ; "no stage")]
#[test_case("PROGRESS:150:Overshoot" => Some(100.0) ; "clamped to 100")]
#[test_case("PROGRESS:abc:Nope" => None ; "non numeric percent")]
#[test_case("PROGRESS::Empty" => None ; "missing percent")]
#[test_case("Loading model: htdemucs" => None ; "unrelated line")]
#[test_case("" => None ; "empty line")]
#[test_case("progress:10:lowercase" => None ; "case sensitive tag")]
#[test_case("PROGRESS:99999999999999999999999999999999999999999999:huge" => None ; "overflowing percent")]
fn test_percent(line: &str) -> Option<f32> {
    ProgressParser::new().parse(line).map(|e| e.percent)
}

#[test_case("PROGRESS:50:Processing (0:12 | ETA 1:05) [RX 9070]" => Some(65.0) ; "worker format")]
#[test_case("PROGRESS:50:ETA 1 : 05" => Some(65.0) ; "whitespace around colon")]
#[test_case("PROGRESS:50:ETA 0:7" => Some(7.0) ; "single digit seconds")]
#[test_case("PROGRESS:50:Processing (0:12)" => None ; "elapsed only")]
fn test_eta(line: &str) -> Option<f64> {
    ProgressParser::new().parse(line).and_then(|e| e.eta_sec)
}

#[test]
fn test_stage_text_is_kept() {
    let event = ProgressParser::new()
        .parse("PROGRESS:45:Processing chunk 3/8")
        .unwrap();
    assert_eq!(event.stage, "Processing chunk 3/8");
}

#[test]
fn test_percent_is_not_required_to_increase() {
    let mut parser = ProgressParser::new();
    let percents: Vec<f32> = ["PROGRESS:60:a", "PROGRESS:40:b", "PROGRESS:80:c", "PROGRESS:10:d"]
        .iter()
        .filter_map(|line| parser.parse(line))
        .map(|e| e.percent)
        .collect();
    assert_eq!(percents, vec![60.0, 40.0, 80.0, 10.0]);
}

#[test]
fn test_device_announcement_applies_to_later_events_only() {
    let mut parser = ProgressParser::new();
    let before = parser.parse("PROGRESS:1:Init").unwrap();
    assert_eq!(before.selected_device_label, "");

    assert!(parser.parse("Selected device: cuda:0 (NVIDIA GeForce RTX 4090)").is_none());
    assert_eq!(
        parser.selected_device_label(),
        Some("cuda:0 (NVIDIA GeForce RTX 4090)")
    );

    for line in ["PROGRESS:20:a", "noise", "PROGRESS:30:b"] {
        if let Some(event) = parser.parse(line) {
            assert_eq!(event.selected_device_label, "cuda:0 (NVIDIA GeForce RTX 4090)");
        }
    }
}

#[test]
fn test_later_announcement_replaces_label() {
    let mut parser = ProgressParser::new();
    parser.parse("Selected device: cuda:1 (780M)");
    parser.parse("Selected device: cpu (CPU)");
    assert_eq!(parser.parse("PROGRESS:5:x").unwrap().selected_device_label, "cpu (CPU)");
}

#[test]
fn test_malformed_input_never_panics() {
    let mut parser = ProgressParser::new();
    let long = "PROGRESS:".repeat(10_000);
    let lines = [
        "PROGRESS",
        "PROGRESS:",
        "PROGRESS:-5:negative",
        "PROGRESS:50:ETA 99999999999999999999999:00",
        "Selected device:",
        "Selected device:    ",
        "\u{feff}PROGRESS:10:bom",
        "PROGRESS:10:\u{1F3B5} ünïcödé",
        "\0\0\0",
        long.as_str(),
    ];
    for line in lines {
        let _ = parser.parse(line);
    }
}

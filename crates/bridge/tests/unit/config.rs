use std::io::Write;

use cpu_bridge::common::Error;
use cpu_bridge::config::{Config, Protection};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tempfile::NamedTempFile;

#[test]
fn empty_document_yields_defaults() {
    let config = Config::from_json("{}").unwrap();
    assert_eq!(config.core.clock_hz, 100_000_000);
    assert_eq!(config.core.cycle_period_ps(), 10_000);
    assert_eq!(config.memory.ram_base, 0x8000_0000);
    assert_eq!(config.memory.ram_size, 128 * 1024 * 1024);
    assert_eq!(config.protector.capacity, 1 << 16);
    assert_eq!(config.protector.protection, Protection::ReadOnly);
    assert!(config.core.engine_args.is_empty());
}

#[test]
fn partial_sections_keep_remaining_defaults() {
    let config = Config::from_json(r#"{ "core": { "clock_hz": 3000000000 }, "memory": { "bus_width": 4 } }"#)
        .unwrap();
    assert_eq!(config.core.cycle_period_ps(), 333);
    assert_eq!(config.core.page_queue_capacity, 256);
    assert_eq!(config.memory.bus_width, 4);
    assert_eq!(config.memory.bus_latency, 1);
}

#[test]
fn none_is_accepted_for_no_access() {
    let config = Config::from_json(r#"{ "protector": { "protection": "None" } }"#).unwrap();
    assert_eq!(config.protector.protection, Protection::NoAccess);
}

#[rstest]
#[case::zero_clock(r#"{ "core": { "clock_hz": 0 } }"#, "core.clock_hz")]
#[case::clock_above_ps_resolution(r#"{ "core": { "clock_hz": 2000000000000 } }"#, "core.clock_hz")]
#[case::unaligned_ram(r#"{ "memory": { "ram_base": 4097 } }"#, "memory.ram_base")]
#[case::empty_ram(r#"{ "memory": { "ram_size": 0 } }"#, "memory.ram_size")]
#[case::zero_bus_width(r#"{ "memory": { "bus_width": 0 } }"#, "memory.bus_width")]
#[case::capacity_below_ram_pages(
    r#"{ "memory": { "ram_size": 1048576 }, "protector": { "capacity": 2 } }"#,
    "protector.capacity"
)]
#[case::capacity_not_power_of_two(r#"{ "protector": { "capacity": 1000 } }"#, "protector.capacity")]
fn invalid_values_are_rejected(#[case] json: &str, #[case] field: &str) {
    match Config::from_json(json) {
        Err(Error::InvalidValue { field: rejected, .. }) => assert_eq!(rejected, field),
        other => panic!("expected {field} to be rejected, got {other:?}"),
    }
}

#[test]
fn malformed_json_is_a_parse_error() {
    assert!(matches!(Config::from_json("{ core: 1 }"), Err(Error::Config(_))));
}

#[test]
fn loads_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "core": {{ "engine_args": "-M virt", "params": {{ "uart": "0x9000000" }} }} }}"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.core.engine_args, "-M virt");
    assert_eq!(config.core.params.get("uart").map(String::as_str), Some("0x9000000"));

    assert!(matches!(Config::from_file("/nonexistent/bridge.json"), Err(Error::Io(_))));
}

use tda_config::{
    consumed_pointers_for_mode, load_layered_yaml_from_strings, report_unused_keys, ConfigMode,
    UnusedKeyPolicy,
};

const YAML: &str = r#"
engine:
  activity_threshold: 50
  chunk_size: 20
  entities: [FPT, VCB]
store:
  timeout_ms: 5000
legacy:
  cumulative_add: true
"#;

#[test]
fn warn_mode_reports_unused_keys_without_error() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(ConfigMode::Status, &loaded.config_json, UnusedKeyPolicy::Warn)
        .expect("warn mode must not error");

    assert!(!report.is_clean());
    assert!(report
        .unused_leaf_pointers
        .contains(&"/legacy/cumulative_add".to_string()));
    // status does not read the batch entity list or chunk size
    assert!(report
        .unused_leaf_pointers
        .contains(&"/engine/entities/0".to_string()));
    assert!(report
        .unused_leaf_pointers
        .contains(&"/engine/chunk_size".to_string()));
}

#[test]
fn fail_mode_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let err = report_unused_keys(ConfigMode::Batch, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_UNUSED_KEYS"));
    assert!(msg.contains("mode=BATCH"));
    assert!(msg.contains("/legacy/cumulative_add"));
}

#[test]
fn consumed_keys_are_not_flagged_and_output_is_sorted() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report =
        report_unused_keys(ConfigMode::Batch, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(report.unused_leaf_pointers, vec!["/legacy/cumulative_add".to_string()]);

    let mut sorted = report.consumed_prefixes.clone();
    sorted.sort();
    assert_eq!(report.consumed_prefixes, sorted);
}

#[test]
fn every_mode_consumes_the_store_section() {
    for mode in [
        ConfigMode::ProcessNew,
        ConfigMode::RecomputeAll,
        ConfigMode::Status,
        ConfigMode::Batch,
    ] {
        assert!(consumed_pointers_for_mode(mode).contains(&"/store"));
    }
}

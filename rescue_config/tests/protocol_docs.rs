use rescue_config::{load_protocol_docs, parse_protocol_docs};
use std::fs;
use tempfile::tempdir;

#[test]
fn batch_keeps_valid_entries_next_to_malformed_ones() {
    let text = r#"[
        {"id": 1, "name": "Default", "seizure_duration_threshold": 2,
         "steps": [{"duration": 1, "dose_mg": 5, "medication": "X"}],
         "total_duration": 1},
        {"id": 2, "name": "Broken", "seizure_duration_threshold": 2}
    ]"#;

    let docs = parse_protocol_docs(text).expect("payload is JSON");
    assert_eq!(docs.len(), 2);
    let first = docs[0].as_ref().expect("first entry valid");
    assert_eq!(first.name, "Default");
    assert_eq!(first.steps[0].medication.as_deref(), Some("X"));
    let err = docs[1].as_ref().expect_err("second entry lacks steps");
    assert!(err.to_string().contains("steps"));
}

#[test]
fn negative_id_is_a_per_entry_error() {
    let docs = parse_protocol_docs(
        r#"[{"id": -1, "name": "N", "seizure_duration_threshold": 1,
             "steps": [{"duration": 1, "dose_mg": 1}]}]"#,
    )
    .expect("payload is JSON");
    assert!(docs[0].is_err());
}

#[test]
fn missing_total_duration_is_summed() {
    let docs = parse_protocol_docs(
        r#"{"id": 5, "name": "Sum", "seizure_duration_threshold": 1,
            "steps": [{"duration": 1.5, "dose_mg": 1}, {"duration": 2.5, "dose_mg": 1}]}"#,
    )
    .expect("payload is JSON");
    let doc = docs[0].as_ref().expect("valid");
    assert_eq!(doc.total_duration, None);
    assert!((doc.total_duration_or_sum() - 4.0).abs() < 1e-9);
}

#[test]
fn syntax_error_fails_whole_payload() {
    let err = parse_protocol_docs("[{").expect_err("not JSON");
    assert!(format!("{err}").contains("not valid JSON"));
}

#[test]
fn load_reports_missing_file_path() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    let err = load_protocol_docs(&missing).expect_err("missing file");
    assert!(format!("{err:#}").contains("nope.json"));
}

#[test]
fn load_reads_file_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("protocols.json");
    fs::write(
        &path,
        r#"{"id": 9, "name": "Disk", "seizure_duration_threshold": 3,
            "steps": [{"duration": 1, "dose_mg": 2}]}"#,
    )
    .unwrap();
    let docs = load_protocol_docs(&path).expect("load");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].as_ref().unwrap().id, 9);
}

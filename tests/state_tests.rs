// SPDX-License-Identifier: PMPL-1.0-or-later

//! Tests for the on-disk technique state layout

use cloud_ambush::state::{
    FileSystemStateManager, StateError, StateStore, OUTPUTS_FILE_NAME, STATE_FILE_NAME,
    TERRAFORM_FILE_NAME,
};
use cloud_ambush::types::{Outputs, TechniqueState};
use std::fs;
use tempfile::TempDir;

const ID: &str = "gcp.persistence.create-admin-service-account";

fn manager(dir: &TempDir) -> FileSystemStateManager {
    FileSystemStateManager::new(dir.path(), ID, Some(b"terraform {}\n".to_vec()))
}

#[test]
fn test_state_round_trip_uses_lowercase_tokens() {
    let dir = TempDir::new().unwrap();
    let store = manager(&dir);

    assert_eq!(store.get_state().unwrap(), None);
    for state in [
        TechniqueState::Warm,
        TechniqueState::Detonated,
        TechniqueState::Cold,
    ] {
        store.set_state(state).unwrap();
        assert_eq!(store.get_state().unwrap(), Some(state));
    }

    store.set_state(TechniqueState::Detonated).unwrap();
    let raw = fs::read_to_string(dir.path().join(ID).join(STATE_FILE_NAME)).unwrap();
    assert_eq!(raw, "detonated");
}

#[test]
fn test_empty_state_file_means_no_state() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(ID)).unwrap();
    fs::write(dir.path().join(ID).join(STATE_FILE_NAME), "  \n").unwrap();

    assert_eq!(manager(&dir).get_state().unwrap(), None);
}

#[test]
fn test_unknown_state_token_is_corruption() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(ID)).unwrap();
    fs::write(dir.path().join(ID).join(STATE_FILE_NAME), "exploded\n").unwrap();

    let err = manager(&dir).get_state().unwrap_err();
    match err {
        StateError::CorruptState { token, .. } => assert_eq!(token, "exploded"),
        other => panic!("expected a corrupt state error, got {}", other),
    }
}

#[test]
fn test_missing_outputs_are_empty() {
    let dir = TempDir::new().unwrap();
    assert!(manager(&dir).get_outputs().unwrap().is_empty());
}

#[test]
fn test_outputs_round_trip_as_json_object() {
    let dir = TempDir::new().unwrap();
    let store = manager(&dir);
    let mut outputs = Outputs::new();
    outputs.insert("role_arn".to_string(), "arn:aws:iam::0:role/x".to_string());
    outputs.insert("display".to_string(), "Role ready".to_string());

    store.write_outputs(&outputs).unwrap();
    assert_eq!(store.get_outputs().unwrap(), outputs);

    let raw = fs::read(dir.path().join(ID).join(OUTPUTS_FILE_NAME)).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(value["role_arn"], "arn:aws:iam::0:role/x");
}

#[test]
fn test_malformed_outputs_are_reported() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(ID)).unwrap();
    fs::write(dir.path().join(ID).join(OUTPUTS_FILE_NAME), "{not json").unwrap();

    let err = manager(&dir).get_outputs().unwrap_err();
    assert!(matches!(err, StateError::Outputs { .. }));
}

#[test]
fn test_extract_writes_terraform_source_once() {
    let dir = TempDir::new().unwrap();
    let store = manager(&dir);
    let main_tf = dir.path().join(ID).join(TERRAFORM_FILE_NAME);

    store.extract_technique().unwrap();
    assert_eq!(fs::read(&main_tf).unwrap(), b"terraform {}\n");

    fs::write(&main_tf, "# edited by hand\n").unwrap();
    store.extract_technique().unwrap();
    assert_eq!(fs::read_to_string(&main_tf).unwrap(), "# edited by hand\n");
}

#[test]
fn test_root_is_created_on_first_write() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nested").join("home");
    let store = FileSystemStateManager::new(&root, ID, None);

    store.set_state(TechniqueState::Warm).unwrap();
    assert!(root.join(ID).is_dir());
    assert_eq!(store.root_directory(), root.as_path());
    assert_eq!(store.technique_directory(), root.join(ID));
}

#[test]
fn test_cleanup_removes_directory_and_tolerates_absence() {
    let dir = TempDir::new().unwrap();
    let store = manager(&dir);
    store.extract_technique().unwrap();
    store.set_state(TechniqueState::Warm).unwrap();

    store.cleanup_technique().unwrap();
    assert!(!dir.path().join(ID).exists());
    assert_eq!(store.get_state().unwrap(), None);

    store.cleanup_technique().expect("removing twice is fine");
}

#[test]
fn test_techniques_do_not_share_directories() {
    let dir = TempDir::new().unwrap();
    let first = FileSystemStateManager::new(dir.path(), "aws.a", None);
    let second = FileSystemStateManager::new(dir.path(), "aws.b", None);

    first.set_state(TechniqueState::Detonated).unwrap();
    assert_eq!(second.get_state().unwrap(), None);
    second.cleanup_technique().unwrap();
    assert_eq!(first.get_state().unwrap(), Some(TechniqueState::Detonated));
}

#[test]
fn test_ids_outside_the_root_are_refused() {
    let dir = TempDir::new().unwrap();
    let sibling = FileSystemStateManager::new(dir.path(), "aws.other", None);
    sibling.set_state(TechniqueState::Detonated).unwrap();

    for id in ["", " ", ".", "..", "a/../..", "nested/id", "..\\up"] {
        let store = FileSystemStateManager::new(dir.path(), id, Some(b"terraform {}\n".to_vec()));
        let refused = |result: Result<(), StateError>| {
            matches!(result, Err(StateError::InvalidTechniqueId { .. }))
        };

        assert!(refused(store.cleanup_technique()), "cleanup of {:?}", id);
        assert!(refused(store.set_state(TechniqueState::Warm)), "set_state of {:?}", id);
        assert!(refused(store.extract_technique()), "extract of {:?}", id);
        assert!(refused(store.write_outputs(&Outputs::new())), "outputs of {:?}", id);
        assert!(matches!(
            store.get_state(),
            Err(StateError::InvalidTechniqueId { .. })
        ));
    }

    assert!(dir.path().is_dir());
    assert_eq!(sibling.get_state().unwrap(), Some(TechniqueState::Detonated));
}

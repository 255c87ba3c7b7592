// SPDX-License-Identifier: PMPL-1.0-or-later

//! Tests for running one operation across many techniques

mod common;

use anyhow::anyhow;
use cloud_ambush::batch::{self, BatchConfig, BatchStatus, Operation};
use cloud_ambush::state::{FileSystemStateManager, StateStore};
use cloud_ambush::technique::Technique;
use cloud_ambush::types::{Platform, TechniqueState};
use common::{provisioned, Counter, DenyAll, FakeFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn state_of(root: &std::path::Path, id: &str) -> Option<TechniqueState> {
    FileSystemStateManager::new(root, id, None).get_state().unwrap()
}

#[test]
fn test_batch_detonates_everything_in_submission_order() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(dir.path());
    let detonations = Counter::default();
    let techniques: Vec<Arc<Technique>> = (0..12)
        .map(|i| Arc::new(provisioned(&format!("aws.test.technique-{:02}", i), &detonations)))
        .collect();

    let report = batch::run(
        &techniques,
        Operation::Detonate { cleanup: false },
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();

    assert_eq!(report.succeeded, 12);
    assert!(!report.had_failures());
    assert_eq!(detonations.get(), 12);
    assert_eq!(factory.provisioner.count("apply"), 12);
    let ids: Vec<&str> = report
        .outcomes
        .iter()
        .map(|o| o.technique_id.as_str())
        .collect();
    let expected: Vec<&str> = techniques.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, expected);
    for technique in &techniques {
        assert_eq!(
            state_of(dir.path(), &technique.id),
            Some(TechniqueState::Detonated)
        );
    }
}

#[test]
fn test_batch_never_exceeds_worker_count() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(dir.path());
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let techniques: Vec<Arc<Technique>> = (0..10)
        .map(|i| {
            let (in_flight, peak) = (in_flight.clone(), peak.clone());
            Arc::new(Technique::new(
                format!("k8s.test.slow-{}", i),
                Platform::Kubernetes,
                move |_| {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                },
            ))
        })
        .collect();

    let config = BatchConfig {
        worker_count: 3,
        force: false,
    };
    let report = batch::run(
        &techniques,
        Operation::Detonate { cleanup: false },
        &config,
        &factory,
    )
    .unwrap();

    assert_eq!(report.succeeded, 10);
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[test]
fn test_one_failure_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(dir.path());
    let detonations = Counter::default();
    let techniques = vec![
        Arc::new(provisioned("aws.test.first", &detonations)),
        Arc::new(Technique::new("aws.test.broken", Platform::Aws, |_| {
            Err(anyhow!("throttled"))
        })),
        Arc::new(provisioned("aws.test.last", &detonations)),
    ];

    let report = batch::run(
        &techniques,
        Operation::Detonate { cleanup: false },
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(report.had_failures());
    assert!(!report.had_fatal());
    match &report.outcomes[1].status {
        BatchStatus::Failed(message) => assert!(message.contains("throttled")),
        other => panic!("expected a failure, got {:?}", other),
    }
    assert_eq!(detonations.get(), 2);
}

#[test]
fn test_detonate_with_cleanup_ends_cold() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(dir.path());
    let techniques = vec![Arc::new(provisioned("aws.test.one-shot", &Counter::default()))];

    let report = batch::run(
        &techniques,
        Operation::Detonate { cleanup: true },
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.outcomes[0].state, Some(TechniqueState::Cold));
    assert_eq!(factory.provisioner.calls(), vec!["apply", "destroy"]);
    assert!(!dir.path().join("aws.test.one-shot").exists());
}

#[test]
fn test_detonation_error_wins_over_cleanup_error() {
    let dir = TempDir::new().unwrap();
    let mut factory = FakeFactory::new(dir.path());
    factory.provisioner = Arc::new(common::FakeProvisioner {
        fail_destroy: true,
        ..common::FakeProvisioner::default()
    });
    let techniques = vec![Arc::new(
        Technique::new("aws.test.doomed", Platform::Aws, |_| {
            Err(anyhow!("detonation refused"))
        })
        .with_prerequisites(common::TERRAFORM_SOURCE),
    )];

    let report = batch::run(
        &techniques,
        Operation::Detonate { cleanup: true },
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();

    match &report.outcomes[0].status {
        BatchStatus::Failed(message) => assert!(message.contains("detonation refused")),
        other => panic!("expected a failure, got {:?}", other),
    }
    // Cleanup still ran after the failed detonation.
    assert_eq!(factory.provisioner.calls(), vec!["apply", "destroy"]);
}

#[test]
fn test_revert_skips_techniques_without_revert() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(dir.path());
    let techniques = vec![Arc::new(Technique::new(
        "azure.test.no-revert",
        Platform::Azure,
        |_| Ok(()),
    ))];

    let report = batch::run(
        &techniques,
        Operation::Revert,
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();

    assert_eq!(report.skipped, 1);
    assert!(!report.had_failures());
}

#[test]
fn test_clean_up_all_skips_cold_techniques() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(dir.path());
    FileSystemStateManager::new(dir.path(), "aws.test.warm", None)
        .set_state(TechniqueState::Warm)
        .unwrap();
    let techniques = vec![
        Arc::new(provisioned("aws.test.warm", &Counter::default())),
        Arc::new(provisioned("aws.test.cold", &Counter::default())),
    ];

    let report = batch::run(
        &techniques,
        Operation::CleanUp { skip_cold: true },
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(factory.provisioner.count("destroy"), 1);

    let explicit = batch::run(
        &techniques[1..],
        Operation::CleanUp { skip_cold: false },
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();
    assert_eq!(explicit.failed, 1);
}

#[test]
fn test_authentication_failure_is_flagged_fatal() {
    let dir = TempDir::new().unwrap();
    let mut factory = FakeFactory::new(dir.path());
    factory.authenticator = Arc::new(DenyAll);
    let techniques = vec![Arc::new(provisioned("aws.test.locked-out", &Counter::default()))];

    let report = batch::run(
        &techniques,
        Operation::WarmUp,
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();

    assert!(report.had_fatal());
    assert!(factory.provisioner.calls().is_empty());
}

#[test]
fn test_report_serializes_outcomes() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(dir.path());
    let techniques = vec![Arc::new(provisioned("aws.test.reported", &Counter::default()))];

    let report = batch::run(
        &techniques,
        Operation::WarmUp,
        &BatchConfig::default(),
        &factory,
    )
    .unwrap();
    let path = dir.path().join("reports").join("warmup.json");
    batch::write_report(&report, &path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["operation"], "warm-up");
    assert_eq!(value["outcomes"][0]["technique_id"], "aws.test.reported");
    assert_eq!(value["outcomes"][0]["status"], "succeeded");
    assert_eq!(value["outcomes"][0]["state"], "warm");
}

#[test]
fn test_empty_batch() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(dir.path());
    let report = batch::run(&[], Operation::WarmUp, &BatchConfig::default(), &factory).unwrap();
    assert!(report.outcomes.is_empty());
    assert!(!report.had_failures());
}

// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use indexmap::IndexMap;
use multiscan_runner::{
    devices::StaticMetadata,
    errors::ScanError,
    reporter::{BatchVerdict, ScanEventKind},
    runner::scan,
};
use pretty_assertions::assert_eq;
use std::{collections::BTreeSet, sync::Arc};

#[test]
fn crashed_worker_fails_only_its_batch() -> Result<()> {
    let mut fixture = ScanFixture::new(2);
    fixture.options.parallelize = true;
    let engine = Arc::new(
        FixtureEngine::new().with_status("AppB/Suite/testCrash", FixtureStatus::Crash),
    );
    let collaborators =
        collaborators(&engine).with_resource_pool(Box::new(device_pool(2)));
    let (stats, events) = fixture.run(
        &collector(&["AppA/Suite/testOk", "AppB/Suite/testCrash"], 1),
        collaborators,
    );

    ensure!(!stats.passed(), "a crashed batch fails the scan");
    assert_eq!(stats.batches_passed, 1);
    assert_eq!(stats.batches_crashed, 1);

    let finished = finished_batches(&events);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].batch_index, 0);
    assert!(matches!(finished[0].verdict, BatchVerdict::Passed));

    let crashed: Vec<_> = events
        .iter()
        .filter_map(|event| match event.kind {
            ScanEventKind::BatchCrashed { batch_index } => Some(batch_index),
            _ => None,
        })
        .collect();
    assert_eq!(crashed, vec![1]);
    Ok(())
}

#[test]
fn batches_get_distinct_devices_and_build_state() -> Result<()> {
    let mut fixture = ScanFixture::new(2);
    fixture.options.parallelize = true;
    let engine = Arc::new(
        FixtureEngine::new().with_status("AppB/Suite/testFlaky", FixtureStatus::Flaky {
            pass_attempt: 2,
        }),
    );
    let collaborators =
        collaborators(&engine).with_resource_pool(Box::new(device_pool(3)));
    let (stats, _) = fixture.run(
        &collector(
            &["AppA/Suite/testOk", "AppB/Suite/testFlaky", "AppC/Suite/testOk"],
            1,
        ),
        collaborators,
    );

    ensure!(stats.passed(), "every batch passes: {stats:?}");
    assert_eq!(stats.retry_total_count, 1, "workers report their retries");

    let invocations = engine.invocations();
    let destinations: BTreeSet<_> = invocations
        .iter()
        .map(|invocation| invocation.overrides.destination.clone())
        .collect();
    assert_eq!(destinations.len(), 3, "no two batches share a device");

    let derived_data: BTreeSet<_> = invocations
        .iter()
        .map(|invocation| invocation.overrides.derived_data_path.clone())
        .collect();
    assert_eq!(derived_data.len(), 3);

    // Retries of a batch stay on that batch's device.
    let batch_1: Vec<_> = invocations
        .iter()
        .filter(|invocation| invocation.batch_index == 1)
        .map(|invocation| invocation.overrides.destination.clone())
        .collect();
    assert_eq!(batch_1.len(), 2);
    assert_eq!(batch_1[0], batch_1[1]);
    Ok(())
}

#[test]
fn unsatisfiable_device_constraint_aborts_scan() {
    let mut fixture = ScanFixture::new(1);
    fixture.options.parallelize = true;
    let engine = Arc::new(FixtureEngine::new());
    let metadata = StaticMetadata::new(IndexMap::from([(
        "AppB".to_owned(),
        "17.0".parse().unwrap(),
    )]));
    let collaborators = collaborators(&engine)
        .with_resource_pool(Box::new(device_pool(2)))
        .with_metadata(Arc::new(metadata));

    let error = scan(
        &collector(&["AppA/Suite/testOk", "AppB/Suite/testOk"], 1),
        fixture.options.clone(),
        collaborators,
        |_| {},
    )
    .expect_err("no device runs platform 17.0");

    assert!(
        matches!(error, ScanError::DeviceAllocation { batch_index: 1, .. }),
        "{error:?}"
    );
    assert_eq!(engine.invocations().len(), 0, "no batch starts");
}

#[test]
fn parallel_batches_of_one_testable_keep_separate_reports() -> Result<()> {
    let mut fixture = ScanFixture::new(2);
    fixture.options.parallelize = true;
    let engine = Arc::new(
        FixtureEngine::new().with_status("App/Suite/testB", FixtureStatus::Flaky {
            pass_attempt: 2,
        }),
    );
    let collaborators =
        collaborators(&engine).with_resource_pool(Box::new(device_pool(2)));
    let (stats, events) = fixture.run(
        &collector(&["App/Suite/testA", "App/Suite/testB"], 2),
        collaborators,
    );
    ensure!(stats.passed(), "testB passes on retry: {stats:?}");

    let mut finished = finished_batches(&events);
    finished.sort_by_key(|summary| summary.batch_index);
    let junit_paths: Vec<_> = finished
        .iter()
        .map(|summary| {
            summary
                .collated
                .as_ref()
                .and_then(|collated| collated.junit_path.clone())
        })
        .collect();
    let root = fixture.output_root();
    assert_eq!(
        junit_paths,
        vec![
            Some(root.join("results-App-batch-0").join("report.junit")),
            Some(root.join("results-App-batch-1").join("report.junit")),
        ]
    );

    let tests: Vec<Vec<_>> = finished
        .iter()
        .map(|summary| {
            let collated = summary.collated.as_ref().expect("collation succeeded");
            collated
                .tests
                .iter()
                .map(|test| (test.identifier.clone(), test.passed, test.attempts))
                .collect()
        })
        .collect();
    assert_eq!(
        tests,
        vec![
            vec![("App/Suite/testA".to_owned(), true, 1)],
            vec![("App/Suite/testB".to_owned(), true, 2)],
        ]
    );
    ensure!(
        !root.join("report.junit").exists(),
        "nothing is written to the shared root"
    );
    Ok(())
}

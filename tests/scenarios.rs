//! End-to-end campaigns driven through the public harness interface, with
//! the test body standing in for the instrumented target.

use std::{
    fs,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use seedling::prelude::*;

fn out_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("seedling_e2e_{tag}_{}", std::process::id()))
}

fn branch(iid: i32, arm: i32) -> TraceEvent {
    TraceEvent::Branch { iid, arm }
}

/// Key of a branch event, as the coverage map derives it.
fn edge(iid: i32, arm: i32) -> i32 {
    (iid << 2) | arm
}

#[test]
fn first_trial_saves_and_identical_coverage_does_not() {
    let dir = out_dir("first_save");
    let config = GuidanceConfig::default()
        .with_rng_seed(1)
        .with_max_duration(Duration::from_millis(350));
    let guidance = StdGuidance::new(config, &dir).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    while guidance.has_input() {
        let mut source = guidance.get_input().unwrap();
        // Trivial target: reads one byte, covers one edge, succeeds
        callback.on_event(branch(1, 0)).unwrap();
        source.next_byte().unwrap();
        guidance.handle_result(RunResult::Success).unwrap();
    }

    assert!(guidance.num_trials() >= 1);
    assert_eq!(guidance.num_valid(), guidance.num_trials());
    assert_eq!(guidance.corpus_count(), 1, "only the first trial adds coverage");
    assert_eq!(guidance.unique_failure_count(), 0);
    assert!(dir.join("corpus").join("id_000000").is_file());
    assert!(dir.join("plot_data").is_file());

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn failing_inputs_are_deduplicated_by_stack_trace() {
    let dir = out_dir("ff_failure");
    let config = GuidanceConfig::default().with_rng_seed(7);
    let guidance = StdGuidance::new(config, &dir).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    let trace = vec![
        "com.example.Target.check".to_string(),
        "com.example.Target.run".to_string(),
    ];

    let mut failures_seen = 0;
    for _ in 0..8000 {
        let mut source = guidance.get_input().unwrap();
        callback.on_event(branch(1, 0)).unwrap();
        let first = source.next_byte().unwrap().expect("one byte");
        if first == 0xFF {
            failures_seen += 1;
            let failure = TargetFailure::new("first byte is 0xFF", trace.clone());
            guidance.handle_result(RunResult::Failure(failure)).unwrap();
        } else {
            guidance.handle_result(RunResult::Success).unwrap();
        }
    }

    assert!(failures_seen >= 2, "expected repeated failures, saw {failures_seen}");
    assert_eq!(guidance.unique_failure_count(), 1);

    let saved = fs::read(dir.join("failures").join("id_000000")).unwrap();
    assert_eq!(saved[0], 0xFF);
    assert!(!dir.join("failures").join("id_000001").exists());

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn parity_branches_get_one_responsible_input_each() {
    let dir = out_dir("parity");
    let config = GuidanceConfig::default().with_rng_seed(11);
    let guidance = StdGuidance::new(config, &dir).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    for _ in 0..2000 {
        let mut source = guidance.get_input().unwrap();
        let first = source.next_byte().unwrap().expect("one byte");
        // Each parity covers its own edge
        callback.on_event(branch(1, i32::from(first % 2))).unwrap();
        guidance.handle_result(RunResult::Success).unwrap();
        if guidance.corpus_count() == 2 {
            break;
        }
    }

    assert_eq!(guidance.total_coverage().non_zero_count(), 2);
    assert_eq!(guidance.corpus_count(), 2);
    assert_eq!(guidance.responsibilities_of(0).unwrap().len(), 1);
    assert_eq!(guidance.responsibilities_of(1).unwrap().len(), 1);
    assert!(guidance.responsibilities_partition_coverage());

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn stronger_inputs_steal_all_responsibilities() {
    let dir = out_dir("steal");
    let mut config = GuidanceConfig::default().with_rng_seed(13);
    config.steal_responsibility = true;
    let guidance = StdGuidance::new(config, &dir).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    let (e1, e2, e3) = (edge(1, 0), edge(2, 0), edge(3, 0));

    // Input A: coverage {e1, e2}, size 10, invalid
    let mut source = guidance.get_input().unwrap();
    for _ in 0..10 {
        source.next_byte().unwrap();
    }
    callback.on_event(branch(1, 0)).unwrap();
    callback.on_event(branch(2, 0)).unwrap();
    guidance.handle_result(RunResult::Invalid).unwrap();
    assert_eq!(guidance.responsibilities_of(0).unwrap(), vec![e1, e2]);

    // Input B: coverage {e1}, size 10, valid; takes e1 as new valid coverage
    let mut source = guidance.get_input().unwrap();
    for _ in 0..10 {
        source.next_byte().unwrap();
    }
    callback.on_event(branch(1, 0)).unwrap();
    guidance.handle_result(RunResult::Success).unwrap();
    assert_eq!(guidance.corpus_count(), 2);
    assert_eq!(guidance.responsibilities_of(0).unwrap(), vec![e2]);
    assert_eq!(guidance.responsibilities_of(1).unwrap(), vec![e1]);

    // Input C: coverage {e1, e2, e3}, size 5: strictly stronger than both
    let mut source = guidance.get_input().unwrap();
    for _ in 0..5 {
        source.next_byte().unwrap();
    }
    for iid in [1, 2, 3] {
        callback.on_event(branch(iid, 0)).unwrap();
    }
    guidance.handle_result(RunResult::Success).unwrap();

    assert_eq!(guidance.corpus_count(), 3);
    assert!(guidance.responsibilities_of(0).unwrap().is_empty());
    assert!(guidance.responsibilities_of(1).unwrap().is_empty());
    assert_eq!(guidance.responsibilities_of(2).unwrap(), vec![e1, e2, e3]);
    assert!(!guidance.is_favored(0).unwrap());
    assert!(!guidance.is_favored(1).unwrap());
    assert!(guidance.is_favored(2).unwrap());
    assert!(guidance.responsibilities_partition_coverage());

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn parent_budget_exhaustion_completes_the_cycle() {
    let dir = out_dir("cycle");
    let config = GuidanceConfig::default().with_rng_seed(17);
    let guidance = StdGuidance::new(config, &dir).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    // Input A: one edge, favored; child budget 50 * 20
    let mut source = guidance.get_input().unwrap();
    source.next_byte().unwrap();
    callback.on_event(branch(1, 0)).unwrap();
    guidance.handle_result(RunResult::Success).unwrap();

    // Input B: same edge, hotter bucket; saved for the new count bits but
    // responsible for nothing, so its budget stays at the baseline of 50
    let mut source = guidance.get_input().unwrap();
    source.next_byte().unwrap();
    for _ in 0..3 {
        callback.on_event(branch(1, 0)).unwrap();
    }
    guidance.handle_result(RunResult::Success).unwrap();
    assert_eq!(guidance.corpus_count(), 2);
    assert!(!guidance.is_favored(1).unwrap());

    let mut b_trials = 0;
    for _ in 0..3000 {
        let mut source = guidance.get_input().unwrap();
        if guidance.cycles_completed() == 1 {
            // This get_input wrapped the queue and closed the cycle
            break;
        }
        if guidance.current_parent_index() == 1 {
            b_trials += 1;
        }
        source.next_byte().unwrap();
        callback.on_event(branch(1, 0)).unwrap();
        guidance.handle_result(RunResult::Success).unwrap();
    }

    assert_eq!(b_trials, NUM_CHILDREN_BASELINE);
    assert_eq!(guidance.cycles_completed(), 1);
    assert_eq!(guidance.current_parent_index(), 0);
    assert_eq!(guidance.num_favored_last_cycle(), 1);

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn overlong_runs_classify_as_timeouts_and_save_once() {
    let dir = out_dir("timeout");
    let config = GuidanceConfig::default()
        .with_rng_seed(19)
        .with_timeout(Duration::from_millis(50));
    let guidance = StdGuidance::new(config, &dir).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    let trace = vec!["com.example.Target.spin".to_string()];

    for round in 0..2 {
        let mut source = guidance.get_input().unwrap();
        source.next_byte().unwrap();

        // The target spins, emitting events, until the guidance raises the
        // per-run timeout from inside the callback
        let spin_start = Instant::now();
        let timeout = loop {
            match callback.on_event(branch(1, 0)) {
                Ok(()) => {
                    assert!(
                        spin_start.elapsed() < Duration::from_secs(10),
                        "timeout never raised"
                    );
                }
                Err(timeout) => break timeout,
            }
        };
        assert!(timeout.elapsed >= timeout.limit);

        let failure = TargetFailure::new(timeout.to_string(), trace.clone());
        guidance.handle_result(RunResult::Timeout(failure)).unwrap();

        assert_eq!(guidance.unique_failure_count(), 1, "round {round}");
    }

    assert!(dir.join("failures").join("id_000000").is_file());
    assert!(!dir.join("failures").join("id_000001").exists());

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn execution_indexed_campaign_reaches_both_parities() {
    let dir = out_dir("indexed");
    let config = GuidanceConfig::default()
        .with_rng_seed(23)
        .with_execution_indexing();
    let guidance = StdGuidance::new(config, &dir).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    for _ in 0..2000 {
        let mut source = guidance.get_input().unwrap();
        // The target enters a function, reads two bytes there, branches on
        // the first byte's parity, and returns
        callback.on_event(TraceEvent::Call { iid: 9 }).unwrap();
        let first = source.next_byte().unwrap().expect("one byte");
        source.next_byte().unwrap();
        callback.on_event(branch(1, i32::from(first % 2))).unwrap();
        callback.on_event(TraceEvent::Return { iid: 9 }).unwrap();
        guidance.handle_result(RunResult::Success).unwrap();
        if guidance.total_coverage().non_zero_count() >= 3 {
            break;
        }
    }

    // Both parity edges plus the call edge
    assert_eq!(guidance.total_coverage().non_zero_count(), 3);
    assert!(guidance.corpus_count() >= 2);
    assert!(guidance.responsibilities_partition_coverage());

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn seeds_are_consumed_first_and_saved_on_new_coverage() {
    let dir = out_dir("seeds");
    let seed_dir = out_dir("seeds_in");
    fs::create_dir_all(&seed_dir).unwrap();
    let seed_path = seed_dir.join("seed_0");
    fs::write(&seed_path, [0xAB, 0xCD, 0xEF]).unwrap();

    let config = GuidanceConfig::default().with_rng_seed(29);
    let guidance = StdGuidance::with_seeds(config, &dir, [&seed_path]).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    let mut source = guidance.get_input().unwrap();
    assert_eq!(source.next_byte().unwrap(), Some(0xAB));
    assert_eq!(source.next_byte().unwrap(), Some(0xCD));
    callback.on_event(branch(1, 0)).unwrap();
    guidance.handle_result(RunResult::Success).unwrap();

    assert_eq!(guidance.corpus_count(), 1);
    // Only the two requested bytes survive the trim
    assert_eq!(fs::read(dir.join("corpus").join("id_000000")).unwrap(), [0xAB, 0xCD]);

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
    fs::remove_dir_all(&seed_dir).ok();
}

#[test]
fn blind_mode_saves_to_disk_but_keeps_no_corpus() {
    let dir = out_dir("blind");
    let mut config = GuidanceConfig::default().with_rng_seed(31);
    config.totally_random = true;
    let guidance = StdGuidance::new(config, &dir).unwrap();
    let callback = guidance.generate_callback(thread::current().id()).unwrap();

    for _ in 0..3 {
        let mut source = guidance.get_input().unwrap();
        source.next_byte().unwrap();
        callback.on_event(branch(1, 0)).unwrap();
        guidance.handle_result(RunResult::Success).unwrap();
    }

    assert_eq!(guidance.corpus_count(), 0);
    assert!(dir.join("corpus").join("id_000000").is_file());

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn a_second_target_thread_is_rejected() {
    let dir = out_dir("threads");
    let guidance = StdGuidance::new(GuidanceConfig::default(), &dir).unwrap();

    let here = thread::current().id();
    guidance.generate_callback(here).unwrap();
    // Re-registering the same thread is fine
    guidance.generate_callback(here).unwrap();

    let other = thread::spawn(|| thread::current().id()).join().unwrap();
    let err = guidance.generate_callback(other).unwrap_err();
    assert!(matches!(err, Error::IllegalState(..)));

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn mapped_reads_without_instrumentation_are_rejected() {
    let dir = out_dir("no_instr");
    let config = GuidanceConfig::default()
        .with_rng_seed(37)
        .with_execution_indexing();
    let guidance = StdGuidance::new(config, &dir).unwrap();

    let mut source = guidance.get_input().unwrap();
    let err = source.next_byte().unwrap_err();
    assert!(matches!(err, Error::IllegalState(..)));

    drop(guidance);
    fs::remove_dir_all(&dir).ok();
}

use std::sync::Arc;

use googletest::prelude::*;
use rstest::rstest;
use tern_common::config::BatcherTestConfig;
use tern_common::error::{ClientErrorCode, TernError};

use crate::op::OpGroup;
use crate::rpc::{PerRowError, WriteResponse};

use super::testkit::{
    capture_flush, complete_err, complete_ok, hash_table, range_table, read_op, statuses_of,
    tablet_over, write_op, TestHarness,
};

#[rstest]
fn lookup_failure_spreads_to_all_ops_of_the_partition_key() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let table = hash_table("orders");

    // Two writes of the same row key share one partition key; the first
    // lookup fails, the second would resolve.
    let first = write_op(&table, b"hot-row");
    let second = write_op(&table, b"hot-row");
    let partition_key = first.partition_key().expect("hash key must encode");
    harness
        .meta_cache
        .fail_key_once(partition_key, TernError::Io("lookup failed".to_owned()));

    batcher.add(first);
    batcher.add(second);

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    assert_that!(harness.messenger.rpc_count(), eq(0_usize));
    assert_that!(statuses_of(&statuses), eq(&vec![Err(TernError::TabletErrors)]));

    let errors = batcher.get_and_clear_pending_errors();
    assert_that!(errors.len(), eq(2_usize));
    for error in &errors {
        assert_that!(error.error(), eq(&TernError::Io("lookup failed".to_owned())));
    }
}

#[rstest]
fn unrelated_partition_keys_survive_a_failed_sibling() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let table = range_table("orders");

    harness
        .meta_cache
        .fail_key_once(b"doomed".to_vec(), TernError::Io("lookup failed".to_owned()));
    batcher.add(write_op(&table, b"doomed"));
    batcher.add(write_op(&table, b"healthy"));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    let rpcs = harness.messenger.take_rpcs();
    assert_that!(rpcs.len(), eq(1_usize));
    assert_that!(rpcs[0].ops().len(), eq(1_usize));
    assert_that!(
        rpcs[0].ops()[0].partition_key().as_slice(),
        eq(b"healthy".as_slice())
    );

    complete_ok(&rpcs[0]);
    assert_that!(statuses_of(&statuses), eq(&vec![Err(TernError::TabletErrors)]));
    assert_that!(batcher.get_and_clear_pending_errors().len(), eq(1_usize));
}

#[rstest]
fn partition_list_version_mismatch_aborts_the_whole_batch() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 8)]);
    let batcher = harness.batcher();
    let table = range_table("orders");
    let pinned = Arc::new(
        crate::op::Operation::new(
            Arc::clone(&table),
            OpGroup::Write,
            b"k".as_slice(),
            b"v".as_slice(),
        )
        .with_partition_list_version(7),
    );
    batcher.add(pinned);

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    assert_that!(harness.messenger.rpc_count(), eq(0_usize));
    let statuses = statuses_of(&statuses);
    assert_that!(statuses.len(), eq(1_usize));
    let code = match &statuses[0] {
        Err(error) => error.client_error_code(),
        Ok(()) => None,
    };
    assert_that!(
        code,
        eq(Some(ClientErrorCode::TablePartitionListVersionDoesNotMatch))
    );
    assert_that!(batcher.get_and_clear_pending_errors().len(), eq(1_usize));
}

#[rstest]
fn per_row_error_fails_only_the_indexed_op() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let table = range_table("orders");
    batcher.add(write_op(&table, b"a"));
    batcher.add(write_op(&table, b"b"));
    batcher.add(write_op(&table, b"c"));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);
    let rpcs = harness.messenger.take_rpcs();
    assert_that!(rpcs.len(), eq(1_usize));

    rpcs[0].write_finished(
        Ok(()),
        WriteResponse {
            propagated_hybrid_time: None,
            used_read_time: None,
            per_row_errors: vec![PerRowError::new(
                1,
                TernError::InvalidArgument("duplicate primary key".to_owned()),
            )],
        },
    );

    assert_that!(statuses_of(&statuses), eq(&vec![Err(TernError::TabletErrors)]));
    let errors = batcher.get_and_clear_pending_errors();
    assert_that!(errors.len(), eq(1_usize));
    assert_that!(
        errors[0].error(),
        eq(&TernError::InvalidArgument("duplicate primary key".to_owned()))
    );
    assert_that!(errors[0].op().row_key(), eq(b"b".as_slice()));
}

#[rstest]
fn out_of_bound_row_index_is_discarded() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let table = range_table("orders");
    batcher.add(write_op(&table, b"a"));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);
    let rpcs = harness.messenger.take_rpcs();

    rpcs[0].write_finished(
        Ok(()),
        WriteResponse {
            propagated_hybrid_time: None,
            used_read_time: None,
            per_row_errors: vec![PerRowError::new(
                5,
                TernError::InvalidArgument("phantom row".to_owned()),
            )],
        },
    );

    assert_that!(statuses_of(&statuses), eq(&vec![Ok(())]));
    assert_that!(batcher.get_and_clear_pending_errors().is_empty(), eq(true));
}

#[rstest]
fn rpc_level_failure_marks_every_op_of_the_rpc() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let table = range_table("orders");
    batcher.add(write_op(&table, b"a"));
    batcher.add(write_op(&table, b"b"));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);
    let rpcs = harness.messenger.take_rpcs();

    complete_err(&rpcs[0], TernError::TimedOut("rpc deadline".to_owned()));

    assert_that!(statuses_of(&statuses), eq(&vec![Err(TernError::TabletErrors)]));
    let errors = batcher.get_and_clear_pending_errors();
    assert_that!(errors.len(), eq(2_usize));
    for error in &errors {
        assert_that!(
            error.error(),
            eq(&TernError::TimedOut("rpc deadline".to_owned()))
        );
    }
}

#[rstest]
fn stale_partition_list_code_marks_the_table() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let table = range_table("orders");
    harness.meta_cache.fail_key_once(
        b"k".to_vec(),
        TernError::Client {
            code: ClientErrorCode::TablePartitionListIsStale,
            message: "partition list changed".to_owned(),
        },
    );
    batcher.add(write_op(&table, b"k"));
    assert_that!(table.partition_list_is_stale(), eq(false));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    assert_that!(statuses_of(&statuses), eq(&vec![Err(TernError::TabletErrors)]));
    assert_that!(table.partition_list_is_stale(), eq(true));
}

#[rstest]
fn combine_knob_aggregates_a_single_error_kind_directly() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let mut raw = harness.raw_batcher();
    raw.set_test_config(BatcherTestConfig {
        combine_errors: true,
        simulate_partition_mismatch_probability: 0.0,
    });
    let batcher = Arc::new(raw);

    let table = range_table("orders");
    harness
        .meta_cache
        .fail_key_once(b"k".to_vec(), TernError::Io("lookup failed".to_owned()));
    batcher.add(write_op(&table, b"k"));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    assert_that!(
        statuses_of(&statuses),
        eq(&vec![Err(TernError::Io("lookup failed".to_owned()))])
    );
}

#[rstest]
fn combine_knob_reports_combined_on_mixed_error_kinds() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let mut raw = harness.raw_batcher();
    raw.set_test_config(BatcherTestConfig {
        combine_errors: true,
        simulate_partition_mismatch_probability: 0.0,
    });
    let batcher = Arc::new(raw);

    let table = range_table("orders");
    harness
        .meta_cache
        .fail_key_once(b"a".to_vec(), TernError::Io("lookup failed".to_owned()));
    harness
        .meta_cache
        .fail_key_once(b"b".to_vec(), TernError::TimedOut("lookup late".to_owned()));
    batcher.add(write_op(&table, b"a"));
    batcher.add(write_op(&table, b"b"));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    assert_that!(statuses_of(&statuses), eq(&vec![Err(TernError::Combined)]));
    assert_that!(batcher.get_and_clear_pending_errors().len(), eq(2_usize));
}

#[rstest]
fn simulated_partition_mismatch_fails_resolved_ops() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let mut raw = harness.raw_batcher();
    raw.set_test_config(BatcherTestConfig {
        combine_errors: false,
        simulate_partition_mismatch_probability: 1.0,
    });
    let batcher = Arc::new(raw);

    let table = range_table("orders");
    batcher.add(write_op(&table, b"k"));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    assert_that!(harness.messenger.rpc_count(), eq(0_usize));
    assert_that!(statuses_of(&statuses), eq(&vec![Err(TernError::TabletErrors)]));
    let errors = batcher.get_and_clear_pending_errors();
    assert_that!(errors.len(), eq(1_usize));
    assert_that!(
        matches!(errors[0].error(), TernError::InternalError(_)),
        eq(true)
    );
}

#[rstest]
fn empty_hash_partition_key_fails_writes_synchronously() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let table = hash_table("orders");
    batcher.add(write_op(&table, b""));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    assert_that!(harness.meta_cache.lookup_count(), eq(0_usize));
    let statuses = statuses_of(&statuses);
    assert_that!(statuses.len(), eq(1_usize));
    assert_that!(
        matches!(statuses[0], Err(TernError::IllegalState(_))),
        eq(true)
    );
    assert_that!(harness.session.finished(), eq(1_usize));
}

#[rstest]
fn empty_hash_partition_key_is_fine_for_reads() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let table = hash_table("orders");
    batcher.add(read_op(&table, b"", OpGroup::LeaderRead));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);
    for rpc in harness.messenger.take_rpcs() {
        complete_ok(&rpc);
    }

    assert_that!(statuses_of(&statuses), eq(&vec![Ok(())]));
}

#[rstest]
fn abort_fails_in_flight_ops_and_is_idempotent() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    harness.meta_cache.defer_lookups();
    let batcher = harness.batcher();
    let table = range_table("orders");
    batcher.add(write_op(&table, b"a"));
    batcher.add(write_op(&table, b"b"));

    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);

    batcher.abort(TernError::Aborted("session closing".to_owned()));
    batcher.abort(TernError::Aborted("second call".to_owned()));

    assert_that!(
        statuses_of(&statuses),
        eq(&vec![Err(TernError::Aborted("session closing".to_owned()))])
    );
    assert_that!(batcher.get_and_clear_pending_errors().len(), eq(2_usize));

    // Lookups finishing after the abort may not resurrect the batch.
    harness.meta_cache.fire_deferred();
    assert_that!(harness.messenger.rpc_count(), eq(0_usize));
    assert_that!(
        statuses_of(&statuses),
        eq(&vec![Err(TernError::Aborted("session closing".to_owned()))])
    );
}

#[rstest]
fn abort_after_completion_is_a_no_op() {
    let harness = TestHarness::new(vec![tablet_over("tab-a", b"", b"", 1)]);
    let batcher = harness.batcher();
    let (callback, statuses) = capture_flush();
    batcher.flush_async(callback, false);
    assert_that!(statuses_of(&statuses), eq(&vec![Ok(())]));

    batcher.abort(TernError::Aborted("too late".to_owned()));

    assert_that!(statuses_of(&statuses), eq(&vec![Ok(())]));
    assert_that!(batcher.get_and_clear_pending_errors().is_empty(), eq(true));
}

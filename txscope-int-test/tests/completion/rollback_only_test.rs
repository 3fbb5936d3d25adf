use txscope::errors::ErrorKind;
use txscope_int_test::test_util::{
    callback_log, cleanup, create_test_context, create_test_context_with, random_key, run_test,
    RecordingDriver, RecordingSynchronization,
};

#[test]
fn test_owner_rollback_only_commit_rolls_back_quietly() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let log = callback_log();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            ctx.resource().put(&tx, "k", "v")?;
            tx.register_synchronization(RecordingSynchronization::new("audit", None, &log).shared())?;
            status.set_rollback_only();
            assert!(status.is_local_rollback_only());
            assert!(!status.is_global_rollback_only());

            manager.commit(&mut tx, &mut status)?;
            assert_eq!(ctx.resource().committed("k"), None);
            assert_eq!(ctx.driver().event_names(), vec!["begin", "rollback", "release"]);
            assert_eq!(
                *log.lock(),
                vec!["before_completion:audit", "after_completion_rolled_back:audit"]
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_resource_reported_rollback_only() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            ctx.driver().report_rollback_only(true);
            assert!(status.is_global_rollback_only());

            let err = manager.commit(&mut tx, &mut status).unwrap_err();
            ctx.driver().report_rollback_only(false);
            assert_eq!(*err.kind(), ErrorKind::UnexpectedRollback);
            assert_eq!(ctx.driver().event_names(), vec!["begin", "rollback", "release"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_participant_failure_left_to_owner() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.global_rollback_on_participation_failure(false)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            ctx.resource().put(&tx, "k", "v")?;
            let mut inner = manager.get_transaction(&mut tx, None)?;
            manager.rollback(&mut tx, &mut inner)?;
            assert!(!outer.is_rollback_only());

            // the owner decides, and decides to commit
            manager.commit(&mut tx, &mut outer)?;
            assert_eq!(ctx.resource().committed("k"), Some("v".to_string()));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_explicit_participant_rollback_only_still_dooms_owner() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.global_rollback_on_participation_failure(false)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let mut inner = manager.get_transaction(&mut tx, None)?;
            inner.set_rollback_only();
            manager.rollback(&mut tx, &mut inner)?;

            let err = manager.commit(&mut tx, &mut outer).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::UnexpectedRollback);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_later_participant_commit_without_fail_early() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let mut failed = manager.get_transaction(&mut tx, None)?;
            manager.rollback(&mut tx, &mut failed)?;

            let mut later = manager.get_transaction(&mut tx, None)?;
            assert!(later.is_global_rollback_only());
            manager.commit(&mut tx, &mut later)?;

            let err = manager.commit(&mut tx, &mut outer).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::UnexpectedRollback);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_later_participant_commit_with_fail_early() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.fail_early_on_global_rollback_only(true)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let mut failed = manager.get_transaction(&mut tx, None)?;
            manager.rollback(&mut tx, &mut failed)?;

            let mut later = manager.get_transaction(&mut tx, None)?;
            let err = manager.commit(&mut tx, &mut later).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::UnexpectedRollback);
            assert!(later.is_completed());

            let err = manager.commit(&mut tx, &mut outer).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::UnexpectedRollback);
            assert_eq!(ctx.driver().count("commit"), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_nested_commit_on_doomed_transaction_clears_marker() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();
            let nested = txscope::TransactionDefinition::with_propagation(txscope::Propagation::Nested);

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let mut failed = manager.get_transaction(&mut tx, None)?;
            manager.rollback(&mut tx, &mut failed)?;

            let mut savepoint = manager.get_transaction(&mut tx, Some(&nested))?;
            let err = manager.commit(&mut tx, &mut savepoint).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::UnexpectedRollback);
            assert!(err.message().contains("marked as rollback-only"));
            assert_eq!(ctx.driver().count("rollback_to_savepoint"), 1);

            // rolling back to the savepoint clears the shared marker
            assert!(!outer.is_rollback_only());
            manager.commit(&mut tx, &mut outer)?;
            assert_eq!(ctx.driver().count("commit"), 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

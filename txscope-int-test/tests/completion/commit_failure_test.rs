use txscope::errors::{ErrorKind, HeuristicOutcome, TxError};
use txscope_int_test::test_util::{
    callback_log, cleanup, create_test_context, create_test_context_with, random_key, run_test,
    RecordingDriver, RecordingSynchronization,
};

#[test]
fn test_driver_commit_failure_is_translated() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let log = callback_log();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            ctx.resource().put(&tx, "k", "v")?;
            tx.register_synchronization(RecordingSynchronization::new("audit", None, &log).shared())?;
            ctx.driver()
                .fail_next_commit(TxError::new("disk full", ErrorKind::ResourceFailure));

            let err = manager.commit(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::TransactionSystem);
            assert_eq!(err.cause().map(|it| it.message()), Some("disk full"));
            assert!(status.is_completed());

            let err = manager.rollback(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::IllegalTransactionState);

            assert_eq!(ctx.resource().committed("k"), None);
            assert_eq!(
                log.lock().last().map(|it| it.as_str()),
                Some("after_completion_unknown:audit")
            );
            assert_eq!(ctx.driver().event_names(), vec!["begin", "commit", "release"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_heuristic_rolled_back_outcome() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            let cause = TxError::new("participant 2 rolled back", ErrorKind::ResourceFailure);
            ctx.driver()
                .fail_next_commit(TxError::heuristic(HeuristicOutcome::RolledBack, Some(cause)));

            let err = manager.commit(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::HeuristicCompletion(HeuristicOutcome::RolledBack));
            assert_eq!(err.outcome_state(), Some(2));
            assert!(err.message().contains("rolled back"));
            assert!(err.cause().is_some());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_rollback_on_commit_failure() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.rollback_on_commit_failure(true)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let log = callback_log();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            tx.register_synchronization(RecordingSynchronization::new("audit", None, &log).shared())?;
            ctx.driver()
                .fail_next_commit(TxError::new("lock wait timeout", ErrorKind::ResourceFailure));

            let err = manager.commit(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::TransactionSystem);
            assert_eq!(
                ctx.driver().event_names(),
                vec!["begin", "commit", "rollback", "release"]
            );
            assert_eq!(
                log.lock().last().map(|it| it.as_str()),
                Some("after_completion_rolled_back:audit")
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_rollback_failure_after_commit_failure_wins() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.rollback_on_commit_failure(true)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let log = callback_log();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            tx.register_synchronization(RecordingSynchronization::new("audit", None, &log).shared())?;
            ctx.driver()
                .fail_next_commit(TxError::new("lock wait timeout", ErrorKind::ResourceFailure));
            ctx.driver().fail_rollback(true);

            let err = manager.commit(&mut tx, &mut status).unwrap_err();
            ctx.driver().fail_rollback(false);

            assert_eq!(*err.kind(), ErrorKind::TransactionSystem);
            assert_eq!(
                err.cause().map(|it| it.message()),
                Some("connection lost during rollback")
            );
            assert_eq!(
                log.lock().last().map(|it| it.as_str()),
                Some("after_completion_unknown:audit")
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_rollback_failure_reaches_caller() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let log = callback_log();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            tx.register_synchronization(RecordingSynchronization::new("audit", None, &log).shared())?;
            ctx.driver().fail_rollback(true);

            let err = manager.rollback(&mut tx, &mut status).unwrap_err();
            ctx.driver().fail_rollback(false);

            assert_eq!(*err.kind(), ErrorKind::TransactionSystem);
            assert!(status.is_completed());
            assert!(!tx.has_resource(ctx.resource().key()));
            assert_eq!(
                *log.lock(),
                vec!["before_completion:audit", "after_completion_unknown:audit"]
            );
            assert_eq!(ctx.driver().event_names(), vec!["begin", "rollback", "release"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_commit_failure_in_requires_new_resumes_outer() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let resource = ctx.resource();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let outer_handle = outer.handle().cloned();
            resource.put(&tx, "order", "placed")?;

            let mut inner = manager.get_transaction(
                &mut tx,
                Some(&txscope::TransactionDefinition::with_propagation(
                    txscope::Propagation::RequiresNew,
                )),
            )?;
            ctx.driver()
                .fail_next_commit(TxError::heuristic(HeuristicOutcome::Mixed, None));
            assert!(manager.commit(&mut tx, &mut inner).is_err());

            assert_eq!(tx.resource_handle(resource.key()), outer_handle);
            manager.commit(&mut tx, &mut outer)?;
            assert_eq!(resource.committed("order"), Some("placed".to_string()));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

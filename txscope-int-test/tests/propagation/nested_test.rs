use txscope::definition::{Propagation, TransactionDefinition};
use txscope::errors::ErrorKind;
use txscope_int_test::test_util::{
    cleanup, create_test_context, create_test_context_with, create_test_context_without_savepoints,
    random_key, run_test, RecordingDriver,
};

fn nested() -> TransactionDefinition {
    TransactionDefinition::with_propagation(Propagation::Nested)
}

#[test]
fn test_nested_commit_keeps_work() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let resource = ctx.resource();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let mut inner = manager.get_transaction(&mut tx, Some(&nested()))?;
            resource.put(&tx, "line:1", "book")?;
            manager.commit(&mut tx, &mut inner)?;
            assert!(!inner.has_savepoint());

            // released, not yet committed
            assert_eq!(resource.committed("line:1"), None);
            manager.commit(&mut tx, &mut outer)?;
            assert_eq!(resource.committed("line:1"), Some("book".to_string()));
            assert_eq!(
                ctx.driver().event_names(),
                vec!["begin", "create_savepoint", "release_savepoint", "commit", "release"]
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_nested_rollback_only_rolls_back_to_savepoint() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let resource = ctx.resource();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            resource.put(&tx, "line:1", "book")?;
            let mut inner = manager.get_transaction(&mut tx, Some(&nested()))?;
            resource.put(&tx, "line:2", "pen")?;
            inner.set_rollback_only();
            manager.commit(&mut tx, &mut inner)?;

            assert!(!outer.is_rollback_only());
            manager.commit(&mut tx, &mut outer)?;
            assert_eq!(resource.committed("line:1"), Some("book".to_string()));
            assert_eq!(resource.committed("line:2"), None);
            assert_eq!(ctx.driver().count("rollback_to_savepoint"), 1);
            assert_eq!(ctx.driver().count("rollback"), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_savepoint_rollback_contains_participant_failure() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let resource = ctx.resource();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            resource.put(&tx, "order:1", "placed")?;
            let mut savepoint = manager.get_transaction(&mut tx, Some(&nested()))?;
            let mut inner = manager.get_transaction(&mut tx, None)?;
            resource.put(&tx, "order:2", "placed")?;

            manager.rollback(&mut tx, &mut inner)?;
            assert!(savepoint.is_global_rollback_only());
            manager.rollback(&mut tx, &mut savepoint)?;
            assert!(!outer.is_rollback_only());

            manager.commit(&mut tx, &mut outer)?;
            assert_eq!(resource.committed("order:1"), Some("placed".to_string()));
            assert_eq!(resource.committed("order:2"), None);
            assert_eq!(ctx.driver().count("rollback_to_savepoint"), 1);
            assert_eq!(ctx.driver().count("commit"), 1);
            assert_eq!(ctx.driver().count("rollback"), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_nested_levels() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let resource = ctx.resource();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            resource.put(&tx, "level", "0")?;

            let mut first = manager.get_transaction(&mut tx, Some(&nested()))?;
            resource.put(&tx, "level", "1")?;
            let mut second = manager.get_transaction(&mut tx, Some(&nested()))?;
            resource.put(&tx, "level", "2")?;

            manager.rollback(&mut tx, &mut second)?;
            assert_eq!(resource.get(&tx, "level")?, Some("1".to_string()));
            manager.commit(&mut tx, &mut first)?;
            manager.commit(&mut tx, &mut outer)?;

            assert_eq!(resource.committed("level"), Some("1".to_string()));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_nested_without_transaction_starts_one() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, Some(&nested()))?;
            assert!(status.is_new_transaction());
            assert!(!status.has_savepoint());
            manager.commit(&mut tx, &mut status)?;
            assert_eq!(ctx.driver().event_names(), vec!["begin", "commit", "release"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_nested_disabled() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.nested_transaction_allowed(false)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let err = manager.get_transaction(&mut tx, Some(&nested())).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::NestedTransactionNotSupported);
            assert_eq!(ctx.driver().count("create_savepoint"), 0);
            manager.commit(&mut tx, &mut outer)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_nested_strict_without_savepoints() {
    run_test(
        create_test_context_without_savepoints,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let err = manager.get_transaction(&mut tx, Some(&nested())).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::NestedTransactionNotSupported);
            assert!(err.message().contains("savepoints"));
            manager.commit(&mut tx, &mut outer)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_nested_lenient_without_savepoints_joins() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::without_savepoints(&random_key()), |builder| {
                builder.strict_nested(false)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let mut inner = manager.get_transaction(&mut tx, Some(&nested()))?;
            assert!(!inner.has_savepoint());
            assert!(!inner.is_new_transaction());
            assert_eq!(inner.handle(), outer.handle());

            // a joined participant that rolls back dooms the whole transaction
            manager.rollback(&mut tx, &mut inner)?;
            let err = manager.commit(&mut tx, &mut outer).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::UnexpectedRollback);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

// ==================== Programmatic savepoints ====================

#[test]
fn test_status_savepoints() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let resource = ctx.resource();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            resource.put(&tx, "a", "1")?;
            let savepoint = status.create_savepoint()?;
            resource.put(&tx, "b", "2")?;
            status.rollback_to_savepoint(&savepoint)?;
            assert_eq!(resource.get(&tx, "b")?, None);

            // still usable after a rollback to it
            resource.put(&tx, "c", "3")?;
            status.rollback_to_savepoint(&savepoint)?;
            status.release_savepoint(&savepoint)?;
            assert!(status.rollback_to_savepoint(&savepoint).is_err());

            manager.commit(&mut tx, &mut status)?;
            assert_eq!(resource.committed("a"), Some("1".to_string()));
            assert_eq!(resource.committed("c"), None);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_status_savepoint_without_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(
                &mut tx,
                Some(&TransactionDefinition::with_propagation(Propagation::Supports)),
            )?;
            let err = status.create_savepoint().unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::NestedTransactionNotSupported);
            manager.commit(&mut tx, &mut status)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_status_savepoint_on_resource_without_savepoints() {
    run_test(
        create_test_context_without_savepoints,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            let err = status.create_savepoint().unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::NestedTransactionNotSupported);
            manager.rollback(&mut tx, &mut status)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

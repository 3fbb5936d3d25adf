use txscope::definition::{Isolation, Propagation, TransactionDefinition};
use txscope::errors::ErrorKind;
use txscope::manager_config::SynchronizationPolicy;
use txscope_int_test::test_util::{
    cleanup, create_test_context, create_test_context_with, random_key, run_test, DriverEvent,
    RecordingDriver,
};

fn definition(propagation: Propagation) -> TransactionDefinition {
    TransactionDefinition::with_propagation(propagation)
}

// ==================== Required ====================

#[test]
fn test_required_starts_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            assert!(status.is_new_transaction());
            assert!(status.is_new_synchronization());
            assert!(tx.is_actual_transaction_active());
            assert!(tx.has_resource(ctx.resource().key()));

            ctx.resource().put(&tx, "k", "v")?;
            manager.commit(&mut tx, &mut status)?;

            assert_eq!(ctx.resource().committed("k"), Some("v".to_string()));
            assert!(!tx.has_resource(ctx.resource().key()));
            assert!(!tx.is_synchronization_active());
            assert_eq!(ctx.driver().event_names(), vec!["begin", "commit", "release"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_required_joins_existing_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();
            let required = definition(Propagation::Required);

            let mut outer = manager.get_transaction(&mut tx, Some(&required))?;
            for _ in 0..3 {
                let mut inner = manager.get_transaction(&mut tx, Some(&required))?;
                assert!(!inner.is_new_transaction());
                assert!(!inner.is_new_synchronization());
                assert_eq!(inner.handle(), outer.handle());
                ctx.resource().put(&tx, &format!("key:{}", inner.id()), "v")?;
                manager.commit(&mut tx, &mut inner)?;
                // a participant commit does not end the transaction
                assert!(tx.has_resource(ctx.resource().key()));
            }

            assert_eq!(ctx.resource().committed_len(), 0);
            manager.commit(&mut tx, &mut outer)?;
            assert_eq!(ctx.resource().committed_len(), 3);
            assert_eq!(ctx.driver().count("begin"), 1);
            assert_eq!(ctx.driver().count("commit"), 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

// ==================== Mandatory ====================

#[test]
fn test_mandatory_joins_existing_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let mut inner = manager.get_transaction(&mut tx, Some(&definition(Propagation::Mandatory)))?;
            assert!(!inner.is_new_transaction());
            assert_eq!(inner.handle(), outer.handle());
            manager.commit(&mut tx, &mut inner)?;
            manager.commit(&mut tx, &mut outer)?;

            assert_eq!(ctx.driver().count("begin"), 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

// ==================== Supports ====================

#[test]
fn test_supports_without_transaction_runs_empty() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, Some(&definition(Propagation::Supports)))?;
            assert!(!status.has_transaction());
            assert!(!status.is_new_transaction());
            assert!(status.is_new_synchronization());
            assert!(tx.is_synchronization_active());
            assert!(!tx.is_actual_transaction_active());

            // writes go straight to the store
            ctx.resource().put(&tx, "k", "v")?;
            assert_eq!(ctx.resource().committed("k"), Some("v".to_string()));

            manager.commit(&mut tx, &mut status)?;
            assert!(ctx.driver().events().is_empty());
            assert!(!tx.is_synchronization_active());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_supports_joins_existing_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let mut inner = manager.get_transaction(&mut tx, Some(&definition(Propagation::Supports)))?;
            assert!(inner.has_transaction());
            assert_eq!(inner.handle(), outer.handle());
            manager.commit(&mut tx, &mut inner)?;
            manager.commit(&mut tx, &mut outer)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_synchronization_policy_on_actual_transaction() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.synchronization_policy(SynchronizationPolicy::OnActualTransaction)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut empty = manager.get_transaction(&mut tx, Some(&definition(Propagation::Supports)))?;
            assert!(!empty.is_new_synchronization());
            assert!(!tx.is_synchronization_active());
            manager.commit(&mut tx, &mut empty)?;

            let mut actual = manager.get_transaction(&mut tx, None)?;
            assert!(actual.is_new_synchronization());
            assert!(tx.is_synchronization_active());
            manager.commit(&mut tx, &mut actual)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_synchronization_policy_never() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.synchronization_policy(SynchronizationPolicy::Never)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            assert!(status.is_new_transaction());
            assert!(!status.is_new_synchronization());
            assert!(!tx.is_synchronization_active());
            assert!(tx.register_synchronization(std::sync::Arc::new(Noop)).is_err());
            manager.commit(&mut tx, &mut status)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

struct Noop;

impl txscope::synchronization::TransactionSynchronization for Noop {}

// ==================== NotSupported / Never ====================

#[test]
fn test_not_supported_suspends_existing_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let resource = ctx.resource();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let outer_handle = outer.handle().cloned();
            resource.put(&tx, "pending", "1")?;

            let mut inner = manager.get_transaction(&mut tx, Some(&definition(Propagation::NotSupported)))?;
            assert!(!inner.has_transaction());
            assert!(inner.has_suspended_resources());
            assert!(!tx.has_resource(resource.key()));
            assert!(!tx.is_actual_transaction_active());

            // runs outside the transaction
            resource.put(&tx, "direct", "1")?;
            assert_eq!(resource.committed("direct"), Some("1".to_string()));
            assert_eq!(resource.get(&tx, "pending")?, None);

            manager.commit(&mut tx, &mut inner)?;
            assert_eq!(tx.resource_handle(resource.key()), outer_handle);
            assert!(tx.is_actual_transaction_active());

            manager.commit(&mut tx, &mut outer)?;
            assert_eq!(resource.committed("pending"), Some("1".to_string()));
            assert_eq!(ctx.driver().event_names(), vec!["begin", "commit", "release"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_never_rejects_existing_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut outer = manager.get_transaction(&mut tx, None)?;
            let err = manager
                .get_transaction(&mut tx, Some(&definition(Propagation::Never)))
                .unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::IllegalTransactionState);
            assert!(err.message().contains("never"));

            // the outer transaction is unaffected
            assert!(!outer.is_rollback_only());
            manager.commit(&mut tx, &mut outer)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_never_without_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, Some(&definition(Propagation::Never)))?;
            assert!(!status.has_transaction());
            manager.commit(&mut tx, &mut status)?;
            assert!(ctx.driver().events().is_empty());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

// ==================== Definition attributes ====================

#[test]
fn test_definition_attributes_reach_driver() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();
            let definition = TransactionDefinition::builder()
                .isolation(Isolation::Serializable)
                .timeout(30)
                .read_only(true)
                .name("ReportService.monthly")
                .build()?;

            let mut status = manager.get_transaction(&mut tx, Some(&definition))?;
            assert!(status.is_read_only());
            assert_eq!(status.name(), Some("ReportService.monthly"));
            assert_eq!(tx.current_transaction_name(), Some("ReportService.monthly"));
            assert_eq!(tx.current_transaction_isolation(), Some(Isolation::Serializable));
            assert!(tx.is_current_transaction_read_only());

            let err = ctx.resource().put(&tx, "k", "v").unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::ReadOnlyViolation);
            manager.commit(&mut tx, &mut status)?;

            assert_eq!(
                ctx.driver().events()[0],
                DriverEvent::Begin {
                    isolation: Isolation::Serializable,
                    timeout: 30,
                    read_only: true,
                }
            );
            assert_eq!(tx.current_transaction_name(), None);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_default_timeout_applies_to_unset_timeout() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.default_timeout(10)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            manager.commit(&mut tx, &mut status)?;
            let explicit = TransactionDefinition::builder().timeout(5).build()?;
            let mut status = manager.get_transaction(&mut tx, Some(&explicit))?;
            manager.commit(&mut tx, &mut status)?;

            let timeouts: Vec<i32> = ctx
                .driver()
                .events()
                .into_iter()
                .filter_map(|event| match event {
                    DriverEvent::Begin { timeout, .. } => Some(timeout),
                    _ => None,
                })
                .collect();
            assert_eq!(timeouts, vec![10, 5]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_invalid_timeout_is_rejected() {
    let err = TransactionDefinition::builder().timeout(-2).build().unwrap_err();
    assert_eq!(*err.kind(), ErrorKind::InvalidTimeout);
}

#[test]
fn test_expired_transaction_cannot_commit() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();
            let definition = TransactionDefinition::builder().timeout(1).build()?;

            let mut status = manager.get_transaction(&mut tx, Some(&definition))?;
            ctx.resource().put(&tx, "k", "v")?;
            std::thread::sleep(std::time::Duration::from_millis(1100));
            let err = ctx.resource().put(&tx, "k2", "v").unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::TransactionTimedOut);

            let err = manager.commit(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::TransactionTimedOut);
            assert!(status.is_completed());
            assert_eq!(ctx.resource().committed("k"), None);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

// ==================== Join validation ====================

#[test]
fn test_validation_rejects_read_write_participant() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.validate_existing_transaction(true)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();
            let read_only = TransactionDefinition::builder().read_only(true).build()?;

            let mut outer = manager.get_transaction(&mut tx, Some(&read_only))?;
            let err = manager.get_transaction(&mut tx, None).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::IllegalTransactionState);
            assert!(err.message().contains("read-only"));

            let mut inner = manager.get_transaction(&mut tx, Some(&read_only))?;
            manager.commit(&mut tx, &mut inner)?;
            manager.commit(&mut tx, &mut outer)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_validation_rejects_isolation_mismatch() {
    run_test(
        || {
            create_test_context_with(RecordingDriver::new(&random_key()), |builder| {
                builder.validate_existing_transaction(true)
            })
        },
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();
            let read_committed = TransactionDefinition::builder()
                .isolation(Isolation::ReadCommitted)
                .build()?;
            let serializable = TransactionDefinition::builder()
                .isolation(Isolation::Serializable)
                .build()?;

            let mut outer = manager.get_transaction(&mut tx, Some(&read_committed))?;
            let err = manager.get_transaction(&mut tx, Some(&serializable)).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::IllegalTransactionState);

            // default isolation always joins
            let mut inner = manager.get_transaction(&mut tx, None)?;
            manager.commit(&mut tx, &mut inner)?;
            manager.commit(&mut tx, &mut outer)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_without_validation_read_write_participant_joins() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();
            let read_only = TransactionDefinition::builder().read_only(true).build()?;

            let mut outer = manager.get_transaction(&mut tx, Some(&read_only))?;
            let mut inner = manager.get_transaction(&mut tx, None)?;
            assert_eq!(inner.handle(), outer.handle());
            manager.commit(&mut tx, &mut inner)?;
            manager.commit(&mut tx, &mut outer)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

// ==================== Completion guards ====================

#[test]
fn test_commit_twice_fails() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            manager.commit(&mut tx, &mut status)?;
            let err = manager.commit(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::IllegalTransactionState);
            let err = manager.rollback(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::IllegalTransactionState);
            assert!(err.message().contains("already completed"));

            assert_eq!(ctx.driver().count("commit"), 1);
            assert_eq!(ctx.driver().count("rollback"), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_rollback_twice_fails() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut tx = ctx.execution_context();

            let mut status = manager.get_transaction(&mut tx, None)?;
            manager.rollback(&mut tx, &mut status)?;
            let err = manager.rollback(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::IllegalTransactionState);
            let err = manager.commit(&mut tx, &mut status).unwrap_err();
            assert_eq!(*err.kind(), ErrorKind::IllegalTransactionState);
            assert_eq!(ctx.driver().count("rollback"), 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_contexts_are_independent() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let mut first = ctx.execution_context();
            let mut second = ctx.execution_context();

            let mut a = manager.get_transaction(&mut first, None)?;
            let mut b = manager.get_transaction(&mut second, None)?;
            assert!(a.is_new_transaction());
            assert!(b.is_new_transaction());
            assert_ne!(a.handle(), b.handle());
            assert_eq!(ctx.resource().active_transactions(), 2);

            manager.rollback(&mut first, &mut a)?;
            manager.commit(&mut second, &mut b)?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

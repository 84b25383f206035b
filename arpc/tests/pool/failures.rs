use crate::pool::helpers::{all_ranks, run_world, test_config};
use arpc::{ArpcError, RemoteFunction};
use std::time::Duration;

/// Long enough that a pending call is clearly not on its way.
const HANG_WINDOW: Duration = Duration::from_millis(300);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unregistered_function_is_unassociated() {
    run_world(2, test_config(), |pool, transport| async move {
        let registered = RemoteFunction::new(|x: u8| x);
        pool.register_function(&registered).await.unwrap();
        let stray = RemoteFunction::new(|x: u8| x);

        let sent_before = transport.messages_sent();
        let err = pool.invoke(1 - pool.rank(), &stray, 1).await.unwrap_err();
        assert!(matches!(err, ArpcError::Unassociated));
        let err = pool.invoke_multi(&[0, 1], &stray, 1).await.unwrap_err();
        assert!(matches!(err, ArpcError::Unassociated));
        let err = pool.invoke_multi(&[], &stray, 1).await.unwrap_err();
        assert!(matches!(err, ArpcError::Unassociated));
        assert_eq!(transport.messages_sent(), sent_before);
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_registration() {
    run_world(1, test_config(), |pool, _t| async move {
        let f = RemoteFunction::new(|x: u8| x);
        pool.register_function(&f).await.unwrap();
        let err = pool.register_function(&f).await.unwrap_err();
        assert!(matches!(err, ArpcError::DuplicateRegistration { .. }));
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_failure_never_resolves() {
    run_world(2, test_config(), |pool, _t| async move {
        let fails = RemoteFunction::try_new(|x: u32| {
            if x > 10 { Err(format!("{x} is too big")) } else { Ok(x) }
        });
        pool.register_function(&fails).await.unwrap();

        if pool.rank() == 0 {
            let resp = pool.invoke(1, &fails, 11).await.unwrap();
            assert!(
                tokio::time::timeout(HANG_WINDOW, resp).await.is_err(),
                "failed remote call must stay pending"
            );
            // The abandoned call still owns its slot.
            assert_eq!(pool.pending_calls(), 1);

            // The serving side keeps working.
            let ok = pool.invoke(1, &fails, 5).await.unwrap().await.unwrap();
            assert_eq!(ok, 5);
            assert_eq!(pool.pending_calls(), 1);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_panic_never_resolves() {
    run_world(2, test_config(), |pool, _t| async move {
        let explode = RemoteFunction::new(|x: u32| {
            if x == 0 {
                panic!("zero");
            }
            x
        });
        pool.register_function(&explode).await.unwrap();

        if pool.rank() == 1 {
            let resp = pool.invoke(0, &explode, 0).await.unwrap();
            assert!(tokio::time::timeout(HANG_WINDOW, resp).await.is_err());
            let ok = pool.invoke(0, &explode, 9).await.unwrap().await.unwrap();
            assert_eq!(ok, 9);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reported_failure_resolves_to_error() {
    let config = test_config().with_report_failures(true);
    run_world(2, config, |pool, _t| async move {
        let fails = RemoteFunction::try_new(|x: u32| {
            if x > 10 { Err(format!("{x} is too big")) } else { Ok(x) }
        });
        pool.register_function(&fails).await.unwrap();

        if pool.rank() == 0 {
            let err = pool.invoke(1, &fails, 11).await.unwrap().await.unwrap_err();
            match err {
                ArpcError::RemoteFailure { rank, reason } => {
                    assert_eq!(rank, 1);
                    assert!(reason.contains("11 is too big"), "{reason}");
                }
                other => panic!("expected RemoteFailure, got {other}"),
            }
            assert_eq!(pool.pending_calls(), 0);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reported_failure_in_gather() {
    let config = test_config().with_report_failures(true);
    run_world(3, config, |pool, _t| async move {
        let rank = pool.rank();
        let picky = RemoteFunction::try_new(move |_: ()| {
            if rank == 2 { Err("rank 2 refuses") } else { Ok(rank) }
        });
        pool.register_function(&picky).await.unwrap();

        if rank == 0 {
            let err = pool
                .invoke_multi(&all_ranks(3), &picky, ())
                .await
                .unwrap()
                .await
                .unwrap_err();
            assert!(matches!(err, ArpcError::RemoteFailure { rank: 2, .. }));
            assert_eq!(pool.pending_calls(), 0);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

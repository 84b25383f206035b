use crate::pool::helpers::{run_world, test_config};
use arpc::{ArpcError, Channel, RemoteFunction, Transport};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_header_reported_at_shutdown() {
    run_world(2, test_config(), |pool, transport| async move {
        if pool.rank() == 1 {
            transport.send(0, Channel::Header, &[0u8; 5]).await.unwrap();
            pool.shutdown().await.unwrap();
        } else {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let err = pool.shutdown().await.unwrap_err();
            assert!(matches!(err, ArpcError::MalformedHeader { len: 5 }));
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pending_call_abandoned_by_shutdown() {
    run_world(2, test_config(), |pool, _t| async move {
        let never = RemoteFunction::try_new(|_: ()| Err::<(), _>("no"));
        pool.register_function(&never).await.unwrap();

        if pool.rank() == 0 {
            let resp = pool.invoke(1, &never, ()).await.unwrap();
            assert_eq!(pool.pending_calls(), 1);
            pool.shutdown().await.unwrap();
            assert!(matches!(resp.await, Err(ArpcError::Abandoned)));
            assert!(!never.is_bound());
            assert!(matches!(never.call(1, ()).await, Err(ArpcError::Unassociated)));
        } else {
            pool.shutdown().await.unwrap();
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_start_and_shutdown() {
    for _ in 0..3 {
        run_world(3, test_config(), |pool, _t| async move {
            let f = RemoteFunction::new(|x: u32| x);
            pool.register_function(&f).await.unwrap();
            pool.shutdown().await.unwrap();
        })
        .await;
    }
}

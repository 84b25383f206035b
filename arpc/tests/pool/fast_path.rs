use crate::pool::helpers::{run_world, test_config};
use arpc::RemoteFunction;
use futures::FutureExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_matches_remote() {
    run_world(2, test_config(), |pool, transport| async move {
        let scale = RemoteFunction::new(|(xs, k): (Vec<f64>, f64)| {
            xs.into_iter().map(|x| x * k).collect::<Vec<f64>>()
        });
        pool.register_function(&scale).await.unwrap();

        if pool.rank() == 0 {
            let args = (vec![1.0, -2.5, 4.25], 2.0);
            assert!(pool.is_local(0));
            assert!(!pool.is_local(1));

            let sent_before = transport.messages_sent();
            let mut local = pool
                .invoke(0, &scale, args.clone())
                .now_or_never()
                .expect("local invoke completes without waiting")
                .unwrap();
            assert!(local.is_ready());
            let local = local.await.unwrap();
            assert_eq!(transport.messages_sent(), sent_before);

            let remote = pool.invoke(1, &scale, args).await.unwrap().await.unwrap();
            assert_eq!(local, remote);
            assert_eq!(local, vec![2.0, -5.0, 8.5]);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_call_leaves_no_slot() {
    run_world(2, test_config(), |pool, _t| async move {
        let id = RemoteFunction::new(|x: u32| x);
        pool.register_function(&id).await.unwrap();

        let me = pool.rank();
        for i in 0..10 {
            assert_eq!(pool.invoke(me, &id, i).await.unwrap().await.unwrap(), i);
        }
        assert_eq!(pool.pending_calls(), 0);
        assert_eq!(pool.slot_count(), 0);
        pool.shutdown().await.unwrap();
    })
    .await;
}

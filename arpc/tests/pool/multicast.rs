use crate::pool::helpers::{all_ranks, run_world, test_config};
use arpc::RemoteFunction;
use futures::FutureExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_multicast_sends_nothing() {
    run_world(2, test_config(), |pool, transport| async move {
        let f = RemoteFunction::new(|x: u32| x + 1);
        pool.register_function(&f).await.unwrap();

        let sent_before = transport.messages_sent();
        let resp = pool
            .invoke_multi(&[], &f, 1)
            .now_or_never()
            .expect("empty multicast completes without waiting")
            .unwrap();
        assert_eq!(resp.now_or_never().unwrap().unwrap(), Vec::<u32>::new());
        assert_eq!(transport.messages_sent(), sent_before);
        assert_eq!(pool.pending_calls(), 0);
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gather_rank_plus() {
    const WORLD: u32 = 4;
    run_world(WORLD, test_config(), |pool, _t| async move {
        let rank = pool.rank();
        let rank_plus = RemoteFunction::new(move |v: u32| rank + v);
        pool.register_function(&rank_plus).await.unwrap();

        if rank == 0 {
            let resp = pool
                .invoke_multi(&all_ranks(WORLD), &rank_plus, 0)
                .await
                .unwrap();
            let mut results = resp.await.unwrap();
            // Arrival order is unspecified.
            results.sort();
            assert_eq!(results, vec![0, 1, 2, 3]);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gather_from_every_rank_concurrently() {
    const WORLD: u32 = 5;
    run_world(WORLD, test_config(), |pool, _t| async move {
        let rank = pool.rank();
        let rank_times = RemoteFunction::new(move |v: u32| rank * v);
        pool.register_function(&rank_times).await.unwrap();

        let mut results = pool
            .invoke_multi(&all_ranks(WORLD), &rank_times, rank + 1)
            .await
            .unwrap()
            .await
            .unwrap();
        results.sort();
        let expected: Vec<u32> = (0..WORLD).map(|r| r * (rank + 1)).collect();
        assert_eq!(results, expected);
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_target_answers_twice() {
    run_world(3, test_config(), |pool, _t| async move {
        let rank = pool.rank();
        let who = RemoteFunction::new(move |_: ()| rank);
        pool.register_function(&who).await.unwrap();

        if rank == 2 {
            let mut results = pool
                .invoke_multi(&[1, 1, 0], &who, ())
                .await
                .unwrap()
                .await
                .unwrap();
            results.sort();
            assert_eq!(results, vec![0, 1, 1]);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

use crate::pool::helpers::{run_world, test_config};
use arpc::RemoteFunction;
use futures::future::join_all;
use std::sync::Arc;

const CALLS: u64 = 64;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_resolve_own_futures() {
    run_world(3, test_config(), |pool, _t| async move {
        let rank = pool.rank();
        let tagged = RemoteFunction::new(move |v: u64| (rank, v * 3));
        pool.register_function(&tagged).await.unwrap();

        if rank == 0 {
            let mut responses = Vec::new();
            for i in 0..CALLS {
                let dest = 1 + (i % 2) as u32;
                responses.push((dest, i, pool.invoke(dest, &tagged, i).await.unwrap()));
            }
            let results = join_all(responses.into_iter().map(|(dest, i, resp)| async move {
                (dest, i, resp.await.unwrap())
            }))
            .await;
            for (dest, i, got) in results {
                assert_eq!(got, (dest, i * 3));
            }
            assert_eq!(pool.pending_calls(), 0);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issuers_on_every_rank() {
    run_world(4, test_config(), |pool, _t| async move {
        let pool = Arc::new(pool);
        let rank = pool.rank();
        let echo = Arc::new(RemoteFunction::new(|v: (u32, u64)| v));
        pool.register_function(&*echo).await.unwrap();

        // Several tasks issue calls at once so header/payload pairs from one
        // sender to one receiver race each other.
        let mut tasks = Vec::new();
        for lane in 0..4u64 {
            let pool = Arc::clone(&pool);
            let echo = Arc::clone(&echo);
            tasks.push(tokio::spawn(async move {
                for i in 0..CALLS / 4 {
                    let dest = ((u64::from(rank) + i) % 4) as u32;
                    let value = (rank, lane * 1_000 + i);
                    let got = pool.invoke(dest, &*echo, value).await.unwrap().await.unwrap();
                    assert_eq!(got, value);
                }
            }));
        }
        for t in join_all(tasks).await {
            t.unwrap();
        }

        let pool = Arc::into_inner(pool).expect("all tasks finished");
        pool.shutdown().await.unwrap();
    })
    .await;
}

use crate::pool::helpers::{all_ranks, run_tcp_world, test_config};
use arpc::RemoteFunction;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_add_and_gather() {
    run_tcp_world(3, test_config(), |pool| async move {
        let rank = pool.rank();
        let add = RemoteFunction::new(|(a, b): (i64, i64)| a + b);
        let rank_plus = RemoteFunction::new(move |v: u32| rank + v);
        pool.register_function(&add).await.unwrap();
        pool.register_function(&rank_plus).await.unwrap();

        let peer = (rank + 1) % 3;
        assert_eq!(pool.invoke(peer, &add, (3, 4)).await.unwrap().await.unwrap(), 7);

        let mut results = pool
            .invoke_multi(&all_ranks(3), &rank_plus, 10)
            .await
            .unwrap()
            .await
            .unwrap();
        results.sort();
        assert_eq!(results, vec![10, 11, 12]);
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_many_pipelined_calls() {
    run_tcp_world(2, test_config(), |pool| async move {
        let double = RemoteFunction::new(|s: String| s.repeat(2));
        pool.register_function(&double).await.unwrap();

        if pool.rank() == 0 {
            let mut pending = Vec::new();
            for i in 0..32 {
                pending.push((i, pool.invoke(1, &double, i.to_string()).await.unwrap()));
            }
            for (i, resp) in pending {
                assert_eq!(resp.await.unwrap(), format!("{i}{i}"));
            }
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_abandoned_large_call_keeps_link_usable() {
    run_tcp_world(2, test_config(), |pool| async move {
        let len = RemoteFunction::new(|v: Vec<u8>| v.len() as u64);
        pool.register_function(&len).await.unwrap();

        if pool.rank() == 0 {
            let big = vec![7u8; 32 * 1024 * 1024];
            let abandoned = timeout(Duration::from_millis(5), pool.invoke(1, &len, big)).await;
            drop(abandoned);

            let follow_up = timeout(Duration::from_secs(10), async {
                pool.invoke(1, &len, vec![1, 2, 3]).await?.await
            })
            .await
            .expect("follow-up call hung behind the abandoned one");
            assert_eq!(follow_up.unwrap(), 3);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_abandoned_multicast_keeps_links_usable() {
    run_tcp_world(3, test_config(), |pool| async move {
        let len = RemoteFunction::new(|v: Vec<u8>| v.len() as u64);
        pool.register_function(&len).await.unwrap();

        if pool.rank() == 0 {
            let big = vec![1u8; 8 * 1024 * 1024];
            let abandoned =
                timeout(Duration::from_millis(1), pool.invoke_multi(&[1, 2], &len, big)).await;
            drop(abandoned);

            let follow_up = timeout(Duration::from_secs(10), async {
                pool.invoke_multi(&[1, 2], &len, vec![0; 4]).await?.await
            })
            .await
            .expect("follow-up multicast hung behind the abandoned one");
            assert_eq!(follow_up.unwrap(), vec![4, 4]);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

use crate::pool::helpers::{run_world, test_config};
use arpc::RemoteFunction;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_add_on_peer() {
    run_world(2, test_config(), |pool, _t| async move {
        let add = RemoteFunction::new(|(a, b): (i32, i32)| a + b);
        pool.register_function(&add).await.unwrap();

        if pool.rank() == 0 {
            let resp = pool.invoke(1, &add, (3, 4)).await.unwrap();
            assert_eq!(resp.await.unwrap(), 7);
            assert_eq!(pool.pending_calls(), 0);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_everyone_calls_everyone() {
    run_world(3, test_config(), |pool, _t| async move {
        let rank = pool.rank();
        let whoami = RemoteFunction::new(move |tag: u64| (rank, tag));
        pool.register_function(&whoami).await.unwrap();

        for dest in 0..pool.world_size() {
            let tag = u64::from(rank) * 100 + u64::from(dest);
            let resp = pool.invoke(dest, &whoami, tag).await.unwrap();
            assert_eq!(resp.await.unwrap(), (dest, tag));
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_through_function_handle() {
    run_world(2, test_config(), |pool, _t| async move {
        let greet = RemoteFunction::new(|name: String| format!("hello, {name}"));
        let shout = RemoteFunction::new(|s: String| s.to_uppercase());
        pool.register_function(&greet).await.unwrap();
        pool.register_function(&shout).await.unwrap();
        assert_ne!(greet.id(), shout.id());

        let peer = 1 - pool.rank();
        let greeting = greet.call(peer, "arpc".into()).await.unwrap().await.unwrap();
        assert_eq!(greeting, "hello, arpc");
        let loud = shout.call(peer, greeting).await.unwrap().await.unwrap();
        assert_eq!(loud, "HELLO, ARPC");
        pool.shutdown().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_payload() {
    run_world(2, test_config(), |pool, _t| async move {
        let sum = RemoteFunction::new(|v: Vec<u64>| v.iter().sum::<u64>());
        pool.register_function(&sum).await.unwrap();

        if pool.rank() == 1 {
            let data: Vec<u64> = (0..100_000).collect();
            let expected: u64 = data.iter().sum();
            let resp = pool.invoke(0, &sum, data).await.unwrap();
            assert_eq!(resp.await.unwrap(), expected);
        }
        pool.shutdown().await.unwrap();
    })
    .await;
}

//! Single calls and a multicast on a 4-rank in-process world.
//!
//! Every rank registers the same two functions. Rank 0 calls `add` on each
//! peer, then asks every rank for its own id through `rank_plus`.
//!
//! ```bash
//! RUST_LOG=arpc=debug cargo run --example add
//! ```

use arpc::{ArpcConfig, ExecutionPool, MemoryTransport, RemoteFunction};
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const WORLD: u32 = 4;

#[tokio::main]
async fn main() -> arpc::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut handles = Vec::new();
    for transport in MemoryTransport::mesh(WORLD) {
        handles.push(tokio::spawn(async move {
            let pool = ExecutionPool::start(transport, ArpcConfig::from_env()).await?;
            let rank = pool.rank();

            let add = RemoteFunction::new(|(a, b): (i32, i32)| a + b);
            let rank_plus = RemoteFunction::new(move |v: u32| rank + v);
            pool.register_function(&add).await?;
            pool.register_function(&rank_plus).await?;

            if rank == 0 {
                for peer in 0..WORLD {
                    let sum = pool.invoke(peer, &add, (3, 4)).await?.await?;
                    tracing::info!(peer, local = pool.is_local(peer), sum, "add(3, 4)");
                }

                let ranks: Vec<u32> = (0..WORLD).collect();
                let mut ids = pool.invoke_multi(&ranks, &rank_plus, 0).await?.await?;
                ids.sort();
                println!("rank_plus(0) on every rank: {ids:?}");
                // Output: rank_plus(0) on every rank: [0, 1, 2, 3]
            }

            pool.shutdown().await
        }));
    }

    for h in handles {
        h.await.unwrap()?;
    }
    Ok(())
}

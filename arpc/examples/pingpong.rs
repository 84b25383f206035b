//! Round-trip latency between two ranks over loopback TCP.
//!
//! Rank 0 sends a payload to rank 1, which echoes it back, for a range of
//! payload sizes. Rank 1 only serves.
//!
//! ```bash
//! cargo run --release --example pingpong
//! ```

use arpc::{ArpcConfig, ExecutionPool, RemoteFunction, TcpTransport, Transport};
use std::env;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ROUNDS: u32 = 1_000;

#[tokio::main]
async fn main() -> arpc::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut handles = Vec::new();
    for transport in TcpTransport::bootstrap_local(2).await? {
        handles.push(tokio::spawn(async move {
            let transport: Arc<dyn Transport> = transport;
            let pool = ExecutionPool::start(transport, ArpcConfig::from_env()).await?;
            let echo = RemoteFunction::new(|bytes: Vec<u8>| bytes);
            pool.register_function(&echo).await?;

            if pool.rank() == 0 {
                for size in [0usize, 64, 1024, 16 * 1024, 256 * 1024] {
                    let payload = vec![0xA5u8; size];
                    let start = Instant::now();
                    for _ in 0..ROUNDS {
                        let back = pool.invoke(1, &echo, payload.clone()).await?.await?;
                        assert_eq!(back.len(), size);
                    }
                    let rtt = start.elapsed() / ROUNDS;
                    println!("{size:>8} bytes  rtt {:>8.1} us", rtt.as_secs_f64() * 1e6);
                }
            }

            pool.shutdown().await
        }));
    }

    for h in handles {
        h.await.unwrap()?;
    }
    Ok(())
}

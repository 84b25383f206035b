use arpc::{ArpcConfig, ExecutionPool, MemoryTransport, TcpTransport, Transport};
use std::future::Future;
use std::sync::Arc;

pub fn test_config() -> ArpcConfig {
    ArpcConfig::default().with_workers(4)
}

/// Helper: run one closure per rank of an in-process world, each with its
/// own started pool. The closure is responsible for shutting its pool down.
pub async fn run_world<F, Fut>(world_size: u32, config: ArpcConfig, f: F)
where
    F: Fn(ExecutionPool, Arc<MemoryTransport>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let world = MemoryTransport::mesh(world_size);
    let f = Arc::new(f);
    let mut handles = Vec::new();
    for transport in world {
        let f = Arc::clone(&f);
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let pool = ExecutionPool::start(transport.clone(), config).await.unwrap();
            f(pool, transport).await
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

/// Same as [`run_world`], over a loopback TCP mesh.
pub async fn run_tcp_world<F, Fut>(world_size: u32, config: ArpcConfig, f: F)
where
    F: Fn(ExecutionPool) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let world = TcpTransport::bootstrap_local(world_size).await.unwrap();
    let f = Arc::new(f);
    let mut handles = Vec::new();
    for transport in world {
        let f = Arc::clone(&f);
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let transport: Arc<dyn Transport> = transport;
            let pool = ExecutionPool::start(transport, config).await.unwrap();
            f(pool).await
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

/// Every rank of a world of `world_size`.
pub fn all_ranks(world_size: u32) -> Vec<u32> {
    (0..world_size).collect()
}

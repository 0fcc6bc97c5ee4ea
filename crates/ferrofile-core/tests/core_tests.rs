use ferrofile_core::{EngineConfig, PoolError, ResourcePools, UnitError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_engine_config_builder() {
    let config = EngineConfig::builder()
        .io_threads(3usize)
        .cpu_threads(2usize)
        .max_concurrent_units(5usize)
        .channel_size(16usize)
        .build()
        .unwrap();

    assert_eq!(config.io_pool_size(), 3);
    assert_eq!(config.cpu_pool_size(), 2);
    assert_eq!(config.unit_concurrency(100), 5);
    assert_eq!(config.channel_size, 16);
    assert_eq!(config.max_search_results, 1000);

    assert!(EngineConfig::builder().channel_size(0usize).build().is_err());
}

#[test]
fn test_pools_run_work_in_parallel() {
    let config = EngineConfig::builder()
        .io_threads(4usize)
        .cpu_threads(1usize)
        .build()
        .unwrap();
    let pools = ResourcePools::new(&config).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let counter = Arc::clone(&counter);
            pools
                .io()
                .submit(move || counter.fetch_add(1, Ordering::SeqCst))
                .unwrap()
        })
        .collect();

    pools.io().block_on(async {
        for task in tasks {
            task.await.unwrap();
        }
    });
    assert_eq!(counter.load(Ordering::SeqCst), 16);

    pools.shutdown();
    assert!(matches!(
        pools.cpu().submit(|| ()),
        Err(PoolError::Closed { pool: "cpu" })
    ));
}

#[test]
fn test_unit_error_messages() {
    let err = UnitError::io(
        "/data/file.bin",
        std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
    );
    assert_eq!(err.to_string(), "Path not found: /data/file.bin");

    let err = UnitError::archive("/data/a.zip", "bad header");
    assert_eq!(err.to_string(), "Cannot read archive /data/a.zip: bad header");
}

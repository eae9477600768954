use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use loadgen::{Config, LoadGen, Transaction, TransactionResult};
use tracing_subscriber::EnvFilter;

/// Pretends to be a service that answers in 40ms and fails every tenth call.
async fn flaky_service(calls: Arc<AtomicU64>) -> TransactionResult {
    let n = calls.fetch_add(1, Ordering::Relaxed) + 1;
    tokio::time::sleep(Duration::from_millis(40)).await;
    if n % 10 == 0 {
        return Err(format!("call {n} failed").into());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Shared state goes outside the transaction, the closure is called per launch
    let calls = Arc::new(AtomicU64::new(0));
    let generator = LoadGen::new(
        Config::builder()
            .tps(100.0)
            .max_duration(Duration::from_secs(3))
            // 100 launches per second at 40ms each needs ~4 in flight,
            // so a limit of 3 sheds part of the load on purpose
            .max_concurrency(3)
            .drain_on_cancel(true)
            .transaction(Transaction::new(move || flaky_service(Arc::clone(&calls))))
            .build(),
    );

    let runner = tokio::spawn({
        let generator = generator.clone();
        async move { generator.run().await }
    });

    tokio::select! {
        _ = generator.done() => {}
        _ = tokio::signal::ctrl_c() => generator.cancel(),
    }
    runner.await.unwrap();

    println!("{:#?}", generator.summary());
}

//! loadgen: a minimal, rate-driven load generator for Rust.
//!
//! You hand it an async transaction, a rate and some limits, and it invokes the
//! transaction at that rate, keeps the number of transactions in flight bounded,
//! and counts how many passed and failed until it is told to stop.
//!
//! # Architecture
//!
//! The crate is small on purpose, everything interesting lives in three pieces:
//!
//! - [`Counter`]: a lock-free monotonic counter, used for passed, failed and
//!   dropped transactions.
//! - [`Bucket`]: a non-blocking counting semaphore. A launch that cannot get a
//!   permit is dropped instead of queued, so overload sheds work rather than
//!   piling it up.
//! - [`LoadGen`]: the scheduling loop. It ticks at `1s / tps`, spawns one
//!   transaction per tick without waiting for it, and stops on an explicit
//!   [`LoadGen::cancel`], when `max_duration` has elapsed, or once
//!   `max_transactions` transactions have been recorded.
//!
//! [`Config`] gathers the run parameters and [`Summary`] is a serializable
//! snapshot of the results.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use loadgen::{Config, LoadGen, Transaction};
//!
//! #[tokio::main]
//! async fn main() {
//!     let generator = LoadGen::new(
//!         Config::builder()
//!             .tps(200.0)
//!             .max_duration(Duration::from_millis(100))
//!             .max_concurrency(16)
//!             .transaction(Transaction::new(|| async {
//!                 // Call the system under test here. Returning `Err` marks the
//!                 // transaction as failed.
//!                 Ok(())
//!             }))
//!             .build(),
//!     );
//!
//!     // `run` occupies the task until the generator stops, spawn it to keep
//!     // going in the meantime.
//!     let runner = tokio::spawn({
//!         let generator = generator.clone();
//!         async move { generator.run().await }
//!     });
//!
//!     generator.done().await;
//!     runner.await.unwrap();
//!
//!     println!("{:#?}", generator.summary());
//! }
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events (run start and end at `info`, cancellation
//! at `debug`, dropped launches at `trace`) and never installs a subscriber
//! itself.

/// Non-blocking concurrency permits
pub mod bucket;
/// Run parameters and the transaction type
pub mod config;
/// Atomic counters
pub mod counter;
/// The scheduling loop
pub mod generator;
/// Run summaries
pub mod report;

pub use bucket::{Bucket, BucketPermit};
pub use config::{Config, DEFAULT_TPS, Transaction, TransactionError, TransactionResult};
pub use counter::{Counter, OptionalCounter};
pub use generator::LoadGen;
pub use report::Summary;

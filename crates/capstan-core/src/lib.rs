//! Store primitives for the capstan job engine.
//!
//! This crate provides the transactional store the engine runs against: an
//! in-process, single-writer collection of the data shapes a job queue needs
//! (hashes, ordered sets, plain sets, lists, scalar keys) plus pub-sub
//! channels for event publication.
//!
//! Every engine operation executes as one [`Store::transaction`] call. The
//! store serialises transactions through a single async mutex, so concurrent
//! callers observe a total order over all key mutations, and events published
//! inside a transaction are only delivered once the transaction commits.
//!
//! # Example
//!
//! ```
//! use capstan_core::Store;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Store::new();
//! let mut events = store.subscribe("log");
//!
//! let written: Result<(), ()> = store
//!     .transaction(|txn| {
//!         txn.hash_set("j:jid-1", "state", "waiting");
//!         txn.publish("log", "{\"event\":\"put\"}".to_string());
//!         Ok(())
//!     })
//!     .await;
//! written.unwrap();
//!
//! assert_eq!(events.try_recv().unwrap(), "{\"event\":\"put\"}");
//! # }
//! ```

#![warn(missing_docs)]

mod store;

pub use store::Store;
pub use store::Txn;

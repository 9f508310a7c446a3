//! Reactive data synchronization for the Metro Blackline booking site.
//!
//! Keeps an in-memory [`StateStore`] consistent with a remote multi-table
//! store through four channels:
//!
//! - [`BulkLoader`]: initial concurrent load of every collection
//! - [`LiveChannel`]: push deltas for the volatile collections
//! - [`PollingReconciler`]: periodic content-compared refetch as a backstop
//! - [`WriteCoordinator`]: optimistic writes with rollback on failure
//!
//! plus a [`PreviewChannel`] for unsaved settings drafts. [`SyncEngine`]
//! wires them together.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod live;
pub mod loader;
pub mod mapper;
pub mod model;
pub mod poller;
pub mod preview;
pub mod realtime;
pub mod store;

pub use config::SyncConfig;
pub use coordinator::WriteCoordinator;
pub use engine::SyncEngine;
pub use error::{GatewayError, PartialLoadWarning, SyncError};
pub use gateway::{Filter, MemoryGateway, PostgrestGateway, RemoteGateway};
pub use live::{ChangeEvent, ChangeFeed, ChangeKind, LiveChannel, SubscriptionState};
pub use loader::{BulkLoader, LoadReport};
pub use model::{Collection, RecordId};
pub use poller::PollingReconciler;
pub use preview::PreviewChannel;
pub use realtime::RealtimeFeed;
pub use store::{StateStore, StoreChange};

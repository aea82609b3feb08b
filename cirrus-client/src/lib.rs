//! Cirrus Client
//!
//! Read path for files stored in a sharded cloud object store:
//! - Shard discovery, caching, banning and round-robin allocation
//! - Ranged downloads with bounded retry
//! - Seekable streams over plain and XTS-encrypted logical files
//! - A `reqwest` transport for the dispatcher and download shards

pub mod client;
pub mod config;
pub mod http;
pub mod opener;
pub mod shard;
pub mod stream;
pub mod transport;

pub use client::CloudClient;
pub use config::ClientConfig;
pub use http::{HttpTransport, StaticToken};
pub use opener::{OpenedRange, RangeOpener, ShardOpener};
pub use shard::{BanSet, ShardAllocation, ShardManager};
pub use stream::{CryptoRange, CryptoReadStream, RangeReadStream, ReadStream};
pub use transport::{ByteStream, RangeFetcher, ShardClass, ShardDiscovery, TokenProvider};

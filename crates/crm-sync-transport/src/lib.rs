//! # crm-sync-transport
//!
//! The `reqwest`-backed implementation of [`crm_sync_core::transport::Transport`]
//! (§6): synchronous REST `query`/`query_all`/`describe` calls plus Bulk API
//! 2.0 job submission for `bulk_query`/`bulk_insert`/`bulk_update`.
//!
//! This crate is an illustrative reference adapter, not a hardened
//! production client. See [`rest::RestTransport`]'s module docs for what
//! that means in practice (a synthetic correlation column standing in for
//! the bulk job's lack of a native row index, a bounded polling budget
//! rather than a cancellable long-poll, minimal JSON error surfacing). The
//! engine's own test suite exercises `crm_sync_core::testing::MockTransport`
//! instead, since this adapter talks to a live tenant over the network.

mod rest;

pub use rest::RestTransport;

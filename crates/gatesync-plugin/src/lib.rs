//! gatesync plugin synchronizer.
//!
//! Imports declare, per stage or resource, which plugins should be bound
//! and with what config. [`PluginSynchronizer`] reconciles that declaration
//! against the bindings stored for a gateway, leaving user-created bindings
//! alone.

pub mod synchronizer;

pub use synchronizer::{DesiredPlugin, PluginScope, PluginSyncError, PluginSyncReport, PluginSynchronizer};

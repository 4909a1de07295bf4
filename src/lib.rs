//! fleetmap - an in-memory geospatial database
//!
//! Objects live in keyed collections under a two-level (key, id) namespace,
//! indexed three ways: an ordered id index for scans, an R-tree over
//! bounding rectangles for spatial queries, and a lexicographic value index
//! for string searches. Mutations are recorded in an append-only command
//! log that is replayed at boot and streamed to followers; geofence hooks
//! turn mutations into enter/exit/inside/outside/cross notifications.

pub mod aof;
pub mod area;
pub mod collection;
pub mod commands;
pub mod config;
pub mod deadline;
pub mod error;
pub mod expiration;
pub mod fields;
pub mod follower;
pub mod geofence;
pub mod geom;
pub mod glob;
pub mod json_path;
pub mod metrics;
pub mod object;
pub mod pubsub;
pub mod query;
pub mod resp;
pub mod server;
pub mod socket_server;
pub mod spatial_index;
pub mod where_filter;

//! Library powering the oci-torrent daemon and CLI.
//!
//! The system distributes OCI image layers across a fleet by using
//! BitTorrent as the transport. A seeder daemon ingests an image from an
//! upstream registry into a local OCI layout, creates one torrent per layer
//! and announces them; leecher daemons fetch the torrent metainfo from a
//! seeder over RPC, download the layer bytes from the swarm and reassemble
//! the image into their own OCI layout.
//!
//! The building blocks:
//!
//! * [`oci`] - content-addressed on-disk image store.
//! * [`engine`] - per-layer torrent lifecycle over a [`swarm::Client`].
//! * [`daemon`] - the seeder/leecher layer pipelines.
//! * [`peer_wire`] and [`remote`] - the RPC surface between daemons.

pub mod addr;
pub mod config;
pub mod daemon;
pub mod digest;
pub mod engine;
pub mod error;
pub mod image;
pub mod manifest;
pub mod metainfo;
pub mod oci;
pub mod peer_wire;
pub mod registry;
pub mod remote;
pub mod swarm;
pub mod version;

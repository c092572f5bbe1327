//! Client code for imgd.
//!
//! This crate provides the Mojang upstream client, skin textures, and the
//! resolver that turns a player identifier into a texture through the
//! caches in `imgd-core`.

pub mod mojang;
pub mod resolve;
pub mod texture;

pub use mojang::{McClient, Upstream, UpstreamConfig, UpstreamError};
pub use resolve::{Caches, ResolveError, Resolved, Resolver, ResolverConfig, StatsSnapshot};
pub use texture::{STEVE_HASH, Texture, TextureError};

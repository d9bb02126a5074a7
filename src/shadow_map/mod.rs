//! Shadow atlas and static shadow cache
//!
//! All shadow maps of a frame live in one square depth atlas. Regions are
//! handed out by [`ShadowMapAtlas`] and kept across frames by
//! [`ShadowMapCache`], which also decides whether a light's static geometry
//! can be copied from the persistent static cache texture instead of being
//! rendered again.

mod atlas;
mod cache;

pub use atlas::*;
pub use cache::*;

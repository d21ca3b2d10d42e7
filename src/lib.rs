//! This crate provides a continuous level of detail tessellation for large landscapes
//! built from bicubic patches.
//!
//! # Background
//! The landscape is divided into zones, each holding a grid of Bezier patches of up to
//! a few dozen tiles. Every patch is tessellated by a bintree of right triangles, which
//! is split and merged as the viewer moves, so that the error of each triangle seen from
//! the viewer stays below a threshold.
//!
//! ## How to avoid cracks?
//! Neighboring faces always differ by at most one level. A face is only split together
//! with the neighbor across its longest edge, even across patch and zone borders.
//! Patch edges are bound to their neighbors when a zone is added, and unbound when it is
//! removed. An edge may be bound to one patch, or to two or four smaller patches.
//!
//! ## How to avoid popping?
//! New vertices start at the middle of the edge they split and are moved (geomorphed)
//! to their surface position as the viewer gets closer.
//!
//! ## How to avoid testing every face each frame?
//! After a face is tested, it is scheduled in a priority list by the distance the viewer
//! has to travel at least before the test could have another outcome.
//! See the [`tessellation`] module for more information.
//!
//! The tessellation only produces render lists. Rendering them is left to a
//! [`RenderSink`](render::RenderSink).

pub mod arena;
pub mod config;
pub mod landscape;
pub mod math;
pub mod patch;
pub mod plugin;
pub mod priority;
pub mod render;
pub mod surface;
pub mod tessellation;
pub mod tile_allocator;
pub mod zone;

#[cfg(test)]
mod test_utils;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::LandscapeConfig,
        landscape::Landscape,
        math::{half_space, ClipResult, ParamCoord},
        patch::{PatchBind, PatchId, TileColor, TileElement, TileFlags},
        plugin::{LandscapePlugin, LandscapeViewer},
        render::{RenderEvent, RenderLists, RenderSink},
        surface::{BezierPatch, BezierSurface, SurfaceEvaluator},
        tessellation::{FaceId, TessellationStats, VertexId},
        tile_allocator::{GridTileAllocator, TileAllocator},
        zone::{BindEdge, BorderVertex, PatchInfo, SmoothFlags, Zone, ZoneDescriptor},
    };
}

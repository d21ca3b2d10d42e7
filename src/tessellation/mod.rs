//! The face bintree of a patch and the operations refining it.
//!
//! Every patch starts with two root triangles sharing their hypotenuse. A face is split
//! along its hypotenuse into two sons of half its size. The neighbor across the
//! hypotenuse (the base neighbor) is split at the same time so that no T-junctions appear.
//! Faces above the square limit level of a non square patch are split together with their
//! twin as a rectangle into four sons.

mod bind;
mod merge;
mod metric;
mod query;
mod refine;
mod split;
mod tile;

use crate::{arena::arena_id, landscape::Landscape, math::ParamCoord, patch::PatchId, render::RenderEvent};
use bevy::prelude::*;

pub use query::{FarVertexData, TessellationStats};
pub(crate) use tile::LightmapBlock;

arena_id!(
    /// A triangle of the tessellation bintree.
    FaceId
);
arena_id!(
    /// A tessellation vertex, possibly shared by faces of several patches.
    VertexId
);
arena_id!(
    /// A vertex of the far (untiled) render list of a patch.
    FarVertexId
);
arena_id!(
    /// A vertex of a tile render pass.
    NearVertexId
);
arena_id!(TileFaceId);
arena_id!(TileMaterialId);

impl FaceId {
    /// Placed across an edge whose vertex may not be merged away.
    pub const CANT_MERGE: Self = Self(0);
    /// Placed across an edge that is temporarily bound to several smaller patches.
    pub const MULTIPLE_BIND: Self = Self(1);

    pub fn is_sentinel(self) -> bool {
        self == Self::CANT_MERGE || self == Self::MULTIPLE_BIND
    }
}

impl VertexId {
    pub const INVALID: Self = Self(u32::MAX);
}

impl FarVertexId {
    pub const INVALID: Self = Self(u32::MAX);
}

impl NearVertexId {
    pub const INVALID: Self = Self(u32::MAX);
}

pub const PASS_RGB0: usize = 0;
pub const PASS_RGB1: usize = 1;
pub const PASS_RGB2: usize = 2;
pub const PASS_ADD: usize = 3;
pub const PASS_LIGHTMAP: usize = 4;
pub const MAX_TILE_PASS: usize = 5;
/// The lightmap pass is drawn with the uv1 of the first pass and needs no tile face.
pub const MAX_TILE_FACE: usize = 4;

/// Deepest level the near limit can be computed for.
pub(crate) const MAX_FACE_LEVEL: u32 = 20;

/// One of the three corners of a face, and the edge opposite to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Base,
    Left,
    Right,
}

/// A triangle of the bintree.
///
/// `v_base` is the apex, the hypotenuse runs from `v_left` to `v_right`. The neighbor
/// `f_base` lies across the hypotenuse, `f_left` across the edge `v_base`, `v_left` and
/// `f_right` across the edge `v_base`, `v_right`.
#[derive(Clone, Debug)]
pub struct Face {
    pub(crate) patch: PatchId,
    pub(crate) level: u32,
    pub(crate) size: f32,
    pub(crate) error_metric: f32,
    pub(crate) error_metric_date: u32,
    pub(crate) split_point: Vec3,

    pub(crate) v_base: VertexId,
    pub(crate) v_left: VertexId,
    pub(crate) v_right: VertexId,
    pub(crate) fv_base: FarVertexId,
    pub(crate) fv_left: FarVertexId,
    pub(crate) fv_right: FarVertexId,
    pub(crate) pv_base: ParamCoord,
    pub(crate) pv_left: ParamCoord,
    pub(crate) pv_right: ParamCoord,

    pub(crate) f_base: Option<FaceId>,
    pub(crate) f_left: Option<FaceId>,
    pub(crate) f_right: Option<FaceId>,
    pub(crate) father: Option<FaceId>,
    pub(crate) son_left: Option<FaceId>,
    pub(crate) son_right: Option<FaceId>,

    pub(crate) tile_id: u32,
    pub(crate) tile_material: Option<TileMaterialId>,
    pub(crate) tile_faces: [Option<TileFaceId>; MAX_TILE_FACE],
}

impl Default for Face {
    fn default() -> Self {
        Self {
            patch: PatchId::INVALID,
            level: 0,
            size: 0.0,
            error_metric: 0.0,
            error_metric_date: 0,
            split_point: Vec3::ZERO,
            v_base: VertexId::INVALID,
            v_left: VertexId::INVALID,
            v_right: VertexId::INVALID,
            fv_base: FarVertexId::INVALID,
            fv_left: FarVertexId::INVALID,
            fv_right: FarVertexId::INVALID,
            pv_base: default(),
            pv_left: default(),
            pv_right: default(),
            f_base: None,
            f_left: None,
            f_right: None,
            father: None,
            son_left: None,
            son_right: None,
            tile_id: 0,
            tile_material: None,
            tile_faces: [None; MAX_TILE_FACE],
        }
    }
}

impl Face {
    pub fn patch(&self) -> PatchId {
        self.patch
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn error_metric(&self) -> f32 {
        self.error_metric
    }

    pub fn is_leaf(&self) -> bool {
        self.son_left.is_none()
    }

    pub fn father(&self) -> Option<FaceId> {
        self.father
    }

    pub fn sons(&self) -> Option<(FaceId, FaceId)> {
        self.son_left.zip(self.son_right)
    }

    pub fn vertex(&self, side: Side) -> VertexId {
        match side {
            Side::Base => self.v_base,
            Side::Left => self.v_left,
            Side::Right => self.v_right,
        }
    }

    pub fn vertices(&self) -> [VertexId; 3] {
        [self.v_base, self.v_left, self.v_right]
    }

    pub fn far_vertices(&self) -> [FarVertexId; 3] {
        [self.fv_base, self.fv_left, self.fv_right]
    }

    pub fn param_coord(&self, side: Side) -> ParamCoord {
        match side {
            Side::Base => self.pv_base,
            Side::Left => self.pv_left,
            Side::Right => self.pv_right,
        }
    }

    pub fn neighbor(&self, side: Side) -> Option<FaceId> {
        match side {
            Side::Base => self.f_base,
            Side::Left => self.f_left,
            Side::Right => self.f_right,
        }
    }

    pub fn neighbors(&self) -> [Option<FaceId>; 3] {
        [self.f_base, self.f_left, self.f_right]
    }

    pub(crate) fn neighbor_mut(&mut self, side: Side) -> &mut Option<FaceId> {
        match side {
            Side::Base => &mut self.f_base,
            Side::Left => &mut self.f_left,
            Side::Right => &mut self.f_right,
        }
    }

    pub fn tile_material(&self) -> Option<TileMaterialId> {
        self.tile_material
    }

    pub fn tile_id(&self) -> u32 {
        self.tile_id
    }

    /// Faces without a patch are the two sentinels and the temporary multiple bind faces.
    pub fn is_multiple_bind_face(&self) -> bool {
        self.patch == PatchId::INVALID
    }
}

/// A tessellation vertex which geomorphs from `start_pos` to `end_pos`.
#[derive(Clone, Debug, Default)]
pub struct Vertex {
    /// The position while the vertex is not yet needed, interpolated from its parents.
    pub start_pos: Vec3,
    /// The position on the surface.
    pub end_pos: Vec3,
    /// The geomorphed position used for rendering.
    pub pos: Vec3,
    pub max_face_size: f32,
    pub max_near_limit: f32,
    /// The number of compiled zones referencing this vertex as a base vertex.
    pub(crate) zone_refs: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct FarVertex {
    pub src: VertexId,
    pub pcoord: ParamCoord,
}

#[derive(Clone, Copy, Debug)]
pub struct NearVertex {
    pub src: VertexId,
    /// The uv of the tile texture.
    pub uv0: Vec2,
    /// The uv of the lightmap or the alpha texture.
    pub uv1: Vec2,
}

/// The near vertices of a face in a single tile pass.
#[derive(Clone, Copy, Debug)]
pub struct TileFace {
    pub v_base: NearVertexId,
    pub v_left: NearVertexId,
    pub v_right: NearVertexId,
}

impl Default for TileFace {
    fn default() -> Self {
        Self {
            v_base: NearVertexId::INVALID,
            v_left: NearVertexId::INVALID,
            v_right: NearVertexId::INVALID,
        }
    }
}

impl TileFace {
    pub fn vertex(&self, side: Side) -> NearVertexId {
        match side {
            Side::Base => self.v_base,
            Side::Left => self.v_left,
            Side::Right => self.v_right,
        }
    }

    pub(crate) fn vertex_mut(&mut self, side: Side) -> &mut NearVertexId {
        match side {
            Side::Base => &mut self.v_base,
            Side::Left => &mut self.v_left,
            Side::Right => &mut self.v_right,
        }
    }
}

/// The render state of one tile of a patch, shared by all faces inside that tile.
#[derive(Clone, Copy, Debug)]
pub struct TileMaterial {
    pub tile_s: u32,
    pub tile_t: u32,
    pub passes: [bool; MAX_TILE_PASS],
}

impl Landscape {
    pub(crate) fn is_leaf(&self, face: FaceId) -> bool {
        self.faces[face].is_leaf()
    }

    pub(crate) fn sons(&self, face: FaceId) -> (FaceId, FaceId) {
        self.faces[face]
            .sons()
            .unwrap_or_else(|| panic!("Face {face} is a leaf and has no sons."))
    }

    /// Whether the face lies above the square limit level of its patch and is split as a
    /// rectangle together with its base neighbor.
    pub(crate) fn is_rectangular(&self, face: FaceId) -> bool {
        let f = &self.faces[face];
        f.patch != PatchId::INVALID && f.level < self.patches[f.patch].square_limit_level
    }

    /// Whether a neighbor link points to a temporary multiple bind face.
    pub(crate) fn is_multiple_bind_link(&self, face: FaceId) -> bool {
        !face.is_sentinel() && self.faces[face].is_multiple_bind_face()
    }

    /// Replaces every neighbor link of `face` pointing to `from` by `to`.
    pub(crate) fn change_neighbor(&mut self, face: FaceId, from: Option<FaceId>, to: Option<FaceId>) {
        if face.is_sentinel() {
            return;
        }

        let f = &mut self.faces[face];
        for link in [&mut f.f_base, &mut f.f_left, &mut f.f_right] {
            if *link == from {
                *link = to;
            }
        }
    }

    pub(crate) fn same_tile(&self, a: FaceId, b: FaceId) -> bool {
        let (a, b) = (&self.faces[a], &self.faces[b]);
        a.patch == b.patch && a.tile_id == b.tile_id
    }

    pub(crate) fn compute_vertex(&self, patch: PatchId, coord: ParamCoord) -> Vec3 {
        self.surface
            .compute_vertex(&self.patches[patch].bezier, coord.s(), coord.t())
    }

    pub(crate) fn new_far_vertex(
        &mut self,
        patch: PatchId,
        src: VertexId,
        pcoord: ParamCoord,
    ) -> FarVertexId {
        let vertex = self.far_vertices.insert(FarVertex { src, pcoord });
        self.notify(RenderEvent::AppendFarVertex { patch, vertex });
        vertex
    }

    pub(crate) fn delete_far_vertex(&mut self, patch: PatchId, vertex: FarVertexId) {
        self.notify(RenderEvent::RemoveFarVertex { patch, vertex });
        self.far_vertices.remove(vertex);
    }

    /// Removes a face from the arena and from any priority list.
    pub(crate) fn delete_face(&mut self, face: FaceId) {
        assert!(!face.is_sentinel(), "Tried deleting a sentinel face.");
        self.split_list.unlink(face);
        self.merge_list.unlink(face);
        self.faces.remove(face);
    }

    /// Schedules a face in one of the priority lists, removing it from the other.
    pub(crate) fn schedule_split(&mut self, delta: f32, face: FaceId) {
        self.merge_list.unlink(face);
        self.split_list.insert(delta, face);
    }

    pub(crate) fn schedule_merge(&mut self, delta: f32, face: FaceId) {
        self.split_list.unlink(face);
        self.merge_list.insert(delta, face);
    }

    pub(crate) fn unschedule(&mut self, face: FaceId) {
        self.split_list.unlink(face);
        self.merge_list.unlink(face);
    }
}

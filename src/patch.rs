use crate::{
    arena::arena_id,
    landscape::Landscape,
    math::{aabb_from_points, clip_aabb, ClipResult, ParamCoord},
    render::RenderEvent,
    surface::BezierPatch,
    tessellation::{
        Face, FaceId, FarVertexId, LightmapBlock, Side, VertexId, MAX_TILE_PASS, PASS_ADD,
        PASS_LIGHTMAP, PASS_RGB0, PASS_RGB1, PASS_RGB2,
    },
};
use bevy::{
    prelude::*,
    render::primitives::{Aabb, HalfSpace},
    utils::HashMap,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

arena_id!(
    /// A compiled patch of the landscape.
    PatchId
);

impl PatchId {
    pub const INVALID: Self = Self(u32::MAX);
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct TileFlags: u8 {
        /// The tile is drawn with an additional additive layer.
        const ADDITIVE = 1 << 0;
    }
}

/// The texture layers of a single tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileElement {
    /// The tile texture of each layer, [`TileElement::NONE`] for an empty layer.
    pub tiles: [u16; 3],
    /// The number of quarter turns each layer is rotated by.
    pub rotations: [u8; 3],
    pub flags: TileFlags,
}

impl TileElement {
    pub const NONE: u16 = u16::MAX;

    pub fn new(tile: u16) -> Self {
        Self {
            tiles: [tile, Self::NONE, Self::NONE],
            ..default()
        }
    }
}

impl Default for TileElement {
    fn default() -> Self {
        Self {
            tiles: [Self::NONE; 3],
            rotations: [0; 3],
            flags: TileFlags::empty(),
        }
    }
}

/// The vertex color at a corner of a tile, encoded as RGB 565.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileColor {
    pub color: u16,
}

/// How an edge of a patch is connected to its neighbors.
///
/// Neighbors of a fan are ordered from the first corner of the edge to the second one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatchBind {
    #[default]
    Unbound,
    /// The edge is shared with the edge of a single patch of the same length.
    Simple { next: PatchId, edge: u8 },
    /// The edge is shared with two patches of half its length.
    Fan2 { next: [PatchId; 2], edges: [u8; 2] },
    /// The edge is shared with four patches of a quarter of its length.
    Fan4 { next: [PatchId; 4], edges: [u8; 4] },
    /// The edge is the `index`th of `count` patches along the longer edge of `next`.
    /// The longer patch creates the links.
    SubBind {
        next: PatchId,
        edge: u8,
        count: u8,
        index: u8,
    },
}

impl PatchBind {
    /// The patches on the other side of the edge.
    pub fn neighbors(&self) -> Vec<PatchId> {
        match *self {
            PatchBind::Unbound => Vec::new(),
            PatchBind::Simple { next, .. } | PatchBind::SubBind { next, .. } => vec![next],
            PatchBind::Fan2 { next, .. } => next.to_vec(),
            PatchBind::Fan4 { next, .. } => next.to_vec(),
        }
    }
}

/// A Bezier patch with its two root faces.
///
/// Corner `0` lies at `(s, t) = (0, 0)`, corner `1` at `(0, 1)`, corner `2` at `(1, 1)` and
/// corner `3` at `(1, 0)`. Edge `e` runs from corner `e` to corner `e + 1`.
pub struct Patch {
    pub(crate) zone: u16,
    pub(crate) index: u16,
    pub(crate) order_s: u32,
    pub(crate) order_t: u32,
    /// The level at which faces cover exactly half a tile.
    pub(crate) tile_limit_level: u32,
    /// Faces above this level are split as rectangles.
    pub(crate) square_limit_level: u32,
    pub(crate) error_size: f32,
    pub(crate) bezier: BezierPatch,
    /// Indexed by `[t, s]`.
    pub(crate) tiles: Array2<TileElement>,
    /// Indexed by `[t, s]`, one more in each direction than tiles.
    pub(crate) tile_colors: Array2<TileColor>,
    pub(crate) base_vertices: [VertexId; 4],
    pub(crate) base_far_vertices: [FarVertexId; 4],
    pub(crate) roots: [FaceId; 2],
    pub(crate) binds: [PatchBind; 4],
    /// The temporary faces of fans while the patch is being bound.
    pub(crate) multiple_bind_faces: Vec<FaceId>,
    pub(crate) lightmaps: HashMap<UVec2, LightmapBlock>,
    pub(crate) aabb: Aabb,
    pub(crate) clipped: bool,
    pub(crate) exclude_from_refine_all: bool,
}

impl Patch {
    pub fn zone(&self) -> u16 {
        self.zone
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn order_s(&self) -> u32 {
        self.order_s
    }

    pub fn order_t(&self) -> u32 {
        self.order_t
    }

    pub fn tile_limit_level(&self) -> u32 {
        self.tile_limit_level
    }

    pub fn square_limit_level(&self) -> u32 {
        self.square_limit_level
    }

    /// The error size of the whole patch. Each root face starts with half of it.
    pub fn error_size(&self) -> f32 {
        self.error_size
    }

    pub fn roots(&self) -> [FaceId; 2] {
        self.roots
    }

    pub fn binds(&self) -> [PatchBind; 4] {
        self.binds
    }

    pub fn base_vertices(&self) -> [VertexId; 4] {
        self.base_vertices
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn is_clipped(&self) -> bool {
        self.clipped
    }

    pub fn tiles(&self) -> &Array2<TileElement> {
        &self.tiles
    }

    pub fn tile_colors(&self) -> &Array2<TileColor> {
        &self.tile_colors
    }

    pub fn tile_element(&self, tile_id: u32) -> &TileElement {
        let (t, s) = (tile_id / self.order_s, tile_id % self.order_s);
        &self.tiles[[t as usize, s as usize]]
    }

    /// The render passes a tile needs.
    pub fn tile_passes(&self, tile_s: u32, tile_t: u32) -> [bool; MAX_TILE_PASS] {
        let element = &self.tiles[[tile_t as usize, tile_s as usize]];

        let mut passes = [false; MAX_TILE_PASS];
        passes[PASS_RGB0] = true;
        passes[PASS_RGB1] = element.tiles[1] != TileElement::NONE;
        passes[PASS_RGB2] = element.tiles[2] != TileElement::NONE;
        passes[PASS_ADD] = element.flags.contains(TileFlags::ADDITIVE);
        passes[PASS_LIGHTMAP] = true;
        passes
    }

    /// The root face and its side lying along an edge of the patch.
    pub(crate) fn edge_root(&self, edge: usize) -> (FaceId, Side) {
        let [son0, son1] = self.roots;

        if self.order_s >= self.order_t {
            match edge {
                0 => (son0, Side::Right),
                1 => (son0, Side::Left),
                2 => (son1, Side::Right),
                3 => (son1, Side::Left),
                _ => panic!("Edge {edge} does not exist."),
            }
        } else {
            match edge {
                0 => (son0, Side::Left),
                1 => (son1, Side::Right),
                2 => (son1, Side::Left),
                3 => (son0, Side::Right),
                _ => panic!("Edge {edge} does not exist."),
            }
        }
    }
}

/// The parameter coordinates of the four corners.
const CORNERS: [ParamCoord; 4] = [
    ParamCoord { s: 0, t: 0 },
    ParamCoord {
        s: 0,
        t: ParamCoord::ONE,
    },
    ParamCoord {
        s: ParamCoord::ONE,
        t: ParamCoord::ONE,
    },
    ParamCoord {
        s: ParamCoord::ONE,
        t: 0,
    },
];

/// The data a patch is compiled from.
pub(crate) struct PatchSource<'a> {
    pub(crate) zone: u16,
    pub(crate) index: u16,
    pub(crate) order_s: u32,
    pub(crate) order_t: u32,
    pub(crate) error_size: f32,
    pub(crate) bezier: BezierPatch,
    pub(crate) tiles: &'a Array2<TileElement>,
    pub(crate) tile_colors: &'a Array2<TileColor>,
}

impl Landscape {
    /// Creates the two root faces of a patch on top of its base vertices.
    pub(crate) fn compile_patch(
        &mut self,
        source: PatchSource,
        base_vertices: [VertexId; 4],
    ) -> PatchId {
        let (order_s, order_t) = (source.order_s, source.order_t);
        assert!(
            order_s.is_power_of_two() && order_t.is_power_of_two(),
            "The orders of patch {} must be powers of two, not {order_s}x{order_t}.",
            source.index
        );
        let (log_s, log_t) = (order_s.trailing_zeros(), order_t.trailing_zeros());
        let tile_limit_level = log_s + log_t;

        let aabb = aabb_from_points(source.bezier.control_points()).unwrap_or_default();

        let patch = self.patches.insert(Patch {
            zone: source.zone,
            index: source.index,
            order_s,
            order_t,
            tile_limit_level,
            square_limit_level: log_s.abs_diff(log_t),
            error_size: source.error_size,
            bezier: source.bezier,
            tiles: source.tiles.clone(),
            tile_colors: source.tile_colors.clone(),
            base_vertices,
            base_far_vertices: [FarVertexId::INVALID; 4],
            // Replaced as soon as the roots exist.
            roots: [FaceId::CANT_MERGE; 2],
            binds: [PatchBind::Unbound; 4],
            multiple_bind_faces: Vec::new(),
            lightmaps: HashMap::default(),
            aabb,
            clipped: false,
            exclude_from_refine_all: false,
        });

        let mut far_vertices = [FarVertexId::INVALID; 4];
        for corner in 0..4 {
            let position = self.compute_vertex(patch, CORNERS[corner]);
            let vertex = &mut self.vertices[base_vertices[corner]];
            vertex.start_pos = position;
            vertex.end_pos = position;
            vertex.pos = position;

            far_vertices[corner] = self.new_far_vertex(patch, base_vertices[corner], CORNERS[corner]);
        }
        self.patches[patch].base_far_vertices = far_vertices;

        // The hypotenuse of both roots is the diagonal from corner 0 to corner 2 for wide
        // patches and from corner 1 to corner 3 for tall ones.
        let corners = if order_s >= order_t {
            [[1, 2, 0], [3, 0, 2]]
        } else {
            [[0, 1, 3], [2, 3, 1]]
        };
        let size = source.error_size * 0.5;

        let roots = corners.map(|[base, left, right]| {
            self.faces.insert(Face {
                patch,
                size,
                v_base: base_vertices[base],
                v_left: base_vertices[left],
                v_right: base_vertices[right],
                fv_base: far_vertices[base],
                fv_left: far_vertices[left],
                fv_right: far_vertices[right],
                pv_base: CORNERS[base],
                pv_left: CORNERS[left],
                pv_right: CORNERS[right],
                ..Face::default()
            })
        });
        let [son0, son1] = roots;
        self.faces[son0].f_base = Some(son1);
        self.faces[son1].f_base = Some(son0);
        self.patches[patch].roots = roots;

        for root in roots {
            self.compute_split_point(root);
            self.notify(RenderEvent::AppendFace { patch, face: root });
        }
        if tile_limit_level == 0 {
            self.compute_tile_material(son0);
            self.compute_tile_material(son1);
        }
        for root in roots {
            self.schedule_split(0.0, root);
        }

        patch
    }

    /// Deletes an unbound patch with all of its faces and render data.
    pub(crate) fn release_patch(&mut self, patch: PatchId) {
        let roots = self.patches[patch].roots;

        for root in roots {
            self.force_merge(root);
        }
        for root in roots {
            assert!(
                self.is_leaf(root),
                "Patch {patch} is released while it is still bound."
            );
        }
        assert!(
            self.patches[patch].multiple_bind_faces.is_empty(),
            "Patch {patch} is released with pending multiple binds."
        );

        if self.patches[patch].tile_limit_level == 0 {
            for root in roots {
                self.release_tile_material(root);
            }
        }

        for root in roots {
            self.notify(RenderEvent::RemoveFace { patch, face: root });
            self.delete_face(root);
        }
        for vertex in self.patches[patch].base_far_vertices {
            self.delete_far_vertex(patch, vertex);
        }

        let patch = self.patches.remove(patch);
        assert!(
            patch.lightmaps.is_empty(),
            "Patch {} of zone {} leaks lightmap blocks.",
            patch.index,
            patch.zone
        );
    }

    fn set_edge_link(&mut self, patch: PatchId, edge: usize, link: Option<FaceId>) {
        let (root, side) = self.patches[patch].edge_root(edge);
        *self.faces[root].neighbor_mut(side) = link;
    }

    /// Binds the edges of a patch to its neighbors and splits the faces along them until
    /// both sides share the same vertices.
    ///
    /// The roots of the patch must be leaves, see [`Self::unbind_patch`].
    pub(crate) fn bind_patch(&mut self, patch: PatchId, binds: [PatchBind; 4]) {
        let roots = self.patches[patch].roots;
        for root in roots {
            assert!(
                self.is_leaf(root),
                "Patch {patch} is bound while its root {root} is split."
            );
        }

        for (edge, bind) in binds.iter().enumerate() {
            match *bind {
                PatchBind::Unbound | PatchBind::SubBind { .. } => {}
                PatchBind::Simple { next, edge: next_edge } => {
                    let (ours, _) = self.patches[patch].edge_root(edge);
                    let (theirs, _) = self.patches[next].edge_root(next_edge as usize);

                    self.set_edge_link(patch, edge, Some(theirs));
                    self.set_edge_link(next, next_edge as usize, Some(ours));
                }
                PatchBind::Fan2 { next, edges } => {
                    let fan = next.into_iter().zip(edges).collect::<Vec<_>>();
                    self.bind_fan(patch, edge, &fan);
                }
                PatchBind::Fan4 { next, edges } => {
                    let fan = next.into_iter().zip(edges).collect::<Vec<_>>();
                    self.bind_fan(patch, edge, &fan);
                }
            }
        }
        self.patches[patch].binds = binds;

        for root in roots {
            self.update_bind(root);
        }

        // Every multiple bind is resolved once the roots are bound.
        for face in std::mem::take(&mut self.patches[patch].multiple_bind_faces) {
            self.faces.remove(face);
        }

        let mut neighbors = binds
            .iter()
            .flat_map(PatchBind::neighbors)
            .filter(|next| *next != patch)
            .collect::<Vec<_>>();
        neighbors.sort();
        neighbors.dedup();

        for next in neighbors {
            for root in self.patches[next].roots {
                self.update_bind(root);
            }
        }
    }

    fn bind_fan(&mut self, patch: PatchId, edge: usize, fan: &[(PatchId, u8)]) {
        let (root, _) = self.patches[patch].edge_root(edge);

        let face = self.multiple_bind_face(patch, fan);
        self.faces[face].f_base = Some(root);
        self.set_edge_link(patch, edge, Some(face));
    }

    /// Builds the temporary face standing for the neighbors of a fan. Its sons are the
    /// halves of the fan and its base vertex is the vertex in the middle of the edge.
    fn multiple_bind_face(&mut self, owner: PatchId, fan: &[(PatchId, u8)]) -> FaceId {
        let (first, second) = fan.split_at(fan.len() / 2);
        let (middle_patch, middle_edge) = first[first.len() - 1];
        let v_base = self.patches[middle_patch].base_vertices[middle_edge as usize];

        let build_half = |landscape: &mut Self, half: &[(PatchId, u8)]| match half {
            [(next, next_edge)] => {
                let (root, _) = landscape.patches[*next].edge_root(*next_edge as usize);
                landscape.set_edge_link(*next, *next_edge as usize, Some(FaceId::MULTIPLE_BIND));
                root
            }
            _ => {
                let face = landscape.multiple_bind_face(owner, half);
                landscape.faces[face].f_base = Some(FaceId::MULTIPLE_BIND);
                face
            }
        };
        let son_right = build_half(self, first);
        let son_left = build_half(self, second);

        let face = self.faces.insert(Face {
            v_base,
            son_left: Some(son_left),
            son_right: Some(son_right),
            ..Face::default()
        });
        self.patches[owner].multiple_bind_faces.push(face);
        face
    }

    /// Cuts all links to other patches, except to the patches in `except`, and merges the
    /// roots as far as possible.
    pub(crate) fn unbind_patch(&mut self, patch: PatchId, except: &[PatchId]) {
        let roots = self.patches[patch].roots;

        for root in roots {
            self.unbind_face(root, except);
        }

        for root in roots {
            self.force_merge(root);
        }

        let binds = &mut self.patches[patch].binds;
        for bind in binds.iter_mut() {
            let kept = bind
                .neighbors()
                .first()
                .is_some_and(|next| except.contains(next));
            if !kept {
                *bind = PatchBind::Unbound;
            }
        }
    }

    /// Classifies a patch against clip planes. Patches with an unknown result are
    /// refined less often.
    pub(crate) fn clip_patch(&mut self, patch: PatchId, planes: &[HalfSpace]) {
        let clipped = clip_aabb(&self.patches[patch].aabb, planes) == ClipResult::Out;
        self.patches[patch].clipped = clipped;
    }

    pub(crate) fn refine_all_patch(&mut self, patch: PatchId) {
        for root in self.patches[patch].roots {
            self.face_refine_all(root);
        }
    }

    pub(crate) fn average_patch_vertices(&mut self, patch: PatchId) {
        for root in self.patches[patch].roots {
            self.face_average_vertices(root);
        }
    }

    /// Recomputes the surface positions of the base vertices and of every split vertex.
    pub(crate) fn refresh_patch_geometry(&mut self, patch: PatchId) {
        for corner in 0..4 {
            let position = self.compute_vertex(patch, CORNERS[corner]);
            let vertex = &mut self.vertices[self.patches[patch].base_vertices[corner]];
            vertex.end_pos = position;
            vertex.pos = position;
        }

        for root in self.patches[patch].roots {
            self.face_refresh_geometry(root);
        }
    }

    pub(crate) fn force_merge_patch_at_tile_level(&mut self, patch: PatchId) {
        for root in self.patches[patch].roots {
            self.face_force_merge_at_tile_level(root);
        }
    }

    /// Replaces the tiles and colors of a patch and rebuilds its tile render data.
    pub(crate) fn change_patch_tiles(
        &mut self,
        patch: PatchId,
        tiles: Option<Array2<TileElement>>,
        tile_colors: Option<Array2<TileColor>>,
    ) {
        let roots = self.patches[patch].roots;
        let tile_limit_level = self.patches[patch].tile_limit_level;

        for root in roots {
            self.delete_tile_uvs(root);
        }
        if tile_limit_level == 0 {
            for root in roots {
                self.release_tile_material(root);
            }
        }

        let p = &mut self.patches[patch];
        if let Some(tiles) = tiles {
            assert_eq!(tiles.dim(), p.tiles.dim(), "The tiles of patch {patch} change size.");
            p.tiles = tiles;
        }
        if let Some(tile_colors) = tile_colors {
            assert_eq!(
                tile_colors.dim(),
                p.tile_colors.dim(),
                "The tile colors of patch {patch} change size."
            );
            p.tile_colors = tile_colors;
        }

        if tile_limit_level == 0 {
            for root in roots {
                self.compute_tile_material(root);
            }
        }
        for root in roots {
            self.recreate_tile_uvs(root);
        }
    }
}

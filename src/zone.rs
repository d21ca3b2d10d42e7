//! Zones group patches sharing one coordinate frame and one table of base vertices.
//!
//! A [`ZoneDescriptor`] is the editable, serializable form of a zone. [`Zone::build`]
//! packs it into the compact runtime form, which is compiled into the tessellation by
//! [`Landscape::add_zone`] and released again by [`Landscape::remove_zone`].

use crate::{
    landscape::Landscape,
    math::{aabb_from_points, clip_aabb, ClipResult, PackedVector},
    patch::{PatchBind, PatchId, PatchSource, TileColor, TileElement},
    surface::BezierPatch,
    tessellation::{Vertex, VertexId},
};
use anyhow::Result;
use bevy::{
    prelude::*,
    render::primitives::{Aabb, HalfSpace},
    utils::HashSet,
};
use itertools::Itertools;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Packed positions use this range of the 16 bit integers.
const PACKED_RANGE: f32 = 32760.0;

bitflags::bitflags! {
    /// Edges along which the lighting of neighbors is smoothed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct SmoothFlags: u8 {
        const EDGE_0 = 1 << 0;
        const EDGE_1 = 1 << 1;
        const EDGE_2 = 1 << 2;
        const EDGE_3 = 1 << 3;
    }
}

/// The neighbors along one edge of a patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindEdge {
    /// `0` for an open edge, `1` for a single neighbor, `2` or `4` if the edge is shared
    /// with that many smaller patches and `5` if the edge is part of the longer edge of
    /// the patch `next[0]`.
    pub n_patchs: u8,
    pub zone_id: u16,
    pub next: [u16; 4],
    pub edge: [u8; 4],
}

impl BindEdge {
    pub fn single(zone_id: u16, next: u16, edge: u8) -> Self {
        Self {
            n_patchs: 1,
            zone_id,
            next: [next, 0, 0, 0],
            edge: [edge, 0, 0, 0],
        }
    }

    /// The number of neighbors listed in `next`.
    fn count(&self) -> usize {
        match self.n_patchs {
            5 => 1,
            n => n as usize,
        }
    }
}

/// The editable description of a patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchInfo {
    pub patch: BezierPatch,
    pub order_s: u8,
    pub order_t: u8,
    /// The size of the patch used by the error metric, usually its area.
    pub error_size: f32,
    /// Indices into the base vertices of the zone, one for each corner.
    pub base_vertices: [u16; 4],
    pub bind_edges: [BindEdge; 4],
    pub smooth: SmoothFlags,
    pub noise_rotation: u8,
    /// `order_s * order_t` tiles, row by row along `t`.
    pub tiles: Vec<TileElement>,
    /// `(order_s + 1) * (order_t + 1)` colors, row by row along `t`.
    pub tile_colors: Vec<TileColor>,
}

/// Identifies a base vertex with the base vertex of a neighbor zone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderVertex {
    pub current_vertex: u16,
    pub neighbor_zone_id: u16,
    pub neighbor_vertex: u16,
}

/// The editable description of a zone, which can be stored as a RON file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneDescriptor {
    pub zone_id: u16,
    pub patches: Vec<PatchInfo>,
    pub border_vertices: Vec<BorderVertex>,
    pub num_vertices: u32,
}

impl ZoneDescriptor {
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let encoded = fs::read_to_string(path)?;
        Ok(ron::from_str(&encoded)?)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, encoded)?;
        Ok(())
    }
}

/// A patch with its control points quantized relative to the zone.
#[derive(Clone, Debug)]
struct PackedPatch {
    vertices: [PackedVector; 4],
    tangents: [PackedVector; 8],
    interiors: [PackedVector; 4],
    order_s: u8,
    order_t: u8,
    error_size: f32,
    base_vertices: [u16; 4],
    bind_edges: [BindEdge; 4],
    smooth: SmoothFlags,
    noise_rotation: u8,
    tiles: Array2<TileElement>,
    tile_colors: Array2<TileColor>,
}

impl PackedPatch {
    fn unpack(&self, bias: Vec3, scale: f32) -> BezierPatch {
        BezierPatch {
            vertices: self.vertices.map(|v| v.unpack(bias, scale)),
            tangents: self.tangents.map(|v| v.unpack(bias, scale)),
            interiors: self.interiors.map(|v| v.unpack(bias, scale)),
        }
    }

    /// Whether an edge leads into another zone.
    fn on_border(&self, zone_id: u16) -> bool {
        self.bind_edges
            .iter()
            .any(|bind| bind.n_patchs >= 1 && bind.zone_id != zone_id)
    }
}

/// A built zone, ready to be compiled into a [`Landscape`].
pub struct Zone {
    id: u16,
    aabb: Aabb,
    patch_bias: Vec3,
    patch_scale: f32,
    patches: Vec<PackedPatch>,
    border_vertices: Vec<BorderVertex>,
    num_vertices: u32,

    pub(crate) compiled: bool,
    pub(crate) base_vertices: Vec<VertexId>,
    pub(crate) patch_ids: Vec<PatchId>,
    pub(crate) clip_result: ClipResult,
}

impl Zone {
    /// Packs a descriptor. Panics on inconsistent tile grids or bind edges.
    pub fn build(descriptor: &ZoneDescriptor) -> Self {
        let zone_id = descriptor.zone_id;

        let aabb = aabb_from_points(
            descriptor
                .patches
                .iter()
                .flat_map(|info| info.patch.control_points()),
        )
        .unwrap_or_default();

        let half_size = Vec3::from(aabb.half_extents).max_element();
        let patch_scale = if half_size > 0.0 {
            half_size / PACKED_RANGE
        } else {
            1.0
        };
        let patch_bias = Vec3::from(aabb.center);

        let mut num_vertices = descriptor.num_vertices;

        let patches = descriptor
            .patches
            .iter()
            .enumerate()
            .map(|(index, info)| {
                let (order_s, order_t) = (info.order_s as usize, info.order_t as usize);
                assert!(
                    info.order_s.is_power_of_two() && info.order_t.is_power_of_two(),
                    "Patch {index} of zone {zone_id} has the orders {order_s}x{order_t}, which are no powers of two."
                );
                assert_eq!(
                    info.tiles.len(),
                    order_s * order_t,
                    "Patch {index} of zone {zone_id} has the wrong number of tiles."
                );
                assert_eq!(
                    info.tile_colors.len(),
                    (order_s + 1) * (order_t + 1),
                    "Patch {index} of zone {zone_id} has the wrong number of tile colors."
                );

                for (edge, bind) in info.bind_edges.iter().enumerate() {
                    assert!(
                        matches!(bind.n_patchs, 0 | 1 | 2 | 4 | 5),
                        "Edge {edge} of patch {index} of zone {zone_id} is bound to {} patches.",
                        bind.n_patchs
                    );
                    assert!(
                        bind.n_patchs <= 1 || bind.zone_id == zone_id,
                        "Edge {edge} of patch {index} of zone {zone_id} binds several patches of another zone."
                    );
                }

                let max_vertex = info.base_vertices.iter().copied().max().unwrap_or_default();
                num_vertices = num_vertices.max(max_vertex as u32 + 1);

                let pack = |v: Vec3| PackedVector::pack(v, patch_bias, patch_scale);

                PackedPatch {
                    vertices: info.patch.vertices.map(pack),
                    tangents: info.patch.tangents.map(pack),
                    interiors: info.patch.interiors.map(pack),
                    order_s: info.order_s,
                    order_t: info.order_t,
                    error_size: info.error_size,
                    base_vertices: info.base_vertices,
                    bind_edges: info.bind_edges,
                    smooth: info.smooth,
                    noise_rotation: info.noise_rotation,
                    tiles: Array2::from_shape_fn((order_t, order_s), |(t, s)| {
                        info.tiles[t * order_s + s]
                    }),
                    tile_colors: Array2::from_shape_fn((order_t + 1, order_s + 1), |(t, s)| {
                        info.tile_colors[t * (order_s + 1) + s]
                    }),
                }
            })
            .collect();

        Self {
            id: zone_id,
            aabb,
            patch_bias,
            patch_scale,
            patches,
            border_vertices: descriptor.border_vertices.clone(),
            num_vertices,
            compiled: false,
            base_vertices: Vec::new(),
            patch_ids: Vec::new(),
            clip_result: ClipResult::Out,
        }
    }

    /// Unpacks the zone into a descriptor. Control points come back quantized.
    pub fn retrieve(&self) -> ZoneDescriptor {
        let patches = self
            .patches
            .iter()
            .map(|patch| PatchInfo {
                patch: patch.unpack(self.patch_bias, self.patch_scale),
                order_s: patch.order_s,
                order_t: patch.order_t,
                error_size: patch.error_size,
                base_vertices: patch.base_vertices,
                bind_edges: patch.bind_edges,
                smooth: patch.smooth,
                noise_rotation: patch.noise_rotation,
                tiles: patch.tiles.iter().copied().collect(),
                tile_colors: patch.tile_colors.iter().copied().collect(),
            })
            .collect();

        ZoneDescriptor {
            zone_id: self.id,
            patches,
            border_vertices: self.border_vertices.clone(),
            num_vertices: self.num_vertices,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    pub fn num_vertices(&self) -> u32 {
        self.num_vertices
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn clip_result(&self) -> ClipResult {
        self.clip_result
    }

    /// The compiled patches, indexed like the patches of the descriptor.
    pub fn patch_ids(&self) -> &[PatchId] {
        &self.patch_ids
    }

    /// The zones this zone shares base vertices with.
    pub fn neighbor_zones(&self) -> Vec<u16> {
        self.border_vertices
            .iter()
            .map(|border| border.neighbor_zone_id)
            .filter(|zone| *zone != self.id)
            .sorted()
            .dedup()
            .collect()
    }

    /// A readable dump of the bind table.
    pub fn debug_binds(&self) -> String {
        let mut dump = format!("ZoneId: {}. NPatchs:{}\n", self.id, self.patches.len());

        for (index, patch) in self.patches.iter().enumerate() {
            dump.push_str(&format!("patch{index}:\n"));

            for (edge, bind) in patch.bind_edges.iter().enumerate() {
                dump.push_str(&format!(
                    "    edge{edge}: Zone:{}. NPatchs:{}. ",
                    bind.zone_id, bind.n_patchs
                ));
                for k in 0..bind.count() {
                    dump.push_str(&format!("p{}e{} - ", bind.next[k], bind.edge[k]));
                }
                dump.push('\n');
            }
        }

        dump.push_str("Vertices :\n");
        for border in &self.border_vertices {
            dump.push_str(&format!(
                "current : {} -> (zone {}) vertex {}\n",
                border.current_vertex, border.neighbor_zone_id, border.neighbor_vertex
            ));
        }

        dump
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(
                !self.compiled,
                "Zone {} is dropped while it is still compiled.",
                self.id
            );
        }
    }
}

impl Landscape {
    /// Compiles a zone and binds it to the loaded neighbor zones. Returns false if a zone
    /// with the same id is already loaded.
    pub fn add_zone(&mut self, mut zone: Zone) -> bool {
        let zone_id = zone.id;
        if self.zones.contains_key(&zone_id) {
            warn!("Zone {zone_id} is already loaded.");
            return false;
        }
        assert!(!zone.compiled, "Zone {zone_id} is compiled twice.");

        let mut neighbors = HashSet::default();
        let mut base_vertices = vec![None; zone.num_vertices as usize];

        for border in &zone.border_vertices {
            let Some(neighbor) = self.zones.get(&border.neighbor_zone_id) else {
                continue;
            };
            let shared = neighbor.base_vertices.get(border.neighbor_vertex as usize);
            let current = base_vertices.get_mut(border.current_vertex as usize);

            match (shared, current) {
                (Some(shared), Some(current)) => {
                    *current = Some(*shared);
                    neighbors.insert(border.neighbor_zone_id);
                }
                _ => warn!(
                    "Border vertex {} of zone {zone_id} references the missing vertex {} of zone {}.",
                    border.current_vertex, border.neighbor_vertex, border.neighbor_zone_id
                ),
            }
        }

        zone.base_vertices = base_vertices
            .into_iter()
            .map(|vertex| vertex.unwrap_or_else(|| self.vertices.insert(Vertex::default())))
            .collect();
        for &vertex in &zone.base_vertices {
            self.vertices[vertex].zone_refs += 1;
        }

        zone.patch_ids = zone
            .patches
            .iter()
            .enumerate()
            .map(|(index, patch)| {
                let source = PatchSource {
                    zone: zone_id,
                    index: index as u16,
                    order_s: patch.order_s as u32,
                    order_t: patch.order_t as u32,
                    error_size: patch.error_size,
                    bezier: patch.unpack(zone.patch_bias, zone.patch_scale),
                    tiles: &patch.tiles,
                    tile_colors: &patch.tile_colors,
                };
                let corners = patch
                    .base_vertices
                    .map(|vertex| zone.base_vertices[vertex as usize]);

                self.compile_patch(source, corners)
            })
            .collect();

        zone.compiled = true;
        zone.clip_result = ClipResult::In;
        let patch_count = zone.patches.len();
        self.zones.insert(zone_id, zone);

        for index in 0..patch_count {
            self.bind_zone_patch(zone_id, index);
        }

        let neighbors = neighbors.into_iter().sorted().collect::<Vec<_>>();
        for &neighbor in &neighbors {
            self.rebind_border(neighbor);
        }

        info!("Compiled zone {zone_id} with {patch_count} patches, rebound the zones {neighbors:?}.");
        true
    }

    /// Unbinds and releases a zone. The neighbor zones are rebound without it.
    pub fn remove_zone(&mut self, zone_id: u16) -> Option<Zone> {
        let mut zone = self.zones.remove(&zone_id)?;

        for &patch in &zone.patch_ids {
            self.unbind_patch(patch, &[]);
        }

        let neighbors = zone
            .neighbor_zones()
            .into_iter()
            .filter(|neighbor| self.zones.contains_key(neighbor))
            .collect::<Vec<_>>();
        for &neighbor in &neighbors {
            self.rebind_border(neighbor);
        }

        for patch in zone.patch_ids.drain(..) {
            self.release_patch(patch);
        }
        for vertex in zone.base_vertices.drain(..) {
            let v = &mut self.vertices[vertex];
            v.zone_refs -= 1;
            if v.zone_refs == 0 {
                self.vertices.remove(vertex);
            }
        }

        zone.compiled = false;
        zone.clip_result = ClipResult::Out;

        info!("Released zone {zone_id}, rebound the zones {neighbors:?}.");
        Some(zone)
    }

    /// Rebinds every patch of a zone with an edge leading into another zone.
    pub fn rebind_border(&mut self, zone_id: u16) {
        let Some(zone) = self.zones.get(&zone_id) else {
            return;
        };

        let border_patches = zone
            .patches
            .iter()
            .positions(|patch| patch.on_border(zone_id))
            .collect::<Vec<_>>();

        for index in border_patches {
            self.bind_zone_patch(zone_id, index);
        }
    }

    fn bind_zone_patch(&mut self, zone_id: u16, index: usize) {
        let (patch, binds, except) = self.make_bind_info(zone_id, index);
        self.unbind_patch(patch, &except);
        self.bind_patch(patch, binds);
    }

    /// Resolves the bind edges of a patch against the loaded zones. Edges leading to
    /// missing patches stay unbound. The longer neighbors of sub binds are returned as
    /// exceptions, since the longer patch owns those links.
    fn make_bind_info(&self, zone_id: u16, index: usize) -> (PatchId, [PatchBind; 4], Vec<PatchId>) {
        let zone = &self.zones[&zone_id];
        let patch = zone.patch_ids[index];
        let mut binds = [PatchBind::Unbound; 4];
        let mut except = Vec::new();

        for (edge, bind) in zone.patches[index].bind_edges.iter().enumerate() {
            let neighbor_zone = self.zones.get(&bind.zone_id);
            let next = |k: usize| {
                neighbor_zone.and_then(|zone| zone.patch_ids.get(bind.next[k] as usize).copied())
            };

            binds[edge] = match bind.n_patchs {
                0 => PatchBind::Unbound,
                1 => match next(0) {
                    Some(next) => PatchBind::Simple {
                        next,
                        edge: bind.edge[0],
                    },
                    None => PatchBind::Unbound,
                },
                2 => match (next(0), next(1)) {
                    (Some(a), Some(b)) => PatchBind::Fan2 {
                        next: [a, b],
                        edges: [bind.edge[0], bind.edge[1]],
                    },
                    _ => PatchBind::Unbound,
                },
                4 => match (next(0), next(1), next(2), next(3)) {
                    (Some(a), Some(b), Some(c), Some(d)) => PatchBind::Fan4 {
                        next: [a, b, c, d],
                        edges: bind.edge,
                    },
                    _ => PatchBind::Unbound,
                },
                5 => match (next(0), neighbor_zone) {
                    (Some(next), Some(neighbor_zone)) => {
                        except.push(next);

                        let twin = &neighbor_zone.patches[bind.next[0] as usize].bind_edges
                            [bind.edge[0] as usize];
                        assert!(
                            matches!(twin.n_patchs, 2 | 4),
                            "Patch {index} of zone {zone_id} is part of edge {} of patch {}, which binds {} patches.",
                            bind.edge[0],
                            bind.next[0],
                            twin.n_patchs
                        );
                        let position = twin.next[..twin.n_patchs as usize]
                            .iter()
                            .position(|next| *next as usize == index)
                            .unwrap_or_else(|| {
                                panic!(
                                    "Patch {index} of zone {zone_id} is missing in edge {} of patch {}.",
                                    bind.edge[0], bind.next[0]
                                )
                            });

                        PatchBind::SubBind {
                            next,
                            edge: bind.edge[0],
                            count: twin.n_patchs,
                            index: position as u8,
                        }
                    }
                    _ => PatchBind::Unbound,
                },
                n => panic!("Edge {edge} of patch {index} of zone {zone_id} is bound to {n} patches."),
            };
        }

        (patch, binds, except)
    }

    /// Classifies every zone against the clip planes, whose positive sides are visible.
    /// Patches of partially visible zones are classified one by one.
    pub fn clip(&mut self, planes: &[HalfSpace]) {
        let zone_ids = self.zones.keys().copied().collect::<Vec<_>>();

        for zone_id in zone_ids {
            let zone = &self.zones[&zone_id];
            let result = if zone.patches.is_empty() {
                ClipResult::Out
            } else {
                clip_aabb(&zone.aabb, planes)
            };
            let patches = zone.patch_ids.clone();

            if let Some(zone) = self.zones.get_mut(&zone_id) {
                zone.clip_result = result;
            }

            for patch in patches {
                match result {
                    ClipResult::In => self.patches[patch].clipped = false,
                    ClipResult::Out => self.patches[patch].clipped = true,
                    ClipResult::Side => self.clip_patch(patch, planes),
                }
            }
        }
    }

    /// Marks every zone and patch as visible.
    pub(crate) fn force_no_clip(&mut self) {
        for zone in self.zones.values_mut() {
            zone.clip_result = ClipResult::In;
        }
        for (_, patch) in self.patches.iter_mut() {
            patch.clipped = false;
        }
    }

    pub fn zone(&self, zone_id: u16) -> Option<&Zone> {
        self.zones.get(&zone_id)
    }

    pub fn patch_id(&self, zone_id: u16, index: usize) -> Option<PatchId> {
        self.zones.get(&zone_id)?.patch_ids.get(index).copied()
    }

    /// Excludes a patch from [`Landscape::refine_all`].
    pub fn exclude_patch_from_refine_all(&mut self, zone_id: u16, index: usize, exclude: bool) {
        if let Some(patch) = self.patch_id(zone_id, index) {
            self.patches[patch].exclude_from_refine_all = exclude;
        }
    }

    /// Recomputes the surface positions of a patch, after its surface evaluator changed.
    pub fn refresh_tesselation_geometry(&mut self, zone_id: u16, index: usize) {
        if let Some(patch) = self.patch_id(zone_id, index) {
            self.refresh_patch_geometry(patch);
        }
    }

    /// Replaces the tiles and tile colors of a compiled patch. Slices are laid out like
    /// the ones of [`PatchInfo`] and must keep their size.
    pub fn change_patch_texture_and_color(
        &mut self,
        zone_id: u16,
        index: usize,
        tiles: Option<&[TileElement]>,
        tile_colors: Option<&[TileColor]>,
    ) {
        let Some(patch) = self.patch_id(zone_id, index) else {
            warn!("Patch {index} of zone {zone_id} is not loaded.");
            return;
        };

        let (order_s, order_t) = {
            let p = &self.patches[patch];
            (p.order_s as usize, p.order_t as usize)
        };

        let tiles = tiles.map(|tiles| {
            assert_eq!(tiles.len(), order_s * order_t, "The number of tiles changed.");
            Array2::from_shape_fn((order_t, order_s), |(t, s)| tiles[t * order_s + s])
        });
        let tile_colors = tile_colors.map(|colors| {
            assert_eq!(
                colors.len(),
                (order_s + 1) * (order_t + 1),
                "The number of tile colors changed."
            );
            Array2::from_shape_fn((order_t + 1, order_s + 1), |(t, s)| {
                colors[t * (order_s + 1) + s]
            })
        });

        if let Some(packed) = self
            .zones
            .get_mut(&zone_id)
            .and_then(|zone| zone.patches.get_mut(index))
        {
            if let Some(tiles) = &tiles {
                packed.tiles = tiles.clone();
            }
            if let Some(tile_colors) = &tile_colors {
                packed.tile_colors = tile_colors.clone();
            }
        }

        self.change_patch_tiles(patch, tiles, tile_colors);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{connect_zones_x, fan_zone, grid_descriptor, landscape_with};
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn build_and_retrieve_keep_the_layout() {
        let mut descriptor = grid_descriptor(3, 2, 1, 4, 2, Vec3::new(10.0, 0.0, -4.0));
        descriptor.patches[1].tiles[5].rotations = [2, 0, 0];
        descriptor.patches[0].smooth = SmoothFlags::EDGE_0 | SmoothFlags::EDGE_3;

        let zone = Zone::build(&descriptor);
        let retrieved = zone.retrieve();

        assert_eq!(retrieved.zone_id, 3);
        assert_eq!(retrieved.num_vertices, descriptor.num_vertices);
        assert_eq!(retrieved.border_vertices, descriptor.border_vertices);

        for (original, retrieved) in descriptor.patches.iter().zip(&retrieved.patches) {
            assert_eq!(original.tiles, retrieved.tiles);
            assert_eq!(original.tile_colors, retrieved.tile_colors);
            assert_eq!(original.bind_edges, retrieved.bind_edges);
            assert_eq!(original.smooth, retrieved.smooth);

            for (a, b) in original
                .patch
                .control_points()
                .zip(retrieved.patch.control_points())
            {
                assert_relative_eq!(a.x, b.x, epsilon = 1e-2);
                assert_relative_eq!(a.y, b.y, epsilon = 1e-2);
                assert_relative_eq!(a.z, b.z, epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn num_vertices_covers_the_base_vertices() {
        let mut descriptor = grid_descriptor(0, 1, 1, 2, 2, Vec3::ZERO);
        descriptor.num_vertices = 0;

        assert_eq!(Zone::build(&descriptor).num_vertices(), 4);
    }

    #[test]
    #[should_panic]
    fn wrong_tile_count_is_rejected() {
        let mut descriptor = grid_descriptor(0, 1, 1, 2, 2, Vec3::ZERO);
        descriptor.patches[0].tiles.pop();
        Zone::build(&descriptor);
    }

    #[test]
    fn descriptor_file_round_trip() {
        let path = std::env::temp_dir().join("bevy_landscape_zone_round_trip.ron");
        let descriptor = grid_descriptor(7, 2, 2, 2, 2, Vec3::ZERO);

        descriptor.save_file(&path).unwrap();
        assert_eq!(ZoneDescriptor::load_file(&path).unwrap(), descriptor);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn debug_binds_lists_edges_and_borders() {
        let (mut left, mut right) = (
            grid_descriptor(1, 1, 1, 2, 2, Vec3::ZERO),
            grid_descriptor(2, 1, 1, 2, 2, Vec3::new(4.0, 0.0, 0.0)),
        );
        connect_zones_x(&mut left, &mut right);

        let dump = Zone::build(&left).debug_binds();
        let lines = dump.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "ZoneId: 1. NPatchs:1");
        assert_eq!(lines[1], "patch0:");
        assert_eq!(lines[2], "    edge0: Zone:1. NPatchs:0. ");
        assert_eq!(lines[4], "    edge2: Zone:2. NPatchs:1. p0e0 - ");
        assert_eq!(lines[6], "Vertices :");
        assert_eq!(lines[7], "current : 1 -> (zone 2) vertex 0");
    }

    #[test]
    fn compiled_zone_owns_its_base_vertices() {
        let mut landscape = landscape_with([Zone::build(&grid_descriptor(0, 2, 2, 2, 2, Vec3::ZERO))]);

        let zone = landscape.zone(0).unwrap();
        assert!(zone.is_compiled());
        assert_eq!(zone.patch_ids().len(), 4);
        assert_eq!(landscape.vertex_count(), 9);
        landscape.check_tessellation().unwrap();

        let zone = landscape.remove_zone(0).unwrap();
        assert!(!zone.is_compiled());
        assert_eq!(landscape.vertex_count(), 0);
        assert_eq!(landscape.face_count(), 0);
        assert!(landscape.render_lists().is_empty());
    }

    #[test]
    fn duplicate_zones_are_rejected() {
        let descriptor = grid_descriptor(4, 1, 1, 2, 2, Vec3::ZERO);
        let mut landscape = landscape_with([Zone::build(&descriptor)]);

        assert!(!landscape.add_zone(Zone::build(&descriptor)));
        assert_eq!(landscape.zones().count(), 1);
    }

    #[test]
    fn neighbor_zones_share_border_vertices() {
        let (mut left, mut right) = (
            grid_descriptor(1, 2, 2, 2, 2, Vec3::ZERO),
            grid_descriptor(2, 2, 2, 2, 2, Vec3::new(8.0, 0.0, 0.0)),
        );
        connect_zones_x(&mut left, &mut right);

        let mut landscape = landscape_with([Zone::build(&left)]);
        let border_patch = landscape.patch_id(1, 1).unwrap();
        assert_eq!(landscape.patch_bind(border_patch, 2), Some(PatchBind::Unbound));

        assert!(landscape.add_zone(Zone::build(&right)));
        assert_eq!(landscape.vertex_count(), 9 + 9 - 3);
        assert!(matches!(
            landscape.patch_bind(border_patch, 2),
            Some(PatchBind::Simple { edge: 0, .. })
        ));
        landscape.check_tessellation().unwrap();

        landscape.remove_zone(2).unwrap();
        assert_eq!(landscape.vertex_count(), 9);
        assert_eq!(landscape.patch_bind(border_patch, 2), Some(PatchBind::Unbound));
        landscape.check_tessellation().unwrap();
    }

    #[test]
    fn fans_resolve_to_shared_vertices() {
        for fan in [2, 4] {
            let mut landscape = landscape_with([fan_zone(0, fan)]);
            let big = landscape.patch_id(0, 0).unwrap();

            let bind = landscape.patch_bind(big, 2).unwrap();
            match fan {
                2 => assert!(matches!(bind, PatchBind::Fan2 { .. })),
                _ => assert!(matches!(bind, PatchBind::Fan4 { .. })),
            }
            for index in 1..=fan {
                let small = landscape.patch_id(0, index).unwrap();
                assert!(matches!(
                    landscape.patch_bind(small, 0),
                    Some(PatchBind::SubBind { count, .. }) if count as usize == fan
                ));
            }

            // No multiple bind is left pending and the middle of the edge is shared.
            landscape.check_tessellation().unwrap();
            assert!(landscape
                .faces
                .iter()
                .all(|(id, face)| id.is_sentinel() || !face.is_multiple_bind_face()));

            let middle = landscape.patches[landscape.patch_id(0, fan).unwrap()].base_vertices[0];
            assert!(landscape
                .leaves(big)
                .iter()
                .any(|leaf| landscape.faces[*leaf].vertices().contains(&middle)));

            landscape.refine_all(Vec3::new(4.0, 0.0, 2.0));
            landscape.check_tessellation().unwrap();
            landscape.refine_all(Vec3::splat(1.0e5));
            landscape.check_tessellation().unwrap();

            landscape.remove_zone(0).unwrap();
            assert_eq!(landscape.vertex_count(), 0);
        }
    }

    #[test]
    fn refinement_walks_across_fan_edges() {
        for fan in [2, 4] {
            let mut rng = StdRng::seed_from_u64(fan as u64);
            let mut landscape = landscape_with([fan_zone(0, fan)]);

            let mut position = Vec3::new(8.0, 2.0, 4.0);
            for step in 0..400 {
                position += Vec3::new(
                    rng.random_range(-1.5..1.5),
                    rng.random_range(-0.5..0.5),
                    rng.random_range(-1.5..1.5),
                );
                position = position.clamp(Vec3::new(2.0, 0.2, -2.0), Vec3::new(14.0, 10.0, 10.0));
                landscape.refine(position);

                if step % 10 == 0 {
                    landscape.check_tessellation().unwrap();
                }
            }

            landscape.check_tessellation().unwrap();
            landscape.remove_zone(0).unwrap();
            assert_eq!(landscape.vertex_count(), 0);
        }
    }

    #[test]
    fn refined_fan_zones_rebind_after_reload() {
        for fan in [2, 4] {
            let mut landscape = landscape_with([fan_zone(0, fan)]);
            let bound_faces = landscape.face_count();
            let close = Vec3::new(8.0, 0.3, 4.0);

            landscape.refine_all(close);
            assert!(landscape.face_count() > bound_faces);
            landscape.check_tessellation().unwrap();

            let zone = landscape.remove_zone(0).unwrap();
            assert_eq!(landscape.face_count(), 0);
            assert_eq!(landscape.vertex_count(), 0);

            assert!(landscape.add_zone(Zone::build(&zone.retrieve())));
            let big = landscape.patch_id(0, 0).unwrap();
            match fan {
                2 => assert!(matches!(landscape.patch_bind(big, 2), Some(PatchBind::Fan2 { .. }))),
                _ => assert!(matches!(landscape.patch_bind(big, 2), Some(PatchBind::Fan4 { .. }))),
            }
            assert_eq!(landscape.face_count(), bound_faces);
            landscape.check_tessellation().unwrap();

            landscape.refine_all(close);
            assert!(landscape.face_count() > bound_faces);
            landscape.check_tessellation().unwrap();
        }
    }
}

use crate::{
    arena::Arena,
    config::{LandscapeConfig, RefineGlobals},
    math::ClipResult,
    patch::{Patch, PatchBind, PatchId},
    priority::PriorityList,
    render::{RenderEvent, RenderLists, RenderSink},
    surface::{BezierSurface, SurfaceEvaluator},
    tessellation::{
        Face, FaceId, FarVertex, FarVertexId, NearVertex, NearVertexId, TileFace, TileFaceId,
        TileMaterial, TileMaterialId, Vertex, VertexId,
    },
    tile_allocator::{GridTileAllocator, TileAllocator},
    zone::Zone,
};
use bevy::{prelude::*, utils::HashMap};
use itertools::Itertools;

/// The tessellation of all loaded zones.
///
/// Faces are refined by [`Landscape::refine`], which only tests the faces whose schedule
/// in the split or merge list expired since the refine center moved. Every change to the
/// leaves is mirrored into the [`RenderLists`] and an optional [`RenderSink`].
#[derive(Resource)]
pub struct Landscape {
    pub(crate) config: LandscapeConfig,
    pub(crate) globals: RefineGlobals,

    pub(crate) faces: Arena<FaceId, Face>,
    pub(crate) vertices: Arena<VertexId, Vertex>,
    pub(crate) far_vertices: Arena<FarVertexId, FarVertex>,
    pub(crate) near_vertices: Arena<NearVertexId, NearVertex>,
    pub(crate) tile_faces: Arena<TileFaceId, TileFace>,
    pub(crate) tile_materials: Arena<TileMaterialId, TileMaterial>,
    pub(crate) patches: Arena<PatchId, Patch>,
    pub(crate) zones: HashMap<u16, Zone>,

    pub(crate) split_list: PriorityList,
    pub(crate) merge_list: PriorityList,
    last_refine_center: Option<Vec3>,

    pub(crate) surface: Box<dyn SurfaceEvaluator>,
    pub(crate) render_lists: RenderLists,
    render_sink: Option<Box<dyn RenderSink>>,
    pub(crate) tile_allocator: Box<dyn TileAllocator>,
}

impl Default for Landscape {
    fn default() -> Self {
        Self::new(LandscapeConfig::default())
    }
}

impl Landscape {
    pub fn new(config: LandscapeConfig) -> Self {
        let mut faces = Arena::default();
        let cant_merge = faces.insert(Face::default());
        let multiple_bind = faces.insert(Face::default());
        debug_assert_eq!(cant_merge, FaceId::CANT_MERGE);
        debug_assert_eq!(multiple_bind, FaceId::MULTIPLE_BIND);

        Self {
            globals: RefineGlobals::new(&config),
            tile_allocator: Box::new(GridTileAllocator::new(
                config.lightmap_atlas_size,
                config.lightmap_block_size,
            )),
            config,
            faces,
            vertices: default(),
            far_vertices: default(),
            near_vertices: default(),
            tile_faces: default(),
            tile_materials: default(),
            patches: default(),
            zones: default(),
            split_list: default(),
            merge_list: default(),
            last_refine_center: None,
            surface: Box::new(BezierSurface),
            render_lists: default(),
            render_sink: None,
        }
    }

    pub fn with_surface(mut self, surface: impl SurfaceEvaluator) -> Self {
        assert!(self.zones.is_empty(), "The surface is replaced while zones are loaded.");
        self.surface = Box::new(surface);
        self
    }

    pub fn with_render_sink(mut self, sink: impl RenderSink) -> Self {
        assert!(self.zones.is_empty(), "The render sink is replaced while zones are loaded.");
        self.render_sink = Some(Box::new(sink));
        self
    }

    pub fn with_tile_allocator(mut self, allocator: impl TileAllocator) -> Self {
        assert!(self.zones.is_empty(), "The tile allocator is replaced while zones are loaded.");
        self.tile_allocator = Box::new(allocator);
        self
    }

    pub(crate) fn notify(&mut self, event: RenderEvent) {
        self.render_lists.notify(event);
        if let Some(sink) = &mut self.render_sink {
            sink.notify(event);
        }
    }

    pub fn config(&self) -> &LandscapeConfig {
        &self.config
    }

    pub fn set_refine_threshold(&mut self, refine_threshold: f32) {
        self.config.refine_threshold = refine_threshold;
        self.globals.apply(&self.config);
    }

    pub fn set_tile_distances(&mut self, tile_near: f32, tile_far: f32) {
        self.config.tile_near = tile_near;
        self.config.tile_far = tile_far;
        self.globals.apply(&self.config);
    }

    /// Splits and merges the faces which became due since the last call and geomorphs
    /// every vertex towards the new refine center.
    pub fn refine(&mut self, center: Vec3) {
        self.begin_refine(center);

        let moved = self
            .last_refine_center
            .replace(center)
            .map_or(0.0, |last| last.distance(center));

        let due_splits = self.split_list.shift(moved);
        let due_merges = self.merge_list.shift(moved);
        let (mut splits, mut merges, mut deferred) = (0, 0, 0);

        for face in due_splits {
            if !self.faces.contains(face) || !self.is_leaf(face) {
                continue;
            }
            if self.refine_deferred(face) {
                self.schedule_split(0.0, face);
                deferred += 1;
                continue;
            }

            self.update_refine_split(face);
            splits += 1;
        }

        for face in due_merges {
            if !self.faces.contains(face) || self.is_leaf(face) {
                continue;
            }
            if self.refine_deferred(face) {
                self.schedule_merge(0.0, face);
                deferred += 1;
                continue;
            }

            self.update_refine_merge(face);
            merges += 1;
        }

        self.update_geomorph();

        debug!(
            "Refined the landscape at {center}: tested {splits} splits and {merges} merges, deferred {deferred}, {} faces scheduled to split and {} to merge.",
            self.split_list.len(),
            self.merge_list.len()
        );
    }

    /// Tests every face of every patch, ignoring the priority lists and clipping.
    pub fn refine_all(&mut self, center: Vec3) {
        self.begin_refine(center);
        self.last_refine_center = Some(center);
        self.force_no_clip();

        let patches = self
            .patches
            .iter()
            .filter(|(_, patch)| !patch.exclude_from_refine_all)
            .map(|(id, _)| id)
            .collect::<Vec<_>>();

        for patch in patches {
            self.refine_all_patch(patch);
        }

        self.update_geomorph();
    }

    fn begin_refine(&mut self, center: Vec3) {
        self.globals.current_date += 1;
        self.globals.refine_center = center;
    }

    /// Invisible zones and patches are only refined every few dates, staggered by their
    /// zone id and patch index.
    fn refine_deferred(&self, face: FaceId) -> bool {
        let patch = &self.patches[self.faces[face].patch];
        let Some(zone) = self.zones.get(&patch.zone) else {
            return false;
        };

        let frequency = self.globals.hide_refine_frequency;
        let date = self.globals.current_date & frequency;

        match zone.clip_result {
            ClipResult::Out => date != (patch.zone as u32 & frequency),
            ClipResult::Side if patch.clipped => {
                date != ((patch.zone as u32 + patch.index as u32) & frequency)
            }
            _ => false,
        }
    }

    /// Replaces the shared border vertices of neighbor patches by the average of both
    /// surfaces.
    pub fn average_tesselation_vertices(&mut self) {
        let patches = self.patches.iter().map(|(id, _)| id).collect::<Vec<_>>();
        for patch in patches {
            self.average_patch_vertices(patch);
        }
    }

    /// Merges every face below the tile level.
    pub fn force_merge_all_at_tile_level(&mut self) {
        let patches = self.patches.iter().map(|(id, _)| id).collect::<Vec<_>>();
        for patch in patches {
            self.force_merge_patch_at_tile_level(patch);
        }
    }

    /// Releases every zone.
    pub fn clear(&mut self) {
        for zone_id in self.zones.keys().copied().sorted().collect::<Vec<_>>() {
            self.remove_zone(zone_id);
        }

        assert_eq!(self.faces.len(), 2, "Faces leaked after releasing every zone.");
        assert_eq!(self.vertices.len(), 0, "Vertices leaked after releasing every zone.");
        self.split_list.clear();
        self.merge_list.clear();
        self.last_refine_center = None;
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn patch(&self, patch: PatchId) -> Option<&Patch> {
        self.patches.get(patch)
    }

    pub fn face(&self, face: FaceId) -> Option<&Face> {
        self.faces.get(face).filter(|_| !face.is_sentinel())
    }

    pub fn vertex(&self, vertex: VertexId) -> Option<&Vertex> {
        self.vertices.get(vertex)
    }

    pub fn patch_bind(&self, patch: PatchId, edge: usize) -> Option<PatchBind> {
        self.patches.get(patch)?.binds.get(edge).copied()
    }

    pub fn render_lists(&self) -> &RenderLists {
        &self.render_lists
    }

    pub fn split_list_len(&self) -> usize {
        self.split_list.len()
    }

    pub fn merge_list_len(&self) -> usize {
        self.merge_list.len()
    }
}

impl Drop for Landscape {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.clear();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{connect_zones_x, grid_descriptor, grid_zone, landscape_with, TILE_SIZE};
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn viewer_above(x: f32, z: f32, height: f32) -> Vec3 {
        Vec3::new(x, height, z)
    }

    /// Scenario: a lone 2x2 patch zone seen from close by is split down to the tile level.
    #[test]
    fn close_viewer_refines_to_tile_level() {
        let mut landscape = Landscape::new(LandscapeConfig {
            refine_threshold: 1.0,
            tile_max_subdivision: 0,
            ..default()
        });
        landscape.add_zone(grid_zone(0, 1, 1, 2, 2, Vec3::ZERO));
        let patch = landscape.patch_id(0, 0).unwrap();

        for _ in 0..8 {
            landscape.refine(viewer_above(TILE_SIZE, TILE_SIZE, 1.0));
        }

        let leaves = landscape.leaves(patch);
        assert_eq!(leaves.len(), 8);
        for leaf in &leaves {
            let face = landscape.face(*leaf).unwrap();
            assert_eq!(face.level(), 2);
            assert!(face.tile_material().is_some());
        }
        assert_eq!(landscape.stats().tile_materials, 4);
        landscape.check_tessellation().unwrap();
    }

    /// Scenario: a viewer moving away lets every face merge back to the roots.
    #[test]
    fn distant_viewer_merges_to_the_roots() {
        let mut landscape = landscape_with([grid_zone(0, 2, 2, 4, 4, Vec3::ZERO)]);

        landscape.refine_all(viewer_above(8.0, 8.0, 2.0));
        assert!(landscape.face_count() > 8);
        landscape.check_tessellation().unwrap();

        for step in 1..=200 {
            landscape.refine(viewer_above(8.0, 8.0, 2.0 + step as f32 * 50.0));
        }

        assert_eq!(landscape.face_count(), 8);
        assert_eq!(landscape.vertex_count(), 9);
        assert_eq!(landscape.stats().tile_materials, 0);
        landscape.check_tessellation().unwrap();
    }

    /// Scenario: one refine_all from far away merges a split root back and frees the
    /// vertex of the split once.
    #[test]
    fn far_refine_all_merges_a_split_root_in_one_pass() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 2, 2, Vec3::ZERO)]);
        let patch = landscape.patch_id(0, 0).unwrap();
        let [root, twin] = landscape.patches[patch].roots();

        landscape.split(root, true);
        assert_eq!(landscape.leaves(patch).len(), 4);
        assert_eq!(landscape.vertex_count(), 5);

        landscape.refine_all(viewer_above(TILE_SIZE, TILE_SIZE, 10_000.0));

        assert!(landscape.is_leaf(root) && landscape.is_leaf(twin));
        assert_eq!(landscape.leaves(patch), vec![root, twin]);
        assert_eq!(landscape.vertex_count(), 4);
        assert_eq!(landscape.render_lists().face_count(), 2);
        landscape.check_tessellation().unwrap();
    }

    /// Scenario: two zones refined across their border keep a crack free seam, and the
    /// seam survives unloading and reloading the second zone.
    #[test]
    fn refinement_crosses_zone_borders() {
        let (mut left, mut right) = (
            grid_descriptor(1, 2, 1, 2, 2, Vec3::ZERO),
            grid_descriptor(2, 2, 1, 2, 2, Vec3::new(8.0, 0.0, 0.0)),
        );
        connect_zones_x(&mut left, &mut right);

        let mut landscape = landscape_with([Zone::build(&left), Zone::build(&right)]);
        let seam = viewer_above(8.0, 2.0, 0.5);

        landscape.refine_all(seam);
        landscape.check_tessellation().unwrap();

        let left_patch = landscape.patch_id(1, 1).unwrap();
        let right_patch = landscape.patch_id(2, 0).unwrap();
        for t in [0.1, 0.3, 0.5, 0.7, 0.9] {
            let ours = landscape.tesselated_pos(left_patch, Vec2::new(1.0, t)).unwrap();
            let theirs = landscape.tesselated_pos(right_patch, Vec2::new(0.0, t)).unwrap();
            assert!(ours.distance(theirs) < 1e-3, "The seam cracks at t = {t}.");
        }

        let right = landscape.remove_zone(2).unwrap();
        landscape.check_tessellation().unwrap();
        assert!(landscape.add_zone(Zone::build(&right.retrieve())));
        landscape.refine_all(seam);
        landscape.check_tessellation().unwrap();
    }

    #[test]
    fn hidden_zones_are_refined_less_often() {
        let mut landscape = landscape_with([grid_zone(3, 1, 1, 2, 2, Vec3::ZERO)]);
        let behind = crate::math::half_space(Vec3::X, Vec3::new(100.0, 0.0, 0.0));

        landscape.clip(&[behind]);
        assert_eq!(landscape.zone(3).unwrap().clip_result(), ClipResult::Out);
        assert!(landscape.patch(landscape.patch_id(3, 0).unwrap()).unwrap().is_clipped());

        // Only one date out of sixteen tests the faces of the hidden zone.
        let mut refined_on = Vec::new();
        for frame in 0..32 {
            let before = landscape.face_count();
            landscape.refine(viewer_above(2.0, 2.0, 0.1));
            if landscape.face_count() != before {
                refined_on.push(frame);
            }
        }
        assert!(!refined_on.is_empty());
        assert!(refined_on.len() <= 2);

        landscape.refine_all(viewer_above(2.0, 2.0, 0.1));
        assert_eq!(landscape.zone(3).unwrap().clip_result(), ClipResult::In);
        landscape.check_tessellation().unwrap();
    }

    #[test]
    fn random_walks_keep_the_tessellation_consistent() {
        let mut rng = StdRng::seed_from_u64(42);
        let (mut left, mut right) = (
            grid_descriptor(1, 2, 2, 2, 4, Vec3::ZERO),
            grid_descriptor(2, 1, 2, 4, 4, Vec3::new(8.0, 0.0, 0.0)),
        );
        connect_zones_x(&mut left, &mut right);
        let mut landscape = landscape_with([Zone::build(&left), Zone::build(&right)]);

        let mut position = viewer_above(8.0, 8.0, 5.0);
        for step in 0..300 {
            position += Vec3::new(
                rng.random_range(-3.0..3.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-3.0..3.0),
            );
            position = position.clamp(Vec3::new(-20.0, 0.5, -20.0), Vec3::new(40.0, 30.0, 40.0));
            landscape.refine(position);

            if step % 25 == 0 {
                landscape.check_tessellation().unwrap();
            }
            if step == 150 {
                let zone = landscape.remove_zone(2).unwrap();
                landscape.check_tessellation().unwrap();
                landscape.add_zone(Zone::build(&zone.retrieve()));
            }
        }

        landscape.check_tessellation().unwrap();
        landscape.clear();
        assert_eq!(landscape.face_count(), 0);
        assert!(landscape.render_lists().is_empty());
    }

    #[test]
    fn runtime_thresholds_update_the_globals() {
        let mut landscape = Landscape::default();
        landscape.set_refine_threshold(0.01);
        landscape.set_tile_distances(10.0, 20.0);

        assert_relative_eq!(landscape.globals.oo_refine_threshold, 100.0, epsilon = 1e-3);
        assert_relative_eq!(landscape.globals.tile_far_sqr, 400.0);
        assert_eq!(landscape.config().tile_near, 10.0);
    }
}

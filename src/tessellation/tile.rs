use super::{
    FaceId, NearVertex, NearVertexId, Side, TileFace, TileMaterial, MAX_TILE_FACE, PASS_ADD,
    PASS_RGB0, PASS_RGB1, PASS_RGB2,
};
use crate::{landscape::Landscape, math::ParamCoord, patch::PatchId, render::RenderEvent};
use bevy::prelude::*;

/// The lightmap block of two by two tiles, shared by all tile materials inside.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LightmapBlock {
    /// `None` once the atlas ran out of blocks, the tiles then sample the atlas origin.
    pub(crate) position: Option<UVec2>,
    pub(crate) refs: u32,
}

impl Landscape {
    /// Creates the tile material of a face at tile level, or shares the one of the base
    /// neighbor covering the other half of the same tile.
    pub(crate) fn compute_tile_material(&mut self, face: FaceId) {
        let f = &self.faces[face];
        let patch_id = f.patch;
        let patch = &self.patches[patch_id];

        let middle = ParamCoord::middle(f.pv_left, f.pv_right);
        let tile_s = middle.s as u32 * patch.order_s / ParamCoord::ONE as u32;
        let tile_t = middle.t as u32 * patch.order_t / ParamCoord::ONE as u32;
        let tile_id = tile_t * patch.order_s + tile_s;
        let tile_limit_level = patch.tile_limit_level;

        let copy_from_base = f.f_base.filter(|base| {
            let base = &self.faces[*base];
            base.patch == patch_id
                && base.level == tile_limit_level
                && base.tile_material.is_some()
        });

        self.faces[face].tile_id = tile_id;

        let material = match copy_from_base {
            Some(base) => {
                assert_eq!(
                    self.faces[base].tile_id, tile_id,
                    "Face {face} shares its hypotenuse with face {base} of another tile."
                );
                self.faces[base].tile_material
            }
            None => {
                let passes = self.patches[patch_id].tile_passes(tile_s, tile_t);
                let material = self.tile_materials.insert(TileMaterial {
                    tile_s,
                    tile_t,
                    passes,
                });
                self.notify(RenderEvent::AppendTileMaterial {
                    patch: patch_id,
                    material,
                });
                self.acquire_lightmap(patch_id, tile_s, tile_t);
                Some(material)
            }
        };
        self.faces[face].tile_material = material;

        self.build_tile_faces(face);
        self.alloc_tile_uv(face, Side::Base);
        self.init_tile_uv(face, Side::Base);

        match copy_from_base {
            Some(base) => {
                self.copy_tile_uv(face, Side::Left, base, Side::Right);
                self.copy_tile_uv(face, Side::Right, base, Side::Left);
            }
            None => {
                self.alloc_tile_uv(face, Side::Left);
                self.init_tile_uv(face, Side::Left);
                self.alloc_tile_uv(face, Side::Right);
                self.init_tile_uv(face, Side::Right);
            }
        }
    }

    /// Releases the tile material of a face at tile level. The material stays alive while
    /// the base neighbor still shares it.
    pub(crate) fn release_tile_material(&mut self, face: FaceId) {
        self.delete_tile_uv(face, Side::Base);

        let f = &self.faces[face];
        let patch = f.patch;
        let Some(material) = f.tile_material else {
            panic!("Face {face} has no tile material to release.");
        };

        let shared = f.f_base.is_some_and(|base| {
            !base.is_sentinel() && self.faces[base].tile_material == Some(material)
        });

        if shared {
            self.delete_tile_faces(face);
        } else {
            self.delete_tile_uv(face, Side::Left);
            self.delete_tile_uv(face, Side::Right);
            self.delete_tile_faces(face);

            self.notify(RenderEvent::RemoveTileMaterial { patch, material });
            let material = self.tile_materials.remove(material);
            self.release_lightmap(patch, material.tile_s, material.tile_t);
        }

        self.faces[face].tile_material = None;
    }

    /// Passes the tile material of a face below tile level on to its sons.
    pub(crate) fn herit_tile_material(&mut self, face: FaceId) {
        let (son_left, son_right) = self.sons(face);
        let f = &self.faces[face];
        let (tile_material, tile_id, f_base) = (f.tile_material, f.tile_id, f.f_base);

        for son in [son_left, son_right] {
            let s = &mut self.faces[son];
            s.tile_material = tile_material;
            s.tile_id = tile_id;
            self.build_tile_faces(son);
        }

        self.copy_tile_uv(son_left, Side::Left, face, Side::Base);
        self.copy_tile_uv(son_left, Side::Right, face, Side::Left);
        self.copy_tile_uv(son_right, Side::Left, face, Side::Right);
        self.copy_tile_uv(son_right, Side::Right, face, Side::Base);

        let base_sons = f_base
            .filter(|base| !self.is_leaf(*base) && self.same_tile(face, *base))
            .map(|base| self.sons(base).0)
            .filter(|base_left| self.faces[*base_left].tile_material.is_some());

        match base_sons {
            Some(base_left) => {
                self.copy_tile_uv(son_left, Side::Base, base_left, Side::Base);
                self.copy_tile_uv(son_right, Side::Base, base_left, Side::Base);
            }
            None => {
                self.alloc_tile_uv(son_left, Side::Base);
                self.copy_tile_uv(son_right, Side::Base, son_left, Side::Base);
                self.herit_tile_uv(son_left, face);
            }
        }
    }

    pub(crate) fn build_tile_faces(&mut self, face: FaceId) {
        let f = &self.faces[face];
        let Some(material) = f.tile_material else {
            panic!("Face {face} has no tile material.");
        };
        assert!(f.tile_faces.iter().all(Option::is_none));

        let passes = self.tile_materials[material].passes;
        for pass in 0..MAX_TILE_FACE {
            if passes[pass] {
                let tile_face = self.tile_faces.insert(TileFace::default());
                self.faces[face].tile_faces[pass] = Some(tile_face);
            }
        }
    }

    pub(crate) fn delete_tile_faces(&mut self, face: FaceId) {
        for pass in 0..MAX_TILE_FACE {
            if let Some(tile_face) = self.faces[face].tile_faces[pass].take() {
                self.tile_faces.remove(tile_face);
            }
        }
    }

    fn has_tile_faces(&self, face: FaceId) -> bool {
        self.faces[face].tile_faces[PASS_RGB0].is_some()
    }

    /// Creates the near vertices of one corner of a face in every tile pass.
    pub(crate) fn alloc_tile_uv(&mut self, face: FaceId, side: Side) {
        let f = &self.faces[face];
        assert!(self.has_tile_faces(face), "Face {face} has no tile faces.");
        let Some(material) = f.tile_material else {
            panic!("Face {face} has no tile material.");
        };
        let (patch, src, tile_faces) = (f.patch, f.vertex(side), f.tile_faces);

        for tile_face in tile_faces.into_iter().flatten() {
            let vertex = self.near_vertices.insert(NearVertex {
                src,
                uv0: Vec2::ZERO,
                uv1: Vec2::ZERO,
            });
            *self.tile_faces[tile_face].vertex_mut(side) = vertex;
            self.notify(RenderEvent::AppendNearVertex {
                patch,
                material,
                vertex,
            });
        }
    }

    pub(crate) fn delete_tile_uv(&mut self, face: FaceId, side: Side) {
        let f = &self.faces[face];
        let Some(material) = f.tile_material else {
            panic!("Face {face} has no tile material.");
        };
        let (patch, tile_faces) = (f.patch, f.tile_faces);

        for tile_face in tile_faces.into_iter().flatten() {
            let vertex = std::mem::replace(
                self.tile_faces[tile_face].vertex_mut(side),
                NearVertexId::INVALID,
            );
            self.notify(RenderEvent::RemoveNearVertex {
                patch,
                material,
                vertex,
            });
            self.near_vertices.remove(vertex);
        }
    }

    /// Shares the near vertices of a corner of `src` with a corner of `dst`.
    pub(crate) fn copy_tile_uv(&mut self, dst: FaceId, dst_side: Side, src: FaceId, src_side: Side) {
        let dst_faces = self.faces[dst].tile_faces;
        let src_faces = self.faces[src].tile_faces;

        for (dst_face, src_face) in dst_faces.into_iter().zip(src_faces) {
            let Some(dst_face) = dst_face else {
                continue;
            };
            let Some(src_face) = src_face else {
                panic!("Face {src} lacks a tile pass of face {dst}.");
            };

            let vertex = self.tile_faces[src_face].vertex(src_side);
            *self.tile_faces[dst_face].vertex_mut(dst_side) = vertex;
        }
    }

    /// Places the base near vertices of a son in the middle of the hypotenuse of its father.
    fn herit_tile_uv(&mut self, son: FaceId, father: FaceId) {
        let son_faces = self.faces[son].tile_faces;
        let father_faces = self.faces[father].tile_faces;

        for (son_face, father_face) in son_faces.into_iter().zip(father_faces) {
            let (Some(son_face), Some(father_face)) = (son_face, father_face) else {
                continue;
            };

            let father_face = self.tile_faces[father_face];
            let left = self.near_vertices[father_face.v_left];
            let right = self.near_vertices[father_face.v_right];

            let vertex = &mut self.near_vertices[self.tile_faces[son_face].v_base];
            vertex.uv0 = (left.uv0 + right.uv0) * 0.5;
            vertex.uv1 = (left.uv1 + right.uv1) * 0.5;
        }
    }

    /// Computes the tile and lightmap uvs of a corner of a face at tile level.
    fn init_tile_uv(&mut self, face: FaceId, side: Side) {
        let f = &self.faces[face];
        let point = f.param_coord(side);
        let middle = ParamCoord::middle(f.pv_left, f.pv_right);
        let tile_faces = f.tile_faces;

        for (pass, tile_face) in tile_faces.into_iter().enumerate() {
            let Some(tile_face) = tile_face else {
                continue;
            };

            let uv0 = self.tile_uv_rgba(face, pass, false, point, middle);
            let uv1 = match pass {
                PASS_RGB0 => self.tile_uv_lightmap(face, point, middle),
                PASS_RGB1 | PASS_RGB2 => self.tile_uv_rgba(face, pass, true, point, middle),
                _ => Vec2::ZERO,
            };

            let vertex = &mut self.near_vertices[self.tile_faces[tile_face].vertex(side)];
            vertex.uv0 = uv0;
            vertex.uv1 = uv1;
        }
    }

    fn tile_uv_rgba(
        &self,
        face: FaceId,
        pass: usize,
        alpha: bool,
        point: ParamCoord,
        middle: ParamCoord,
    ) -> Vec2 {
        let f = &self.faces[face];
        let patch = &self.patches[f.patch];
        let element = patch.tile_element(f.tile_id);

        let mut uv = corner_uv(point, middle);

        if !alpha {
            let layer = if pass == PASS_ADD { 0 } else { pass };
            for _ in 0..element.rotations[layer] & 3 {
                uv = Vec2::new(1.0 - uv.y, uv.x);
            }
        }

        let pixel_size = self.config.tile_pixel_size.max(1) as f32;
        uv * (1.0 - 1.0 / pixel_size) + 0.5 / pixel_size
    }

    fn tile_uv_lightmap(&self, face: FaceId, point: ParamCoord, middle: ParamCoord) -> Vec2 {
        let f = &self.faces[face];
        let patch = &self.patches[f.patch];
        let Some(material) = f.tile_material else {
            panic!("Face {face} has no tile material.");
        };
        let material = &self.tile_materials[material];

        let key = UVec2::new(material.tile_s / 2, material.tile_t / 2);
        let Some(block) = patch.lightmaps.get(&key) else {
            panic!("Tile ({}, {}) has no lightmap block.", material.tile_s, material.tile_t);
        };

        let lumels = (self.config.lightmap_block_size.saturating_sub(2) / 2) as f32;
        let tile_offset = Vec2::new((material.tile_s & 1) as f32, (material.tile_t & 1) as f32);
        let pixel = block.position.unwrap_or_default().as_vec2()
            + Vec2::ONE
            + (tile_offset + corner_uv(point, middle)) * lumels;

        pixel / self.tile_allocator.atlas_size().as_vec2()
    }

    fn acquire_lightmap(&mut self, patch: PatchId, tile_s: u32, tile_t: u32) {
        let key = UVec2::new(tile_s / 2, tile_t / 2);

        if let Some(block) = self.patches[patch].lightmaps.get_mut(&key) {
            block.refs += 1;
            return;
        }

        let block_size = self.config.lightmap_block_size;
        let position = self.tile_allocator.allocate(block_size, block_size);
        if position.is_none() {
            warn!("The lightmap atlas is out of blocks, tile ({tile_s}, {tile_t}) of patch {patch} is rendered unlit.");
        }

        self.patches[patch]
            .lightmaps
            .insert(key, LightmapBlock { position, refs: 1 });
    }

    fn release_lightmap(&mut self, patch: PatchId, tile_s: u32, tile_t: u32) {
        let key = UVec2::new(tile_s / 2, tile_t / 2);
        let lightmaps = &mut self.patches[patch].lightmaps;

        let Some(block) = lightmaps.get_mut(&key) else {
            panic!("Tried releasing a lightmap block, which is not present.");
        };
        block.refs -= 1;

        if block.refs == 0 {
            let block_size = self.config.lightmap_block_size;
            let position = block.position;
            lightmaps.remove(&key);
            if let Some(position) = position {
                self.tile_allocator.release(position, block_size, block_size);
            }
        }
    }

    /// Deletes all tile data below `face`, leaving the geometry untouched.
    pub(crate) fn delete_tile_uvs(&mut self, face: FaceId) {
        let Some((son_left, son_right)) = self.faces[face].sons() else {
            return;
        };

        self.delete_tile_uvs(son_left);
        self.delete_tile_uvs(son_right);

        let tile_limit_level = self.patches[self.faces[face].patch].tile_limit_level;
        let level = self.faces[son_left].level;

        if level == tile_limit_level {
            self.release_tile_material(son_left);
            self.release_tile_material(son_right);
        } else if level > tile_limit_level {
            // The base uv is shared with the sons of the base neighbor if it lies in the
            // same tile. Whoever comes first deletes it.
            let delete_base_uv = match self.faces[face].f_base {
                Some(base) if !base.is_sentinel() && !self.is_leaf(base) => {
                    self.has_tile_faces(self.sons(base).0) || !self.same_tile(face, base)
                }
                _ => true,
            };

            if delete_base_uv {
                self.delete_tile_uv(son_left, Side::Base);
            }
            self.delete_tile_faces(son_left);
            self.delete_tile_faces(son_right);
            self.faces[son_left].tile_material = None;
            self.faces[son_right].tile_material = None;
        }
    }

    /// Rebuilds all tile data below `face` after [`Self::delete_tile_uvs`].
    pub(crate) fn recreate_tile_uvs(&mut self, face: FaceId) {
        let Some((son_left, son_right)) = self.faces[face].sons() else {
            return;
        };

        let tile_limit_level = self.patches[self.faces[face].patch].tile_limit_level;
        let level = self.faces[son_left].level;

        if level == tile_limit_level {
            self.compute_tile_material(son_left);
            self.compute_tile_material(son_right);
        } else if level > tile_limit_level {
            self.herit_tile_material(face);
        }

        self.recreate_tile_uvs(son_left);
        self.recreate_tile_uvs(son_right);
    }
}

/// The corner of the tile a point of a face lies at, relative to the tile center.
fn corner_uv(point: ParamCoord, middle: ParamCoord) -> Vec2 {
    Vec2::new(
        if point.s <= middle.s { 0.0 } else { 1.0 },
        if point.t <= middle.t { 0.0 } else { 1.0 },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::LandscapeConfig,
        patch::TileElement,
        test_utils::{grid_zone, landscape_with},
    };

    #[test]
    fn exhausted_lightmap_atlas_renders_unlit() {
        let mut landscape = Landscape::new(LandscapeConfig {
            lightmap_atlas_size: 10,
            lightmap_block_size: 10,
            tile_max_subdivision: 0,
            ..default()
        });
        landscape.add_zone(grid_zone(0, 1, 1, 4, 4, Vec3::ZERO));
        let patch = landscape.patch_id(0, 0).unwrap();

        landscape.refine_all(Vec3::new(4.0, 0.5, 4.0));
        assert_eq!(landscape.stats().tile_materials, 16);

        let lightmaps = &landscape.patches[patch].lightmaps;
        assert_eq!(lightmaps.len(), 4);
        assert_eq!(
            lightmaps.values().filter(|block| block.position.is_some()).count(),
            1
        );
        assert!(lightmaps.values().all(|block| block.refs == 4));
        landscape.check_tessellation().unwrap();

        for root in landscape.patches[patch].roots() {
            landscape.force_merge(root);
        }
        assert!(landscape.patches[patch].lightmaps.is_empty());
    }

    #[test]
    fn faces_below_tile_level_inherit_the_material() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 2, 2, Vec3::ZERO)]);
        let patch = landscape.patch_id(0, 0).unwrap();
        let tile_limit_level = landscape.patches[patch].tile_limit_level;

        landscape.refine_all(Vec3::new(1.0, 0.1, 1.0));

        for leaf in landscape.leaves(patch) {
            let mut ancestor = leaf;
            while landscape.faces[ancestor].level > tile_limit_level {
                ancestor = landscape.faces[ancestor].father.unwrap();
            }

            let (face, ancestor) = (&landscape.faces[leaf], &landscape.faces[ancestor]);
            assert!(face.tile_material.is_some());
            assert_eq!(face.tile_material, ancestor.tile_material);
            assert_eq!(face.tile_id, ancestor.tile_id);
        }

        let lists = landscape.render_lists();
        assert_eq!(lists.tile_material_count(), 4);
        assert!(lists.near_vertex_count() > 0);
        landscape.check_tessellation().unwrap();
    }

    #[test]
    fn changed_tiles_rebuild_the_uvs() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 2, 2, Vec3::ZERO)]);
        landscape.refine_all(Vec3::new(1.0, 0.1, 1.0));
        let near_vertices = landscape.render_lists().near_vertex_count();

        let layered = TileElement {
            tiles: [1, 2, TileElement::NONE],
            ..TileElement::new(1)
        };
        let tiles = vec![layered; 4];
        landscape.change_patch_texture_and_color(0, 0, Some(&tiles), None);

        // Two color layers, so every tile corner carries a near vertex per pass.
        assert_eq!(
            landscape.render_lists().near_vertex_count(),
            2 * near_vertices
        );
        assert!(landscape
            .tile_materials
            .iter()
            .all(|(_, material)| material.passes[PASS_RGB0] && material.passes[PASS_RGB1]));
        landscape.check_tessellation().unwrap();
    }
}

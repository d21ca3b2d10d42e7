use super::{Face, FaceId, Vertex, VertexId};
use crate::{landscape::Landscape, math::ParamCoord, render::RenderEvent};

impl Landscape {
    /// Splits a leaf face into two sons.
    ///
    /// With `propagate` the base neighbor is split until both faces share the new vertex.
    /// Without it the sons stay unlinked across the hypotenuse, which is used while binding.
    pub fn split(&mut self, face: FaceId, propagate: bool) {
        assert!(
            !self.faces[face].is_multiple_bind_face(),
            "Tried splitting face {face}, which belongs to no patch."
        );

        if !self.is_leaf(face) {
            return;
        }

        if self.is_rectangular(face) {
            self.split_rectangular(face, propagate);
            return;
        }

        let f = self.faces[face].clone();
        let near_limit = self.compute_near_limit(face);
        let middle = ParamCoord::middle(f.pv_left, f.pv_right);

        // The vertex is shared with the base neighbor once that one is split.
        let split_base = f.f_base.filter(|base| !self.is_leaf(*base));

        let v_base = match split_base {
            Some(base) => {
                let vertex_id = self.faces[self.sons(base).0].v_base;
                let vertex = &mut self.vertices[vertex_id];
                vertex.max_face_size = vertex.max_face_size.max(f.size);
                vertex.max_near_limit = vertex.max_near_limit.max(near_limit);
                vertex_id
            }
            None => {
                let start_pos =
                    (self.vertices[f.v_left].end_pos + self.vertices[f.v_right].end_pos) * 0.5;
                let end_pos = self.compute_vertex(f.patch, middle);

                self.vertices.insert(Vertex {
                    start_pos,
                    end_pos,
                    pos: start_pos,
                    max_face_size: f.size,
                    max_near_limit: near_limit,
                    zone_refs: 0,
                })
            }
        };

        let fv_base = match split_base.filter(|base| self.faces[*base].patch == f.patch) {
            Some(base) => self.faces[self.sons(base).0].fv_base,
            None => self.new_far_vertex(f.patch, v_base, middle),
        };

        let son = Face {
            patch: f.patch,
            level: f.level + 1,
            size: f.size * 0.5,
            father: Some(face),
            v_base,
            fv_base,
            pv_base: middle,
            ..Face::default()
        };

        let son_left = self.faces.insert(Face {
            f_base: f.f_left,
            v_left: f.v_base,
            v_right: f.v_left,
            fv_left: f.fv_base,
            fv_right: f.fv_left,
            pv_left: f.pv_base,
            pv_right: f.pv_left,
            ..son.clone()
        });
        let son_right = self.faces.insert(Face {
            f_base: f.f_right,
            f_right: Some(son_left),
            v_left: f.v_right,
            v_right: f.v_base,
            fv_left: f.fv_right,
            fv_right: f.fv_base,
            pv_left: f.pv_right,
            pv_right: f.pv_base,
            ..son
        });
        self.faces[son_left].f_left = Some(son_right);
        self.faces[face].son_left = Some(son_left);
        self.faces[face].son_right = Some(son_right);

        if let Some(left) = f.f_left {
            self.change_neighbor(left, Some(face), Some(son_left));
        }
        if let Some(right) = f.f_right {
            self.change_neighbor(right, Some(face), Some(son_right));
        }

        let tile_limit_level = self.patches[f.patch].tile_limit_level;
        if f.level + 1 == tile_limit_level {
            self.compute_tile_material(son_left);
            self.compute_tile_material(son_right);
        } else if f.level + 1 > tile_limit_level {
            self.herit_tile_material(face);
        }

        self.compute_split_point(son_left);
        self.compute_split_point(son_right);

        match f.f_base {
            None => {}
            Some(base) if !self.is_leaf(base) => {
                let (to_left, to_right) = self.sons(base);

                if !self.is_rectangular(base) {
                    self.faces[son_left].f_right = Some(to_right);
                    self.faces[son_right].f_left = Some(to_left);
                    self.faces[to_left].f_right = Some(son_right);
                    self.faces[to_right].f_left = Some(son_left);
                } else {
                    self.faces[son_left].f_right = Some(to_left);
                    self.faces[son_right].f_left = Some(to_right);
                    self.faces[to_left].f_left = Some(son_left);
                    self.faces[to_right].f_left = Some(son_right);
                }
            }
            Some(_) if propagate => {
                // The base neighbor may be coarser, its sons take over the link until one
                // of them shares our hypotenuse.
                loop {
                    let Some(base) = self.faces[face].f_base else {
                        break;
                    };
                    if !self.is_leaf(base) {
                        break;
                    }
                    self.split(base, true);
                }
            }
            Some(_) => {}
        }

        self.notify(RenderEvent::AppendFace {
            patch: f.patch,
            face: son_left,
        });
        self.notify(RenderEvent::AppendFace {
            patch: f.patch,
            face: son_right,
        });
        self.notify(RenderEvent::RemoveFace {
            patch: f.patch,
            face,
        });

        self.schedule_merge(0.0, face);
        if let Some(father) = f.father {
            self.merge_list.unlink(father);
        }
        self.schedule_split(0.0, son_left);
        self.schedule_split(0.0, son_right);
    }

    /// Splits a rectangular face together with its twin into four square sons.
    fn split_rectangular(&mut self, face: FaceId, propagate: bool) {
        let f0 = face;
        let f1 = self.faces[f0]
            .f_base
            .unwrap_or_else(|| panic!("Rectangular face {face} has no twin."));
        assert!(self.is_leaf(f1), "The twin {f1} of face {f0} is already split.");

        let a = self.faces[f0].clone();
        let b = self.faces[f1].clone();
        let patch = a.patch;

        let pc_top = ParamCoord::middle(b.pv_base, b.pv_left);
        let pc_bot = ParamCoord::middle(a.pv_base, a.pv_left);

        let v_top = self.rectangular_split_vertex(f1, pc_top);
        let v_bot = self.rectangular_split_vertex(f0, pc_bot);
        let fv_top = self.new_far_vertex(patch, v_top, pc_top);
        let fv_bot = self.new_far_vertex(patch, v_bot, pc_bot);

        let son = |father| Face {
            patch,
            level: a.level + 1,
            size: a.size * 0.5,
            father: Some(father),
            ..Face::default()
        };

        let f0r = self.faces.insert(Face {
            v_base: a.v_base,
            v_left: v_bot,
            v_right: b.v_left,
            fv_base: a.fv_base,
            fv_left: fv_bot,
            fv_right: b.fv_left,
            pv_base: a.pv_base,
            pv_left: pc_bot,
            pv_right: b.pv_left,
            f_right: a.f_right,
            ..son(f0)
        });
        let f1l = self.faces.insert(Face {
            v_base: v_top,
            v_left: b.v_left,
            v_right: v_bot,
            fv_base: fv_top,
            fv_left: b.fv_left,
            fv_right: fv_bot,
            pv_base: pc_top,
            pv_left: b.pv_left,
            pv_right: pc_bot,
            f_base: Some(f0r),
            ..son(f1)
        });
        let f0l = self.faces.insert(Face {
            v_base: v_bot,
            v_left: b.v_right,
            v_right: v_top,
            fv_base: fv_bot,
            fv_left: b.fv_right,
            fv_right: fv_top,
            pv_base: pc_bot,
            pv_left: b.pv_right,
            pv_right: pc_top,
            f_right: Some(f1l),
            ..son(f0)
        });
        let f1r = self.faces.insert(Face {
            v_base: b.v_base,
            v_left: v_top,
            v_right: b.v_right,
            fv_base: b.fv_base,
            fv_left: fv_top,
            fv_right: b.fv_right,
            pv_base: b.pv_base,
            pv_left: pc_top,
            pv_right: b.pv_right,
            f_base: Some(f0l),
            f_right: b.f_right,
            ..son(f1)
        });
        self.faces[f0r].f_base = Some(f1l);
        self.faces[f0l].f_base = Some(f1r);
        self.faces[f1l].f_right = Some(f0l);

        if let Some(right) = a.f_right {
            self.change_neighbor(right, Some(f0), Some(f0r));
        }
        if let Some(right) = b.f_right {
            self.change_neighbor(right, Some(f1), Some(f1r));
        }

        self.faces[f0].son_left = Some(f0l);
        self.faces[f0].son_right = Some(f0r);
        self.faces[f1].son_left = Some(f1l);
        self.faces[f1].son_right = Some(f1r);

        debug_assert!(a.level + 1 < self.patches[patch].tile_limit_level);

        for son in [f0r, f1l, f0l, f1r] {
            self.compute_split_point(son);
        }

        for (father, son_left, son_right) in [(f1, f1l, f1r), (f0, f0l, f0r)] {
            match self.faces[father].f_left {
                None => {}
                Some(left) if !self.is_leaf(left) => {
                    let (to_left, to_right) = self.sons(left);

                    if !self.is_rectangular(left) {
                        self.faces[son_left].f_left = Some(to_left);
                        self.faces[son_right].f_left = Some(to_right);
                        self.faces[to_left].f_right = Some(son_left);
                        self.faces[to_right].f_left = Some(son_right);
                    } else {
                        self.faces[son_left].f_left = Some(to_right);
                        self.faces[son_right].f_left = Some(to_left);
                        self.faces[to_left].f_left = Some(son_right);
                        self.faces[to_right].f_left = Some(son_left);
                    }
                }
                Some(_) if propagate => loop {
                    let Some(left) = self.faces[father].f_left else {
                        break;
                    };
                    if !self.is_leaf(left) {
                        break;
                    }
                    self.split(left, true);
                },
                Some(_) => {}
            }
        }

        for son in [f0r, f1l, f0l, f1r] {
            self.notify(RenderEvent::AppendFace { patch, face: son });
        }
        self.notify(RenderEvent::RemoveFace { patch, face: f0 });
        self.notify(RenderEvent::RemoveFace { patch, face: f1 });

        self.schedule_merge(0.0, f0);
        self.schedule_merge(0.0, f1);
        for father in [a.father, b.father].into_iter().flatten() {
            self.merge_list.unlink(father);
        }
        for son in [f0r, f1l, f0l, f1r] {
            self.schedule_split(0.0, son);
        }
    }

    /// The vertex in the middle of the long edge of a rectangular face, shared with the
    /// neighbor across that edge once it is split.
    fn rectangular_split_vertex(&mut self, face: FaceId, coord: ParamCoord) -> VertexId {
        let f = &self.faces[face];
        let near_limit = self.compute_near_limit(face);
        let (size, patch, v_base, v_left) = (f.size, f.patch, f.v_base, f.v_left);

        match f.f_left.filter(|left| !self.is_leaf(*left)) {
            Some(left) => {
                let vertex_id = self.faces[self.sons(left).0].v_base;
                let vertex = &mut self.vertices[vertex_id];
                vertex.max_face_size = vertex.max_face_size.max(size);
                vertex.max_near_limit = vertex.max_near_limit.max(near_limit);
                vertex_id
            }
            None => {
                let start_pos =
                    (self.vertices[v_left].end_pos + self.vertices[v_base].end_pos) * 0.5;
                let end_pos = self.compute_vertex(patch, coord);

                self.vertices.insert(Vertex {
                    start_pos,
                    end_pos,
                    pos: start_pos,
                    max_face_size: size,
                    max_near_limit: near_limit,
                    zone_refs: 0,
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::LandscapeConfig,
        test_utils::{grid_zone, landscape_with},
    };
    use bevy::prelude::*;

    #[test]
    fn split_and_merge_are_inverse() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 2, 2, Vec3::ZERO)]);
        let patch = landscape.patch_id(0, 0).unwrap();
        let [root, twin] = landscape.patches[patch].roots();

        landscape.split(root, true);
        assert!(!landscape.is_leaf(twin));
        assert_eq!(landscape.leaves(patch).len(), 4);
        assert_eq!(landscape.vertex_count(), 5);

        let (son_left, _) = landscape.sons(root);
        let (twin_left, _) = landscape.sons(twin);
        assert_eq!(
            landscape.faces[son_left].v_base,
            landscape.faces[twin_left].v_base
        );
        landscape.check_tessellation().unwrap();

        assert!(landscape.merge(root));
        assert!(landscape.is_leaf(root) && landscape.is_leaf(twin));
        assert_eq!(landscape.leaves(patch).len(), 2);
        assert_eq!(landscape.vertex_count(), 4);
        assert_eq!(landscape.far_vertex_data(patch).len(), 4);
        landscape.check_tessellation().unwrap();
    }

    #[test]
    fn deep_splits_propagate_to_the_base_neighbors() {
        let mut landscape = landscape_with([grid_zone(0, 2, 2, 4, 4, Vec3::ZERO)]);
        let patch = landscape.patch_id(0, 3).unwrap();

        let mut face = landscape.patches[patch].roots()[0];
        for _ in 0..8 {
            landscape.split(face, true);
            face = landscape.sons(face).0;
        }
        assert_eq!(landscape.faces[face].level, 8);
        landscape.check_tessellation().unwrap();

        // The base neighbor of a leaf is a leaf of the same level or one level coarser.
        for (id, leaf) in landscape.faces.iter() {
            if id.is_sentinel() || !leaf.is_leaf() {
                continue;
            }
            if let Some(base) = leaf.f_base.filter(|base| !base.is_sentinel()) {
                let base = &landscape.faces[base];
                assert!(base.is_leaf());
                assert!(base.level == leaf.level || base.level + 1 == leaf.level);
            }
        }

        for root in landscape.patches[patch].roots() {
            landscape.force_merge(root);
        }
        assert_eq!(landscape.leaves(patch).len(), 2);
        landscape.check_tessellation().unwrap();
    }

    #[test]
    fn rectangular_patches_split_to_square_tiles() {
        for (order_s, order_t) in [(4, 2), (2, 4), (8, 2)] {
            let mut landscape = Landscape::new(LandscapeConfig {
                tile_max_subdivision: 0,
                ..default()
            });
            landscape.add_zone(grid_zone(0, 1, 1, order_s, order_t, Vec3::ZERO));
            let patch = landscape.patch_id(0, 0).unwrap();
            let (s, t) = (order_s as usize, order_t as usize);

            landscape.refine_all(Vec3::new(2.0, 0.5, 2.0));

            let leaves = landscape.leaves(patch);
            assert_eq!(leaves.len(), 2 * s * t, "{order_s}x{order_t}");
            for leaf in &leaves {
                let face = &landscape.faces[*leaf];
                assert_eq!(face.level, landscape.patches[patch].tile_limit_level);
                assert!(face.tile_material.is_some());
            }
            assert_eq!(landscape.stats().tile_materials, s * t);
            assert_eq!(landscape.vertex_count(), (s + 1) * (t + 1));
            landscape.check_tessellation().unwrap();

            for root in landscape.patches[patch].roots() {
                landscape.force_merge(root);
            }
            assert_eq!(landscape.leaves(patch).len(), 2);
            assert_eq!(landscape.vertex_count(), 4);
            assert_eq!(landscape.stats().tile_materials, 0);
            landscape.check_tessellation().unwrap();
        }
    }

    #[test]
    fn new_vertices_start_at_the_edge_middle() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 2, 2, Vec3::ZERO)]);
        let patch = landscape.patch_id(0, 0).unwrap();
        let root = landscape.patches[patch].roots()[0];
        let f = landscape.faces[root].clone();

        landscape.split(root, true);

        let vertex = &landscape.vertices[landscape.faces[landscape.sons(root).0].v_base];
        let middle = (landscape.vertices[f.v_left].end_pos + landscape.vertices[f.v_right].end_pos) * 0.5;
        assert_eq!(vertex.start_pos, middle);
        assert_eq!(vertex.pos, middle);
        assert_eq!(vertex.max_face_size, f.size);
    }
}

use super::{FaceId, Side, Vertex, VertexId};
use crate::{landscape::Landscape, patch::PatchId};

impl Landscape {
    /// Follows the link `side` of `face` to the face across the edge at the same level.
    ///
    /// Returns false if the link was moved to a son of the neighbor and must be examined
    /// again. Sets `split_wanted` if the neighbor is split and shares the full edge, in which
    /// case `face` has to be split to match it.
    fn update_bind_edge(&mut self, face: FaceId, side: Side, split_wanted: &mut bool) -> bool {
        let Some(edge_face) = self.faces[face].neighbor(side) else {
            return true;
        };
        if self.is_leaf(edge_face) {
            return true;
        }

        let edge = &self.faces[edge_face];
        if edge.is_multiple_bind_face() {
            *split_wanted = true;
            return true;
        }

        let (base, left, right) = (edge.f_base, edge.f_left, edge.f_right);
        let (son_left, son_right) = self.sons(edge_face);

        let son = if !self.is_rectangular(edge_face) {
            if base == Some(face) {
                *split_wanted = true;
                return true;
            }

            if left == Some(face) {
                self.faces[son_left].f_base = Some(face);
                son_left
            } else if right == Some(face) {
                self.faces[son_right].f_base = Some(face);
                son_right
            } else {
                panic!("Face {edge_face} is not bound back to face {face}.");
            }
        } else {
            // A rectangular neighbor is split along its left edge, or along its base when
            // both faces are rectangular.
            if left == Some(face) || base == Some(face) {
                *split_wanted = true;
                return true;
            }

            if right == Some(face) {
                self.faces[son_right].f_right = Some(face);
                son_right
            } else {
                panic!("Face {edge_face} is not bound back to face {face}.");
            }
        };

        *self.faces[face].neighbor_mut(side) = Some(son);
        false
    }

    fn update_bind_edges(&mut self, face: FaceId, split_wanted: &mut bool) {
        for side in [Side::Base, Side::Left, Side::Right] {
            while !self.update_bind_edge(face, side, split_wanted) {}
        }
    }

    /// Splits a leaf whose neighbor across a patch border is finer, then links the sons to
    /// the sons of that neighbor. A pending multiple bind face across the edge is resolved
    /// here: its vertex replaces the new midpoint vertex and the edge is locked against
    /// merging.
    pub(crate) fn update_bind_and_split(&mut self, face: FaceId) {
        assert!(self.is_leaf(face), "Face {face} is already split.");

        let mut split_wanted = false;
        self.update_bind_edges(face, &mut split_wanted);

        let rectangular = self.is_rectangular(face);
        let twin = if rectangular {
            let twin = self.faces[face]
                .f_base
                .unwrap_or_else(|| panic!("Rectangular face {face} has no twin."));
            assert!(self.is_leaf(twin));
            while !self.update_bind_edge(twin, Side::Left, &mut split_wanted) {}
            while !self.update_bind_edge(twin, Side::Right, &mut split_wanted) {}
            Some(twin)
        } else {
            None
        };

        // Faces holding a pending multiple bind face across their edge.
        let mut multiple = Vec::new();
        match twin {
            None => {
                if let Some(base) = self.faces[face].f_base {
                    if self.is_multiple_bind_link(base) {
                        self.faces[face].f_base = None;
                        multiple.push((face, base));
                    }
                }
            }
            Some(twin) => {
                for f in [face, twin] {
                    if let Some(left) = self.faces[f].f_left {
                        if self.is_multiple_bind_link(left) {
                            self.faces[f].f_left = None;
                            multiple.push((f, left));
                        }
                    }
                }
            }
        }

        self.split(face, false);

        match twin {
            None => loop {
                let Some(base) = self.faces[face].f_base else {
                    break;
                };
                if !self.is_leaf(base) {
                    break;
                }
                self.update_bind_and_split(base);
            },
            Some(twin) => {
                for f in [face, twin] {
                    loop {
                        let Some(left) = self.faces[f].f_left else {
                            break;
                        };
                        if !self.is_leaf(left) {
                            break;
                        }
                        self.update_bind_and_split(left);
                    }
                }
            }
        }

        for (f, multiple_face) in multiple {
            self.resolve_multiple_bind(f, multiple_face, rectangular);
        }
    }

    /// Links the sons of `face` to the sons of the multiple bind face that was across its
    /// edge and moves the shared midpoint onto the surface of `face`.
    fn resolve_multiple_bind(&mut self, face: FaceId, multiple_face: FaceId, rectangular: bool) {
        let (son_left, son_right) = self.sons(face);
        let (multiple_left, multiple_right) = self.sons(multiple_face);
        let vertex = self.faces[multiple_face].v_base;

        if !rectangular {
            self.faces[son_left].f_right = Some(multiple_right);
            self.change_neighbor(multiple_right, Some(FaceId::MULTIPLE_BIND), Some(son_left));
            self.faces[son_right].f_left = Some(multiple_left);
            self.change_neighbor(multiple_left, Some(FaceId::MULTIPLE_BIND), Some(son_right));
        } else {
            self.faces[son_left].f_left = Some(multiple_left);
            self.change_neighbor(multiple_left, Some(FaceId::MULTIPLE_BIND), Some(son_left));
            self.faces[son_right].f_left = Some(multiple_right);
            self.change_neighbor(multiple_right, Some(FaceId::MULTIPLE_BIND), Some(son_right));
        }

        let created = self.faces[son_left].v_base;
        let end_pos = self.vertices[created].end_pos;
        let shared = &mut self.vertices[vertex];
        shared.start_pos = end_pos;
        shared.end_pos = end_pos;
        shared.pos = end_pos;
        self.vertices.remove(created);

        let mut updated = vec![son_left, son_right];

        if !rectangular {
            self.faces[son_left].v_base = vertex;
            self.faces[son_right].v_base = vertex;
            self.faces[face].f_base = Some(FaceId::CANT_MERGE);
        } else {
            let twin = self.faces[face]
                .f_base
                .unwrap_or_else(|| panic!("Rectangular face {face} has no twin."));
            let twin_left = self.sons(twin).0;

            self.faces[son_left].v_base = vertex;
            self.faces[son_right].v_left = vertex;
            self.faces[twin_left].v_right = vertex;
            self.faces[face].f_left = Some(FaceId::CANT_MERGE);

            let (twin_left, twin_right) = self.sons(twin);
            updated.extend([twin_left, twin_right]);
        }

        for son in updated {
            self.compute_split_point(son);
            self.update_near_far_vertices(son);
        }
    }

    /// Splits the leaves of the subtree of `face` until they match their neighbors across
    /// the patch borders.
    pub(crate) fn update_bind(&mut self, face: FaceId) {
        if self.is_leaf(face) {
            let mut split_wanted = false;
            self.update_bind_edges(face, &mut split_wanted);

            if split_wanted {
                self.update_bind_and_split(face);
            }
        }

        if let Some((son_left, son_right)) = self.faces[face].sons() {
            self.update_bind(son_left);
            self.update_bind(son_right);
        }
    }

    /// Cuts every link of the subtree of `face` to faces of other patches, except the
    /// patches in `except`. Vertices shared across a cut edge are duplicated so that both
    /// sides own their own copy.
    pub(crate) fn unbind_face(&mut self, face: FaceId, except: &[PatchId]) {
        let f = self.faces[face].clone();
        let foreign = |this: &Self, neighbor: FaceId| {
            let patch = this.faces[neighbor].patch;
            patch != f.patch && !(patch != PatchId::INVALID && except.contains(&patch))
        };

        if !self.is_rectangular(face) {
            if f.is_leaf() {
                for side in [Side::Left, Side::Right] {
                    if let Some(neighbor) = f.neighbor(side).filter(|n| foreign(self, *n)) {
                        self.change_neighbor(neighbor, Some(face), None);
                        *self.faces[face].neighbor_mut(side) = None;
                    }
                }
            }

            if let Some(base) = f.f_base.filter(|n| foreign(self, *n)) {
                self.change_neighbor(base, Some(face), None);
                self.faces[face].f_base = None;

                if let Some((son_left, son_right)) = f.sons() {
                    let vertex = self.clone_split_vertex(face, son_left, base);
                    self.faces[son_left].v_base = vertex;
                    self.faces[son_right].v_base = vertex;
                }
            }
        } else {
            if let Some(left) = f.f_left.filter(|n| foreign(self, *n)) {
                self.change_neighbor(left, Some(face), None);
                self.faces[face].f_left = None;

                if let Some((son_left, son_right)) = f.sons() {
                    let vertex = self.clone_split_vertex(face, son_left, left);
                    let twin = f
                        .f_base
                        .unwrap_or_else(|| panic!("Rectangular face {face} has no twin."));
                    let twin_left = self.sons(twin).0;

                    self.faces[son_left].v_base = vertex;
                    self.faces[son_right].v_left = vertex;
                    self.faces[twin_left].v_right = vertex;
                }
            }

            if f.is_leaf() {
                if let Some(right) = f.f_right.filter(|n| foreign(self, *n)) {
                    self.change_neighbor(right, Some(face), None);
                    self.faces[face].f_right = None;
                }
            }
        }

        let Some((son_left, son_right)) = self.faces[face].sons() else {
            return;
        };

        let f = self.faces[face].clone();
        if !self.is_rectangular(face) {
            let left = &mut self.faces[son_left];
            left.v_left = f.v_base;
            left.v_right = f.v_left;
            let right = &mut self.faces[son_right];
            right.v_left = f.v_right;
            right.v_right = f.v_base;

            self.update_near_far_vertices(son_left);
            self.update_near_far_vertices(son_right);
        } else {
            self.faces[son_left].v_left = f.v_left;
            let right = &mut self.faces[son_right];
            right.v_base = f.v_base;
            right.v_right = f.v_right;

            self.update_near_far_vertices(son_left);
            self.update_near_far_vertices(son_right);

            if let Some((twin_left, twin_right)) = f.f_base.and_then(|twin| self.faces[twin].sons()) {
                self.update_near_far_vertices(twin_left);
                self.update_near_far_vertices(twin_right);
            }
        }

        self.unbind_face(son_left, except);
        self.unbind_face(son_right, except);
    }

    /// Gives `face` its own copy of the vertex its sons share with the former neighbor.
    fn clone_split_vertex(&mut self, face: FaceId, son_left: FaceId, neighbor: FaceId) -> VertexId {
        let old = self.faces[son_left].v_base;
        let copy = Vertex {
            max_face_size: self.faces[face].size,
            max_near_limit: self.compute_near_limit(face),
            zone_refs: 0,
            ..self.vertices[old].clone()
        };
        let vertex = self.vertices.insert(copy);

        if !self.faces[neighbor].is_multiple_bind_face() {
            let neighbor_near_limit = self.compute_near_limit(neighbor);
            let old = &mut self.vertices[old];
            old.max_face_size = self.faces[neighbor].size;
            old.max_near_limit = neighbor_near_limit;
        }

        vertex
    }

    /// Points the far and near vertices of a face back at its tessellation vertices.
    pub(crate) fn update_near_far_vertices(&mut self, face: FaceId) {
        let f = &self.faces[face];
        let corners = [
            (f.v_base, f.fv_base, f.pv_base, Side::Base),
            (f.v_left, f.fv_left, f.pv_left, Side::Left),
            (f.v_right, f.fv_right, f.pv_right, Side::Right),
        ];
        let tile_faces = f.tile_faces;

        for (vertex, far_vertex, pcoord, side) in corners {
            let far = &mut self.far_vertices[far_vertex];
            far.src = vertex;
            far.pcoord = pcoord;

            for tile_face in tile_faces.into_iter().flatten() {
                let near_vertex = self.tile_faces[tile_face].vertex(side);
                self.near_vertices[near_vertex].src = vertex;
            }
        }
    }

    /// Replaces the midpoint of every edge shared with another patch by the average of
    /// both surfaces, so that the two sides evaluate to the same position.
    pub(crate) fn face_average_vertices(&mut self, face: FaceId) {
        let Some((son_left, son_right)) = self.faces[face].sons() else {
            return;
        };

        let f = &self.faces[face];
        let neighbor = if self.is_rectangular(face) {
            f.f_left
        } else {
            f.f_base
        };

        if let Some(neighbor) = neighbor {
            let neighbor_patch = self.faces[neighbor].patch;

            if !neighbor.is_sentinel()
                && neighbor_patch != PatchId::INVALID
                && neighbor_patch != f.patch
            {
                let son = &self.faces[son_left];
                let (patch, pcoord, vertex) = (f.patch, son.pv_base, son.v_base);
                let ours = self.compute_vertex(patch, pcoord);

                let (neighbor_left, _) = self.sons(neighbor);
                let theirs =
                    self.compute_vertex(neighbor_patch, self.faces[neighbor_left].pv_base);

                self.vertices[vertex].end_pos = (ours + theirs) * 0.5;
            }
        }

        self.face_average_vertices(son_left);
        self.face_average_vertices(son_right);
    }

    /// Recomputes the surface position of every vertex created below `face`.
    pub(crate) fn face_refresh_geometry(&mut self, face: FaceId) {
        let Some((son_left, son_right)) = self.faces[face].sons() else {
            return;
        };

        let son = &self.faces[son_left];
        let (patch, pcoord, vertex) = (son.patch, son.pv_base, son.v_base);
        let end_pos = self.compute_vertex(patch, pcoord);

        let vertex = &mut self.vertices[vertex];
        vertex.end_pos = end_pos;
        vertex.pos = end_pos;

        self.face_refresh_geometry(son_left);
        self.face_refresh_geometry(son_right);
    }
}

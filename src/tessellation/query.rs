use super::{FaceId, FarVertexId, NearVertexId, Side, TileFaceId};
use crate::{landscape::Landscape, math::perp_dot, patch::PatchId};
use anyhow::{bail, ensure, Result};
use bevy::{
    prelude::*,
    utils::{HashMap, HashSet},
};
use bytemuck::{Pod, Zeroable};

/// Element counts of the tessellation, logged after each refine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TessellationStats {
    pub faces: usize,
    pub leaves: usize,
    pub vertices: usize,
    pub far_vertices: usize,
    pub near_vertices: usize,
    pub tile_materials: usize,
    pub split_list: usize,
    pub merge_list: usize,
}

/// A far vertex as uploaded to the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub struct FarVertexData {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

const INCLUSION_EPSILON: f32 = 1e-5;

impl Landscape {
    pub fn stats(&self) -> TessellationStats {
        TessellationStats {
            faces: self
                .faces
                .iter()
                .filter(|(_, face)| !face.is_multiple_bind_face())
                .count(),
            leaves: self
                .faces
                .iter()
                .filter(|(_, face)| !face.is_multiple_bind_face() && face.is_leaf())
                .count(),
            vertices: self.vertices.len(),
            far_vertices: self.far_vertices.len(),
            near_vertices: self.near_vertices.len(),
            tile_materials: self.tile_materials.len(),
            split_list: self.split_list.len(),
            merge_list: self.merge_list.len(),
        }
    }

    pub fn face_count(&self) -> usize {
        self.stats().faces
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Collects the leaves below `face` in depth first order.
    pub fn append_tessellation_leaves(&self, face: FaceId, leaves: &mut Vec<FaceId>) {
        match self.faces[face].sons() {
            Some((son_left, son_right)) => {
                self.append_tessellation_leaves(son_left, leaves);
                self.append_tessellation_leaves(son_right, leaves);
            }
            None => leaves.push(face),
        }
    }

    /// The leaves of a compiled patch.
    pub fn leaves(&self, patch: PatchId) -> Vec<FaceId> {
        let mut leaves = Vec::new();

        if let Some(patch) = self.patches.get(patch) {
            for root in patch.roots() {
                self.append_tessellation_leaves(root, &mut leaves);
            }
        }

        leaves
    }

    /// The geomorphed position of the tessellation at the parameter coordinate `uv`.
    pub fn tesselated_pos(&self, patch: PatchId, uv: Vec2) -> Option<Vec3> {
        let uv = uv.clamp(Vec2::ZERO, Vec2::ONE);

        self.patches
            .get(patch)?
            .roots()
            .into_iter()
            .find_map(|root| self.face_tesselated_pos(root, uv))
    }

    fn face_tesselated_pos(&self, face: FaceId, uv: Vec2) -> Option<Vec3> {
        let f = &self.faces[face];
        let corners = [f.pv_base.uv(), f.pv_left.uv(), f.pv_right.uv()];
        let weights = barycentric(corners, uv)?;

        if weights.min_element() < -INCLUSION_EPSILON {
            return None;
        }

        match f.sons() {
            Some((son_left, son_right)) => self
                .face_tesselated_pos(son_left, uv)
                .or_else(|| self.face_tesselated_pos(son_right, uv)),
            None => {
                let [base, left, right] = f.vertices().map(|vertex| self.vertices[vertex].pos);
                Some(base * weights.x + left * weights.y + right * weights.z)
            }
        }
    }

    /// The far vertices of a patch, ordered by id.
    pub fn far_vertex_data(&self, patch: PatchId) -> Vec<FarVertexData> {
        let Some(list) = self.render_lists.patch(patch) else {
            return Vec::new();
        };

        let mut vertices = list.far_vertices.iter().copied().collect::<Vec<_>>();
        vertices.sort();

        vertices
            .into_iter()
            .map(|vertex| {
                let far = &self.far_vertices[vertex];
                FarVertexData {
                    position: self.vertices[far.src].pos.to_array(),
                    uv: far.pcoord.uv().to_array(),
                }
            })
            .collect()
    }

    /// Verifies the structure of the whole tessellation.
    ///
    /// Neighbor links must be symmetric, split faces must form diamonds with their base
    /// neighbor, every vertex must be owned by a face or a zone and every referenced
    /// element must be alive. The render lists must match the leaves.
    pub fn check_tessellation(&self) -> Result<()> {
        let mut used_vertices = HashSet::default();
        let mut used_far_vertices = HashSet::default();
        let mut used_near_vertices = HashSet::default();
        let mut used_tile_faces = HashSet::<TileFaceId>::default();
        let mut leaves = HashMap::<PatchId, HashSet<FaceId>>::default();
        let mut far_vertices = HashMap::<PatchId, HashSet<FarVertexId>>::default();

        for (id, face) in self.faces.iter() {
            if face.is_multiple_bind_face() {
                continue;
            }

            ensure!(
                self.patches.contains(face.patch),
                "Face {id} belongs to the missing patch {}.",
                face.patch
            );

            for vertex in face.vertices() {
                ensure!(self.vertices.contains(vertex), "Face {id} uses the missing vertex {vertex}.");
                used_vertices.insert(vertex);
            }
            for vertex in face.far_vertices() {
                ensure!(
                    self.far_vertices.contains(vertex),
                    "Face {id} uses the missing far vertex {vertex}."
                );
                used_far_vertices.insert(vertex);
            }

            for tile_face in face.tile_faces.into_iter().flatten() {
                ensure!(
                    used_tile_faces.insert(tile_face),
                    "Face {id} shares the tile face {tile_face}."
                );
                let Some(tile_face) = self.tile_faces.get(tile_face) else {
                    bail!("Face {id} uses a missing tile face.");
                };
                for side in [Side::Base, Side::Left, Side::Right] {
                    let vertex: NearVertexId = tile_face.vertex(side);
                    let Some(near) = self.near_vertices.get(vertex) else {
                        bail!("Face {id} uses the missing near vertex {vertex}.");
                    };
                    ensure!(
                        near.src == face.vertex(side),
                        "Near vertex {vertex} of face {id} points to vertex {}.",
                        near.src
                    );
                    used_near_vertices.insert(vertex);
                }
            }

            if face.is_leaf() {
                leaves.entry(face.patch).or_default().insert(id);
                far_vertices
                    .entry(face.patch)
                    .or_default()
                    .extend(face.far_vertices());
            }

            self.check_face_links(id)?;
        }

        for (id, far) in self.far_vertices.iter() {
            ensure!(used_far_vertices.contains(&id), "Far vertex {id} is leaked.");
            ensure!(
                self.vertices.contains(far.src),
                "Far vertex {id} points to the missing vertex {}.",
                far.src
            );
        }
        for (id, vertex) in self.vertices.iter() {
            ensure!(
                used_vertices.contains(&id) || vertex.zone_refs > 0,
                "Vertex {id} is leaked."
            );
        }
        for (id, _) in self.near_vertices.iter() {
            ensure!(used_near_vertices.contains(&id), "Near vertex {id} is leaked.");
        }
        ensure!(
            used_tile_faces.len() == self.tile_faces.len(),
            "{} tile faces are leaked.",
            self.tile_faces.len() - used_tile_faces.len()
        );

        for (patch, _) in self.patches.iter() {
            let expected = leaves.remove(&patch).unwrap_or_default();
            let rendered = self
                .render_lists
                .patch(patch)
                .map(|list| list.faces.clone())
                .unwrap_or_default();
            ensure!(
                expected == rendered,
                "The render list of patch {patch} does not match its leaves."
            );

            let expected = far_vertices.remove(&patch).unwrap_or_default();
            let rendered = self
                .render_lists
                .patch(patch)
                .map(|list| list.far_vertices.clone())
                .unwrap_or_default();
            ensure!(
                expected == rendered,
                "The far vertex list of patch {patch} does not match its leaves."
            );
        }

        Ok(())
    }

    fn check_face_links(&self, id: FaceId) -> Result<()> {
        let face = &self.faces[id];

        if let Some((son_left, son_right)) = face.sons() {
            for son in [son_left, son_right] {
                let Some(son) = self.faces.get(son) else {
                    bail!("Face {id} has the missing son {son}.");
                };
                ensure!(son.father == Some(id), "The son of face {id} has another father.");
                ensure!(son.level == face.level + 1, "The son of face {id} skips a level.");
            }
        }

        let mut links = vec![face.f_base];
        if face.is_leaf() {
            links.extend([face.f_left, face.f_right]);
        } else if self.is_rectangular(id) {
            links.push(face.f_left);
        }

        for neighbor in links.into_iter().flatten() {
            if neighbor.is_sentinel() {
                continue;
            }

            let Some(other) = self.faces.get(neighbor) else {
                bail!("Face {id} is bound to the missing face {neighbor}.");
            };
            if other.is_multiple_bind_face() {
                continue;
            }

            ensure!(
                other.neighbors().contains(&Some(id)),
                "Face {neighbor} is not bound back to face {id}."
            );
        }

        if !face.is_leaf() {
            let mut diamond = vec![face.f_base];
            if self.is_rectangular(id) {
                diamond.push(face.f_left);
            }

            for neighbor in diamond.into_iter().flatten() {
                ensure!(
                    neighbor.is_sentinel() || !self.is_leaf(neighbor),
                    "Face {id} is split, but its neighbor {neighbor} is not."
                );
            }

            // Levels only compare within a patch, borders may join patches of other orders.
            if let Some(base) = face.f_base.filter(|base| !base.is_sentinel()) {
                let other = &self.faces[base];
                if other.patch == face.patch && !self.is_rectangular(id) {
                    ensure!(
                        other.level == face.level,
                        "Face {id} at level {} forms a diamond with face {base} at level {}.",
                        face.level,
                        other.level
                    );
                }
            }
        }

        Ok(())
    }
}

/// The barycentric weights of `p` for the triangle `corners`, or `None` if it is degenerate.
fn barycentric([a, b, c]: [Vec2; 3], p: Vec2) -> Option<Vec3> {
    let area = perp_dot(b - a, c - a);
    if area.abs() <= f32::EPSILON {
        return None;
    }

    let u = perp_dot(c - b, p - b) / area;
    let v = perp_dot(a - c, p - c) / area;
    Some(Vec3::new(u, v, 1.0 - u - v))
}

use crate::{
    patch::PatchId,
    tessellation::{FaceId, FarVertexId, NearVertexId, TileMaterialId},
};
use bevy::utils::{HashMap, HashSet};

/// A change to the render lists of a patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderEvent {
    AppendFace {
        patch: PatchId,
        face: FaceId,
    },
    RemoveFace {
        patch: PatchId,
        face: FaceId,
    },
    AppendFarVertex {
        patch: PatchId,
        vertex: FarVertexId,
    },
    RemoveFarVertex {
        patch: PatchId,
        vertex: FarVertexId,
    },
    AppendTileMaterial {
        patch: PatchId,
        material: TileMaterialId,
    },
    RemoveTileMaterial {
        patch: PatchId,
        material: TileMaterialId,
    },
    AppendNearVertex {
        patch: PatchId,
        material: TileMaterialId,
        vertex: NearVertexId,
    },
    RemoveNearVertex {
        patch: PatchId,
        material: TileMaterialId,
        vertex: NearVertexId,
    },
}

/// Receives every change to the leaf faces and render vertices of the landscape.
///
/// A render backend keeps its vertex and index buffers in sync with the tessellation
/// by mirroring these events.
pub trait RenderSink: Send + Sync + 'static {
    fn notify(&mut self, event: RenderEvent);
}

/// The render lists of a single patch.
#[derive(Default, Debug, Clone)]
pub struct PatchRenderList {
    /// The leaf faces drawn with the far (untiled) material.
    pub faces: HashSet<FaceId>,
    pub far_vertices: HashSet<FarVertexId>,
    /// The tile materials and the near vertices rendered with each of them.
    pub tile_materials: HashMap<TileMaterialId, HashSet<NearVertexId>>,
}

impl PatchRenderList {
    fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.far_vertices.is_empty() && self.tile_materials.is_empty()
    }
}

/// The render lists of all patches.
///
/// Every append must be matched by exactly one remove, violations are fatal.
#[derive(Default, Debug)]
pub struct RenderLists {
    patches: HashMap<PatchId, PatchRenderList>,
}

impl RenderLists {
    pub fn patch(&self, patch: PatchId) -> Option<&PatchRenderList> {
        self.patches.get(&patch)
    }

    pub fn face_count(&self) -> usize {
        self.patches.values().map(|list| list.faces.len()).sum()
    }

    pub fn far_vertex_count(&self) -> usize {
        self.patches.values().map(|list| list.far_vertices.len()).sum()
    }

    pub fn tile_material_count(&self) -> usize {
        self.patches
            .values()
            .map(|list| list.tile_materials.len())
            .sum()
    }

    pub fn near_vertex_count(&self) -> usize {
        self.patches
            .values()
            .flat_map(|list| list.tile_materials.values())
            .map(HashSet::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    fn list_mut(&mut self, patch: PatchId) -> &mut PatchRenderList {
        self.patches
            .get_mut(&patch)
            .unwrap_or_else(|| panic!("Patch {patch} has no render list."))
    }

    fn prune(&mut self, patch: PatchId) {
        if self.patches.get(&patch).is_some_and(PatchRenderList::is_empty) {
            self.patches.remove(&patch);
        }
    }
}

impl RenderSink for RenderLists {
    fn notify(&mut self, event: RenderEvent) {
        match event {
            RenderEvent::AppendFace { patch, face } => {
                let inserted = self.patches.entry(patch).or_default().faces.insert(face);
                assert!(inserted, "Face {face} is already in the render list of patch {patch}.");
            }
            RenderEvent::RemoveFace { patch, face } => {
                let removed = self.list_mut(patch).faces.remove(&face);
                assert!(removed, "Face {face} is not in the render list of patch {patch}.");
                self.prune(patch);
            }
            RenderEvent::AppendFarVertex { patch, vertex } => {
                let inserted = self
                    .patches
                    .entry(patch)
                    .or_default()
                    .far_vertices
                    .insert(vertex);
                assert!(inserted, "Far vertex {vertex} is already in the render list of patch {patch}.");
            }
            RenderEvent::RemoveFarVertex { patch, vertex } => {
                let removed = self.list_mut(patch).far_vertices.remove(&vertex);
                assert!(removed, "Far vertex {vertex} is not in the render list of patch {patch}.");
                self.prune(patch);
            }
            RenderEvent::AppendTileMaterial { patch, material } => {
                let list = self.patches.entry(patch).or_default();
                let previous = list.tile_materials.insert(material, HashSet::default());
                assert!(previous.is_none(), "Tile material {material} is already in the render list of patch {patch}.");
            }
            RenderEvent::RemoveTileMaterial { patch, material } => {
                let vertices = self
                    .list_mut(patch)
                    .tile_materials
                    .remove(&material)
                    .unwrap_or_else(|| panic!("Tile material {material} is not in the render list of patch {patch}."));
                assert!(vertices.is_empty(), "Tile material {material} still renders {} near vertices.", vertices.len());
                self.prune(patch);
            }
            RenderEvent::AppendNearVertex {
                patch,
                material,
                vertex,
            } => {
                let inserted = self
                    .list_mut(patch)
                    .tile_materials
                    .get_mut(&material)
                    .unwrap_or_else(|| panic!("Tile material {material} is not in the render list of patch {patch}."))
                    .insert(vertex);
                assert!(inserted, "Near vertex {vertex} is already in the render list of tile material {material}.");
            }
            RenderEvent::RemoveNearVertex {
                patch,
                material,
                vertex,
            } => {
                let removed = self
                    .list_mut(patch)
                    .tile_materials
                    .get_mut(&material)
                    .is_some_and(|vertices| vertices.remove(&vertex));
                assert!(removed, "Near vertex {vertex} is not in the render list of tile material {material}.");
            }
        }
    }
}

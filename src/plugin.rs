use crate::{config::LandscapeConfig, landscape::Landscape, tessellation::TessellationStats};
use bevy::{prelude::*, render::primitives::Frustum};
use std::path::Path;

/// Marks the camera whose position drives the refinement of the landscape.
#[derive(Component, Default, Clone, Copy, Debug)]
pub struct LandscapeViewer;

/// The plugin for the landscape tessellation.
#[derive(Default)]
pub struct LandscapePlugin {
    pub config: LandscapeConfig,
}

impl LandscapePlugin {
    /// Reads the configuration from a RON file, falling back to the defaults.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        let config = LandscapeConfig::load_file(path).unwrap_or_else(|error| {
            warn!(
                "Could not read the landscape config {}, using the defaults: {error}",
                path.display()
            );
            default()
        });

        Self { config }
    }
}

impl Plugin for LandscapePlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(Landscape::new(self.config.clone()))
            .add_systems(
                Last,
                (update_landscape_clip, refine_landscape, log_landscape_stats).chain(),
            );
    }
}

pub fn update_landscape_clip(
    viewer_query: Query<&Frustum, With<LandscapeViewer>>,
    mut landscape: ResMut<Landscape>,
) {
    if let Ok(frustum) = viewer_query.get_single() {
        landscape.clip(&frustum.half_spaces);
    }
}

pub fn refine_landscape(
    viewer_query: Query<&GlobalTransform, With<LandscapeViewer>>,
    mut landscape: ResMut<Landscape>,
) {
    if let Ok(transform) = viewer_query.get_single() {
        landscape.refine(transform.translation());
    }
}

pub fn log_landscape_stats(landscape: Res<Landscape>, mut last: Local<TessellationStats>) {
    let stats = landscape.stats();

    if stats != *last {
        debug!(
            "Landscape: {} faces ({} leaves), {} vertices, {} tile materials.",
            stats.faces, stats.leaves, stats.vertices, stats.tile_materials
        );
        *last = stats;
    }
}

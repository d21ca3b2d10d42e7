use anyhow::Result;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The tuning parameters of a [`Landscape`](crate::landscape::Landscape).
///
/// The configuration can be stored next to the zone data as a RON file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LandscapeConfig {
    /// The error threshold above which a face is split.
    /// Smaller values produce a finer tessellation.
    pub refine_threshold: f32,
    /// Up to this distance faces below the tile level are always refined to tile level.
    pub tile_near: f32,
    /// Beyond this distance the tile transition has no influence on the error metric.
    pub tile_far: f32,
    /// The number of levels faces may be split below the tile level.
    pub tile_max_subdivision: u32,
    /// The extra distance the viewer has to travel before a mergeable face is merged.
    pub merge_threshold: f32,
    /// Mask applied to the refine date to throttle the refinement of invisible zones.
    pub hide_refine_frequency: u32,
    /// The size in pixels of a single tile texture.
    pub tile_pixel_size: u32,
    /// The side length in pixels of the lightmap atlas.
    pub lightmap_atlas_size: u32,
    /// The side length in pixels of a lightmap block covering two by two tiles.
    pub lightmap_block_size: u32,
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            refine_threshold: 0.005,
            tile_near: 50.0,
            tile_far: 75.0,
            tile_max_subdivision: 4,
            merge_threshold: 2.0,
            hide_refine_frequency: 15,
            tile_pixel_size: 128,
            lightmap_atlas_size: 1024,
            lightmap_block_size: 10,
        }
    }
}

impl LandscapeConfig {
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

/// The per frame parameters shared by every face during refinement.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RefineGlobals {
    pub(crate) current_date: u32,
    pub(crate) refine_center: Vec3,
    pub(crate) refine_threshold: f32,
    pub(crate) oo_refine_threshold: f32,
    pub(crate) tile_near: f32,
    pub(crate) tile_far: f32,
    pub(crate) tile_near_sqr: f32,
    pub(crate) tile_far_sqr: f32,
    pub(crate) oo_tile_delta_sqr: f32,
    pub(crate) tile_max_subdivision: u32,
    pub(crate) merge_threshold: f32,
    pub(crate) hide_refine_frequency: u32,
}

impl RefineGlobals {
    pub(crate) fn new(config: &LandscapeConfig) -> Self {
        let mut globals = Self {
            current_date: 1,
            refine_center: Vec3::ZERO,
            refine_threshold: 0.0,
            oo_refine_threshold: 0.0,
            tile_near: 0.0,
            tile_far: 0.0,
            tile_near_sqr: 0.0,
            tile_far_sqr: 0.0,
            oo_tile_delta_sqr: 0.0,
            tile_max_subdivision: 0,
            merge_threshold: 0.0,
            hide_refine_frequency: 0,
        };
        globals.apply(config);
        globals
    }

    pub(crate) fn apply(&mut self, config: &LandscapeConfig) {
        assert!(
            config.refine_threshold > 0.0,
            "The refine threshold must be positive."
        );
        assert!(
            config.tile_far > config.tile_near,
            "The far tile distance must be greater than the near tile distance."
        );

        self.refine_threshold = config.refine_threshold;
        self.oo_refine_threshold = 1.0 / config.refine_threshold;
        self.tile_near = config.tile_near;
        self.tile_far = config.tile_far;
        self.tile_near_sqr = config.tile_near * config.tile_near;
        self.tile_far_sqr = config.tile_far * config.tile_far;
        self.oo_tile_delta_sqr = 1.0 / (self.tile_far_sqr - self.tile_near_sqr);
        self.tile_max_subdivision = config.tile_max_subdivision;
        self.merge_threshold = config.merge_threshold;
        self.hide_refine_frequency = config.hide_refine_frequency;
    }
}

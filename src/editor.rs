//! Editor-side hooks, built with the `editor` feature.
//!
//! Everything here reads the core through its public accessors; the core
//! never depends on this module.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use macroquad::color::{Color, BLANK, GRAY, WHITE};
use macroquad::math::{vec2, Vec2};
use macroquad::models::{draw_mesh, Mesh as GpuMesh, Vertex as GpuVertex};
use macroquad::shapes::draw_rectangle_lines;
use macroquad::texture::{load_texture, FilterMode, Image, Texture2D};

use crate::mesh::{AtlasLookup, Mesh};
use crate::tilemap::TileMap;
use crate::tileset::{TextureKey, TileSet};

// macroquad meshes index with u16.
const MAX_QUADS_PER_DRAW: usize = (u16::MAX as usize + 1) / 4;

/// Atlas textures loaded on the GPU, keyed like the tile set references them.
#[derive(Default)]
pub struct TextureCache {
    textures: HashMap<TextureKey, Texture2D>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&mut self, key: &TextureKey, path: &Path) -> anyhow::Result<()> {
        let path_str = path
            .to_str()
            .with_context(|| format!("Texture path is not UTF-8: {}", path.display()))?;
        let tex = load_texture(path_str)
            .await
            .with_context(|| format!("Loading texture {}", key))?;
        tex.set_filter(FilterMode::Nearest);
        self.textures.insert(key.clone(), tex);
        Ok(())
    }

    /// Loads every atlas of `tileset`, keys resolved against `base_dir`.
    pub async fn load_tileset(&mut self, tileset: &TileSet, base_dir: &Path) -> anyhow::Result<()> {
        let keys: Vec<TextureKey> = expose_resources(tileset);
        for key in keys {
            if self.textures.contains_key(&key) {
                continue;
            }
            self.load(&key, &base_dir.join(key.as_str())).await?;
        }
        Ok(())
    }

    pub fn insert(&mut self, key: TextureKey, texture: Texture2D) {
        self.textures.insert(key, texture);
    }

    pub fn get(&self, key: &TextureKey) -> Option<&Texture2D> {
        self.textures.get(key)
    }
}

impl AtlasLookup for TextureCache {
    fn atlas_size(&self, texture: &TextureKey) -> Option<Vec2> {
        self.textures.get(texture).map(|t| t.size())
    }
}

/// Resources the map needs, for the host's resource enumeration.
pub fn expose_resources(tileset: &TileSet) -> Vec<TextureKey> {
    tileset.textures().into_iter().cloned().collect()
}

/// Size a freshly placed instance gets in the editor.
pub fn default_instance_size(map: &TileMap) -> Vec2 {
    map.size()
}

/// Draws a mesh snapshot with its top-left corner at `origin`.
pub fn draw_tile_mesh(mesh: &Mesh, textures: &TextureCache, origin: Vec2) {
    for batch in mesh.batches() {
        let Some(tex) = textures.get(&batch.key().texture) else {
            continue;
        };
        let quads = batch.quad_count();
        let mut start = 0;
        while start < quads {
            let end = (start + MAX_QUADS_PER_DRAW).min(quads);
            let base = (start * 4) as u32;
            let gpu = GpuMesh {
                vertices: batch.vertices()[start * 4..end * 4]
                    .iter()
                    .map(|v| {
                        let p = origin + v.position;
                        GpuVertex::new(p.x, p.y, 0.0, v.uv.x, v.uv.y, WHITE)
                    })
                    .collect(),
                indices: batch.indices()[start * 6..end * 6]
                    .iter()
                    .map(|i| (i - base) as u16)
                    .collect(),
                texture: Some(tex.clone()),
            };
            draw_mesh(&gpu);
            start = end;
        }
    }
}

/// Draws an instance as placed in a scene; empty maps show their outline.
pub fn draw_initial_instance(map: &TileMap, textures: &TextureCache, position: Vec2) {
    let mesh = map.mesh();
    if mesh.is_empty() {
        let size = map.size();
        draw_rectangle_lines(position.x, position.y, size.x, size.y, 1.0, GRAY);
        return;
    }
    draw_tile_mesh(&mesh, textures, position);
}

/// Rasterizes a mesh on the CPU into a square `size` x `size` thumbnail,
/// scaled to fit `map_size` and sampled nearest-neighbour from `atlases`.
pub fn generate_thumbnail(
    mesh: &Mesh,
    atlases: &HashMap<TextureKey, Image>,
    map_size: Vec2,
    size: u16,
) -> Image {
    let mut thumb = Image::gen_image_color(size, size, BLANK);
    let longest = map_size.x.max(map_size.y);
    if longest <= 0.0 || size == 0 {
        return thumb;
    }
    let scale = size as f32 / longest;

    for quad in mesh.quads() {
        let Some(atlas) = atlases.get(quad.texture) else {
            continue;
        };
        let [tl, tr, br, bl] = quad.vertices;
        let min = tl.position * scale;
        let max = br.position * scale;
        let extent = max - min;
        if extent.x <= 0.0 || extent.y <= 0.0 {
            continue;
        }

        let x0 = min.x.floor().max(0.0) as u32;
        let y0 = min.y.floor().max(0.0) as u32;
        let x1 = (max.x.ceil() as u32).min(size as u32);
        let y1 = (max.y.ceil() as u32).min(size as u32);
        for py in y0..y1 {
            for px in x0..x1 {
                let f = (vec2(px as f32 + 0.5, py as f32 + 0.5) - min) / extent;
                if f.x < 0.0 || f.y < 0.0 || f.x >= 1.0 || f.y >= 1.0 {
                    continue;
                }
                let uv = tl.uv + (tr.uv - tl.uv) * f.x + (bl.uv - tl.uv) * f.y;
                let color = sample(atlas, uv);
                if color.a > 0.0 {
                    thumb.set_pixel(px, py, color);
                }
            }
        }
    }
    thumb
}

fn sample(image: &Image, uv: Vec2) -> Color {
    let w = image.width as u32;
    let h = image.height as u32;
    if w == 0 || h == 0 {
        return BLANK;
    }
    let x = ((uv.x * w as f32) as u32).min(w - 1);
    let y = ((uv.y * h as f32) as u32).min(h - 1);
    image.get_pixel(x, y)
}

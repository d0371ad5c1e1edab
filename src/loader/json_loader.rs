// src/loader/json_loader.rs
use crate::error::MapError;
use crate::grid::{TileGrid, TileGridData};
use crate::tile::TileId;
use crate::tilemap::TileMapData;
use crate::tileset::{AtlasGrid, CollisionShape, TextureKey, TileSet};
use log::debug;
use macroquad::math::{vec2, Vec2};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// Tiled reserves bit 28 for hexagonal rotation; it means NO_COLLIDE here.
const TILED_HEX_ROTATION: u32 = 0x1000_0000;
const TILED_GID_MASK: u32 = 0x0FFF_FFFF;

#[derive(Deserialize)]
struct JsonLayer {
    #[serde(default)]
    data: Vec<u32>,
    #[serde(default)]
    width: usize,
    #[serde(default)]
    height: usize,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>, // "tilelayer" expected here
}

#[derive(Deserialize)]
struct JsonTilesetRef {
    firstgid: u32,
    #[serde(default)]
    source: Option<String>,
    #[serde(flatten)]
    embedded: JsonValue,
}

#[derive(Deserialize)]
struct JsonMap {
    width: usize,
    height: usize,
    tilewidth: u32,
    tileheight: u32,
    #[serde(default)]
    infinite: bool,
    layers: Vec<JsonLayer>,
    #[serde(default)]
    tilesets: Vec<JsonTilesetRef>,
}

#[derive(Deserialize)]
struct JsonTileset {
    tilewidth: u32,
    tileheight: u32,
    tilecount: u32,
    columns: u32,
    image: String,
    #[serde(default)]
    imagewidth: u32,
    #[serde(default)]
    imageheight: u32,
    #[serde(default)]
    spacing: u32,
    #[serde(default)]
    margin: u32,
    #[serde(default)]
    tiles: Vec<JsonTile>,
}

#[derive(Deserialize)]
struct JsonTile {
    id: u32,
    #[serde(default)]
    objectgroup: JsonObjectGroup,
}

#[derive(Deserialize, Default)]
struct JsonObjectGroup {
    #[serde(default)]
    objects: Vec<JsonObject>,
}

#[derive(Deserialize)]
struct JsonObject {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    point: bool,
    #[serde(default)]
    ellipse: bool,
    #[serde(default)]
    polygon: Vec<JsonObjectPoint>,
}

#[derive(Deserialize)]
struct JsonObjectPoint {
    x: f32,
    y: f32,
}

/// A Tiled map converted to the tile map data model.
#[derive(Debug)]
pub struct TiledMap {
    pub data: TileMapData,
    /// Directory texture keys are relative to.
    pub base_dir: PathBuf,
    /// Atlas sizes declared by the tilesets, usable as an
    /// [`AtlasLookup`](crate::AtlasLookup) before any image is loaded.
    pub atlas_sizes: HashMap<TextureKey, Vec2>,
    /// Names of the imported tile layers, bottom first.
    pub layer_names: Vec<String>,
}

fn object_to_shape(obj: &JsonObject) -> Option<CollisionShape> {
    if obj.point || obj.ellipse {
        return None;
    }
    if !obj.polygon.is_empty() {
        return Some(CollisionShape::Polygon {
            points: obj
                .polygon
                .iter()
                .map(|p| [obj.x + p.x, obj.y + p.y])
                .collect(),
        });
    }
    (obj.width > 0.0 && obj.height > 0.0).then(|| CollisionShape::Rect {
        x: obj.x,
        y: obj.y,
        w: obj.width,
        h: obj.height,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, MapError> {
    let txt = std::fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&txt).map_err(|source| MapError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads an orthogonal Tiled JSON map and its external tilesets.
pub fn load_tiled_map(path: impl AsRef<Path>) -> Result<TiledMap, MapError> {
    let p = path.as_ref();
    if p.extension().and_then(|e| e.to_str()) != Some("json") {
        return Err(MapError::InvalidMap(format!(
            "Map file must be a JSON file: {}",
            p.display()
        )));
    }

    let j: JsonMap = read_json(p)?;
    let map_dir = p
        .parent()
        .map(|d| d.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./"));

    convert(j, p, map_dir)
}

/// Decodes a Tiled JSON map held in memory. External tilesets are resolved
/// against `base_dir`.
pub fn decode_tiled_map_str(json: &str, base_dir: &Path) -> Result<TiledMap, MapError> {
    let origin = base_dir.join("<inline>");
    let j: JsonMap = serde_json::from_str(json).map_err(|source| MapError::Json {
        path: origin.clone(),
        source,
    })?;
    convert(j, &origin, base_dir.to_path_buf())
}

fn convert(j: JsonMap, origin: &Path, map_dir: PathBuf) -> Result<TiledMap, MapError> {
    if j.infinite {
        return Err(MapError::InvalidMap("infinite maps are not supported".into()));
    }

    // Resolve every tileset, keeping image paths relative to the map.
    let mut resolved = Vec::with_capacity(j.tilesets.len());
    for ts in j.tilesets {
        let (def, rel_dir): (JsonTileset, PathBuf) = match &ts.source {
            Some(source) => {
                if !source.ends_with(".json") {
                    return Err(MapError::InvalidMap(format!(
                        "External tileset must be JSON: {}",
                        source
                    )));
                }
                let def = read_json(&map_dir.join(source))?;
                let rel = Path::new(source)
                    .parent()
                    .map(|d| d.to_path_buf())
                    .unwrap_or_default();
                (def, rel)
            }
            None => {
                let def = serde_json::from_value(ts.embedded).map_err(|source| MapError::Json {
                    path: origin.to_path_buf(),
                    source,
                })?;
                (def, PathBuf::new())
            }
        };
        let key = TextureKey::from(rel_dir.join(&def.image).to_string_lossy().into_owned());
        resolved.push((ts.firstgid, def, key));
    }
    resolved.sort_by_key(|(first_gid, _, _)| *first_gid);

    let max_gid = resolved
        .iter()
        .map(|(first_gid, def, _)| first_gid + def.tilecount.max(1) - 1)
        .max()
        .unwrap_or(0);

    let default_texture = resolved
        .first()
        .map(|(_, _, key)| key.clone())
        .unwrap_or_default();
    let mut tileset = TileSet::new(default_texture.clone(), j.tilewidth, j.tileheight);
    let mut atlas_sizes = HashMap::new();

    for (first_gid, def, key) in &resolved {
        let texture = (*key != default_texture).then(|| key.clone());
        tileset.add_atlas_grid(
            texture,
            AtlasGrid {
                tile_w: def.tilewidth,
                tile_h: def.tileheight,
                columns: def.columns,
                tilecount: def.tilecount,
                spacing: def.spacing,
                margin: def.margin,
                first_id: *first_gid,
            },
        )?;
        for tile in &def.tiles {
            let mut shapes = tile.objectgroup.objects.iter().filter_map(object_to_shape);
            if let Some(shape) = shapes.next() {
                tileset.set_collision(TileId(first_gid + tile.id), Some(shape));
            }
            let extra = shapes.count();
            if extra > 0 {
                debug!(
                    "tile {} has {} extra collision object(s); keeping the first",
                    first_gid + tile.id,
                    extra
                );
            }
        }
        if def.imagewidth > 0 && def.imageheight > 0 {
            atlas_sizes.insert(
                key.clone(),
                vec2(def.imagewidth as f32, def.imageheight as f32),
            );
        }
    }

    let expected = j.width.checked_mul(j.height).ok_or_else(|| {
        MapError::InvalidMap(format!("map size {}x{} is too large", j.width, j.height))
    })?;
    let mut layers = Vec::new();
    let mut layer_names = Vec::new();
    for l in j.layers {
        if l.kind.as_deref().unwrap_or("tilelayer") != "tilelayer" {
            debug!("skipping non-tile layer '{}'", l.name);
            continue;
        }
        let sized = (l.width == 0 || l.width == j.width) && (l.height == 0 || l.height == j.height);
        if !sized || l.data.len() != expected {
            return Err(MapError::InvalidLayerSize {
                layer: l.name,
                expected,
                found: l.data.len(),
            });
        }
        let mut data = l.data;
        for raw in data.iter_mut() {
            let gid = *raw & TILED_GID_MASK;
            if gid != 0 && gid > max_gid {
                return Err(MapError::InvalidTileGid {
                    layer: l.name,
                    gid,
                    max_gid,
                });
            }
            *raw &= !TILED_HEX_ROTATION;
        }
        layers.push(data);
        layer_names.push(l.name);
    }

    if layers.is_empty() {
        return Err(MapError::InvalidMap("no tile layer found".into()));
    }

    let grid = TileGrid::from_data(TileGridData {
        rows: j.height,
        cols: j.width,
        layers,
    })?;

    Ok(TiledMap {
        data: TileMapData { tileset, grid },
        base_dir: map_dir,
        atlas_sizes,
        layer_names,
    })
}

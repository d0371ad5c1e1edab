use macroquad::prelude::*;
use tilemap_mesh::editor::{draw_initial_instance, TextureCache};
use tilemap_mesh::{load_tiled_map, AtlasGrid, TextureKey, TileFlags, TileId, TileMap, TileSet};

fn window_conf() -> Conf {
    Conf {
        window_title: "Tile map preview".into(),
        window_width: 1280,
        window_height: 720,
        ..Default::default()
    }
}

/// 4 flat-colored 16x16 tiles in a 32x32 atlas.
fn checker_atlas() -> Image {
    let colors = [DARKGREEN, GREEN, BROWN, SKYBLUE];
    let mut img = Image::gen_image_color(32, 32, BLANK);
    for (i, c) in colors.iter().enumerate() {
        let (ox, oy) = ((i as u32 % 2) * 16, (i as u32 / 2) * 16);
        for y in 0..16 {
            for x in 0..16 {
                // Darker top-left corner shows flips and rotations.
                let shade = if x < 4 && y < 4 { BLACK } else { *c };
                img.set_pixel(ox + x, oy + y, shade);
            }
        }
    }
    img
}

fn procedural_map() -> anyhow::Result<TileMap> {
    let tileset = TileSet::from_atlas_grid(
        "checker",
        AtlasGrid {
            tile_w: 16,
            tile_h: 16,
            columns: 2,
            tilecount: 4,
            spacing: 0,
            margin: 0,
            first_id: 1,
        },
    );
    let mut map = TileMap::new(tileset, 2, 40, 70)?;
    map.fill_layer(0, TileId(1), TileFlags::NONE)?;
    Ok(map)
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        log::error!("preview failed: {err:#}");
    }
}

async fn run() -> anyhow::Result<()> {
    let mut textures = TextureCache::new();
    let mut map = match std::env::args().nth(1) {
        Some(path) => {
            let tiled = load_tiled_map(&path)?;
            textures
                .load_tileset(&tiled.data.tileset, &tiled.base_dir)
                .await?;
            TileMap::from_data(tiled.data)
        }
        None => {
            let tex = Texture2D::from_image(&checker_atlas());
            tex.set_filter(FilterMode::Nearest);
            textures.insert(TextureKey::from("checker"), tex);
            procedural_map()?
        }
    };

    let mut tick = 0usize;
    loop {
        clear_background(BLACK);

        // A diagonal band of rotating tiles sweeps across the top layer.
        if map.grid().layers() > 1 {
            let rows = map.grid().rows();
            let cols = map.grid().cols();
            for row in 0..rows {
                let col = (tick / 4 + row) % cols;
                let prev = (col + cols - 1) % cols;
                map.clear_tile(1, row, prev)?;
                let flags = (0..(tick / 8) % 4).fold(TileFlags::NONE, |f, _| f.rotated_cw());
                map.set_tile(1, row, col, TileId(3 + (row % 2) as u32), flags)?;
            }
        }

        let stats = map.flush(&textures);
        draw_initial_instance(&map, &textures, vec2(20.0, 20.0));

        draw_text(
            &format!(
                "FPS: {}  quads: {}  +{} -{}",
                get_fps(),
                map.mesh().quad_count(),
                stats.quads_added,
                stats.quads_removed
            ),
            20.0,
            screen_height() - 20.0,
            30.0,
            RED,
        );

        tick += 1;
        next_frame().await;
    }
}

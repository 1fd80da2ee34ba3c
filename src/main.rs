//! Headless streaming demo
//!
//! Streams a row of cubes, a glass cube and an animated sprite into a scene
//! backed by the recording device, renders frames while they load, destroys
//! one cube mid-load and tears everything down again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use glam::{Quat, Vec2, Vec3};

use rtstream::core::error::Result;
use rtstream::core::{logging, StreamingConfig};
use rtstream::gpu::headless::ObjectKind;
use rtstream::gpu::{BlasInstanceData, HeadlessDevice, InstanceMatrix};
use rtstream::objects::{CubeDesc, CubeMaterial, ObjectServices, SceneCube, SceneSprite, SpriteDesc};
use rtstream::render::FrameRenderer;
use rtstream::resources::{
    MemoryTextureSource, Sprite, SpriteAnimation, SpriteFrame, SpriteMaterialDescription, TextureData,
    TextureSetDescription,
};
use rtstream::stream::{SceneRegistries, StreamingScene, TaskPool};

const FRAMES: u32 = 30;
const FRAME_TIME: Duration = Duration::from_millis(16);

fn main() {
    logging::init();
    log::info!("rtstream demo starting...");

    if let Err(err) = run() {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = match parse_config_arg(&args) {
        Some(path) => StreamingConfig::load_sync(&path)?,
        None => StreamingConfig::default(),
    };

    let tasks = TaskPool::new(config.worker_threads)?;
    let device = Arc::new(HeadlessDevice::new());
    let source = Arc::new(MemoryTextureSource::new());
    let materials = seed_textures(&source);

    let services = ObjectServices::new(&tasks, &config, source.clone(), device.clone(), device.clone());
    let registries = SceneRegistries::from_config(&config, device.as_ref())?;
    let mut scene = StreamingScene::new(tasks.clone(), registries);
    let mut renderer = FrameRenderer::new(device.clone());

    let mut cubes = Vec::new();
    for i in 0..8 {
        let transform = InstanceMatrix::new(
            Vec3::new(i as f32 * 2.0, 0.0, 0.0),
            Quat::from_rotation_y(i as f32 * 0.3),
            Vec3::ONE,
        );
        let texture = materials[i % materials.len()].clone();
        cubes.push(SceneCube::spawn(&mut scene, &services, CubeDesc::textured(transform, texture))?);
    }

    let glass = BlasInstanceData::glass(Vec3::new(1.0, 0.9, 0.9), 4.0, Vec2::new(1.5, 1.0 / 1.5), 0xFFFFFF);
    SceneCube::spawn(
        &mut scene,
        &services,
        CubeDesc {
            transform: InstanceMatrix::from_translation(Vec3::new(0.0, 2.0, 0.0)),
            material: CubeMaterial::Glass(glass),
        },
    )?;

    let sprite = SceneSprite::spawn(&mut scene, &services, dino_sprite());

    // Gone before its textures are ready
    scene.request_destruction(cubes[7]);

    for frame in 0..FRAMES {
        scene.update()?;

        if let Some(sprite) = scene.object::<SceneSprite>(sprite) {
            sprite.update(FRAME_TIME);
        }
        let spin = InstanceMatrix::new(
            Vec3::new(0.0, 0.0, 3.0),
            Quat::from_rotation_y(frame as f32 * 0.1),
            Vec3::ONE,
        );
        if let Some(result) = scene.with_object::<SceneCube, _>(cubes[0], |cube, regs| cube.set_transform(spin, regs)) {
            result?;
        }

        let stats = renderer.render_frame(scene.registries_mut())?;
        log::debug!(
            "Frame {}: {:?}, {} instances, {} binders",
            stats.frame,
            stats.mode,
            stats.instances,
            stats.binders
        );
        std::thread::sleep(FRAME_TIME);
    }

    tasks.block_on(scene.settle())?;
    renderer.render_frame(scene.registries_mut())?;
    log::info!(
        "Scene settled: {:?}, {} live texture sets",
        scene.stats(),
        scene.registries().slots.len()
    );

    for &cube in &cubes[..4] {
        scene.request_destruction(cube);
    }
    scene.update()?;
    renderer.render_frame(scene.registries_mut())?;

    scene.shutdown();
    renderer.render_frame(scene.registries_mut())?;

    log::info!("Texture pool: {:?}", services.textures.pool().stats());
    log::info!("Shader pool: {:?}", services.shaders.pool().stats());
    log::info!("Geometry pool: {:?}", services.geometry.pool().stats());
    log::info!("Instance registry: {:?}", scene.registries().instances.stats());
    log::info!(
        "Live after shutdown: {} textures, {} shaders, {} BLAS",
        device.live_count(ObjectKind::Texture),
        device.live_count(ObjectKind::Shader),
        device.live_count(ObjectKind::Blas)
    );
    Ok(())
}

/// Parse --config argument from command line
fn parse_config_arg(args: &[String]) -> Option<PathBuf> {
    for i in 0..args.len() {
        if args[i] == "--config" || args[i] == "-c" {
            if let Some(path) = args.get(i + 1) {
                return Some(PathBuf::from(path));
            }
        }
    }
    None
}

/// Fill the in-memory source with a few texture sets and a sprite sheet.
fn seed_textures(source: &MemoryTextureSource) -> Vec<TextureSetDescription> {
    let ground = TextureSetDescription::new("cc0Textures/Ground037");
    source.insert(ground.color_map_path(), TextureData::solid(64, 64, [110, 90, 60, 255]));
    source.insert(ground.map_path("Normal"), TextureData::solid(64, 64, [128, 128, 255, 255]));
    source.insert(ground.map_path("Roughness"), TextureData::solid(64, 64, [200, 200, 200, 255]));

    let metal = TextureSetDescription::new("cc0Textures/Metal032").reflective();
    source.insert(metal.color_map_path(), TextureData::solid(64, 64, [180, 180, 190, 255]));
    source.insert(metal.map_path("Normal"), TextureData::solid(64, 64, [128, 128, 255, 255]));
    source.insert(metal.map_path("Roughness"), TextureData::solid(64, 64, [40, 40, 40, 255]));
    source.insert(metal.map_path("Metalness"), TextureData::solid(64, 64, [255, 255, 255, 255]));

    let lava = TextureSetDescription::new("cc0Textures/Lava004");
    source.insert(lava.color_map_path(), TextureData::solid(64, 64, [220, 60, 10, 255]));
    source.insert(lava.map_path("Emissive"), TextureData::solid(64, 64, [255, 80, 0, 255]));

    source.insert("sprites/TinyDino.png", TextureData::solid(96, 24, [20, 160, 40, 255]));

    vec![ground, metal, lava]
}

fn dino_sprite() -> SpriteDesc {
    let frame = |i: u32| SpriteFrame::from_pixels(i * 24, 0, (i + 1) * 24, 24, 96, 24);
    let sprite = Sprite::new(vec![
        (
            "run".to_string(),
            SpriteAnimation::new(Duration::from_millis(100), (0..4).map(frame).collect()),
        ),
        (
            "idle".to_string(),
            SpriteAnimation::new(Duration::from_millis(400), vec![frame(0)]),
        ),
    ]);
    SpriteDesc {
        transform: InstanceMatrix::from_translation(Vec3::new(-2.0, 0.5, 0.0)),
        material: SpriteMaterialDescription::new("sprites/TinyDino.png"),
        sprite,
    }
}

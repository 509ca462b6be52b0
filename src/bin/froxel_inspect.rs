//! Froxel Inspector
//!
//! Run with: `cargo run --bin froxel_inspect -- [scene.json] [--exhaustive] [--threads N] [--gpu]`
//!
//! Froxelizes one frame of a scene on the CPU and prints the grid, the per-slice
//! occupancy and the record buffer usage. Without a scene file a built-in demo
//! scene (a ring of point lights and a few spots) is used. With `--gpu` the
//! buffers are also allocated and uploaded on the default adapter.
//!
//! Set `RUST_LOG=debug` to see grid rebuilds and capacity warnings.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use glam::{Mat4, Vec3};
use log::info;
use serde::Deserialize;

use clustered_lights::{
    FroxelOptions, Froxelizer, FroxelizerConfig, MAX_LIGHT_COUNT, PositionalLight, RayonScheduler,
    Viewport, WgpuBufferService,
};

// ============================================================================
// SCENE DESCRIPTION
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CameraDesc {
    position: Vec3,
    target: Vec3,
    fov_y_degrees: f32,
    near: f32,
    far: f32,
}

impl Default for CameraDesc {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 10.0),
            target: Vec3::new(0.0, 0.0, -20.0),
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 200.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SceneDesc {
    viewport: Viewport,
    camera: CameraDesc,
    config: FroxelizerConfig,
    options: FroxelOptions,
    lights: Vec<PositionalLight>,
}

impl Default for SceneDesc {
    fn default() -> Self {
        Self {
            viewport: Viewport::new(1920, 1080),
            camera: CameraDesc::default(),
            config: FroxelizerConfig::default(),
            options: FroxelOptions::new(1.0, 100.0),
            lights: demo_lights(),
        }
    }
}

/// A ring of point lights on the ground plus spots looking down the ring.
fn demo_lights() -> Vec<PositionalLight> {
    let mut lights: Vec<PositionalLight> = (0..48)
        .map(|i| {
            let angle = i as f32 / 48.0 * std::f32::consts::TAU;
            let distance = 8.0 + (i % 6) as f32 * 6.0;
            let position = Vec3::new(angle.cos() * distance, 0.5, -20.0 + angle.sin() * distance);
            PositionalLight::point(position, 3.0 + (i % 3) as f32)
        })
        .collect();
    lights.extend((0..8).map(|i| {
        let x = -14.0 + i as f32 * 4.0;
        PositionalLight::spot(Vec3::new(x, 8.0, -12.0), Vec3::new(0.0, -1.0, -0.4), 15.0, 0.35)
    }));
    lights
}

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Debug, Default)]
struct Args {
    scene: Option<PathBuf>,
    exhaustive: bool,
    threads: Option<usize>,
    gpu: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--exhaustive" => args.exhaustive = true,
            "--gpu" => args.gpu = true,
            "--threads" => {
                let value = iter.next().context("--threads needs a value")?;
                args.threads = Some(value.parse().with_context(|| format!("invalid thread count: {}", value))?);
            }
            flag if flag.starts_with("--") => bail!("unknown option: {}", flag),
            path => args.scene = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

fn load_scene(path: Option<&PathBuf>) -> Result<SceneDesc> {
    let Some(path) = path else {
        info!("No scene given, using the demo scene");
        return Ok(SceneDesc::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse scene {}", path.display()))
}

// ============================================================================
// MAIN
// ============================================================================

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let mut scene = load_scene(args.scene.as_ref())?;
    if scene.lights.len() > MAX_LIGHT_COUNT {
        info!("Keeping the first {} of {} lights", MAX_LIGHT_COUNT, scene.lights.len());
        scene.lights.truncate(MAX_LIGHT_COUNT);
    }

    let mut config = scene.config;
    config.exhaustive_scan |= args.exhaustive;
    let mut froxelizer = Froxelizer::new(config).context("invalid froxelizer config")?;

    let camera = &scene.camera;
    let aspect = scene.viewport.width.max(1) as f32 / scene.viewport.height.max(1) as f32;
    let projection = Mat4::perspective_rh(camera.fov_y_degrees.to_radians(), aspect, camera.near, camera.far);
    let view = Mat4::look_at_rh(camera.position, camera.target, Vec3::Y);

    froxelizer.set_viewport(scene.viewport);
    froxelizer.set_projection(projection, camera.near, camera.far);
    froxelizer.set_options(scene.options);
    let report = froxelizer.prepare();
    info!("Prepared: {}", report);

    let scheduler = match args.threads {
        Some(threads) => RayonScheduler::with_threads(threads).context("failed to build the shard thread pool")?,
        None => RayonScheduler::new(),
    };
    froxelizer.froxelize_lights(&view, &scene.lights, &scheduler);

    print_report(&froxelizer, scene.lights.len());
    if args.gpu {
        upload_to_gpu(&froxelizer)?;
    }
    Ok(())
}

/// Allocate the froxel buffers on the default adapter and upload one frame.
fn upload_to_gpu(froxelizer: &Froxelizer) -> Result<()> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .context("no GPU adapter available")?;
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("Froxel Inspect Device"),
        ..Default::default()
    }))
    .context("failed to create GPU device")?;

    let ceilings = FroxelizerConfig::from_limits(&device.limits()).context("device limits too small")?;
    let config = froxelizer.config();
    if config.froxel_buffer_entry_count > ceilings.froxel_buffer_entry_count
        || config.record_buffer_entry_count > ceilings.record_buffer_entry_count
    {
        bail!(
            "config needs {} froxels and {} record bytes, device allows {} and {}",
            config.froxel_buffer_entry_count,
            config.record_buffer_entry_count,
            ceilings.froxel_buffer_entry_count,
            ceilings.record_buffer_entry_count
        );
    }

    let mut service = WgpuBufferService::new(&device, &queue);
    let buffers = froxelizer.create_gpu_buffers(&mut service);
    froxelizer.commit(&mut service, &buffers);
    queue.submit(std::iter::empty());

    println!(
        "Uploaded to {}: froxel buffer {} bytes, record buffer {} bytes",
        adapter.get_info().name,
        buffers.froxel_buffer_size(),
        buffers.record_buffer_size()
    );
    Ok(())
}

fn print_report(froxelizer: &Froxelizer, light_count: usize) {
    let info = froxelizer.grid();
    let grid = info.grid;
    println!(
        "Viewport {}x{} -> {}x{}x{} froxels of {}px ({} of {} entries)",
        info.viewport.width,
        info.viewport.height,
        grid.count_x,
        grid.count_y,
        grid.count_z,
        grid.dimension,
        info.froxel_count,
        froxelizer.config().froxel_buffer_entry_count
    );
    println!(
        "Light range [{:.2}, {:.2}], linearizer {:.4}",
        info.light_near, info.light_far, info.linearizer
    );

    println!();
    println!("slice    depth range          occupied   max lights");
    let distances = froxelizer.distances_z();
    let entries = froxelizer.froxel_entries();
    for (slice, cells) in entries.chunks(grid.slice_stride()).enumerate() {
        let occupied = cells.iter().filter(|e| e.count > 0).count();
        let max = cells.iter().map(|e| e.count).max().unwrap_or(0);
        println!(
            "{:>5}    [{:>7.2}, {:>7.2}]   {:>5}/{:<5}  {:>5}",
            slice,
            distances[slice],
            distances[slice + 1],
            occupied,
            cells.len(),
            max
        );
    }

    let stats = froxelizer.stats();
    println!();
    println!(
        "{} lights in, {} assigned, {} records, {} reused from the previous row",
        light_count, stats.all_lights_count, stats.records_written, stats.reused_from_above
    );
    println!(
        "Record buffer: {} of {} bytes",
        stats.bytes_used,
        froxelizer.config().record_buffer_entry_count
    );
    match stats.exhausted_at {
        Some(froxel) => println!("Record buffer exhausted at froxel {}; later froxels use all lights", froxel),
        None => println!("Record buffer fits"),
    }
}

use std::{path::PathBuf, rc::Rc, time::Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, info, warn};
use nalgebra::Vector3;

use meteor::{Allocation, Grid, Mesh, Settings};

mod format;
mod script;

use format::FileFormat;
use script::{Builtin, Script};

/// Polygonizes implicit surfaces, then simplifies and edits the meshes
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,

    /// Recycle nothing: deleted points and triangles keep their slots
    #[clap(long, global = true)]
    collect: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Builds a mesh from a model script
    Build {
        #[clap(flatten)]
        model: ModelSettings,

        #[clap(flatten)]
        grid: GridSettings,

        #[clap(flatten)]
        edit: EditSettings,

        #[clap(flatten)]
        output: OutputSettings,
    },
    /// Loads a mesh file, then edits and saves it
    Convert {
        /// Mesh file to load
        input: PathBuf,

        /// Format of the input file (inferred from its extension by default)
        #[clap(long, value_enum)]
        input_format: Option<FileFormat>,

        #[clap(flatten)]
        edit: EditSettings,

        #[clap(flatten)]
        output: OutputSettings,
    },
}

#[derive(Parser)]
struct ModelSettings {
    /// Built-in model
    #[clap(short, long, value_enum, default_value_t = Builtin::Sphere)]
    model: Builtin,

    /// Model script defining `field(x, y, z)`, used instead of `--model`
    #[clap(long)]
    script: Option<PathBuf>,

    /// Don't store normals
    #[clap(long)]
    no_normals: bool,

    /// Move points toward the surface with this many iterations
    #[clap(short = 'r', long)]
    propagate: Option<usize>,

    /// Clip the mesh with the model's own `clip(x, y, z)` function
    #[clap(long)]
    clip_model: bool,
}

#[derive(Parser)]
struct GridSettings {
    /// Grid step
    #[clap(short, long, default_value_t = 0.05)]
    step: f64,

    /// Range along the x axis, as `min,max`
    #[clap(short, value_parser = parse_span, default_value = "-1,1",
           allow_hyphen_values = true)]
    x: Span,

    /// Range along the y axis, as `min,max`
    #[clap(short, value_parser = parse_span, default_value = "-1,1",
           allow_hyphen_values = true)]
    y: Span,

    /// Range along the z axis, as `min,max`
    #[clap(short, value_parser = parse_span, default_value = "-1,1",
           allow_hyphen_values = true)]
    z: Span,

    /// Maximum triangle count while building (merges run between steps)
    #[clap(long)]
    max_triangles: Option<usize>,
}

#[derive(Parser)]
struct EditSettings {
    /// Merge edges until this many triangles remain (`N` or `N%`)
    #[clap(short, long, value_parser = parse_target)]
    triangles: Option<Target>,

    /// Aggregate points until at most this many remain
    #[clap(short = 'j', long)]
    aggregate: Option<usize>,

    /// Cut away the part of the mesh where this expression in `x`, `y`, and
    /// `z` is negative
    #[clap(long, allow_hyphen_values = true)]
    clip: Option<String>,

    /// Split the mesh along texture-coordinate seams
    #[clap(long)]
    correct_texcoords: bool,

    /// Rotate by `angle,x,y,z` (degrees around the given axis)
    #[clap(long, value_parser = parse_rotation, allow_hyphen_values = true)]
    rotate: Option<Rotation>,

    /// Translate by `x,y,z`
    #[clap(long, value_parser = parse_vec3, allow_hyphen_values = true)]
    translate: Option<Vector3<f64>>,

    /// Scale about the origin by `x,y,z`
    #[clap(long, value_parser = parse_vec3, allow_hyphen_values = true)]
    scale: Option<Vector3<f64>>,
}

#[derive(Parser)]
struct OutputSettings {
    /// File to write
    #[clap(short, long)]
    out: Option<PathBuf>,

    /// Output format (inferred from the file extension, or text)
    #[clap(short, long, value_enum)]
    format: Option<FileFormat>,
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug)]
struct Span {
    min: f64,
    max: f64,
}

#[derive(Copy, Clone, Debug)]
enum Target {
    Count(usize),
    Percent(f64),
}

#[derive(Copy, Clone, Debug)]
struct Rotation {
    angle: f64,
    axis: Vector3<f64>,
}

fn parse_list<const N: usize>(s: &str) -> Result<[f64; N], String> {
    let v = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("{e}"))?;
    v.try_into()
        .map_err(|v: Vec<f64>| format!("expected {N} values, got {}", v.len()))
}

fn parse_span(s: &str) -> Result<Span, String> {
    let [min, max] = parse_list(s)?;
    Ok(Span { min, max })
}

fn parse_vec3(s: &str) -> Result<Vector3<f64>, String> {
    parse_list::<3>(s).map(Vector3::from)
}

fn parse_rotation(s: &str) -> Result<Rotation, String> {
    let [angle, x, y, z] = parse_list(s)?;
    Ok(Rotation {
        angle,
        axis: Vector3::new(x, y, z),
    })
}

fn parse_target(s: &str) -> Result<Target, String> {
    match s.strip_suffix('%') {
        Some(p) => p
            .parse()
            .map(Target::Percent)
            .map_err(|e| format!("{e}")),
        None => s.parse().map(Target::Count).map_err(|e| format!("{e}")),
    }
}

////////////////////////////////////////////////////////////////////////////////

fn load_model(settings: &ModelSettings) -> Result<Script> {
    match &settings.script {
        Some(path) => Script::load(path),
        None => Script::builtin(settings.model),
    }
}

fn build(
    model: &ModelSettings,
    grid: &GridSettings,
    mesh_settings: Settings,
) -> Result<(Mesh, Rc<Script>)> {
    let start = Instant::now();
    let script = Rc::new(load_model(model)?);
    let format = script::format(&script, !model.no_normals);
    let mut mesh = Mesh::with_settings(format, mesh_settings);
    script::install(&script, &mut mesh, grid.step * 1e-3)?;
    info!("Loaded model in {:?}", start.elapsed());

    let g = Grid::new(
        Vector3::new(grid.x.min, grid.y.min, grid.z.min),
        Vector3::new(grid.x.max, grid.y.max, grid.z.max),
        grid.step,
    )?;
    let [nx, ny, nz] = g.counts();
    mesh.set_grid(g);

    let start = Instant::now();
    let mut remaining = mesh.build()?;
    let total = remaining + 1;
    while remaining > 0 {
        if let Some(max) = grid.max_triangles {
            while mesh.mergeable_triangle_count() > max && mesh.merge() > 0 {}
        }
        debug!(
            "building: {:.1}% ({} triangles)",
            (total - remaining) as f64 / total as f64 * 100.0,
            mesh.triangle_count()
        );
        remaining = mesh.build()?;
    }
    if let Some(max) = grid.max_triangles {
        while mesh.triangle_count() > max && mesh.merge() > 0 {}
    }
    info!(
        "Built {nx}x{ny}x{nz} grid in {:?}: {} points, {} triangles",
        start.elapsed(),
        mesh.point_count(),
        mesh.triangle_count()
    );
    Ok((mesh, script))
}

fn propagate(mesh: &mut Mesh, iterations: usize) -> Result<()> {
    let start = Instant::now();
    let improvement = mesh.propagate(iterations)?;
    info!(
        "Propagated points ({iterations} iterations) in {:?}: {:.2}% closer",
        start.elapsed(),
        improvement * 100.0
    );
    Ok(())
}

fn clip(mesh: &mut Mesh, script: &Script, name: &str) -> Result<()> {
    if !script.defines(name) {
        bail!("clip script does not define {name}(x, y, z)");
    }
    let start = Instant::now();
    let before = mesh.triangle_count();
    mesh.clip(|p| script.scalar(name, p))?;
    info!(
        "Clipped in {:?}: {before} -> {} triangles",
        start.elapsed(),
        mesh.triangle_count()
    );
    Ok(())
}

/// Merges and aggregates down to the requested sizes
fn simplify(mesh: &mut Mesh, settings: &EditSettings) -> Result<()> {
    if let Some(target) = settings.triangles {
        let count = match target {
            Target::Count(n) => n,
            Target::Percent(p) => {
                (p / 100.0 * mesh.triangle_count() as f64) as usize
            }
        };
        let start = Instant::now();
        let before = mesh.triangle_count();
        while mesh.triangle_count() > count {
            if mesh.merge() == 0 {
                warn!("failed to merge additional points");
                break;
            }
        }
        info!(
            "Merged in {:?}: {before} -> {} triangles",
            start.elapsed(),
            mesh.triangle_count()
        );
    }

    if let Some(target) = settings.aggregate {
        let start = Instant::now();
        let before = mesh.point_count();
        while mesh.point_count() > target {
            if mesh.aggregate()? == 0 {
                warn!("failed to continue aggregation");
                break;
            }
        }
        info!(
            "Aggregated in {:?}: {before} -> {} points",
            start.elapsed(),
            mesh.point_count()
        );
    }
    Ok(())
}

/// Clips, fixes texture seams, and applies transforms
fn reshape(mesh: &mut Mesh, settings: &EditSettings) -> Result<()> {
    if let Some(expr) = &settings.clip {
        let script = Script::expression("clip", expr)?;
        clip(mesh, &script, "clip")?;
    }

    if settings.correct_texcoords {
        let start = Instant::now();
        let before = mesh.point_count();
        mesh.correct_tex_coords()?;
        info!(
            "Corrected texture coordinates in {:?}: {before} -> {} points",
            start.elapsed(),
            mesh.point_count()
        );
    }

    if let Some(r) = settings.rotate {
        mesh.rotate(r.angle, r.axis);
    }
    if let Some(t) = settings.translate {
        mesh.translate(t);
    }
    if let Some(s) = settings.scale {
        mesh.scale(s);
    }
    Ok(())
}

fn save(mesh: &mut Mesh, settings: &OutputSettings) -> Result<()> {
    let Some(out) = &settings.out else {
        info!(
            "No output file: {} points, {} triangles",
            mesh.point_count(),
            mesh.triangle_count()
        );
        return Ok(());
    };
    let format = settings
        .format
        .or_else(|| FileFormat::from_path(out))
        .unwrap_or(FileFormat::Text);
    let start = Instant::now();
    let file = std::fs::File::create(out)
        .with_context(|| format!("could not create {}", out.display()))?;
    format::save(mesh, format, file)?;
    info!(
        "Saved {} points, {} triangles as {format:?} in {:?}",
        mesh.point_count(),
        mesh.triangle_count(),
        start.elapsed()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    let args = Args::parse();

    let settings = Settings {
        allocation: if args.collect {
            Allocation::Collected
        } else {
            Allocation::FreeList
        },
        ..Settings::default()
    };

    match args.cmd {
        Command::Build {
            model,
            grid,
            edit: edits,
            output,
        } => {
            let (mut mesh, script) = build(&model, &grid, settings)?;
            simplify(&mut mesh, &edits)?;
            if let Some(iterations) = model.propagate {
                propagate(&mut mesh, iterations)?;
            }
            if model.clip_model {
                clip(&mut mesh, &script, "clip")?;
            }
            reshape(&mut mesh, &edits)?;
            save(&mut mesh, &output)?;
        }
        Command::Convert {
            input,
            input_format,
            edit: edits,
            output,
        } => {
            let Some(format) =
                input_format.or_else(|| FileFormat::from_path(&input))
            else {
                bail!(
                    "unknown format for {}; use --input-format",
                    input.display()
                );
            };
            let start = Instant::now();
            let file = std::fs::File::open(&input)
                .with_context(|| format!("could not open {}", input.display()))?;
            let mut mesh =
                format::load(format, std::io::BufReader::new(file), settings)
                    .with_context(|| format!("could not load {}", input.display()))?;
            info!(
                "Loaded {} points, {} triangles in {:?}",
                mesh.point_count(),
                mesh.triangle_count(),
                start.elapsed()
            );
            simplify(&mut mesh, &edits)?;
            reshape(&mut mesh, &edits)?;
            save(&mut mesh, &output)?;
        }
    }
    Ok(())
}

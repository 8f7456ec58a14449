use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use blockfit_core::{
    BlockGeometry, BlockSettings, Encoding, FitReport, IndexOrder, PointProjection,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Format {
    Ascii,
    Binary,
}

impl From<Format> for Encoding {
    fn from(format: Format) -> Self {
        match format {
            Format::Ascii => Encoding::Ascii,
            Format::Binary => Encoding::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Order {
    C,
    Fortran,
}

impl From<Order> for IndexOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::C => IndexOrder::C,
            Order::Fortran => IndexOrder::Fortran,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "blockfit",
    author,
    version,
    about = "Connect multi-block grids and fit them with shared B-spline volumes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON file with block settings; missing fields keep their defaults.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[arg(long = "node-tol", global = true)]
    node_tol: Option<f64>,

    #[arg(long = "edge-tol", global = true)]
    edge_tol: Option<f64>,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve (or load) the connectivity of a plot3d grid and print it.
    Connect(GridArgs),
    /// Connect, propagate, number and fit a plot3d grid; write the volumes.
    Fit(FitArgs),
    /// Project points onto the volumes of a bvol file.
    Project(ProjectArgs),
}

#[derive(Args, Debug)]
struct GridArgs {
    /// Plot3d grid file.
    grid: PathBuf,

    /// Connectivity file, loaded when present and written otherwise.
    #[arg(short, long)]
    connectivity: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "ascii")]
    format: Format,

    #[arg(long, value_enum, default_value = "fortran")]
    order: Order,
}

#[derive(Args, Debug)]
struct FitArgs {
    #[command(flatten)]
    grid: GridArgs,

    /// Fitted volumes; defaults to the grid path with a `.bvol` extension.
    #[arg(short, long, value_name = "BVOL")]
    output: Option<PathBuf>,

    /// Also write the fitted volumes evaluated at the sample parameters.
    #[arg(long, value_name = "XYZ")]
    plot3d: Option<PathBuf>,

    /// JSON summary of the run.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ProjectArgs {
    /// Spline volume file.
    bvol: PathBuf,

    #[arg(long, value_enum, default_value = "ascii")]
    format: Format,

    /// Point as `x,y,z`; repeat for more points.
    #[arg(short, long = "point", value_parser = parse_point, required = true)]
    points: Vec<[f64; 3]>,
}

#[derive(Debug, Serialize, PartialEq)]
struct RunReport {
    volumes: usize,
    nodes: usize,
    edges: usize,
    design_groups: usize,
    control_points: usize,
    fit: Option<FitReport>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    let settings = load_settings(&cli)?;
    match &cli.command {
        Command::Connect(args) => {
            let (geo, report) = connect(args, settings)?;
            if let Some(topology) = geo.topology() {
                print!("{topology}");
            }
            println!(
                "{} volumes, {} design groups, {} global control points",
                report.volumes, report.design_groups, report.control_points
            );
        }
        Command::Fit(args) => {
            let report = fit(args, settings)?;
            if let Some(fit) = &report.fit {
                println!(
                    "Fitted {} volumes with {} control points (rms {:.3e}, max {:.3e})",
                    report.volumes, fit.n_control, fit.rms_residual, fit.max_residual
                );
            }
        }
        Command::Project(args) => {
            for found in project(args, settings)? {
                println!("{}", serde_json::to_string(&found)?);
            }
        }
    }
    Ok(())
}

fn init_logging(quiet: bool) {
    let fallback = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(cli: &Cli) -> Result<BlockSettings> {
    let mut settings = match &cli.settings {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid settings in {}", path.display()))?
        }
        None => BlockSettings::default(),
    };
    if let Some(tol) = cli.node_tol {
        settings.connectivity.node_tol = tol;
    }
    if let Some(tol) = cli.edge_tol {
        settings.connectivity.edge_tol = tol;
    }
    let tols = [settings.connectivity.node_tol, settings.connectivity.edge_tol];
    if tols.iter().any(|t| !t.is_finite() || *t < 0.0) {
        bail!("tolerances must be finite and non-negative, got {tols:?}");
    }
    Ok(settings)
}

fn parse_point(text: &str) -> Result<[f64; 3], String> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("`{v}`: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        &[x, y, z] => Ok([x, y, z]),
        _ => Err(format!("expected x,y,z, got {} values", values.len())),
    }
}

fn load_grid(args: &GridArgs, settings: BlockSettings) -> Result<BlockGeometry> {
    BlockGeometry::from_plot3d(&args.grid, args.format.into(), args.order.into(), settings)
        .with_context(|| format!("failed to load grid {}", args.grid.display()))
}

fn connect(args: &GridArgs, settings: BlockSettings) -> Result<(BlockGeometry, RunReport)> {
    let mut geo = load_grid(args, settings)?;
    match &args.connectivity {
        Some(path) => {
            geo.do_connectivity(path)
                .with_context(|| format!("connectivity via {}", path.display()))?;
        }
        None => {
            geo.resolve_connectivity().context("failed to resolve connectivity")?;
            geo.propagate_knots().context("failed to propagate knots")?;
            geo.renumber().context("failed to number control points")?;
        }
    }
    let report = summarize(&geo)?;
    Ok((geo, report))
}

fn summarize(geo: &BlockGeometry) -> Result<RunReport> {
    let (Some(topology), Some(numbering)) = (geo.topology(), geo.numbering()) else {
        bail!("geometry has no connectivity yet");
    };
    Ok(RunReport {
        volumes: geo.n_vol(),
        nodes: topology.n_node(),
        edges: topology.n_edge(),
        design_groups: topology.n_design_groups(),
        control_points: numbering.n_global(),
        fit: geo.fit_report().cloned(),
    })
}

fn resolve_output_path(args: &FitArgs) -> PathBuf {
    args.output
        .clone()
        .unwrap_or_else(|| args.grid.grid.with_extension("bvol"))
}

fn fit(args: &FitArgs, settings: BlockSettings) -> Result<RunReport> {
    let (mut geo, _) = connect(&args.grid, settings)?;
    geo.fit_global().context("global fit failed")?;

    let encoding = args.grid.format.into();
    let output = resolve_output_path(args);
    geo.write_bvol(&output, encoding)
        .with_context(|| format!("failed to write {}", output.display()))?;
    if let Some(path) = &args.plot3d {
        geo.write_plot3d(path, encoding)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let report = summarize(&geo)?;
    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    info!(output = %output.display(), "fit written");
    Ok(report)
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("failed to write report {}", path.display()))
}

fn project(args: &ProjectArgs, settings: BlockSettings) -> Result<Vec<PointProjection>> {
    let geo = BlockGeometry::from_bvol(&args.bvol, args.format.into(), settings)
        .with_context(|| format!("failed to load {}", args.bvol.display()))?;
    args.points
        .iter()
        .map(|&x| {
            geo.project_point(x)
                .with_context(|| format!("failed to project {x:?}"))
        })
        .collect()
}

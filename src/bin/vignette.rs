use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "vignette", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate scene source and print the validation report as JSON.
    Check(CheckArgs),
    /// Compile and render a single frame as a JSON frame plan.
    Frame(FrameArgs),
    /// Compile and render every frame into a directory of JSON frame plans.
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Input scene source.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Write the repaired source back next to the report.
    #[arg(long)]
    write_fixed: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Input scene source.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Frame index (0-based).
    #[arg(long)]
    frame: u64,

    /// Output JSON path.
    #[arg(long)]
    out: PathBuf,

    /// Output width in pixels.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Output height in pixels.
    #[arg(long, default_value_t = 720)]
    height: u32,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input scene source.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output directory for frame plans.
    #[arg(long)]
    out: PathBuf,

    /// Output width in pixels.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Output height in pixels.
    #[arg(long, default_value_t = 720)]
    height: u32,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Check(args) => cmd_check(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Render(args) => cmd_render(args),
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("read scene source '{}'", path.display()))
}

fn validated_source(path: &Path) -> anyhow::Result<vignette::ValidationResult> {
    let source = read_source(path)?;
    let result = vignette::validate(&source, &vignette::RepairPolicy::default());
    if !result.valid {
        let issues = serde_json::to_string_pretty(&result.remaining_issues)?;
        anyhow::bail!("scene source is invalid:\n{issues}");
    }
    Ok(result)
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let source = read_source(&args.in_path)?;
    let result = vignette::validate(&source, &vignette::RepairPolicy::default());
    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(out) = args.write_fixed {
        fs::write(&out, &result.source)
            .with_context(|| format!("write repaired source '{}'", out.display()))?;
        eprintln!("wrote {}", out.display());
    }
    Ok(())
}

fn compile_for_cli(path: &Path) -> anyhow::Result<vignette::CompiledArtifact> {
    let validated = validated_source(path)?;
    let registry = vignette::DependencyRegistry::builtin();
    Ok(vignette::compile(Uuid::new_v4(), &validated.source, &registry)?)
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let artifact = compile_for_cli(&args.in_path)?;
    let canvas = vignette::Canvas::new(args.width, args.height)?;

    let host = vignette::SandboxHost::new();
    let factory = host.prepare(&artifact)?;
    if args.frame >= factory.duration_frames() {
        anyhow::bail!(
            "frame {} is out of bounds (duration is {} frames)",
            args.frame,
            factory.duration_frames()
        );
    }
    let plan = host.render(
        &factory,
        vignette::FrameIndex(args.frame),
        canvas,
        vignette::Fps::default(),
    );

    if let Some(parent) = args.out.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    fs::write(&args.out, serde_json::to_string_pretty(&plan)?)
        .with_context(|| format!("write frame plan '{}'", args.out.display()))?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let artifact = compile_for_cli(&args.in_path)?;
    let canvas = vignette::Canvas::new(args.width, args.height)?;

    let host = vignette::SandboxHost::new();
    let factory = host.prepare(&artifact)?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir '{}'", args.out.display()))?;

    for f in 0..factory.duration_frames() {
        let plan = host.render(
            &factory,
            vignette::FrameIndex(f),
            canvas,
            vignette::Fps::default(),
        );
        let path = args.out.join(format!("frame_{f:05}.json"));
        fs::write(&path, serde_json::to_string(&plan)?)
            .with_context(|| format!("write frame plan '{}'", path.display()))?;
    }

    let faults = host.fault_log().len();
    eprintln!(
        "wrote {} frame plans to {} ({} recovered faults)",
        factory.duration_frames(),
        args.out.display(),
        faults
    );
    Ok(())
}

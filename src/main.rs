//! machdeploy - A Mach-O executable deploy engine.
//!
//! Builds standalone applications from prebuilt engines, strips debug
//! symbols, and reads sections back out of built executables.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use machdeploy::macho::{slices, CommandKind};
use machdeploy::{
    deploy_to_ios, deploy_to_macos, diet, extract_section, Architecture, DeployParameters,
    DietArchitectures, DietParameters, ExtractParameters, MachImage, MinOsVersion,
};

/// A Mach-O executable deploy engine.
#[derive(Parser, Debug)]
#[command(name = "machdeploy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy into a desktop engine
    Deploy {
        #[command(flatten)]
        deploy: DeployArgs,

        /// Thin engine for one architecture (repeatable, instead of ENGINE)
        #[arg(long = "engine-arch", value_name = "PATH")]
        architecture_engines: Vec<PathBuf>,
    },

    /// Deploy into a mobile engine
    DeployIos {
        #[command(flatten)]
        deploy: DeployArgs,
    },

    /// Strip debug symbols, optionally dropping architectures
    Diet {
        /// Executable to strip
        input: PathBuf,

        /// Output path
        #[arg(short, long)]
        output: PathBuf,

        /// Architectures to keep (repeatable; default: all)
        #[arg(short, long, value_enum)]
        keep: Vec<DietArch>,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Extract the contents of a section
    Extract {
        /// Executable to read
        input: PathBuf,

        /// Segment name
        #[arg(long, default_value = "__PROJECT")]
        segment: String,

        /// Section name
        #[arg(long, default_value = "__project")]
        section: String,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Show slices, segments and sections of an executable
    Info {
        /// Executable to inspect
        input: PathBuf,
    },
}

/// Arguments shared by the deploy commands.
#[derive(Args, Debug)]
struct DeployArgs {
    /// Engine executable (thin or universal)
    engine: Option<PathBuf>,

    /// Output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File placed in __PROJECT
    #[arg(short, long)]
    project: Option<PathBuf>,

    /// File placed in __PAYLOAD
    #[arg(long)]
    payload: Option<PathBuf>,

    /// Architectures to keep (repeatable; default: all)
    #[arg(short, long)]
    arch: Vec<Architecture>,

    /// Minimum OS version as [ARCH=]X.Y.Z (repeatable)
    #[arg(long = "min-os-version", value_name = "[ARCH=]X.Y.Z")]
    min_os_versions: Vec<MinOsVersion>,

    /// Replacement UUID
    #[arg(long)]
    uuid: Option<String>,

    /// Segment size granularity (e.g. 0x4000)
    #[arg(long, value_parser = parse_number)]
    alignment: Option<u64>,

    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(short, long, default_value = "1")]
    verbosity: u8,
}

/// Architecture names accepted by `diet --keep`.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum DietArch {
    X86,
    #[value(name = "x86_64")]
    X86_64,
    Arm,
    Arm64,
    Ppc,
    Ppc64,
}

impl From<DietArch> for DietArchitectures {
    fn from(arch: DietArch) -> Self {
        match arch {
            DietArch::X86 => DietArchitectures::X86,
            DietArch::X86_64 => DietArchitectures::X86_64,
            DietArch::Arm => DietArchitectures::ARM,
            DietArch::Arm64 => DietArchitectures::ARM64,
            DietArch::Ppc => DietArchitectures::PPC,
            DietArch::Ppc64 => DietArchitectures::PPC64,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy {
            deploy,
            architecture_engines,
        } => {
            setup_logging(deploy.verbosity);
            cmd_deploy(deploy, architecture_engines, false)
        }
        Commands::DeployIos { deploy } => {
            setup_logging(deploy.verbosity);
            cmd_deploy(deploy, Vec::new(), true)
        }
        Commands::Diet {
            input,
            output,
            keep,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_diet(input, output, keep)
        }
        Commands::Extract {
            input,
            segment,
            section,
            output,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_extract(input, segment, section, output)
        }
        Commands::Info { input } => cmd_info(&input),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

/// Attaches the file name to an engine error, calling out malformed input.
fn engine_error(err: machdeploy::Error, path: &Path) -> anyhow::Error {
    let message = if err.is_structural() {
        format!("Malformed executable: {}", path.display())
    } else {
        format!("Failed to process: {}", path.display())
    };
    anyhow::Error::new(err).context(message)
}

fn read_optional(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read: {}", path.display()))
        }
        None => Ok(Vec::new()),
    }
}

fn cmd_deploy(args: DeployArgs, architecture_engines: Vec<PathBuf>, mobile: bool) -> Result<()> {
    let start = Instant::now();

    let params = DeployParameters {
        engine: args.engine,
        architecture_engines,
        payload: read_optional(args.payload.as_deref())?,
        project: read_optional(args.project.as_deref())?,
        architectures: args.arch,
        min_os_versions: args.min_os_versions,
        uuid: args.uuid,
        output: args.output,
        segment_alignment: args.alignment,
    };

    let label = params
        .engine
        .clone()
        .or_else(|| params.architecture_engines.first().cloned())
        .unwrap_or_default();
    let result = if mobile {
        deploy_to_ios(&params)
    } else {
        deploy_to_macos(&params)
    };
    result.map_err(|e| engine_error(e, &label))?;

    info!("Deployed in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn cmd_diet(input: PathBuf, output: PathBuf, keep: Vec<DietArch>) -> Result<()> {
    let keep = if keep.is_empty() {
        DietArchitectures::all()
    } else {
        keep.into_iter()
            .map(DietArchitectures::from)
            .fold(DietArchitectures::empty(), |acc, flag| acc | flag)
    };

    let params = DietParameters {
        input: input.clone(),
        output,
        keep,
    };
    diet(&params).map_err(|e| engine_error(e, &input))
}

fn cmd_extract(
    input: PathBuf,
    segment: String,
    section: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let params = ExtractParameters {
        input: input.clone(),
        segment,
        section,
    };
    let data = extract_section(&params).map_err(|e| engine_error(e, &input))?;

    match output {
        Some(path) => fs::write(&path, &data)
            .with_context(|| format!("Failed to write: {}", path.display()))?,
        None => std::io::stdout()
            .lock()
            .write_all(&data)
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

fn cmd_info(input: &Path) -> Result<()> {
    let data = fs::read(input).with_context(|| format!("Failed to read: {}", input.display()))?;
    let slices = slices(&data).map_err(|e| engine_error(e, input))?;

    println!("Mach-O Information");
    println!("==================");
    println!("Path:   {}", input.display());
    println!("Size:   {}", format_size(data.len() as u64));
    println!("Slices: {}", slices.len());

    for slice in &slices {
        let image = MachImage::parse(slice.data).map_err(|e| engine_error(e, input))?;
        println!(
            "\n[{}] offset {:#x}, {} ({:?}, {:?})",
            image.architecture(),
            slice.offset,
            format_size(slice.data.len() as u64),
            image.width,
            image.endian
        );
        if let Some(arch) = &slice.arch {
            println!("  Alignment: 2^{}", arch.align);
        }
        println!(
            "  Type: {:#x}, {} load commands ({} bytes)",
            image.header.filetype, image.header.ncmds, image.header.sizeofcmds
        );
        println!("  Flags: {:?}", image.header.flags());

        println!("  Segments:");
        for (_, segment) in image.segments() {
            println!(
                "    {:<16} file {:#010x}+{:<#10x} vm {:#018x}+{:#x}",
                segment.name(),
                segment.fileoff,
                segment.filesize,
                segment.vmaddr,
                segment.vmsize
            );
            for section in &segment.sections {
                println!(
                    "      {:<16} offset {:#010x} size {:#x}",
                    section.name(),
                    section.offset,
                    section.size
                );
            }
        }

        for command in &image.commands {
            match &command.kind {
                CommandKind::Uuid(c) => println!("  UUID: {}", uuid_string(&c.uuid)),
                CommandKind::VersionMin(c) => println!("  Minimum OS: {}", version_string(c.version)),
                CommandKind::BuildVersion(c) => println!("  Minimum OS: {}", version_string(c.minos)),
                CommandKind::Dylib { name, .. } => println!("  Links: {}", name),
                _ => {}
            }
        }
    }

    Ok(())
}

fn uuid_string(bytes: &[u8; 16]) -> String {
    uuid::Uuid::from_bytes(*bytes).hyphenated().to_string().to_uppercase()
}

fn version_string(version: u32) -> String {
    format!("{}.{}.{}", version >> 16, (version >> 8) & 0xFF, version & 0xFF)
}

fn format_size(size: u64) -> String {
    if size >= 1024 * 1024 * 1024 {
        format!("{:.1}G", size as f64 / 1024.0 / 1024.0 / 1024.0)
    } else if size >= 1024 * 1024 {
        format!("{:.1}M", size as f64 / 1024.0 / 1024.0)
    } else if size >= 1024 {
        format!("{:.1}K", size as f64 / 1024.0)
    } else {
        format!("{}B", size)
    }
}

mod script;

use clap::{Parser, Subcommand};
use gmt_clib::{Family, LibraryKind, Session, SessionConfig};
use gmt_figure::{Converter, Figure};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(target_env = "msvc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "gmtnb", about = "Drive GMT sessions and render figure scripts")]
struct Cli {
    /// Session configuration (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Library to bind, overriding the configuration (memory | gmt)
    #[arg(short, long, global = true)]
    library: Option<LibraryKind>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show library version and session parameters
    Info,
    /// Run one module with a plain argument string
    Call {
        module: String,
        /// Module arguments, passed through unchanged
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Summarize a grid resource
    Grdinfo {
        /// File path or registered resource name
        resource: String,
    },
    /// Render a figure script
    Render {
        /// Script with one `operation key=value ...` call per line
        script: PathBuf,
        /// Output file; the extension picks the format
        #[arg(short, long)]
        output: PathBuf,
        /// Raster resolution for converted formats
        #[arg(long, default_value_t = 300)]
        dpi: u32,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), cli.library) {
        Ok(config) => config,
        Err(e) => fail(e),
    };
    let result = match cli.command {
        Commands::Info => cmd_info(&config),
        Commands::Call { module, args } => cmd_call(&config, &module, &args),
        Commands::Grdinfo { resource } => cmd_grdinfo(&config, &resource),
        Commands::Render {
            script,
            output,
            dpi,
        } => cmd_render(&config, &script, &output, dpi),
    };
    if let Err(e) = result {
        fail(e);
    }
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("Error: {e}");
    std::process::exit(1);
}

fn load_config(
    path: Option<&Path>,
    library: Option<LibraryKind>,
) -> gmt_clib::Result<SessionConfig> {
    let mut config = match path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(library) = library {
        config.library = library;
    }
    Ok(config)
}

fn cmd_info(config: &SessionConfig) -> gmt_figure::Result<()> {
    let session = Session::create(config)?;
    println!("{}", session.info()?);
    session.close()?;
    Ok(())
}

fn cmd_call(config: &SessionConfig, module: &str, args: &[String]) -> gmt_figure::Result<()> {
    let session = Session::create(config)?;
    session.invoke(module, &args.join(" "))?;
    session.close()?;
    Ok(())
}

fn cmd_grdinfo(config: &SessionConfig, resource: &str) -> gmt_figure::Result<()> {
    let session = Session::create(config)?;
    {
        let grid = session.read_data(Family::Grid, resource)?;
        let (rows, columns) = grid.shape();
        let layout = grid.layout();
        println!("{resource}:");
        if let Some(region) = grid.region() {
            println!("  region:       {region}");
        }
        if let Some([dx, dy]) = layout.increment {
            println!("  increment:    {dx}/{dy}");
        }
        println!("  nodes:        {columns} x {rows}");
        println!("  registration: {:?}", layout.registration);
        println!("  element:      {}", layout.element);

        let values = grid.to_array::<f32>()?;
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let range = finite.fold(None, |range: Option<(f32, f32)>, v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        });
        match range {
            Some((lo, hi)) => println!("  z range:      {lo} .. {hi}"),
            None => println!("  z range:      (no finite values)"),
        }
        grid.close()?;
    }
    session.close()?;
    Ok(())
}

fn cmd_render(
    config: &SessionConfig,
    path: &Path,
    output: &Path,
    dpi: u32,
) -> gmt_figure::Result<()> {
    let text = fs::read_to_string(path).map_err(|e| gmt_figure::Error::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let steps =
        script::parse(&text).unwrap_or_else(|e| fail(format!("{}: {e}", path.display())));

    let figure = Figure::with_config(config)?;
    for step in &steps {
        info!("line {}: {}", step.line, step.operation);
        if let Err(e) = figure.call(&step.operation, &step.params) {
            eprintln!("{}:{}: `{}` failed", path.display(), step.line, step.operation);
            return Err(e);
        }
    }
    figure.savefig_with(output, &Converter::default().dpi(dpi))?;
    println!("wrote {} ({} calls)", output.display(), steps.len());
    Ok(())
}

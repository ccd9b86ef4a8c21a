//! Bramble command line driver.
//!
//! - `bramble run` installs a manifest's modules, launches the runtime, starts every
//!   module and reports final states and the lifecycle events it observed.
//! - `bramble check` installs and resolves only, reporting unsatisfied constraints.

mod manifest;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bramble_framework::{Delivery, ModuleEvent, ModuleRef, Runtime, RuntimeConfig, RuntimeEvent, StartOptions};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::manifest::ModuleManifest;

#[derive(Parser, Debug)]
#[command(name = "bramble")]
#[command(about = "Install, resolve and run modules from a manifest")]
struct Cli {
	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Install, launch and start every module, then shut down
	Run(RunArgs),
	/// Install and resolve every module without starting anything
	Check(CommonArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
	/// Module manifest
	#[arg(short, long, value_name = "PATH")]
	manifest: PathBuf,

	/// Runtime configuration
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
	#[command(flatten)]
	common: CommonArgs,

	/// Start level reached at launch, overriding the config
	#[arg(long, value_name = "LEVEL")]
	start_level: Option<u32>,
}

fn main() -> Result<ExitCode> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	match cli.command {
		Command::Run(args) => run(args),
		Command::Check(args) => check(args),
	}
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
	match path {
		Some(path) => RuntimeConfig::load(path).with_context(|| format!("loading {}", path.display())),
		None => Ok(RuntimeConfig::default()),
	}
}

/// Installs every manifest entry, reporting and counting failures.
fn install_all(runtime: &Runtime, manifest: &ModuleManifest) -> Result<(Vec<ModuleRef>, usize)> {
	let mut installed = Vec::new();
	let mut failures = 0;
	for descriptor in manifest.descriptors()? {
		let name = descriptor.symbolic_name.clone();
		match runtime.install(descriptor) {
			Ok(module) => installed.push(module),
			Err(error) => {
				failures += 1;
				println!("install failed {name}: {error}");
			}
		}
	}
	Ok((installed, failures))
}

fn run(args: RunArgs) -> Result<ExitCode> {
	let mut config = load_config(args.common.config.as_deref())?;
	if let Some(level) = args.start_level {
		config.initial_start_level = level;
	}
	let manifest = ModuleManifest::load(&args.common.manifest)?;

	let runtime = Runtime::new(config)?;
	runtime.add_module_listener(
		Delivery::Asynchronous,
		Arc::new(|event: &ModuleEvent| -> Result<(), String> {
			println!("event {} {}", event.kind, event.module.symbolic_name());
			Ok(())
		}),
	);
	runtime.add_runtime_listener(Arc::new(|event: &RuntimeEvent| -> Result<(), String> {
		match event {
			RuntimeEvent::Error { error, .. } => println!("runtime error: {error}"),
			RuntimeEvent::Warning { error, .. } => println!("runtime warning: {error}"),
			_ => {}
		}
		Ok(())
	}));

	let (modules, mut failures) = install_all(&runtime, &manifest)?;
	runtime.launch()?;
	info!(modules = modules.len(), level = runtime.start_level(), "runtime launched");

	for module in &modules {
		if let Err(error) = module.start(StartOptions::USE_ACTIVATION_POLICY) {
			failures += 1;
			println!("start failed {}: {error}", module.symbolic_name());
		}
	}

	runtime.flush_events();
	for module in &modules {
		println!("{} {} {}", module.symbolic_name(), module.version(), module.state());
	}
	runtime.shutdown();

	Ok(if failures == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn check(args: CommonArgs) -> Result<ExitCode> {
	let config = load_config(args.config.as_deref())?;
	let manifest = ModuleManifest::load(&args.manifest)?;
	let runtime = Runtime::new(config)?;

	let (modules, mut failures) = install_all(&runtime, &manifest)?;
	let unresolved = runtime.resolve(&modules)?;
	for (module, error) in &unresolved {
		println!("unresolved {} {}: {error}", module.symbolic_name(), module.version());
	}
	failures += unresolved.len();
	for module in modules.iter().filter(|m| m.state().is_resolved()) {
		println!("ok {} {}", module.symbolic_name(), module.version());
	}
	runtime.shutdown();

	Ok(if failures == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let default_filter = if verbose { "bramble=trace,debug" } else { "bramble=info,warn" };

	// BRAMBLE_LOG_DIR sends logs to a per-process file instead of stderr.
	if let Some(log_dir) = std::env::var("BRAMBLE_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("bramble.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
			let file_layer = tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false).with_target(true);
			tracing_subscriber::registry().with(filter).with(file_layer).init();
			tracing::info!(path = ?log_path, "tracing initialized");
			return;
		}
	}

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

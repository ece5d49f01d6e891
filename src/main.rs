//! vstinfo - inspect VST 2.x plugins and render audio through them

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vstbridge::config::{default_config_path, load_config, HostConfig};
use vstbridge::plugin::{EffectChain, EffectInstance, FourCc, HostSettings, PluginRegistry};

#[derive(Parser)]
#[command(name = "vstinfo")]
#[command(about = "Inspect VST 2.x plugins and render audio through them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "VSTBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for plugins and list them
    List {
        /// Directories or files to scan (defaults to the configured search paths)
        paths: Vec<PathBuf>,

        /// Also print parameter names
        #[arg(long)]
        params: bool,

        /// Registry cache to read, or to write after scanning
        #[arg(long)]
        cache: Option<PathBuf>,
    },

    /// Describe one plugin module
    Info {
        /// Plugin module file or .vst bundle
        file: PathBuf,
    },

    /// Process a WAV file through a chain of plugins
    Render {
        /// Input WAV file
        #[arg(short, long)]
        input: PathBuf,

        /// Output WAV file (32-bit float)
        #[arg(short, long)]
        output: PathBuf,

        /// Plugin ID or module path; repeat to build a chain (defaults to the configured chain)
        #[arg(short, long = "plugin")]
        plugins: Vec<String>,
    },
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn read_config(path: Option<&Path>) -> Result<HostConfig> {
    if let Some(path) = path {
        return load_config(path).with_context(|| format!("Loading {}", path.display()));
    }
    match default_config_path() {
        Some(path) if path.exists() => {
            debug!("Using config {}", path.display());
            load_config(&path).with_context(|| format!("Loading {}", path.display()))
        }
        _ => Ok(HostConfig::default()),
    }
}

/// Registry from the cache if present, otherwise a fresh scan
fn open_registry(config: &HostConfig, cache: Option<&Path>, paths: &[PathBuf]) -> Result<PluginRegistry> {
    let cache = cache.or(config.registry_cache.as_deref());
    if paths.is_empty() {
        if let Some(cache) = cache.filter(|c| c.exists()) {
            info!("Reading registry cache {}", cache.display());
            return PluginRegistry::load(cache)
                .with_context(|| format!("Reading {}", cache.display()));
        }
    }

    let roots: &[PathBuf] = if paths.is_empty() {
        &config.search_paths
    } else {
        paths
    };
    let mut registry = PluginRegistry::new();
    let report = registry.scan_paths(roots, &config.host_settings());
    for (path, reason) in &report.skipped {
        debug!("skipped {}: {}", path.display(), reason);
    }

    if let Some(cache) = cache {
        registry
            .save(cache)
            .with_context(|| format!("Writing {}", cache.display()))?;
    }
    Ok(registry)
}

fn list(config: &HostConfig, paths: &[PathBuf], params: bool, cache: Option<&Path>) -> Result<()> {
    let registry = open_registry(config, cache, paths)?;
    if registry.is_empty() {
        println!("No plugins found.");
        return Ok(());
    }

    for entry in registry.entries() {
        println!(
            "{}  {} ({})  {}",
            entry.unique_id,
            entry.name,
            entry.vendor,
            entry.path.display()
        );
        if params {
            for (index, name) in entry.parameters.iter().enumerate() {
                println!("    {:3}  {}", index, name);
            }
        }
    }
    Ok(())
}

fn describe(config: &HostConfig, file: &Path) -> Result<()> {
    let instance = EffectInstance::load(file, &config.host_settings())
        .with_context(|| format!("Loading {}", file.display()))?;
    let info = instance.info().clone();

    println!("File:         {}", file.display());
    println!("Unique ID:    {}", info.unique_id);
    println!("Name:         {}", instance.effect_name()?);
    println!("Vendor:       {}", instance.vendor()?);
    println!("Product:      {}", instance.product()?);
    println!("Version:      {} (vendor {})", info.version, instance.vendor_version()?);
    println!("API version:  {}", instance.vst_version()?);
    println!("Category:     {}", instance.category()?);
    println!("Channels:     {} in / {} out", info.num_inputs, info.num_outputs);
    println!("Latency:      {} samples", info.initial_delay);
    println!("Flags:        {}", info.flags.names().join(", "));
    println!("Processing:   {}", if info.can_process { "yes" } else { "no" });

    println!("Programs:     {}", info.num_programs);
    for program in 0..info.num_programs {
        let name = instance
            .program_name_indexed(program as i32)?
            .unwrap_or_default();
        println!("    {:3}  {}", program, name);
    }

    instance.open()?;
    println!("Parameters:   {}", info.num_params);
    for param in instance.parameters()? {
        println!(
            "    {:3}  {:<24} {} {}  ({:.3})",
            param.index, param.name, param.display, param.label, param.value
        );
    }

    instance.unload();
    Ok(())
}

fn resolve_plugin(
    spec: &str,
    registry: &mut Option<PluginRegistry>,
    config: &HostConfig,
    settings: &HostSettings,
) -> Result<EffectInstance> {
    let path = Path::new(spec);
    if path.exists() {
        return Ok(EffectInstance::load(path, settings)?);
    }

    let Some(id) = FourCc::parse(spec) else {
        bail!("{} is neither a plugin file nor a four-character ID", spec);
    };
    if registry.is_none() {
        *registry = Some(open_registry(config, None, &[])?);
    }
    let registry = registry.as_ref().context("registry unavailable")?;
    Ok(registry.instantiate(id, settings)?)
}

fn render(config: &HostConfig, input: &Path, output: &Path, plugins: &[String]) -> Result<()> {
    let mut reader =
        hound::WavReader::open(input).with_context(|| format!("Opening {}", input.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let mut samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };
    info!(
        "Read {} frames, {} channels at {} Hz",
        samples.len() / channels.max(1),
        channels,
        spec.sample_rate
    );

    let settings = HostSettings {
        sample_rate: spec.sample_rate as f32,
        max_block_size: config.block_size,
    };
    let specs: Vec<String> = if plugins.is_empty() {
        config.chain.clone()
    } else {
        plugins.to_vec()
    };
    if specs.is_empty() {
        warn!("No plugins given; output will equal input");
    }

    let mut registry = None;
    let mut chain = EffectChain::new(channels, config.block_size);
    for spec in &specs {
        let instance = resolve_plugin(spec, &mut registry, config, &settings)?;
        instance.open()?;
        chain
            .push(Arc::new(instance))
            .with_context(|| format!("Adding {} to the chain", spec))?;
    }

    let result = chain.process_interleaved(&mut samples);
    chain.unload_all();
    result?;

    let out_spec = hound::WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, out_spec)
        .with_context(|| format!("Creating {}", output.display()))?;
    for sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    info!("Wrote {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose)?;
    let config = read_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List {
            paths,
            params,
            cache,
        } => list(&config, &paths, params, cache.as_deref()),
        Commands::Info { file } => describe(&config, &file),
        Commands::Render {
            input,
            output,
            plugins,
        } => render(&config, &input, &output, &plugins),
    }
}

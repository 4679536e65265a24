//! FitKit CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fk_inference::{FitResult, Minimizer, MinimizerConfig, profile_likelihood};
use fk_unbinned::spec::{CompiledModel, compile_model, read_model_file};
use fk_unbinned::{Dataset, UnbinnedNll};
use fk_viz::{OverlayOptions, ProfileCurveArtifact, plot_scaled_pdf};
use fk_viz_render::config::{VizConfig, resolve_config};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "fkfit")]
#[command(about = "FitKit - unbinned maximum-likelihood fits")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Threads for per-event evaluation (0 = auto).
    #[arg(long, global = true, default_value = "0")]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the model of a model file to its data
    Fit {
        /// Model file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Also compute asymmetric profile-likelihood errors.
        #[arg(long)]
        errors: bool,

        /// Width of the profile errors in standard deviations.
        #[arg(long, default_value = "1.0")]
        sigma: f64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Draw pseudo-data from the model at its initial parameter values
    Sample {
        /// Model file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Number of events. Extended models draw their yield when omitted.
        #[arg(short, long)]
        n: Option<usize>,

        /// RNG seed.
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Poisson-fluctuate the yield (extended models without `-n`).
        #[arg(long)]
        fluctuate: bool,

        /// Output dataset (JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Overlay the scaled density on a histogram of the data
    Plot {
        /// Model file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Histogram bins.
        #[arg(long, default_value = "50")]
        bins: usize,

        /// Extra scale of the density curves.
        #[arg(long, default_value = "1.0")]
        scale: f64,

        /// Fit before plotting.
        #[arg(long)]
        fit: bool,

        /// Plot style overrides (YAML).
        #[arg(long)]
        viz_config: Option<PathBuf>,

        /// Output path: `.svg` renders the plot, `.json` writes the artifact.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Profile likelihood scan of one parameter
    Scan {
        /// Model file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Scanned parameter.
        #[arg(long)]
        param: String,

        /// Scan start (default: best fit - 3 sigma).
        #[arg(long)]
        start: Option<f64>,

        /// Scan stop (default: best fit + 3 sigma).
        #[arg(long)]
        stop: Option<f64>,

        /// Number of scan points.
        #[arg(long, default_value = "21")]
        points: usize,

        /// Also render the curve to this SVG file.
        #[arg(long)]
        svg: Option<PathBuf>,

        /// Output artifact (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    if cli.threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global();
    }

    match cli.command {
        Commands::Fit { config, errors, sigma, output } => {
            cmd_fit(&config, errors, sigma, output.as_deref())
        }
        Commands::Sample { config, n, seed, fluctuate, output } => {
            cmd_sample(&config, n, seed, fluctuate, output.as_deref())
        }
        Commands::Plot { config, bins, scale, fit, viz_config, output } => {
            cmd_plot(&config, bins, scale, fit, viz_config.as_deref(), &output)
        }
        Commands::Scan { config, param, start, stop, points, svg, output } => {
            cmd_scan(&config, &param, start, stop, points, svg.as_deref(), output.as_deref())
        }
        Commands::Version => {
            println!("fkfit {}", fk_core::VERSION);
            Ok(())
        }
    }
}

fn load_model(path: &Path) -> Result<CompiledModel> {
    tracing::info!(path = %path.display(), "loading model file");
    let spec = read_model_file(path)?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    let model = compile_model(&spec, base_dir)?;
    tracing::info!(
        density = model.density.name(),
        parameters = model.registry.len(),
        events = model.dataset.as_ref().map(Dataset::n_events),
        "model compiled"
    );
    Ok(model)
}

/// Fit with Hessian errors; the registry ends at the best-fit values.
fn fit_model(model: &mut CompiledModel, nll: &UnbinnedNll) -> Result<FitResult> {
    let config = MinimizerConfig::from_spec(&model.minimizer);
    let mut result = Minimizer::new(config).minimize(nll, &mut model.registry)?;
    if !result.converged {
        tracing::warn!(message = %result.message, "fit did not converge");
    }
    result.hesse(nll, &model.registry)?;
    tracing::info!(nll = result.fval, edm = result.edm, valid = result.valid, "fit complete");
    Ok(result)
}

fn write_json(output: Option<&Path>, value: serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(&value)?;
    if let Some(path) = output {
        std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    } else {
        println!("{text}");
    }
    Ok(())
}

fn cmd_fit(config: &Path, errors: bool, sigma: f64, output: Option<&Path>) -> Result<()> {
    let mut model = load_model(config)?;
    let nll = model.nll()?;
    let mut result = fit_model(&mut model, &nll)?;
    if errors {
        result.errors(&nll, &model.registry, &[], sigma)?;
    }
    tracing::debug!("{result}");

    let output_json = serde_json::json!({
        "model": model.density.name(),
        "n_events": nll.datasets().map(Dataset::n_events).sum::<usize>(),
        "sum_weights": nll.sum_weights(),
        "correlation": result.correlation_matrix(),
        "result": result,
    });
    write_json(output, output_json)
}

fn cmd_sample(
    config: &Path,
    n: Option<usize>,
    seed: u64,
    fluctuate: bool,
    output: Option<&Path>,
) -> Result<()> {
    let model = load_model(config)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let data = match n {
        Some(n) => model.density.sample(n, &model.registry, &mut rng, None)?,
        None => model
            .density
            .sample_extended(&model.registry, &mut rng, fluctuate)
            .context("sampling without -n needs an extended model")?,
    };
    tracing::info!(events = data.n_events(), seed, "sampled");

    match output {
        Some(path) => {
            data.write_json(path).with_context(|| format!("failed to write {}", path.display()))
        }
        None => write_json(None, serde_json::to_value(&data)?),
    }
}

fn cmd_plot(
    config: &Path,
    bins: usize,
    scale: f64,
    fit: bool,
    viz_config: Option<&Path>,
    output: &Path,
) -> Result<()> {
    let mut model = load_model(config)?;
    let nll = model.nll()?;
    if fit {
        fit_model(&mut model, &nll)?;
    }
    let data = model.dataset.as_ref().context("model file has no `data` section")?;

    let opts = OverlayOptions { n_bins: bins, scale, ..Default::default() };
    let artifact = plot_scaled_pdf(&model.density, data, &model.registry, &opts)?;
    let json = serde_json::to_string_pretty(&artifact)?;

    match output.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            std::fs::write(output, json).with_context(|| format!("failed to write {}", output.display()))?
        }
        Some("svg") => {
            let cfg = load_viz_config(viz_config)?;
            fk_viz_render::render_to_file(&json, "overlay", output, &cfg)?;
        }
        _ => anyhow::bail!("unsupported plot output {} (use .svg or .json)", output.display()),
    }
    tracing::info!(path = %output.display(), "plot written");
    Ok(())
}

fn load_viz_config(path: Option<&Path>) -> Result<VizConfig> {
    let yaml = path
        .map(|p| std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display())))
        .transpose()?;
    Ok(resolve_config(yaml.as_deref())?)
}

#[allow(clippy::too_many_arguments)]
fn cmd_scan(
    config: &Path,
    param: &str,
    start: Option<f64>,
    stop: Option<f64>,
    points: usize,
    svg: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    if points < 2 {
        anyhow::bail!("points must be >= 2");
    }
    let mut model = load_model(config)?;
    let id = model.registry.require(param)?;
    let nll = model.nll()?;

    let (start, stop) = match (start, stop) {
        (Some(a), Some(b)) => (a, b),
        (a, b) => {
            let fit = fit_model(&mut model, &nll)?;
            let best = model.registry.value(id);
            let err = fit
                .error(param)
                .with_context(|| format!("'{param}' is not a free parameter"))?;
            let (lo, hi) = model.registry.get(id).bounds;
            (a.unwrap_or((best - 3.0 * err).max(lo)), b.unwrap_or((best + 3.0 * err).min(hi)))
        }
    };

    let minimizer = MinimizerConfig::from_spec(&model.minimizer);
    let values = profile_likelihood::linspace(start, stop, points);
    let scan = profile_likelihood::scan(&nll, &model.registry, &minimizer, id, &values)?;
    let artifact = ProfileCurveArtifact::from(scan);
    let (lower, upper) = artifact.crossings(1.0);
    tracing::info!(best = artifact.best_value, ?lower, ?upper, "scan complete");

    let value = serde_json::to_value(&artifact)?;
    if let Some(path) = svg {
        fk_viz_render::render_to_file(&value.to_string(), "profile", path, &VizConfig::default())?;
    }
    write_json(output, value)
}

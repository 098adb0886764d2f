use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use metric_score_core::{
    annotate_group, render, AnnotationSettings, LilyPondOptions, MetricGroup, ScoreConfig,
    TempoVoice,
};
use tracing_subscriber::EnvFilter;

fn main() -> metric_score_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bars { config } => run_bars(&config),
        Commands::Annotate { config, settings } => run_annotate(&config, &settings),
        Commands::Lilypond {
            config,
            settings,
            output,
        } => run_lilypond(&config, &settings, output.as_deref()),
    }
}

fn load(path: &Path, overrides: &SettingsArgs) -> metric_score_core::Result<(MetricGroup, AnnotationSettings)> {
    tracing::info!(?path, "loading metric structure");
    let config = ScoreConfig::load_from_json(path)?;
    let group = MetricGroup::from_config(&config.structure)?;
    let settings = overrides.apply(config.annotation);
    settings.validate()?;
    Ok((group, settings))
}

fn run_bars(path: &Path) -> metric_score_core::Result<()> {
    let (group, _) = load(path, &SettingsArgs::default())?;
    for (index, bar) in render::layout_bars(&group).iter().enumerate() {
        let (beats, unit) = bar.time_signature;
        println!(
            "{:>4}  {:>3}  {:>2}/{:<2}  {}  {:>8.3}s",
            index + 1,
            bar.duration,
            beats,
            unit,
            bar.timestamp(),
            bar.seconds
        );
    }
    Ok(())
}

fn run_annotate(path: &Path, overrides: &SettingsArgs) -> metric_score_core::Result<()> {
    let (group, settings) = load(path, overrides)?;
    let annotation = annotate_group(&group, &settings)?;
    println!("{}", serde_json::to_string_pretty(&annotation)?);
    Ok(())
}

fn run_lilypond(
    path: &Path,
    overrides: &SettingsArgs,
    output: Option<&Path>,
) -> metric_score_core::Result<()> {
    let (group, settings) = load(path, overrides)?;
    let annotation = annotate_group(&group, &settings)?;
    let mut voice = TempoVoice::new();
    annotation.attach_to(&mut voice)?;

    let options = LilyPondOptions {
        horizontal_scale: settings.horizontal_scale,
        ..Default::default()
    };
    let source = render::render_lilypond(
        &render::layout_bars(&group),
        &voice,
        &annotation.timeline,
        &options,
    )?;

    match output {
        Some(output) => {
            std::fs::write(output, source)?;
            tracing::info!(?output, "wrote LilyPond source");
        }
        None => print!("{source}"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Metric structures with synthesized tempo markings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every bar with its time signature and clock time.
    Bars {
        /// Metric structure JSON file.
        config: PathBuf,
    },
    /// Print the synthesized tempo annotations and placeholder timeline as JSON.
    Annotate {
        /// Metric structure JSON file.
        config: PathBuf,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Render blank bars and tempo markings as LilyPond source.
    Lilypond {
        /// Metric structure JSON file.
        config: PathBuf,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Where to write the `.ly` file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Command line overrides for the config file's `annotation` block.
#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// Factor applied to the beat axis before annotating.
    #[arg(long)]
    scale: Option<f64>,
    /// Placeholder unit length in beats.
    #[arg(long)]
    placeholder: Option<f64>,
    /// How far terminal spanners stop short of their boundary, in beats.
    #[arg(long)]
    offset: Option<f64>,
}

impl SettingsArgs {
    fn apply(&self, mut settings: AnnotationSettings) -> AnnotationSettings {
        if let Some(scale) = self.scale {
            settings.horizontal_scale = scale;
        }
        if let Some(placeholder) = self.placeholder {
            settings.placeholder_duration = placeholder;
        }
        if let Some(offset) = self.offset {
            settings.parenthesization_offset = offset;
        }
        settings
    }
}

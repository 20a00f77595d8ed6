//! BFIR - partitioned-block FIR convolution from the command line
//!
//! Filters sound files through long impulse responses, estimates safe
//! attenuation levels and renders equalizer impulses.

mod play;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bfir_engine::{next_multiple, FilterConfig, Precision, SampleFormat};
use bfir_io::{
    build_chain, calculate_attenuation, db_to_scale, djb_hash, load_sound_coeffs, resample, sound,
    Band, BlockStream, Equalizer, ImpulseInfo, Settings,
};

/// Frames handed to the filter per read, independent of the block length
const CHUNK_FRAMES: usize = 4096;

#[derive(Parser)]
#[command(name = "bfir", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Filter a sound file through a chain of impulse responses
    Filter {
        #[command(flatten)]
        chain: ChainArgs,

        /// Input sound file
        #[arg(short, long)]
        input: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Output sample format: 16, 24, 32 or 32f
        #[arg(short, long, default_value = "32f")]
        bits: String,

        /// Dither integer output
        #[arg(long)]
        dither: bool,
    },

    /// Play a sound file through the filter on the default output device
    Play {
        #[command(flatten)]
        chain: ChainArgs,

        /// Input sound file
        input: PathBuf,
    },

    /// Print the attenuation that keeps full-scale noise from clipping
    Attenuation {
        /// Impulse response file
        impulse: PathBuf,

        /// Partition length in samples
        #[arg(short, long)]
        length: Option<usize>,
    },

    /// Render an equalizer impulse response
    Eq {
        /// Sample rate in Hz
        #[arg(short, long, default_value = "44100")]
        rate: u32,

        /// Partition length in samples
        #[arg(short, long)]
        length: Option<usize>,

        /// Partition count
        #[arg(short = 'n', long)]
        blocks: Option<usize>,

        #[arg(short, long, default_value = "1")]
        channels: usize,

        /// Band as freq:dB or freq:dB:degrees, repeatable
        #[arg(long = "band", allow_hyphen_values = true)]
        bands: Vec<String>,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct ChainArgs {
    /// Impulse response as path or path:level_dB, repeatable
    #[arg(long = "coeff", required = true, allow_hyphen_values = true)]
    coeffs: Vec<String>,

    /// Equalizer band prepended to the chain as freq:dB[:degrees], repeatable
    #[arg(long = "eq", allow_hyphen_values = true)]
    bands: Vec<String>,

    /// Partition length in samples
    #[arg(short, long)]
    length: Option<usize>,

    /// Internal precision: 32 or 64
    #[arg(short, long)]
    precision: Option<u32>,

    /// Extra gain applied to the coefficients in dB
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    level: f64,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let settings = Settings::load();

    match cli.command {
        Command::Filter {
            chain,
            input,
            output,
            bits,
            dither,
        } => run_filter(&settings, &chain, &input, &output, &bits, dither),
        Command::Play { chain, input } => play::run(&settings, &chain, &input),
        Command::Attenuation { impulse, length } => {
            let length = length.unwrap_or(settings.filter_length);
            let result = calculate_attenuation(&impulse, length, settings.precision)?;
            println!(
                "{}: {} channels, {} frames at {} Hz",
                impulse.display(),
                result.info.channels,
                result.info.frames,
                result.info.sample_rate
            );
            println!("attenuation: {:.2} dB", result.db);
            Ok(())
        }
        Command::Eq {
            rate,
            length,
            blocks,
            channels,
            bands,
            output,
        } => {
            let bands = parse_bands(&bands)?;
            let eq = Equalizer::new(
                length.unwrap_or(settings.filter_length),
                blocks.unwrap_or(settings.eq_blocks),
                settings.precision,
                channels,
                rate,
            )?;
            let coeffs = eq.render(&bands)?;
            let copies: Vec<&[f64]> = (0..channels).map(|_| coeffs.as_slice()).collect();
            sound::save(&output, &sound::interleave(&copies), channels, rate)?;
            println!("{} taps written to {}", eq.length(), output.display());
            Ok(())
        }
    }
}

/// Filter parameters shared by `filter` and `play`
struct FilterPlan {
    filter_length: usize,
    n_blocks: usize,
    precision: Precision,
    coeffs: Vec<Vec<f64>>,
    scale: f64,
    /// Frames of filter tail after the last input frame
    tail_frames: usize,
}

impl FilterPlan {
    fn config(&self, channels: usize, output: SampleFormat, sample_rate: u32) -> FilterConfig {
        FilterConfig::new(
            self.filter_length,
            self.n_blocks,
            channels,
            SampleFormat::F32Le,
            output,
            sample_rate,
        )
        .with_precision(self.precision)
    }

    fn stream(&self, config: &FilterConfig) -> anyhow::Result<BlockStream> {
        let mut stream = BlockStream::new(config)?;
        stream
            .filter_mut()
            .set_coeff(&self.coeffs, self.n_blocks, self.scale)?;
        Ok(stream)
    }
}

fn parse_precision(bits: Option<u32>, default: Precision) -> anyhow::Result<Precision> {
    match bits {
        None => Ok(default),
        Some(bits) => Ok(Precision::from_realsize(bits as usize / 8)?),
    }
}

fn parse_bands(bands: &[String]) -> anyhow::Result<Vec<Band>> {
    let mut parsed = bands
        .iter()
        .map(|b| Band::parse(b).with_context(|| format!("invalid band '{}'", b)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    parsed.sort_by(|a, b| a.freq.total_cmp(&b.freq));
    Ok(parsed)
}

/// Split `path:dB`, keeping colons that belong to the path
fn parse_impulse(arg: &str) -> ImpulseInfo {
    if let Some((path, level)) = arg.rsplit_once(':') {
        if let Ok(db) = level.parse::<f64>() {
            return ImpulseInfo::with_level_db(path, db);
        }
    }
    ImpulseInfo::new(arg, 1.0)
}

/// Copy of `impulse` at `sample_rate`, written to `out_dir` when resampling is needed
fn at_rate(impulse: ImpulseInfo, sample_rate: u32, out_dir: &Path) -> anyhow::Result<ImpulseInfo> {
    let info = sound::probe(&impulse.path)
        .with_context(|| format!("failed to open {}", impulse.path.display()))?;
    if info.sample_rate == sample_rate {
        return Ok(impulse);
    }

    let name = impulse.path.to_string_lossy();
    let path = out_dir.join(format!(
        "resampled-{:x}-{}.wav",
        djb_hash(name.as_bytes()),
        sample_rate
    ));
    if !path.exists() {
        let buffer = sound::load(&impulse.path)?;
        let samples = resample(&buffer.samples, buffer.channels, buffer.sample_rate, sample_rate)?;
        sound::save(&path, &samples, buffer.channels, sample_rate)?;
        tracing::info!(
            "Resampled {} from {} Hz to {} Hz",
            impulse.path.display(),
            info.sample_rate,
            sample_rate
        );
    }
    Ok(ImpulseInfo::new(path, impulse.scale))
}

/// Reduce the equalizer and impulse arguments to one coefficient set
fn plan_filter(
    settings: &Settings,
    args: &ChainArgs,
    channels: usize,
    sample_rate: u32,
) -> anyhow::Result<FilterPlan> {
    let filter_length = args.length.unwrap_or(settings.filter_length);
    let precision = parse_precision(args.precision, settings.precision)?;
    let out_dir = settings.output_dir();

    let mut impulses = args
        .coeffs
        .iter()
        .map(|arg| at_rate(parse_impulse(arg), sample_rate, &out_dir))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if !args.bands.is_empty() {
        let bands = parse_bands(&args.bands)?;
        // The equalizer takes the shape of the impulses it is chained with
        let eq_channels = match impulses.first() {
            Some(first) => sound::probe(&first.path)?.channels,
            None => channels,
        };
        let eq = Equalizer::new(
            filter_length,
            settings.eq_blocks,
            precision,
            eq_channels,
            sample_rate,
        )?;
        impulses.insert(0, ImpulseInfo::new(eq.generate(&bands, &out_dir)?, 1.0));
    }

    let (path, scale) = build_chain(&impulses, filter_length, precision, &out_dir)?;
    let data = load_sound_coeffs(&path, 0)?;
    let frames = data.channels.first().map_or(0, Vec::len);
    if frames == 0 {
        bail!("{} holds no samples", path.display());
    }

    let coeffs = match data.channels.len() {
        n if n == channels => data.channels,
        1 => vec![data.channels[0].clone(); channels],
        n => bail!(
            "{} has {} channels, input has {}",
            path.display(),
            n,
            channels
        ),
    };

    let n_blocks = next_multiple(frames, filter_length) / filter_length;
    tracing::info!(
        "Filtering with {} taps in {} blocks of {}",
        frames,
        n_blocks,
        filter_length
    );
    Ok(FilterPlan {
        filter_length,
        n_blocks,
        precision,
        coeffs,
        scale: scale * db_to_scale(args.level),
        tail_frames: frames - 1,
    })
}

fn output_format(bits: &str) -> anyhow::Result<SampleFormat> {
    Ok(match bits {
        "16" => SampleFormat::S16Le,
        "24" => SampleFormat::S24Le,
        "32" => SampleFormat::S32Le,
        "32f" => SampleFormat::F32Le,
        other => bail!("unsupported output format '{}'", other),
    })
}

fn run_filter(
    settings: &Settings,
    args: &ChainArgs,
    input: &Path,
    output: &Path,
    bits: &str,
    dither: bool,
) -> anyhow::Result<()> {
    let format = output_format(bits)?;
    let buffer = sound::load(input).with_context(|| format!("failed to load {}", input.display()))?;
    let plan = plan_filter(settings, args, buffer.channels, buffer.sample_rate)?;

    let mut config = plan
        .config(buffer.channels, format, buffer.sample_rate)
        .with_dither(dither || settings.dither)
        .with_max_dither_table_size(settings.max_dither_table_size);
    if let Some(ref dir) = settings.wisdom_dir {
        config = config.with_wisdom_dir(dir);
    }
    let mut stream = plan.stream(&config)?;

    let mut raw = Vec::with_capacity((buffer.frames() + plan.tail_frames) * stream.frame_bytes());
    for chunk in buffer.samples.chunks(CHUNK_FRAMES * buffer.channels) {
        raw.extend(stream.process(chunk)?);
    }
    raw.extend(stream.finish(plan.tail_frames)?);

    sound::save_encoded(output, &raw, format, buffer.channels, buffer.sample_rate)?;
    println!(
        "{} frames written to {}",
        stream.frames_out(),
        output.display()
    );
    println!("{}", stream.report());
    Ok(())
}

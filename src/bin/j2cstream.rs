//! j2cstream CLI - progressive JPEG 2000 codestream tool.
//!
//! Decodes budgeted prefixes of `.j2c` codestreams, encodes raw pixels, and
//! reports the byte budgets each discard level needs.

use clap::{Parser, Subcommand, ValueEnum};
use j2cstream::{
    BackendKind, CompressedImage, J2cConfig, RawImage, budget, jpeg2000::J2kParser,
    jpeg2000::image::ProgressionOrder, open_from_config, stream_reader::CodestreamReader,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

// Upper bound on resumed decode calls before giving up on a prefix.
const MAX_DECODE_PASSES: u32 = 4096;

/// Progressive JPEG 2000 codestream container
#[derive(Parser)]
#[command(name = "j2cstream")]
#[command(version)]
#[command(about = "Decode budgeted prefixes of JPEG 2000 codestreams and encode raw pixels", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2cstream encode -i pixels.raw -o image.j2c -w 256 -H 256 -n 3 --reversible
    j2cstream decode -i image.j2c -o preview.ppm -f ppm --max-bytes 4096
    j2cstream decode -i image.j2c -o alpha.raw --first-channel 3 --channels 1
    j2cstream budget -w 1024 -H 1024 -n 4 --bytes 20000
    j2cstream info -i image.j2c

ENVIRONMENT:
    J2C_BACKEND, J2C_RATE, J2C_REVERSIBLE, J2C_LOG override the config file.
    RUST_LOG takes precedence over J2C_LOG.")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Codec backend, overriding the configuration
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a codestream, or a byte-budgeted prefix of it
    ///
    /// With --max-bytes the decode uses only that many leading bytes and
    /// produces the finest discard level they support.
    #[command(visible_alias = "d")]
    Decode {
        #[arg(short, long, help = "Path to the .j2c codestream")]
        input: PathBuf,

        #[arg(short, long, help = "Path for the decoded pixels")]
        output: PathBuf,

        /// Output format: raw (interleaved bytes) or ppm (PGM/PPM)
        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,

        /// Number of leading bytes the decode may use
        #[arg(long)]
        max_bytes: Option<usize>,

        /// Minimum discard level (0 = full resolution)
        #[arg(long, default_value = "0")]
        discard: u8,

        /// Wall-clock budget per decode call, 0 runs to completion
        #[arg(long, default_value = "0")]
        time_budget_ms: u64,

        /// First channel to decode
        #[arg(long, default_value = "0")]
        first_channel: u8,

        /// Maximum number of channels to decode
        #[arg(long, default_value = "4")]
        channels: u8,
    },

    /// Encode raw 8-bit interleaved pixels to a codestream
    #[command(visible_alias = "e")]
    Encode {
        #[arg(short, long, help = "Path to raw pixel data")]
        input: PathBuf,

        #[arg(short, long, help = "Path for the .j2c codestream")]
        output: PathBuf,

        /// Image width in pixels
        #[arg(short, long)]
        width: u32,

        /// Image height in pixels
        #[arg(short = 'H', long)]
        height: u32,

        /// Number of components (1 to 4)
        #[arg(short = 'n', long, default_value = "3")]
        components: u8,

        /// Compressed bytes per raw sample, overriding the configuration
        #[arg(short, long)]
        rate: Option<f32>,

        /// Lossless encode
        #[arg(long)]
        reversible: bool,

        /// Comment stored in the codestream behind the LL_ prefix
        #[arg(long)]
        comment: Option<String>,

        /// Wall-clock budget for rate control, 0 for none
        #[arg(long, default_value = "0")]
        time_budget_ms: u64,
    },

    /// Display header metadata
    #[command(visible_alias = "i")]
    Info {
        #[arg(short, long, help = "Path to the .j2c codestream")]
        input: PathBuf,
    },

    /// Check that a file is a well-formed codestream
    #[command(visible_alias = "v")]
    Validate {
        #[arg(short, long, help = "Path to the .j2c codestream")]
        input: PathBuf,
    },

    /// Print the byte budget of every discard level
    #[command(visible_alias = "b")]
    Budget {
        #[arg(short, long)]
        width: u32,

        #[arg(short = 'H', long)]
        height: u32,

        #[arg(short = 'n', long, default_value = "3")]
        components: u8,

        /// Compressed bytes per raw sample, 0 for the default
        #[arg(short, long, default_value = "0")]
        rate: f32,

        /// Also report the discard level this many bytes support
        #[arg(long)]
        bytes: Option<usize>,
    },

    /// List the available backends
    #[command(visible_alias = "l")]
    List,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Raw interleaved 8-bit samples
    Raw,
    /// Portable GrayMap / PixMap
    Ppm,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    /// Single-threaded, zero-run packet coding
    Reference,
    /// rayon worker pool, LZ4 packet coding
    Parallel,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Reference => BackendKind::Reference,
            BackendArg::Parallel => BackendKind::Parallel,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    init_tracing(&config);

    let result = run(cli.command, &config);
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<J2cConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => J2cConfig::from_file(path)?,
        None => J2cConfig::default(),
    };
    config.apply_env()?;
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    Ok(config)
}

fn init_tracing(config: &J2cConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands, config: &J2cConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Decode {
            input,
            output,
            format,
            max_bytes,
            discard,
            time_budget_ms,
            first_channel,
            channels,
        } => {
            open_from_config(config)?;
            let options = DecodeOptions {
                max_bytes,
                discard,
                time_budget: Duration::from_millis(time_budget_ms),
                first_channel,
                channels,
            };
            decode_image(&input, &output, &format, &options)
        }
        Commands::Encode {
            input,
            output,
            width,
            height,
            components,
            rate,
            reversible,
            comment,
            time_budget_ms,
        } => {
            open_from_config(config)?;
            let pixels = fs::read(&input)?;
            let raw = RawImage::from_data(width, height, components, pixels)?;
            let mut image = CompressedImage::new();
            image.apply_config(config);
            if let Some(rate) = rate {
                image.set_rate(rate);
            }
            if reversible {
                image.set_reversible(true);
            }
            encode_image(
                &mut image,
                &raw,
                &output,
                comment.as_deref().unwrap_or(""),
                Duration::from_millis(time_budget_ms),
            )
        }
        Commands::Info { input } => {
            open_from_config(config)?;
            show_info(&input)
        }
        Commands::Validate { input } => {
            open_from_config(config)?;
            let mut image = CompressedImage::new();
            image.load_and_validate(&input)?;
            let (width, height) = image.dimensions();
            println!(
                "✓ {:?} is a valid codestream ({}x{}, {} components)",
                input,
                width,
                height,
                image.components()
            );
            Ok(())
        }
        Commands::Budget {
            width,
            height,
            components,
            rate,
            bytes,
        } => show_budget(width, height, components, rate, bytes),
        Commands::List => list_backends(config),
    }
}

struct DecodeOptions {
    max_bytes: Option<usize>,
    discard: u8,
    time_budget: Duration,
    first_channel: u8,
    channels: u8,
}

fn decode_image(
    input: &Path,
    output: &Path,
    format: &OutputFormat,
    options: &DecodeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut image = CompressedImage::new();
    image.load_and_validate(input)?;
    image.set_discard_level(options.discard);
    if let Some(max_bytes) = options.max_bytes {
        image.set_max_bytes(max_bytes);
    }

    let started = Instant::now();
    let mut raw = RawImage::default();
    let mut passes = 0;
    loop {
        passes += 1;
        let done = image.decode_channels(
            &mut raw,
            options.time_budget,
            options.first_channel,
            options.channels,
        )?;
        if done {
            break;
        }
        if options.time_budget.is_zero() || passes >= MAX_DECODE_PASSES {
            return Err("not enough bytes to decode the coarsest resolution".into());
        }
    }
    debug!(passes, elapsed = ?started.elapsed(), "decode finished");

    match format {
        OutputFormat::Raw => fs::write(output, raw.data())?,
        OutputFormat::Ppm => write_ppm(output, &raw)?,
    }

    println!(
        "✓ Decoded {}x{} image ({} channels, discard level {}) to {:?} in {} pass(es)",
        raw.width(),
        raw.height(),
        raw.components(),
        image.raw_discard_level().unwrap_or_default(),
        output,
        passes
    );
    Ok(())
}

fn encode_image(
    image: &mut CompressedImage,
    raw: &RawImage,
    output: &Path,
    comment: &str,
    time_budget: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    image.encode_with_comment(raw, comment, time_budget)?;
    image.save(output)?;

    let raw_size = raw.data().len();
    let encoded = image.data().len();
    info!(raw_size, encoded, "encode written");
    println!(
        "✓ Encoded {}x{} image to {:?} ({} bytes, {:.2}:1, {})",
        raw.width(),
        raw.height(),
        output,
        encoded,
        raw_size as f64 / encoded.max(1) as f64,
        if image.reversible() { "lossless" } else { "lossy" }
    );
    Ok(())
}

fn show_info(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;

    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!();

    let reader = &mut CodestreamReader::new(&data);
    let (header, tile_part) = J2kParser::new(reader).parse_headers()?;
    println!("Format: JPEG 2000 Codestream");
    println!("  Dimensions: {}x{}", header.width(), header.height());
    println!("  Components: {}", header.component_count());
    println!("  Tile size:  {}x{}", header.tile_width, header.tile_height);
    if let Some(cod) = &header.cod {
        println!("  DWT levels: {}", cod.decomposition_levels);
        println!("  Layers:     {}", cod.number_of_layers);
        println!(
            "  Progression: {}",
            ProgressionOrder::from_byte(cod.progression_order)
                .map_or("Unknown", |order| order.name())
        );
        println!("  Colour transform: {}", if cod.mct != 0 { "Yes" } else { "No" });
    }
    println!("  Reversible: {}", if header.is_reversible() { "Yes" } else { "No" });
    let tile_end = tile_part.end().unwrap_or(data.len());
    println!(
        "  Tile data:  {} bytes",
        tile_end.saturating_sub(tile_part.data_offset)
    );
    for comment in &header.comments {
        match comment.text() {
            Some(text) if comment.is_viewer_authored() => {
                println!("  Comment:    {} (viewer)", text)
            }
            Some(text) => println!("  Comment:    {}", text),
            None => println!("  Comment:    <{} binary bytes>", comment.data.len()),
        }
    }

    let mut image = CompressedImage::new();
    image.set_data(data);
    if image.update_data().is_ok() {
        println!();
        println!("Discard levels (default rate):");
        for level in 0..=image.max_discard_level() {
            let (width, height) = image.dimensions();
            println!(
                "  {}: {}x{} needs {} bytes",
                level,
                budget::discarded_dimension(width, level),
                budget::discarded_dimension(height, level),
                budget::data_size(width, height, image.components(), level, 0.0)
            );
        }
    }
    Ok(())
}

fn show_budget(
    width: u32,
    height: u32,
    components: u8,
    rate: f32,
    bytes: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if width == 0 || height == 0 || components == 0 {
        return Err("width, height and components must be non-zero".into());
    }
    println!("Header: {} bytes", CompressedImage::calc_header_size_j2c());
    for level in 0..=budget::max_discard_level(width, height) {
        println!(
            "  level {}: {}x{} needs {} bytes",
            level,
            budget::discarded_dimension(width, level),
            budget::discarded_dimension(height, level),
            CompressedImage::calc_data_size_j2c(width, height, components, level, rate)
        );
    }
    if let Some(bytes) = bytes {
        match budget::discard_level_for_byte_count(width, height, components, bytes, rate) {
            Some(level) => println!("{} bytes decode to discard level {}", bytes, level),
            None => println!("{} bytes cannot hold the coarsest level", bytes),
        }
    }
    Ok(())
}

fn list_backends(config: &J2cConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Backends:");
    println!();
    for kind in BackendKind::ALL {
        let marker = if kind == config.backend { "*" } else { " " };
        println!("{} {}", marker, kind);
    }
    println!();
    println!("  reference: single thread, zero-run packet coding, one component per step");
    println!("  parallel:  rayon pool, LZ4 packet coding, one resolution per step");
    Ok(())
}

// Internal helpers

fn write_ppm(path: &Path, raw: &RawImage) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;

    let magic = match raw.components() {
        1 => "P5",
        3 => "P6",
        other => return Err(format!("PPM output needs 1 or 3 channels, got {}", other).into()),
    };
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", magic)?;
    writeln!(file, "{} {}", raw.width(), raw.height())?;
    writeln!(file, "255")?;
    file.write_all(raw.data())?;
    Ok(())
}

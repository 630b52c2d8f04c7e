/*!
 * This example inspects, repairs and cuts MP4/MOV files. The input must be a seekable file: the
 * parser reads it at arbitrary offsets. Rebuilt files are written with a fresh header followed by
 * the surviving media data.
 */

use anyhow::{anyhow, Context};
use clap::Parser as ClapParser;
use futures_util::io::BufWriter;
use indicatif::ProgressBar;
use tokio::{fs, io};
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing_subscriber::EnvFilter;

use mp4_repair::{
    write_rebuilt, Config, Mp4Writer, ParseObserver, ParsedMp4, Parser, Rebuilt, SeekableReader,
};

#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the input mp4
    input_mp4: String,

    /// Stop on the first operational fault instead of recording it
    #[arg(long)]
    strict: bool,

    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Print a summary of the recovered media parameters
    Info,
    /// Print the validated atom tree and any diagnostics
    Tree,
    /// Locate a video frame by index or by time
    Frame(FrameArgs),
    /// List every sample with a short preview of its data
    Samples(SamplesArgs),
    /// Rebuild the whole file with a regenerated header
    Repair(OutputArgs),
    /// Rebuild the file keeping only a range of frames
    Cut(CutArgs),
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct FrameArgs {
    /// 1-based video frame index
    #[arg(short, long)]
    index: Option<u32>,

    /// Presentation time in seconds
    #[arg(short, long)]
    time: Option<f64>,
}

#[derive(clap::Args, Debug)]
struct SamplesArgs {
    /// Only print the first N samples
    #[arg(short, long)]
    limit: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Path to the output mp4, use `-` for stdout
    output_mp4: String,
}

#[derive(clap::Args, Debug)]
struct CutArgs {
    /// Path to the output mp4, use `-` for stdout
    output_mp4: String,

    /// First frame to keep (1-based)
    #[arg(long, conflicts_with_all = ["from", "to"], requires = "end_frame")]
    start_frame: Option<u32>,

    /// Last frame to keep (1-based, inclusive)
    #[arg(long, requires = "start_frame")]
    end_frame: Option<u32>,

    /// Start of the clip in seconds
    #[arg(long, requires = "to")]
    from: Option<f64>,

    /// End of the clip in seconds
    #[arg(long, requires = "from")]
    to: Option<f64>,
}

struct ScanProgress(ProgressBar);

impl ParseObserver for ScanProgress {
    fn on_progress(&mut self, percent: u8) {
        self.0.set_position(percent as u64);
    }

    fn on_parse_end(&mut self, _parsed: &ParsedMp4) {
        self.0.finish_and_clear();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose {
            "mp4_repair=debug"
        } else {
            "mp4_repair=info"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::builder().ignore_errors(!args.strict).build();

    let file = fs::File::open(&args.input_mp4)
        .await
        .with_context(|| format!("failed to open {}", args.input_mp4))?;
    let reader = SeekableReader::new(file.compat())
        .await
        .context("failed to determine input size")?;
    let mut parser = Parser::new(reader, config);

    eprintln!("parsing {}", args.input_mp4);
    let mut progress = ScanProgress(ProgressBar::new(100));
    let parsed = parser
        .parse_with(&mut progress)
        .await
        .context("failed to parse input file")?;

    match args.command {
        SubCommand::Info => {
            print!("{}", parsed.info());
            print_diagnostics(&parsed);
        }
        SubCommand::Tree => {
            print!("{}", parsed.tree());
            print_diagnostics(&parsed);
        }
        SubCommand::Frame(frame_args) => {
            let index = match (frame_args.index, frame_args.time) {
                (Some(index), _) => index,
                (None, Some(time)) => parsed
                    .frame_at_time(time)
                    .with_context(|| format!("no frame at {time} s"))?,
                (None, None) => return Err(anyhow!("either --index or --time is required")),
            };
            let location = parsed
                .locate_frame(index)
                .with_context(|| format!("failed to locate frame {index}"))?;
            println!("frame:          {}", location.sample);
            println!("chunk offset:   {}", location.chunk_start());
            println!("chunk position: {}", location.chunk_position);
            println!("offset:         {}", location.offset);
            println!("length:         {}", location.length);
            if let Some(audio) = &location.audio {
                println!("audio chunk:    {} @{}", audio.index, audio.offset);
            }
        }
        SubCommand::Samples(samples_args) => {
            let samples = parser
                .samples(&parsed)
                .await
                .context("failed to read samples")?;
            let limit = samples_args.limit.unwrap_or(samples.len());
            for sample in samples.iter().take(limit) {
                println!("{sample}");
            }
            eprintln!("{} samples", samples.len());
        }
        SubCommand::Repair(output_args) => {
            eprintln!("rebuilding {} frames", parsed.frame_count());
            let rebuilt = parser
                .rebuild(&parsed, None, None)
                .await
                .context("failed to rebuild")?;
            write_output(&mut parser, &rebuilt, &output_args.output_mp4).await?;
        }
        SubCommand::Cut(cut_args) => {
            let rebuilt = match (cut_args.start_frame, cut_args.end_frame, cut_args.from, cut_args.to) {
                (Some(start), Some(end), _, _) => {
                    eprintln!("keeping frames {start} to {end}");
                    parser.cut_frames(&parsed, start, end).await
                }
                (_, _, Some(from), Some(to)) => {
                    eprintln!("keeping {from} s to {to} s");
                    parser.cut_time(&parsed, from, to).await
                }
                _ => return Err(anyhow!("a frame range or a time range is required")),
            }
            .context("failed to cut")?;
            write_output(&mut parser, &rebuilt, &cut_args.output_mp4).await?;
        }
    }

    Ok(())
}

fn print_diagnostics(parsed: &ParsedMp4) {
    if parsed.diagnostics.is_empty() {
        return;
    }
    eprintln!("{} diagnostics:", parsed.diagnostics.len());
    for diagnostic in parsed.diagnostics.iter() {
        eprintln!("  {diagnostic}");
    }
}

async fn write_output(
    parser: &mut Parser<SeekableReader<tokio_util::compat::Compat<fs::File>>>,
    rebuilt: &Rebuilt,
    output_name: &str,
) -> anyhow::Result<()> {
    for diagnostic in rebuilt.diagnostics.iter() {
        eprintln!("  {diagnostic}");
    }
    let config = parser.config().clone();
    let written = if output_name == "-" {
        eprintln!("writing to stdout");
        let output = BufWriter::new(io::stdout().compat_write());
        let mut writer = Mp4Writer::new(output);
        write_rebuilt(parser.reader_mut(), rebuilt, &mut writer, &config).await
    } else {
        eprintln!("writing to file {output_name:#?}");
        let output = fs::File::create(output_name)
            .await
            .context("failed to create output file")?
            .compat_write();
        let mut writer = Mp4Writer::new(BufWriter::new(output));
        write_rebuilt(parser.reader_mut(), rebuilt, &mut writer, &config).await
    }
    .context("failed to write output")?;

    if written != rebuilt.file_size() {
        return Err(anyhow!(
            "wrote {written} bytes, expected {}",
            rebuilt.file_size()
        ));
    }
    eprintln!("wrote {written} bytes");
    Ok(())
}

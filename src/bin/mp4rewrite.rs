use anyhow::Context as _;
use clap::Parser;
use isobmff_codec::{default_registry, rewrite};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{Layer, layer::SubscriberExt};

#[derive(Parser, Debug)]
#[command(version, about = "Re-encode an MP4/ISOBMFF file box by box")]
struct Args {
    /// Input file
    input: String,

    /// Output file
    output: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(args.log_level);
    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(fmt_layer))?;

    let input = File::open(&args.input).with_context(|| format!("opening {}", args.input))?;
    let output =
        File::create(&args.output).with_context(|| format!("creating {}", args.output))?;

    let (mut out, stats) = rewrite(
        &mut BufReader::new(input),
        BufWriter::new(output),
        default_registry(),
    )
    .with_context(|| format!("rewriting {}", args.input))?;
    out.flush()?;
    info!(encoded = stats.encoded, copied = stats.copied, "wrote {}", args.output);
    Ok(())
}

use anyhow::Context as _;
use clap::{ArgAction, Parser, ValueEnum};
use isobmff_codec::{
    BoxPath, BoxTree, FourCC,
    bufseek::BufferedSeekReader,
    default_registry,
    known_boxes::{describe, mdhd_language},
    parser::{Payload, read_box_tree},
    util::{format_value, hex_dump, read_slice},
    value::Record,
};
use serde::Serialize;
use std::fs::File;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, layer::SubscriberExt};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Parser, Debug)]
#[command(version, about = "MP4/ISOBMFF box explorer")]
struct Args {
    /// MP4/ISOBMFF file path
    path: String,

    /// Only print subtree(s) under a slash-separated path (e.g. moov/trak/*/mdhd)
    #[arg(long = "filter")]
    filter: Option<BoxPath>,

    /// Dump raw payload of every box of this 4CC (e.g. --raw stsd)
    #[arg(long = "raw")]
    raw: Option<FourCC>,

    /// Limit recursion depth (for text/tree output)
    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// Print decoded field values
    #[arg(long, action = ArgAction::SetTrue)]
    decode: bool,

    /// Bytes to show when dumping raw (0 means entire box payload)
    #[arg(long, default_value_t = 0)]
    bytes: usize,

    /// Emit JSON instead of human-readable tree
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    #[arg(short, long, default_value = "warn")]
    log_level: LogLevel,
}

fn init_logging(level: LogLevel) -> anyhow::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        });
    let subscriber = tracing_subscriber::registry().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level)?;

    let file = File::open(&args.path).with_context(|| format!("opening {}", args.path))?;
    let mut r = BufferedSeekReader::new(file);
    let trees = read_box_tree(&mut r, default_registry())
        .with_context(|| format!("reading box tree of {}", args.path))?;

    let mut targets = Vec::new();
    match &args.filter {
        Some(filter) => select(&trees, filter, &mut targets),
        None => targets.extend(trees.iter()),
    }

    // JSON mode: output JSON and exit (no tree or raw to keep output clean)
    if args.json {
        let json: Vec<JsonBox> = targets
            .iter()
            .map(|t| JsonBox::from_tree(t, args.decode))
            .collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    for t in &targets {
        print_box(t, 0, args.max_depth, args.decode);
    }

    if let Some(sel) = args.raw {
        let mut found = Vec::new();
        find_all(&trees, sel, &mut found);
        for (i, t) in found.into_iter().enumerate() {
            let hdr = &t.header;
            let len = match args.bytes {
                0 => hdr.payload_size(),
                n => hdr.payload_size().min(n as u64),
            };
            let data = read_slice(&mut r, hdr.payload_offset(), len).with_context(|| {
                format!("reading '{}' payload at {:#x}", hdr.box_type, hdr.offset)
            })?;
            println!(
                "\n== Dump {i} ({}) payload: offset={:#x}, len={len} ==",
                hdr.box_type,
                hdr.payload_offset()
            );
            print!("{}", hex_dump(&data, hdr.payload_offset()));
        }
    }

    Ok(())
}

// ---------- Selection ----------

fn select<'a>(trees: &'a [BoxTree], filter: &BoxPath, out: &mut Vec<&'a BoxTree>) {
    for t in trees {
        if t.path.matches(filter) {
            out.push(t);
        } else if t.path.is_prefix_of(filter) {
            select(&t.children, filter, out);
        }
    }
}

fn find_all<'a>(trees: &'a [BoxTree], box_type: FourCC, out: &mut Vec<&'a BoxTree>) {
    for t in trees {
        if t.header.box_type == box_type {
            out.push(t);
        }
        find_all(&t.children, box_type, out);
    }
}

// ---------- Human-readable tree ----------

fn print_box(t: &BoxTree, depth: usize, max_depth: usize, decode: bool) {
    let indent = "  ".repeat(depth);
    let hdr = &t.header;
    let mut line = format!(
        "{indent}{:>6} {:>10} {}",
        format!("{:#x}", hdr.offset),
        hdr.size,
        hdr.box_type
    );
    if let Some(name) = describe(hdr.box_type) {
        line.push_str(&format!(" ({name})"));
    }
    match &t.payload {
        Payload::Decoded { value } => {
            if let (Some(v), Some(f)) = (value.version(), value.flags()) {
                line.push_str(&format!(" ver={v} flags=0x{f:06x}"));
            }
        }
        Payload::UnsupportedVersion { version } => {
            line.push_str(&format!(" [unsupported version {version}]"));
        }
        Payload::Opaque => {}
    }
    println!("{line}");

    if let Some(value) = t.value().filter(|_| decode) {
        print_fields(&value.fields, &indent);
        if hdr.box_type == FourCC::new(b"mdhd") {
            if let Some(lang) = mdhd_language(&value.fields) {
                println!("{indent}        -> language: {lang}");
            }
        }
    }

    if depth < max_depth {
        for c in &t.children {
            print_box(c, depth + 1, max_depth, decode);
        }
    }
}

fn print_fields(rec: &Record, indent: &str) {
    for (name, v) in rec.iter() {
        if name == "version" || name == "flags" {
            continue;
        }
        println!("{indent}        -> {name}: {}", format_value(v, 16));
    }
}

// ---------- JSON ----------

#[derive(Serialize)]
struct JsonBox<'a> {
    offset: u64,
    size: u64,
    header_size: u64,
    #[serde(rename = "type")]
    box_type: FourCC,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unsupported_version: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<JsonBox<'a>>,
}

impl<'a> JsonBox<'a> {
    fn from_tree(t: &'a BoxTree, decode: bool) -> Self {
        let value = t.value();
        Self {
            offset: t.header.offset,
            size: t.header.size,
            header_size: t.header.header_size,
            box_type: t.header.box_type,
            path: t.path.to_string(),
            full_name: describe(t.header.box_type),
            version: value.and_then(|v| v.version()),
            flags: value.and_then(|v| v.flags()),
            fields: value.filter(|_| decode).map(|v| &v.fields),
            unsupported_version: match t.payload {
                Payload::UnsupportedVersion { version } => Some(version),
                _ => None,
            },
            children: t
                .children
                .iter()
                .map(|c| JsonBox::from_tree(c, decode))
                .collect(),
        }
    }
}

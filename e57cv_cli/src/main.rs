use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use e57cv_core::buffer::{new_region, StringBuffer};
use e57cv_core::inspect;
use e57cv_core::packet::{DATA_PACKET, IGNORED_PACKET, INDEX_PACKET};
use e57cv_core::{
    CompressedVectorNode, ImageFile, NodeKind, Prototype, SourceDestBuffer,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "e57cv",
    about = "Generate, read back, and inspect e57cv compressed-vector files",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a demo point-cloud section with deterministic values
    Gen {
        /// Destination file
        output: PathBuf,
        /// Number of records to write
        #[arg(short, long, default_value_t = 10_000)]
        records: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Stream records back out as CSV on stdout
    Read {
        /// Source file
        input: PathBuf,
        /// Logical offset of the section (printed by `gen`)
        #[arg(short, long)]
        section: u64,
        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<u64>,
    },
    /// Print the section header and packet layout
    Inspect {
        /// File to inspect
        file: PathBuf,
        /// Logical offset of the section (printed by `gen`)
        #[arg(short, long)]
        section: u64,
        /// Print the per-packet table
        #[arg(long)]
        packets: bool,
    },
}

// ── Demo prototype ─────────────────────────────────────────────────────────

/// The record type `gen` writes and `read` expects:
/// cartesian x/y/z as scaled integers, an 8-bit intensity, and a label.
fn demo_prototype() -> anyhow::Result<Prototype> {
    let mut proto = Prototype::new();
    let cartesian = proto.add(proto.root(), "cartesian", NodeKind::Structure)?;
    for axis in ["x", "y", "z"] {
        proto.add(
            cartesian,
            axis,
            NodeKind::ScaledInteger {
                min: -1_000_000,
                max: 1_000_000,
                scale: 0.0001,
                offset: 0.0,
            },
        )?;
    }
    proto.add(proto.root(), "intensity", NodeKind::Integer { min: 0, max: 255 })?;
    proto.add(proto.root(), "label", NodeKind::String)?;
    Ok(proto)
}

const BATCH: usize = 1024;

struct DemoBuffers {
    x: SourceDestBuffer,
    y: SourceDestBuffer,
    z: SourceDestBuffer,
    intensity: SourceDestBuffer,
    label: SourceDestBuffer,
}

impl DemoBuffers {
    fn bind(file: &ImageFile) -> anyhow::Result<Self> {
        let scaled = |path: &str| {
            SourceDestBuffer::new::<f64>(
                file,
                path,
                new_region::<f64>(BATCH),
                BATCH,
                true,
                true,
                0,
            )
        };
        let labels: StringBuffer = Rc::new(RefCell::new(vec![String::new(); BATCH]));
        Ok(Self {
            x: scaled("/cartesian/x")?,
            y: scaled("/cartesian/y")?,
            z: scaled("/cartesian/z")?,
            intensity: SourceDestBuffer::new::<i32>(
                file,
                "/intensity",
                new_region::<i32>(BATCH),
                BATCH,
                true,
                false,
                0,
            )?,
            label: SourceDestBuffer::ustring(file, "/label", labels)?,
        })
    }

    fn list(&self) -> Vec<SourceDestBuffer> {
        vec![
            self.x.clone(),
            self.y.clone(),
            self.z.clone(),
            self.intensity.clone(),
            self.label.clone(),
        ]
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn kind_name(kind: u8) -> &'static str {
    match kind {
        INDEX_PACKET => "index",
        DATA_PACKET => "data",
        IGNORED_PACKET => "ignored",
        _ => "?",
    }
}

/// Simple LCG, so `gen` output is reproducible for a given seed.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    /// Uniform float in [-100, 100], the demo's coordinate range.
    fn coord(&mut self) -> f64 {
        (self.next() % 2_000_001) as f64 * 0.0001 - 100.0
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_gen(output: PathBuf, records: u64, seed: u64) -> anyhow::Result<()> {
    let file = ImageFile::create(&output)
        .with_context(|| format!("creating output file {:?}", output))?;
    let node = CompressedVectorNode::new(&file, demo_prototype()?)?;
    let bufs = DemoBuffers::bind(&file)?;
    let mut writer = node.writer(&bufs.list())?;

    let mut rng = Lcg(seed);
    let t0 = Instant::now();
    let mut written = 0u64;
    while written < records {
        let n = ((records - written) as usize).min(BATCH);
        for i in 0..n {
            let record = written + i as u64;
            bufs.x.set::<f64>(i, rng.coord())?;
            bufs.y.set::<f64>(i, rng.coord())?;
            bufs.z.set::<f64>(i, rng.coord())?;
            bufs.intensity.set::<i32>(i, (rng.next() % 256) as i32)?;
            bufs.label.set_string(i, format!("p{}", record))?;
        }
        writer.write(n)?;
        written += n as u64;
    }
    writer.close()?;
    let elapsed = t0.elapsed();

    let section = node.binary_section_start();
    let header = inspect::section_header(&file, section)?;
    let packets = inspect::walk_packets(&file, section)?;
    file.close()?;

    eprintln!("  records     : {}", header.record_count);
    eprintln!("  section at  : {}  (pass to --section)", section);
    eprintln!("  section size: {}", human_bytes(header.section_logical_length));
    eprintln!("  packets     : {}", packets.len());
    eprintln!(
        "  throughput  : {:.0} records/s",
        records as f64 / elapsed.as_secs_f64()
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_read(input: PathBuf, section: u64, limit: Option<u64>) -> anyhow::Result<()> {
    let file =
        ImageFile::open(&input).with_context(|| format!("opening input file {:?}", input))?;
    let node = CompressedVectorNode::new(&file, demo_prototype()?)?;
    node.attach_section(section);

    let bufs = DemoBuffers::bind(&file)?;
    let mut reader = node.reader(&bufs.list())?;

    println!("x,y,z,intensity,label");
    let mut total = 0u64;
    let remaining = |total: u64| limit.map_or(u64::MAX, |l| l.saturating_sub(total));
    loop {
        let n = reader.read()?;
        if n == 0 || remaining(total) == 0 {
            break;
        }
        let show = n.min(remaining(total));
        for i in 0..show as usize {
            println!(
                "{:.4},{:.4},{:.4},{},{}",
                bufs.x.get::<f64>(i)?,
                bufs.y.get::<f64>(i)?,
                bufs.z.get::<f64>(i)?,
                bufs.intensity.get::<i32>(i)?,
                bufs.label.get_string(i)?,
            );
        }
        total += show;
    }
    reader.close()?;
    file.close()?;
    eprintln!("  records read: {}", total);
    Ok(())
}

fn run_inspect(path: PathBuf, section: u64, show_packets: bool) -> anyhow::Result<()> {
    let file = ImageFile::open(&path).with_context(|| format!("opening file {:?}", path))?;
    let header = inspect::section_header(&file, section)?;
    let packets = inspect::walk_packets(&file, section)?;

    println!("=== compressed-vector section @ {} in {:?} ===", section, path);
    println!();
    println!("  records        : {}", header.record_count);
    println!("  logical length : {}", human_bytes(header.section_logical_length));
    println!("  first data pkt : physical {}", header.data_physical_offset);
    println!("  index packets  : {}", if header.index_physical_offset == 0 { "none" } else { "present" });
    println!("  packet count   : {}", packets.len());

    if show_packets {
        println!();
        println!("  {:>14}  {:>8}  {:>10}  streams", "offset", "kind", "length");
        println!("  {}", "-".repeat(60));
        for p in &packets {
            let streams = p
                .stream_lengths
                .iter()
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
                .join("+");
            println!(
                "  {:>14}  {:>8}  {:>10}  [{}]",
                p.logical_offset,
                kind_name(p.kind),
                human_bytes(p.logical_length),
                streams
            );
        }
    }

    file.close()?;
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Gen { output, records, seed } => run_gen(output, records, seed),
        Commands::Read { input, section, limit } => run_read(input, section, limit),
        Commands::Inspect { file, section, packets } => run_inspect(file, section, packets),
    }
}

use std::{path::PathBuf, str::FromStr};

use anyhow::bail;
use bgzf2::CompressionLevel;
use clap::Parser;

/// A byte count with an optional K/M/G unit suffix.
#[derive(Debug, Clone)]
pub struct ByteValue(u64);

impl ByteValue {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl FromStr for ByteValue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit): (String, String) = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .partition(|c| c.is_ascii_digit());
        let value: u64 = value.parse()?;

        let value = match unit.as_str() {
            "B" | "" => value,
            "K" | "kib" => value * 1024,
            "M" | "mib" => value * 1024 * 1024,
            "G" | "gib" => value * 1024 * 1024 * 1024,
            _ => bail!("Unknown unit: {unit:?}"),
        };

        Ok(Self(value))
    }
}

/// An uncompressed offset, with the special values `start` and `end`.
#[derive(Debug, Clone)]
pub struct ByteOffset(u64);

impl ByteOffset {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<ByteValue> for ByteOffset {
    fn from(value: ByteValue) -> Self {
        Self(value.as_u64())
    }
}

impl FromStr for ByteOffset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let this = match s.to_lowercase().as_str() {
            "start" => Self(0),
            "end" => Self(u64::MAX),
            _ => Self::from(ByteValue::from_str(s)?),
        };

        Ok(this)
    }
}

#[derive(Debug, Parser, Clone)]
pub struct CliFlags {
    /// Suppress output.
    #[arg(short, long, action, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct SharedArgs {
    /// Disable output checks.
    #[arg(short, long, action, global = true)]
    pub force: bool,

    /// Write to STDOUT.
    #[arg(short = 'c', long, action, global = true)]
    pub stdout: bool,

    /// Do not show the progress counter.
    #[arg(long, action, global = true)]
    pub no_progress: bool,

    /// The number of worker threads, 0 keeps everything on one thread.
    #[arg(short = 'T', long, default_value_t = 0, global = true)]
    pub threads: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct CompressArgs {
    #[clap(flatten)]
    pub shared: SharedArgs,

    /// Desired compression level between 1 and 19. Lower numbers provide faster
    /// compression, higher numbers yield better compression ratios.
    #[arg(short = 'l', long, default_value_t = bgzf2::DEFAULT_COMPRESSION_LEVEL)]
    pub compression_level: CompressionLevel,

    /// The uncompressed block size. Accepts the suffixes K (kib), M (mib) and G (gib).
    #[arg(short = 'b', long, default_value = "250K")]
    pub block_size: ByteValue,

    /// Input file.
    #[arg(default_value = "-")]
    pub input_file: PathBuf,

    /// Write data to the specified file.
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct DecompressArgs {
    #[clap(flatten)]
    pub shared: SharedArgs,

    /// The offset (of the uncompressed data) where decompression starts. Accepts the
    /// special values 'start' and 'end'.
    #[arg(long, default_value = "start")]
    pub from: ByteOffset,

    /// The offset (of the uncompressed data) where decompression ends. Accepts the
    /// special values 'start' and 'end'.
    #[arg(long, default_value = "end")]
    pub to: ByteOffset,

    /// Input file.
    pub input_file: PathBuf,

    /// Write data to the specified file.
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Detailed listing of individual index entries.
    #[arg(short, long, action)]
    pub detail: bool,

    /// Input file.
    pub input_file: PathBuf,
}

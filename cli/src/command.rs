use std::{
    ffi::OsString,
    fs::File,
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use bgzf2::SeekTable;
use clap::Subcommand;
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::args::{CliFlags, CompressArgs, DecompressArgs, ListArgs};

// HumanBytes can mess up indentation if not formatted
#[inline]
pub fn format_bytes(n: u64) -> String {
    format!("{}", HumanBytes(n))
}

#[derive(Debug, Subcommand)]
#[command(arg_required_else_help(true))]
pub enum Command {
    /// Compress INPUT_FILE (default); reads from STDIN if INPUT_FILE is `-` or not provided
    #[clap(alias = "c")]
    Compress(CompressArgs),
    /// Decompress INPUT_FILE
    #[clap(alias = "d")]
    Decompress(DecompressArgs),
    /// Print information about BGZF2 files
    #[clap(alias = "l")]
    List(ListArgs),
}

impl Command {
    pub fn run(self, flags: &CliFlags) -> Result<()> {
        match self {
            Self::Compress(args) => crate::compress::run(&args, flags),
            Self::Decompress(args) => crate::decompress::run(&args, flags),
            Self::List(args) => list(&args),
        }
    }
}

/// The output path for `input_file`, `None` meaning STDOUT.
pub fn compress_out_path(args: &CompressArgs) -> Option<PathBuf> {
    if args.shared.stdout {
        return None;
    }
    if let Some(path) = &args.output_file {
        return Some(path.clone());
    }
    if args.input_file.as_os_str() == "-" {
        return None;
    }

    // TODO: Use `add_extension` when stable: https://github.com/rust-lang/rust/issues/127292
    let extension = args.input_file.extension().map_or_else(
        || OsString::from("bgz2"),
        |e| {
            let mut ext = OsString::from(e);
            ext.push(".bgz2");
            ext
        },
    );

    Some(args.input_file.with_extension(extension))
}

pub fn decompress_out_path(args: &DecompressArgs) -> Option<PathBuf> {
    if args.shared.stdout {
        return None;
    }

    args.output_file
        .clone()
        .or_else(|| Some(args.input_file.with_extension("")))
}

/// Opens the output, guarding against accidental overwrites and terminals.
pub fn open_output(
    path: Option<&Path>,
    force: bool,
    quiet: bool,
    input_is_stdin: bool,
) -> Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            if !force && path.exists() {
                if quiet || input_is_stdin {
                    bail!("{} already exists; not overwritten", path.display());
                }

                eprint!("{} already exists; overwrite (y/n) ? ", path.display());
                io::stderr().flush()?;
                let mut buf = String::new();
                io::stdin()
                    .read_line(&mut buf)
                    .context("Failed to read stdin")?;
                if buf.trim_end() != "y" {
                    bail!("{} already exists", path.display());
                }
            }
            let file = File::create(path).context("Failed to create output file")?;

            Ok(Box::new(file))
        }
        None => {
            let stdout = io::stdout();
            if !force && stdout.is_terminal() {
                bail!("stdout is a terminal, aborting");
            }

            Ok(Box::new(stdout))
        }
    }
}

pub fn progress_bar(len: Option<u64>, quiet: bool, no_progress: bool) -> Option<ProgressBar> {
    (!quiet && !no_progress).then(|| {
        ProgressBar::with_draw_target(len, ProgressDrawTarget::stderr_with_hz(5)).with_style(
            ProgressStyle::with_template("{binary_bytes} of {binary_total_bytes}")
                .expect("Static template always works"),
        )
    })
}

fn list(args: &ListArgs) -> Result<()> {
    let mut file = File::open(&args.input_file).context("Failed to open input file")?;
    let seek_table = SeekTable::from_seekable(&mut file).context("Failed to read seek table")?;

    if args.detail {
        println!(
            "{: <8} {: <12} {: <14} {: <18} {: <20}",
            "Entry", "Compressed", "Decompressed", "Compressed Offset", "Decompressed Offset"
        );
        for (n, entry) in seek_table.iter().enumerate() {
            println!(
                "{: <8} {: <12} {: <14} {: <18} {: <20}",
                n,
                format_bytes(entry.comp_size as u64),
                format_bytes(entry.uncomp_size as u64),
                entry.comp_offset,
                entry.uncomp_offset,
            );
        }
    } else {
        let data_frames = seek_table.iter().filter(|e| e.uncomp_size > 0).count();
        let compressed = seek_table.size_comp();
        let decompressed = seek_table.size_decomp();
        let ratio = if compressed == 0 {
            0.
        } else {
            decompressed as f64 / compressed as f64
        };

        println!(
            "{: <10} {: <12} {: <12} {: <14} {: <8} {: <15}",
            "Frames", "Blocks", "Compressed", "Decompressed", "Ratio", "Filename"
        );
        println!(
            "{: <10} {: <12} {: <12} {: <14} {: <8.3} {: <15}",
            seek_table.num_entries(),
            data_frames,
            format_bytes(compressed),
            format_bytes(decompressed),
            ratio,
            args.input_file.display()
        );
    }

    Ok(())
}

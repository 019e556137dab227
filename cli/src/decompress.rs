use std::{fs::File, io::Write};

use anyhow::{Context, Result};
use bgzf2::Reader;
use indicatif::HumanBytes;

use crate::{
    args::{CliFlags, DecompressArgs},
    command::{decompress_out_path, open_output, progress_bar},
};

pub fn run(args: &DecompressArgs, flags: &CliFlags) -> Result<()> {
    let file = File::open(&args.input_file).context("Failed to open input file")?;
    let mut reader = Reader::new(file).context("Failed to create reader")?;
    if args.shared.threads > 0 {
        reader = reader
            .attach_thread_pool(args.shared.threads, 0)
            .context("Failed to attach thread pool")?;
    }

    let size = reader
        .size_decomp()
        .context("Failed to read the seek table")?;
    let from = args.from.as_u64().min(size);
    let to = args.to.as_u64().min(size);

    if from > 0 {
        reader
            .set_offset(from)
            .context("Failed to seek to start offset")?;
    }

    let out_path = decompress_out_path(args);
    let mut output = open_output(out_path.as_deref(), args.shared.force, flags.quiet, false)?;
    let bar = progress_bar(
        Some(to.saturating_sub(from)),
        flags.quiet,
        args.shared.no_progress,
    );

    let mut remaining = to.saturating_sub(from);
    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    while remaining > 0 {
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(buf.len()));
        let n = reader
            .read(&mut buf[..want])
            .context("Failed to decompress data")?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buf[..n])
            .context("Failed to write decompressed data")?;
        remaining -= n as u64;
        written += n as u64;
        if let Some(bar) = &bar {
            bar.inc(n as u64);
        }
    }

    output.flush()?;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    if !flags.quiet && !args.shared.stdout {
        eprintln!("{} : {}", args.input_file.display(), HumanBytes(written));
    }

    Ok(())
}

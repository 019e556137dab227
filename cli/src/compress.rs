use std::{
    fs::{self, File},
    io::{self, Read, Write},
};

use anyhow::{Context, Result};
use bgzf2::{WriteOptions, Writer};
use indicatif::HumanBytes;

use crate::{
    args::{CliFlags, CompressArgs},
    command::{compress_out_path, open_output, progress_bar},
};

pub fn run(args: &CompressArgs, flags: &CliFlags) -> Result<()> {
    let input_is_stdin = args.input_file.as_os_str() == "-";
    let mut input: Box<dyn Read> = if input_is_stdin {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(&args.input_file).context("Failed to open input file")?)
    };

    let out_path = compress_out_path(args);
    let output = open_output(
        out_path.as_deref(),
        args.shared.force,
        flags.quiet,
        input_is_stdin,
    )?;

    let mut writer = WriteOptions::new()
        .compression_level(args.compression_level)
        .block_size(args.block_size.as_usize())
        .into_writer(output)
        .context("Failed to create writer")?;
    if args.shared.threads > 0 {
        writer = writer
            .attach_thread_pool(args.shared.threads, 0)
            .context("Failed to attach thread pool")?;
    }

    let input_len = (!input_is_stdin)
        .then(|| fs::metadata(&args.input_file).map(|m| m.len()).ok())
        .flatten();
    let bar = progress_bar(input_len, flags.quiet, args.shared.no_progress);

    let mut bytes_read = 0u64;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf).context("Failed to read input")?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .context("Failed to compress data")?;
        bytes_read += n as u64;
        if let Some(bar) = &bar {
            bar.inc(n as u64);
        }
    }

    writer.finish().context("Failed to finish output")?;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    if !flags.quiet {
        if let Some(out_path) = &out_path {
            let bytes_written = fs::metadata(out_path).map(|m| m.len()).unwrap_or(0);
            eprintln!(
                "{input} : {ratio:.2}% ( {read} => {written}, {output})",
                input = if input_is_stdin {
                    "STDIN".into()
                } else {
                    args.input_file.display().to_string()
                },
                ratio = if bytes_read == 0 {
                    0.
                } else {
                    100. / bytes_read as f64 * bytes_written as f64
                },
                read = HumanBytes(bytes_read),
                written = HumanBytes(bytes_written),
                output = out_path.display(),
            );
        }
    }

    Ok(())
}

#[cfg(test)]
pub fn compress_to_vec(data: &[u8], block_size: usize, level: i32) -> Result<Vec<u8>> {
    let mut writer: Writer<Vec<u8>> = WriteOptions::new()
        .compression_level(level)
        .block_size(block_size)
        .into_writer(Vec::new())?;
    writer.write_all(data)?;
    Ok(writer.finish()?)
}

use std::{path::PathBuf, str::FromStr};

use crate::args::{ByteOffset, ByteValue, CompressArgs, SharedArgs};
use crate::command::compress_out_path;
use crate::compress::compress_to_vec;

#[test]
fn byte_value_from_str_no_unit() {
    let parsed = ByteValue::from_str("10").unwrap();
    assert_eq!(parsed.as_u64(), 10);
}

#[test]
fn byte_value_from_str_valid_units() {
    for (input, expected) in [
        ("10B", 10),
        ("10 B", 10),
        ("10K", 10 * 1024),
        ("10 kib", 10 * 1024),
        ("10M", 10 * 1024 * 1024),
        ("2G", 2 * 1024 * 1024 * 1024),
    ] {
        let parsed = ByteValue::from_str(input).unwrap();
        assert_eq!(parsed.as_u64(), expected, "{input}");
    }
}

#[test]
fn byte_value_from_str_invalid() {
    assert!(ByteValue::from_str("10 X").is_err());
    assert!(ByteValue::from_str(" ").is_err());
    assert!(ByteValue::from_str("abc B").is_err());
}

#[test]
fn byte_offset_special_values() {
    for input in ["start", "Start", "START"] {
        assert_eq!(ByteOffset::from_str(input).unwrap().as_u64(), 0);
    }
    for input in ["end", "End", "END"] {
        assert_eq!(ByteOffset::from_str(input).unwrap().as_u64(), u64::MAX);
    }
    assert_eq!(ByteOffset::from_str("123").unwrap().as_u64(), 123);
}

fn compress_args(input: &str, stdout: bool) -> CompressArgs {
    CompressArgs {
        shared: SharedArgs {
            force: false,
            stdout,
            no_progress: true,
            threads: 0,
        },
        compression_level: 3,
        block_size: ByteValue::from_str("128").unwrap(),
        input_file: PathBuf::from(input),
        output_file: None,
    }
}

#[test]
fn out_path_derivation() {
    let args = compress_args("data.bin", false);
    assert_eq!(compress_out_path(&args), Some(PathBuf::from("data.bin.bgz2")));

    let args = compress_args("data", false);
    assert_eq!(compress_out_path(&args), Some(PathBuf::from("data.bgz2")));

    // STDIN and --stdout have no output path
    assert_eq!(compress_out_path(&compress_args("-", false)), None);
    assert_eq!(compress_out_path(&compress_args("data.bin", true)), None);
}

#[test]
fn cycle() {
    let input: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let compressed = compress_to_vec(&input, 128, 3).unwrap();

    let mut reader = bgzf2::Reader::new(std::io::Cursor::new(compressed)).unwrap();
    let mut restored = Vec::new();
    std::io::Read::read_to_end(&mut reader, &mut restored).unwrap();
    assert_eq!(restored, input);

    reader.set_offset(4321).unwrap();
    let mut buf = [0u8; 6];
    std::io::Read::read_exact(&mut reader, &mut buf).unwrap();
    assert_eq!(buf, input[4321..4327]);
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use assert_cmd::Command;
use tempfile::TempDir;

const BLOCK_SIZES: [&str; 4] = ["64", "123", "3K", "250K"];

fn bgzf2() -> Command {
    Command::cargo_bin("bgzf2").unwrap()
}

fn test_input(dir: &Path) -> PathBuf {
    let path = dir.join("input.bin");
    let data: Vec<u8> = (0..500_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&path, data).unwrap();
    path
}

fn compress_input(input: &Path, out_path: &Path, block_size: &str, threads: &str) {
    bgzf2()
        .arg("compress")
        .arg(input)
        .arg("--output-file")
        .arg(out_path)
        .arg("--block-size")
        .arg(block_size)
        .arg("--threads")
        .arg(threads)
        .arg("--force")
        .assert()
        .success();
}

fn verify_compressed_file(input: &Path, compressed: &Path, threads: &str) {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("restored");

    bgzf2()
        .arg("decompress")
        .arg(compressed)
        .arg("--output-file")
        .arg(&output)
        .arg("--threads")
        .arg(threads)
        .assert()
        .success();

    assert_eq!(fs::read(input).unwrap(), fs::read(&output).unwrap());
}

#[test]
fn cycle() {
    let dir = TempDir::new().unwrap();
    let input = test_input(dir.path());

    for block_size in BLOCK_SIZES {
        let compressed = dir.path().join("out.bgz2");
        compress_input(&input, &compressed, block_size, "0");
        verify_compressed_file(&input, &compressed, "0");
    }
}

#[test]
fn cycle_threaded() {
    let dir = TempDir::new().unwrap();
    let input = test_input(dir.path());
    let compressed = dir.path().join("out.bgz2");

    compress_input(&input, &compressed, "3K", "4");
    verify_compressed_file(&input, &compressed, "4");

    // Threaded and single-threaded output are interchangeable
    let sequential = dir.path().join("seq.bgz2");
    compress_input(&input, &sequential, "3K", "0");
    assert_eq!(
        fs::read(&compressed).unwrap(),
        fs::read(&sequential).unwrap()
    );
}

#[test]
fn cycle_stdin_to_stdout() {
    let dir = TempDir::new().unwrap();
    let input = test_input(dir.path());

    let out = bgzf2()
        .arg("compress")
        .arg("--stdout")
        .arg("--block-size")
        .arg("10K")
        .write_stdin(fs::read(&input).unwrap())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let compressed = dir.path().join("from_stdin.bgz2");
    fs::write(&compressed, out).unwrap();
    verify_compressed_file(&input, &compressed, "0");
}

#[test]
fn decompress_range() {
    let dir = TempDir::new().unwrap();
    let input = test_input(dir.path());
    let compressed = dir.path().join("out.bgz2");
    compress_input(&input, &compressed, "1K", "0");

    let out = bgzf2()
        .arg("decompress")
        .arg(&compressed)
        .arg("-c")
        .arg("--from")
        .arg("100000")
        .arg("--to")
        .arg("100020")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(out, fs::read(&input).unwrap()[100_000..100_020]);
}

#[test]
fn derive_out_name() {
    let dir = TempDir::new().unwrap();
    let input = test_input(dir.path());

    bgzf2().arg("compress").arg(&input).assert().success();
    assert!(dir.path().join("input.bin.bgz2").exists());
}

#[test]
fn do_not_overwrite_existing_output_file() {
    let dir = TempDir::new().unwrap();
    let input = test_input(dir.path());
    let existing = dir.path().join("existing.bgz2");
    fs::write(&existing, b"do not touch").unwrap();

    bgzf2()
        .arg("compress")
        .arg(&input)
        .arg("--output-file")
        .arg(&existing)
        .arg("--quiet")
        .assert()
        .failure();

    assert_eq!(fs::read(&existing).unwrap(), b"do not touch");
}

#[test]
fn force_overwrite_existing_file() {
    let dir = TempDir::new().unwrap();
    let input = test_input(dir.path());
    let existing = dir.path().join("existing.bgz2");
    fs::write(&existing, b"stale").unwrap();

    bgzf2()
        .arg("compress")
        .arg(&input)
        .arg("--output-file")
        .arg(&existing)
        .arg("--force")
        .assert()
        .success();

    verify_compressed_file(&input, &existing, "0");
}

#[test]
fn do_not_create_out_file_if_input_file_does_not_exist() {
    let dir = TempDir::new().unwrap();
    let out_path = dir.path().join("bar.bgz2");

    bgzf2()
        .arg("compress")
        .arg(dir.path().join("missing"))
        .arg("--output-file")
        .arg(&out_path)
        .assert()
        .failure();

    assert!(!out_path.exists());
}

#[test]
fn list_output() {
    let dir = TempDir::new().unwrap();
    let input = test_input(dir.path());
    let compressed = dir.path().join("out.bgz2");
    compress_input(&input, &compressed, "50K", "0");

    let out = bgzf2()
        .arg("list")
        .arg(&compressed)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    // Header plus one summary line
    assert_eq!(2, out.iter().filter(|&&b| b == b'\n').count());

    let out = bgzf2()
        .arg("list")
        .arg("--detail")
        .arg(&compressed)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    // Header, file header frame, then preface + data per block (10 blocks)
    assert_eq!(22, out.iter().filter(|&&b| b == b'\n').count());
}

#[test]
fn list_rejects_files_without_index() {
    let dir = TempDir::new().unwrap();
    let bogus = dir.path().join("bogus");
    fs::write(&bogus, vec![0u8; 256]).unwrap();

    bgzf2().arg("list").arg(&bogus).assert().failure();
}

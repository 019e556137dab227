#![no_main]

use std::io::Read;

use bgzf2::{BytesWrapper, Reader, WriteOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut writer = WriteOptions::new()
        .block_size(100)
        .into_writer(Vec::new())
        .unwrap();
    writer.write_block(data, true).unwrap();
    let compressed = writer.finish().unwrap();

    let mut reader = Reader::new(BytesWrapper::new(&compressed)).unwrap();
    let mut decompressed = Vec::new();
    reader.read_to_end(&mut decompressed).unwrap();

    assert_eq!(data, &decompressed);
});

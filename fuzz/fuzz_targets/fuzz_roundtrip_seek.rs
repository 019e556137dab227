#![no_main]

use std::io::Read;

use bgzf2::{BytesWrapper, Reader, WriteOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (Vec<u8>, u16, u8)| {
    let (data, offset, block_size) = input;
    let block_size = usize::from(block_size).max(1);

    let mut writer = WriteOptions::new()
        .block_size(block_size)
        .into_writer(Vec::new())
        .unwrap();
    writer.write_block(&data, true).unwrap();
    let compressed = writer.finish().unwrap();

    let mut reader = Reader::new(BytesWrapper::new(&compressed)).unwrap();
    let offset = usize::from(offset);

    if offset > data.len() {
        assert!(
            reader
                .set_offset(offset as u64)
                .unwrap_err()
                .is_offset_out_of_range()
        );
        return;
    }

    reader.set_offset(offset as u64).unwrap();
    let mut tail = Vec::new();
    reader.read_to_end(&mut tail).unwrap();
    assert_eq!(&data[offset..], &tail);
});

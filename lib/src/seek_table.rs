use std::io::Write;

use crate::{
    SEEK_TABLE_FOOTER_SIZE, SEEKABLE_MAGIC_NUMBER, SEEKABLE_MAX_ENTRIES, SKIPPABLE_HEADER_SIZE,
    error::{Error, Result},
    frame::SEEK_TABLE_MAGIC,
    seekable::{OffsetFrom, Seekable},
};

/// The size of each entry in the serialized seek table.
const SIZE_PER_ENTRY: usize = 8;
/// Entry size when the optional per-entry checksum field is present.
const SIZE_PER_ENTRY_CHECKSUM: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    comp_size: u32,
    uncomp_size: u32,
    comp_offset: u64,
    uncomp_offset: u64,
}

/// A single seek table entry together with its running offsets.
///
/// Data frames carry `uncomp_size > 0`; skippable frames are recorded with
/// `uncomp_size == 0` and their on-disk length in `comp_size`, so the prefix sums
/// yield the compressed start offset of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// On-disk size of the frame.
    pub comp_size: u32,
    /// Uncompressed payload size, zero for skippable frames.
    pub uncomp_size: u32,
    /// Compressed offset of the frame start.
    pub comp_offset: u64,
    /// Uncompressed offset of the frame start.
    pub uncomp_offset: u64,
}

/// The result of a seek table query.
///
/// `comp_offset` points at the preface frame of the chosen data frame and is the
/// correct file offset to seek to; `uncomp_offset` is the uncompressed start of that
/// data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoint {
    /// Compressed offset to resume reading from.
    pub comp_offset: u64,
    /// Uncompressed position of the data frame that gets decoded first.
    pub uncomp_offset: u64,
}

/// Maps uncompressed positions to compressed positions.
///
/// The seek table records every frame of a BGZF2 file in order, data frames and
/// skippable frames alike. It is placed in a skippable frame at the end of the file
/// and gets created and updated automatically during compression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeekTable {
    entries: Vec<Entry>,
    comp_total: u64,
    uncomp_total: u64,
}

impl SeekTable {
    /// Creates a new, empty seek table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the seek table from the end of a BGZF2 file.
    ///
    /// The read position is moved back to the start of the source afterwards.
    ///
    /// # Errors
    ///
    /// Fails with a no-index error if the trailing magic is absent, with a
    /// not-seekable error on sources that cannot seek, and with a format error on a
    /// corrupt table.
    pub fn from_seekable(src: &mut impl Seekable) -> Result<Self> {
        let (table, _) = Self::load(src)?;
        Ok(table)
    }

    /// Like [`Self::from_seekable`], additionally returning the compressed offset at
    /// which the seek table frame starts.
    pub(crate) fn load(src: &mut impl Seekable) -> Result<(Self, u64)> {
        let file_len = src.set_offset(OffsetFrom::End(0))?;
        if file_len < (SKIPPABLE_HEADER_SIZE + SEEK_TABLE_FOOTER_SIZE) as u64 {
            return Err(Error::no_index());
        }

        src.set_offset(OffsetFrom::End(-(SEEK_TABLE_FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; SEEK_TABLE_FOOTER_SIZE];
        src.read_exact(&mut footer)?;

        let magic = u32::from_le_bytes(footer[5..9].try_into().expect("slice has length 4"));
        if magic != SEEKABLE_MAGIC_NUMBER {
            return Err(Error::no_index());
        }

        let descriptor = footer[4];
        if (descriptor >> 2) & 0x1F != 0 {
            return Err(Error::format("reserved seek table descriptor bits set"));
        }
        let entry_size = if descriptor & (1 << 7) > 0 {
            SIZE_PER_ENTRY_CHECKSUM
        } else {
            SIZE_PER_ENTRY
        };

        let num_entries = u32::from_le_bytes(footer[..4].try_into().expect("slice has length 4"));
        if num_entries > SEEKABLE_MAX_ENTRIES {
            return Err(Error::format("seek table entry count out of bounds"));
        }

        let table_size = (SKIPPABLE_HEADER_SIZE
            + num_entries as usize * entry_size
            + SEEK_TABLE_FOOTER_SIZE) as u64;
        if table_size > file_len {
            return Err(Error::format("seek table larger than file"));
        }
        let table_start = file_len - table_size;

        src.set_offset(OffsetFrom::Start(table_start))?;
        let mut header = [0u8; SKIPPABLE_HEADER_SIZE];
        src.read_exact(&mut header)?;
        if u32::from_le_bytes(header[..4].try_into().expect("slice has length 4"))
            != SEEK_TABLE_MAGIC
        {
            return Err(Error::format("seek table frame magic mismatch"));
        }
        let declared = u32::from_le_bytes(header[4..8].try_into().expect("slice has length 4"));
        if declared as u64 != table_size - SKIPPABLE_HEADER_SIZE as u64 {
            return Err(Error::format("seek table frame length mismatch"));
        }

        let mut table = Self::new();
        // 8184 is a multiple of both entry sizes
        let mut buf = vec![0u8; 8184.min(num_entries as usize * entry_size).max(entry_size)];
        let per_chunk = buf.len() / entry_size;
        let mut remaining = num_entries as usize;

        while remaining > 0 {
            let count = remaining.min(per_chunk);
            src.read_exact(&mut buf[..count * entry_size])?;
            for entry in buf[..count * entry_size].chunks_exact(entry_size) {
                let comp_size =
                    u32::from_le_bytes(entry[..4].try_into().expect("slice has length 4"));
                let uncomp_size =
                    u32::from_le_bytes(entry[4..8].try_into().expect("slice has length 4"));
                table.log_frame(comp_size, uncomp_size)?;
            }
            remaining -= count;
        }

        src.set_offset(OffsetFrom::Start(0))?;
        Ok((table, table_start))
    }

    /// Appends a frame to this seek table.
    ///
    /// Skippable frames are logged with `uncomp_size == 0` and their on-disk length
    /// as `comp_size`.
    ///
    /// # Errors
    ///
    /// Fails if the number of entries reaches [`SEEKABLE_MAX_ENTRIES`].
    pub fn log_frame(&mut self, comp_size: u32, uncomp_size: u32) -> Result<()> {
        if self.num_entries() >= SEEKABLE_MAX_ENTRIES {
            return Err(Error::resource("seek table is full"));
        }

        self.entries.push(Entry {
            comp_size,
            uncomp_size,
            comp_offset: self.comp_total,
            uncomp_offset: self.uncomp_total,
        });
        self.comp_total += comp_size as u64;
        self.uncomp_total += uncomp_size as u64;

        Ok(())
    }

    /// The number of entries in the seek table, skippable frames included.
    pub fn num_entries(&self) -> u32 {
        self.entries.len() as u32
    }

    /// True if no frame has been logged yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The compressed size of all indexed frames, trailing index frames excluded.
    pub fn size_comp(&self) -> u64 {
        self.comp_total
    }

    /// The total uncompressed size of the file.
    pub fn size_decomp(&self) -> u64 {
        self.uncomp_total
    }

    /// The entry at `index`, in file order.
    pub fn entry(&self, index: u32) -> Option<IndexEntry> {
        self.entries.get(index as usize).map(|e| IndexEntry {
            comp_size: e.comp_size,
            uncomp_size: e.uncomp_size,
            comp_offset: e.comp_offset,
            uncomp_offset: e.uncomp_offset,
        })
    }

    /// Iterates over all entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        (0..self.num_entries()).filter_map(|i| self.entry(i))
    }

    /// Finds the frame containing the uncompressed position `offset`.
    ///
    /// Entries of skippable frames are transparent to the search. The returned
    /// [`SeekPoint`] sits on the preface frame preceding the chosen data frame, so a
    /// reader that seeks to `comp_offset` consumes the preface before the data frame.
    ///
    /// # Errors
    ///
    /// Fails with an out-of-range error if `offset` is at or past the end of the
    /// uncompressed data.
    pub fn query(&self, offset: u64) -> Result<SeekPoint> {
        if self.entries.is_empty() {
            return Err(Error::offset_out_of_range());
        }

        // Last entry whose uncompressed start is at or before the target. With
        // equal offsets the data frame sorts after its preface, but the search may
        // still land on a zero-size entry.
        let mut i = self
            .entries
            .partition_point(|e| e.uncomp_offset <= offset)
            .saturating_sub(1);

        while i < self.entries.len() && self.entries[i].uncomp_size == 0 {
            i += 1;
        }
        if i == self.entries.len() {
            return Err(Error::offset_out_of_range());
        }

        if self.entries[i].uncomp_offset + self.entries[i].uncomp_size as u64 <= offset {
            i += 1;
            while i < self.entries.len() && self.entries[i].uncomp_size == 0 {
                i += 1;
            }
            if i == self.entries.len() {
                return Err(Error::offset_out_of_range());
            }
        }

        // Walk back over the preceding skippable frames to land on the preface.
        let mut j = i;
        while j > 0 && self.entries[j - 1].uncomp_size == 0 {
            j -= 1;
        }

        Ok(SeekPoint {
            comp_offset: self.entries[j].comp_offset,
            uncomp_offset: self.entries[i].uncomp_offset,
        })
    }

    /// The on-disk size of the serialized seek table frame.
    pub fn encoded_len(&self) -> usize {
        SKIPPABLE_HEADER_SIZE + self.entries.len() * SIZE_PER_ENTRY + SEEK_TABLE_FOOTER_SIZE
    }

    /// Serializes the seek table as a skippable frame, returning the number of bytes
    /// written.
    pub fn write_to(&self, w: &mut impl Write) -> Result<u64> {
        let payload_len = (self.entries.len() * SIZE_PER_ENTRY + SEEK_TABLE_FOOTER_SIZE) as u32;
        w.write_all(&SEEK_TABLE_MAGIC.to_le_bytes())?;
        w.write_all(&payload_len.to_le_bytes())?;

        for entry in &self.entries {
            w.write_all(&entry.comp_size.to_le_bytes())?;
            w.write_all(&entry.uncomp_size.to_le_bytes())?;
        }

        w.write_all(&self.num_entries().to_le_bytes())?;
        // Seek table descriptor, no per-entry checksums
        w.write_all(&[0u8])?;
        w.write_all(&SEEKABLE_MAGIC_NUMBER.to_le_bytes())?;

        Ok(self.encoded_len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seekable::BytesWrapper;

    /// Header, then per block a preface and a data frame.
    fn layout(blocks: &[(u32, u32)]) -> SeekTable {
        let mut st = SeekTable::new();
        st.log_frame(28, 0).unwrap();
        for (comp, uncomp) in blocks {
            st.log_frame(12, 0).unwrap();
            st.log_frame(*comp, *uncomp).unwrap();
        }
        st
    }

    #[test]
    fn prefix_sums() {
        let st = layout(&[(40, 100), (50, 200), (30, 50)]);
        assert_eq!(st.num_entries(), 7);
        assert_eq!(st.size_comp(), 28 + 3 * 12 + 40 + 50 + 30);
        assert_eq!(st.size_decomp(), 350);

        let third = st.entry(6).unwrap();
        assert_eq!(third.comp_offset, 28 + 12 + 40 + 12 + 50 + 12);
        assert_eq!(third.uncomp_offset, 300);
    }

    #[test]
    fn query_lands_on_preface() {
        let st = layout(&[(40, 100), (50, 200), (30, 50)]);

        // Start of the file walks back over preface and header
        let pt = st.query(0).unwrap();
        assert_eq!(pt, SeekPoint { comp_offset: 0, uncomp_offset: 0 });

        let pt = st.query(99).unwrap();
        assert_eq!(pt.uncomp_offset, 0);

        // Second block starts at 100; its preface sits behind header + preface + data
        let pt = st.query(100).unwrap();
        assert_eq!(pt, SeekPoint { comp_offset: 80, uncomp_offset: 100 });

        let pt = st.query(299).unwrap();
        assert_eq!(pt.uncomp_offset, 100);

        let pt = st.query(349).unwrap();
        assert_eq!(pt.uncomp_offset, 300);
    }

    #[test]
    fn query_out_of_range() {
        let st = layout(&[(40, 100)]);
        assert!(st.query(100).unwrap_err().is_offset_out_of_range());
        assert!(st.query(u64::MAX).unwrap_err().is_offset_out_of_range());
        assert!(SeekTable::new().query(0).unwrap_err().is_offset_out_of_range());
    }

    #[test]
    fn serde_cycle() {
        let st = layout(&[(40, 100), (50, 200), (30, 50)]);
        let mut buf = Vec::new();
        let n = st.write_to(&mut buf).unwrap();
        assert_eq!(n as usize, st.encoded_len());
        assert_eq!(buf.len(), st.encoded_len());

        let mut src = BytesWrapper::new(&buf);
        let (parsed, start) = SeekTable::load(&mut src).unwrap();
        assert_eq!(start, 0);
        assert_eq!(parsed, st);
        // Load rewinds the source
        assert_eq!(src.offset().unwrap(), 0);
    }

    #[test]
    fn load_with_checksummed_entries() {
        // Hand-built table with the per-entry checksum flag set
        let entries: [(u32, u32); 2] = [(12, 0), (77, 321)];
        let mut buf = Vec::new();
        buf.extend_from_slice(&SEEK_TABLE_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(2u32 * 12 + 9).to_le_bytes());
        for (comp, uncomp) in entries {
            buf.extend_from_slice(&comp.to_le_bytes());
            buf.extend_from_slice(&uncomp.to_le_bytes());
            buf.extend_from_slice(&0xDDCC_BBAAu32.to_le_bytes());
        }
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.push(1 << 7);
        buf.extend_from_slice(&SEEKABLE_MAGIC_NUMBER.to_le_bytes());

        let st = SeekTable::from_seekable(&mut BytesWrapper::new(&buf)).unwrap();
        assert_eq!(st.num_entries(), 2);
        assert_eq!(st.size_comp(), 89);
        assert_eq!(st.size_decomp(), 321);
    }

    #[test]
    fn load_rejects_corruption() {
        let st = layout(&[(40, 100)]);
        let mut good = Vec::new();
        st.write_to(&mut good).unwrap();

        // Flipped trailing magic byte means no index
        let mut bad = good.clone();
        *bad.last_mut().unwrap() ^= 0xFF;
        assert!(
            SeekTable::from_seekable(&mut BytesWrapper::new(&bad))
                .unwrap_err()
                .is_no_index()
        );

        // Reserved descriptor bits
        let mut bad = good.clone();
        let flags_at = bad.len() - 5;
        bad[flags_at] = 0x04;
        assert!(
            SeekTable::from_seekable(&mut BytesWrapper::new(&bad))
                .unwrap_err()
                .is_format()
        );

        // Entry count pointing beyond the file
        let mut bad = good.clone();
        let count_at = bad.len() - 9;
        bad[count_at..count_at + 4].copy_from_slice(&1000u32.to_le_bytes());
        assert!(
            SeekTable::from_seekable(&mut BytesWrapper::new(&bad))
                .unwrap_err()
                .is_format()
        );

        // Too short for any table
        assert!(
            SeekTable::from_seekable(&mut BytesWrapper::new(&[0u8; 5]))
                .unwrap_err()
                .is_no_index()
        );
    }

}

use std::io::Write;

use crate::{
    GENOMIC_MAGIC_NUMBER, SKIPPABLE_HEADER_SIZE,
    error::{Error, Result},
    frame::{HEADER_MAGIC, write_skippable},
    seekable::{OffsetFrom, Seekable},
};

/// On-disk size of a genomic index entry.
const ENTRY_SIZE: usize = 20;
/// Size of the trailing back-pointer footer.
const FOOTER_SIZE: usize = 8;

/// A range on one reference, mapped to the uncompressed offset it starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenomicEntry {
    /// Shifted reference id, 0 means unmapped.
    pub tid: u32,
    /// Start of the covered range.
    pub begin: i64,
    /// End of the covered range.
    pub end: i64,
    /// Uncompressed offset suitable for `seek`.
    pub frame_start: u64,
}

/// Maps `(tid, begin, end)` ranges of sorted genomic records to uncompressed offsets.
///
/// The index keeps one ordered entry list per reference. It is serialized into a
/// skippable frame directly before the seek table, with a footer that lets readers
/// locate it relative to the seek table start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenomicIndex {
    refs: Vec<Vec<GenomicEntry>>,
}

impl GenomicIndex {
    /// Creates a new, empty genomic index.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no range has been recorded.
    pub fn is_empty(&self) -> bool {
        self.refs.iter().all(Vec::is_empty)
    }

    /// The number of references the index covers.
    pub fn num_refs(&self) -> u32 {
        self.refs.len() as u32
    }

    /// Records a range on reference `tid` starting at uncompressed offset `frame_start`.
    ///
    /// `tid` is shifted by one so the unmapped pseudo-reference `-1` lands at 0. With
    /// `expand` set the range widens the most recent entry on that reference instead
    /// of appending a new one; the writer requests this for records that fall into the
    /// same frame as the previous ones.
    ///
    /// # Errors
    ///
    /// Fails with an out-of-range error for coordinates that do not fit the 32-bit
    /// on-disk fields, or a `tid` below `-1`.
    pub fn add(&mut self, tid: i32, begin: i64, end: i64, frame_start: u64, expand: bool) -> Result<()> {
        let shifted = u32::try_from(i64::from(tid) + 1)
            .map_err(|_| Error::offset_out_of_range())?;
        // Coordinates are stored as 32-bit little endian; wider values would
        // silently truncate.
        u32::try_from(begin).map_err(|_| Error::offset_out_of_range())?;
        u32::try_from(end).map_err(|_| Error::offset_out_of_range())?;

        if self.refs.len() <= shifted as usize {
            self.refs.resize_with(shifted as usize + 1, Vec::new);
        }

        let entries = &mut self.refs[shifted as usize];
        if expand {
            if let Some(last) = entries.last_mut() {
                last.begin = last.begin.min(begin);
                last.end = last.end.max(end);
                return Ok(());
            }
        }

        entries.push(GenomicEntry {
            tid: shifted,
            begin,
            end,
            frame_start,
        });

        Ok(())
    }

    /// Finds the uncompressed offset at which records overlapping `[begin, end]` on
    /// reference `tid` can start.
    ///
    /// Returns the `frame_start` of the first entry on `tid` whose end reaches
    /// `begin`. When the reference has no such entry the first entry of the next
    /// non-empty reference is returned, and `None` means past the end of all indexed
    /// data. The caller filters records that do not actually overlap the range.
    pub fn query(&self, tid: i32, begin: i64, _end: i64) -> Option<u64> {
        let shifted = usize::try_from(i64::from(tid) + 1).ok()?;
        if shifted >= self.refs.len() {
            return None;
        }

        let entries = &self.refs[shifted];
        let at = entries.partition_point(|e| e.end < begin);
        if let Some(entry) = entries.get(at) {
            return Some(entry.frame_start);
        }

        self.refs[shifted + 1..]
            .iter()
            .find_map(|r| r.first().map(|e| e.frame_start))
    }

    /// Serializes the index as a skippable frame, returning the number of bytes
    /// written.
    pub fn write_to(&self, w: &mut impl Write) -> Result<u64> {
        let mut payload = Vec::with_capacity(self.encoded_len() - SKIPPABLE_HEADER_SIZE);
        // Per-file flag byte, reserved
        payload.push(0u8);
        payload.extend_from_slice(&self.num_refs().to_le_bytes());

        for entries in &self.refs {
            // Per-reference flag byte, reserved
            payload.push(0u8);
            payload.extend_from_slice(&u32::try_from(entries.len())?.to_le_bytes());
            for entry in entries {
                payload.extend_from_slice(&entry.tid.to_le_bytes());
                payload.extend_from_slice(&(entry.begin as u32).to_le_bytes());
                payload.extend_from_slice(&(entry.end as u32).to_le_bytes());
                payload.extend_from_slice(&entry.frame_start.to_le_bytes());
            }
        }

        // Footer: own frame size, then the genomic trailing magic
        let total = (SKIPPABLE_HEADER_SIZE + payload.len() + FOOTER_SIZE) as u32;
        payload.extend_from_slice(&total.to_le_bytes());
        payload.extend_from_slice(&GENOMIC_MAGIC_NUMBER.to_le_bytes());

        write_skippable(w, HEADER_MAGIC, &payload)
    }

    /// The on-disk size of the serialized index frame.
    pub fn encoded_len(&self) -> usize {
        let entries: usize = self.refs.iter().map(|r| 5 + r.len() * ENTRY_SIZE).sum();
        SKIPPABLE_HEADER_SIZE + 5 + entries + FOOTER_SIZE
    }

    /// Loads the genomic index that precedes the seek table frame starting at
    /// `seek_table_start`.
    ///
    /// Returns `None` if the file carries no genomic index.
    ///
    /// # Errors
    ///
    /// Fails with a format error if the footer points at a corrupt frame.
    pub fn from_seekable(
        src: &mut impl Seekable,
        seek_table_start: u64,
    ) -> Result<Option<Self>> {
        if seek_table_start < FOOTER_SIZE as u64 {
            return Ok(None);
        }

        src.set_offset(OffsetFrom::Start(seek_table_start - FOOTER_SIZE as u64))?;
        let mut footer = [0u8; FOOTER_SIZE];
        src.read_exact(&mut footer)?;

        if u32::from_le_bytes(footer[4..8].try_into().expect("slice has length 4"))
            != GENOMIC_MAGIC_NUMBER
        {
            return Ok(None);
        }

        let total = u32::from_le_bytes(footer[..4].try_into().expect("slice has length 4")) as u64;
        if total < (SKIPPABLE_HEADER_SIZE + 5 + FOOTER_SIZE) as u64 || total > seek_table_start {
            return Err(Error::format("genomic index size out of bounds"));
        }

        src.set_offset(OffsetFrom::Start(seek_table_start - total))?;
        let mut header = [0u8; SKIPPABLE_HEADER_SIZE];
        src.read_exact(&mut header)?;
        if u32::from_le_bytes(header[..4].try_into().expect("slice has length 4")) != HEADER_MAGIC {
            return Err(Error::format("genomic index frame magic mismatch"));
        }
        let declared = u32::from_le_bytes(header[4..8].try_into().expect("slice has length 4"));
        if declared as u64 != total - SKIPPABLE_HEADER_SIZE as u64 {
            return Err(Error::format("genomic index frame length mismatch"));
        }

        let mut payload = vec![0u8; declared as usize - FOOTER_SIZE];
        src.read_exact(&mut payload)?;

        Self::parse(&payload).map(Some)
    }

    fn parse(payload: &[u8]) -> Result<Self> {
        let truncated = || Error::format("genomic index truncated");

        let mut pos = 1; // per-file flag byte
        let nchr = u32::from_le_bytes(
            payload
                .get(pos..pos + 4)
                .ok_or_else(truncated)?
                .try_into()
                .expect("slice has length 4"),
        );
        pos += 4;

        let mut index = Self::new();
        for _ in 0..nchr {
            // Per-reference flag byte
            pos = pos.checked_add(1).ok_or_else(truncated)?;
            let count = u32::from_le_bytes(
                payload
                    .get(pos..pos + 4)
                    .ok_or_else(truncated)?
                    .try_into()
                    .expect("slice has length 4"),
            );
            pos += 4;

            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let raw = payload.get(pos..pos + ENTRY_SIZE).ok_or_else(truncated)?;
                entries.push(GenomicEntry {
                    tid: u32::from_le_bytes(raw[..4].try_into().expect("slice has length 4")),
                    begin: u32::from_le_bytes(raw[4..8].try_into().expect("slice has length 4"))
                        as i64,
                    end: u32::from_le_bytes(raw[8..12].try_into().expect("slice has length 4"))
                        as i64,
                    frame_start: u64::from_le_bytes(
                        raw[12..20].try_into().expect("slice has length 8"),
                    ),
                });
                pos += ENTRY_SIZE;
            }
            index.refs.push(entries);
        }

        if pos != payload.len() {
            return Err(Error::format("genomic index has trailing garbage"));
        }

        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seekable::BytesWrapper;

    fn sample() -> GenomicIndex {
        let mut idx = GenomicIndex::new();
        idx.add(0, 10, 20, 0, false).unwrap();
        idx.add(0, 200, 250, 1000, false).unwrap();
        idx.add(1, 5, 9, 2000, false).unwrap();
        idx
    }

    #[test]
    fn add_expands_within_frame() {
        let mut idx = GenomicIndex::new();
        idx.add(0, 10, 20, 0, false).unwrap();
        idx.add(0, 15, 40, 0, true).unwrap();
        idx.add(0, 100, 120, 500, false).unwrap();

        assert_eq!(idx.refs[1].len(), 2);
        assert_eq!(idx.refs[1][0].begin, 10);
        assert_eq!(idx.refs[1][0].end, 40);
        assert_eq!(idx.refs[1][1].frame_start, 500);
    }

    #[test]
    fn unmapped_reference_shifts_to_zero() {
        let mut idx = GenomicIndex::new();
        idx.add(-1, 0, 0, 42, false).unwrap();
        assert_eq!(idx.refs[0][0].tid, 0);
        assert_eq!(idx.query(-1, 0, 0), Some(42));
    }

    #[test]
    fn rejects_wide_coordinates() {
        let mut idx = GenomicIndex::new();
        assert!(
            idx.add(0, -1, 10, 0, false)
                .unwrap_err()
                .is_offset_out_of_range()
        );
        assert!(
            idx.add(0, 0, 1 << 33, 0, false)
                .unwrap_err()
                .is_offset_out_of_range()
        );
        assert!(
            idx.add(-2, 0, 1, 0, false)
                .unwrap_err()
                .is_offset_out_of_range()
        );
    }

    #[test]
    fn query_walks_references() {
        let idx = sample();

        // Overlap on the first reference
        assert_eq!(idx.query(0, 15, 25), Some(0));
        // Past the last range of tid 0, continues on the next reference
        assert_eq!(idx.query(0, 300, 400), Some(2000));
        assert_eq!(idx.query(1, 0, 100), Some(2000));
        // Past everything
        assert_eq!(idx.query(1, 50, 100), None);
        assert_eq!(idx.query(2, 0, 100), None);
    }

    #[test]
    fn serde_cycle() {
        let idx = sample();
        let mut buf = Vec::new();
        let n = idx.write_to(&mut buf).unwrap();
        assert_eq!(n as usize, idx.encoded_len());
        assert_eq!(buf.len(), idx.encoded_len());

        let mut src = BytesWrapper::new(&buf);
        let parsed = GenomicIndex::from_seekable(&mut src, buf.len() as u64)
            .unwrap()
            .unwrap();
        assert_eq!(parsed, idx);
    }

    #[test]
    fn absent_index() {
        let filler = vec![0u8; 64];
        let mut src = BytesWrapper::new(&filler);
        assert!(
            GenomicIndex::from_seekable(&mut src, 64).unwrap().is_none()
        );
        assert!(GenomicIndex::from_seekable(&mut src, 4).unwrap().is_none());
    }

    #[test]
    fn corrupt_footer_size() {
        let idx = sample();
        let mut buf = Vec::new();
        idx.write_to(&mut buf).unwrap();
        let at = buf.len() - FOOTER_SIZE;
        buf[at..at + 4].copy_from_slice(&9000u32.to_le_bytes());

        let mut src = BytesWrapper::new(&buf);
        assert!(
            GenomicIndex::from_seekable(&mut src, buf.len() as u64)
                .unwrap_err()
                .is_format()
        );
    }
}

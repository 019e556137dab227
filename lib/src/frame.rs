use std::io::Write;

use zstd_safe::zstd_sys::{ZSTD_MAGIC_SKIPPABLE_START, ZSTD_MAGICNUMBER};

use crate::{
    MAX_BLOCK_SIZE, SEEKABLE_MAGIC_NUMBER, SKIPPABLE_HEADER_SIZE,
    error::{Error, Result},
    seekable::{OffsetFrom, Seekable},
};

/// Magic of the BGZF2 file header frame, shared with the genomic index frame.
pub(crate) const HEADER_MAGIC: u32 = ZSTD_MAGIC_SKIPPABLE_START | 0xB;
/// Magic of the preface frame announcing the next data frame's compressed size.
pub(crate) const PREFACE_MAGIC: u32 = ZSTD_MAGIC_SKIPPABLE_START;
/// Magic of the skippable frame containing the seek table.
pub(crate) const SEEK_TABLE_MAGIC: u32 = ZSTD_MAGIC_SKIPPABLE_START | 0xE;

/// Tag bytes at the start of the file header payload.
pub(crate) const HEADER_TAG: &[u8; 4] = b"BGZ2";
/// At most this many bytes of the first block are echoed in the file header.
pub(crate) const HEADER_PREVIEW_MAX: usize = 16;
/// On-disk size of a preface frame.
pub(crate) const PREFACE_FRAME_SIZE: u32 = 12;

/// The result of probing a file for the trailing EOF marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofStatus {
    /// The trailing seek table magic is absent, the file may be truncated.
    Absent,
    /// The file ends with the seek table magic.
    Present,
    /// The source cannot seek, the marker cannot be checked.
    NonSeekable,
}

pub(crate) fn is_skippable(magic: u32) -> bool {
    magic & 0xFFFF_FFF0 == ZSTD_MAGIC_SKIPPABLE_START
}

/// Writes a skippable frame around `payload`, returning the on-disk frame size.
pub(crate) fn write_skippable(w: &mut impl Write, magic: u32, payload: &[u8]) -> Result<u64> {
    let size = u32::try_from(payload.len())?;
    w.write_all(&magic.to_le_bytes())?;
    w.write_all(&size.to_le_bytes())?;
    w.write_all(payload)?;

    Ok(SKIPPABLE_HEADER_SIZE as u64 + payload.len() as u64)
}

/// Writes the preface frame that publishes the compressed size of the next data frame.
pub(crate) fn write_preface(w: &mut impl Write, comp_size: u32) -> Result<()> {
    write_skippable(w, PREFACE_MAGIC, &comp_size.to_le_bytes())?;

    Ok(())
}

/// Writes the BGZF2 file header frame, returning the on-disk frame size.
///
/// The payload carries the `BGZ2` tag and up to 16 bytes of uncompressed preview copied
/// from the first block.
pub(crate) fn write_file_header(w: &mut impl Write, first_block: &[u8]) -> Result<u64> {
    let preview = &first_block[..first_block.len().min(HEADER_PREVIEW_MAX)];
    let mut payload = [0u8; 4 + HEADER_PREVIEW_MAX];
    payload[..4].copy_from_slice(HEADER_TAG);
    payload[4..4 + preview.len()].copy_from_slice(preview);

    write_skippable(w, HEADER_MAGIC, &payload[..4 + preview.len()])
}

/// The largest compressed size a preface may announce for a single block.
pub(crate) fn max_compressed_size() -> usize {
    zstd_safe::compress_bound(MAX_BLOCK_SIZE)
}

/// Validates the declared uncompressed size of a data frame.
pub(crate) fn frame_content_size(frame: &[u8]) -> Result<Option<u64>> {
    match zstd_safe::get_frame_content_size(frame) {
        Ok(Some(n)) if n > MAX_BLOCK_SIZE as u64 => Err(Error::block_too_large(n)),
        Ok(opt) => Ok(opt),
        Err(_) => Err(Error::format("invalid zstd frame header")),
    }
}

/// Advances to the next data frame and fills `comp` with its compressed bytes.
///
/// Skippable frames that are not a preface are skipped inline, which covers the file
/// header frame as well as the trailing index frames. Returns the declared uncompressed
/// size of the frame, or `None` for frames without a content size field. An outer `None`
/// signals end of input at a clean frame boundary.
///
/// # Errors
///
/// A zstd data frame that is not announced by a preface is rejected, as is any frame
/// with an unknown non-skippable magic or a declared size above [`MAX_BLOCK_SIZE`].
pub(crate) fn next_data_frame(
    src: &mut impl Seekable,
    comp: &mut Vec<u8>,
) -> Result<Option<Option<u64>>> {
    let mut header = [0u8; SKIPPABLE_HEADER_SIZE];

    loop {
        // A clean EOF may only occur before a frame starts.
        if src.read(&mut header[..1])? == 0 {
            return Ok(None);
        }
        src.read_exact(&mut header[1..4])?;
        let magic = u32::from_le_bytes(header[..4].try_into().expect("slice has length 4"));

        if !is_skippable(magic) {
            if magic == ZSTD_MAGICNUMBER {
                return Err(Error::format("zstd data frame without preface"));
            }
            return Err(Error::format("unrecognized frame magic"));
        }

        src.read_exact(&mut header[4..8])?;
        let size = u32::from_le_bytes(header[4..8].try_into().expect("slice has length 4"));

        // A preface is identified by magic plus payload length together. Anything
        // else in the skippable range is silently skipped.
        if magic == PREFACE_MAGIC && size == 4 {
            let mut comp_size = [0u8; 4];
            src.read_exact(&mut comp_size)?;
            let comp_size = u32::from_le_bytes(comp_size) as usize;

            if comp_size == 0 {
                return Err(Error::format("preface announces an empty data frame"));
            }
            if comp_size > max_compressed_size() {
                return Err(Error::block_too_large(comp_size as u64));
            }

            comp.resize(comp_size, 0);
            src.read_exact(comp)?;

            if comp.len() < 4
                || u32::from_le_bytes(comp[..4].try_into().expect("slice has length 4"))
                    != ZSTD_MAGICNUMBER
            {
                return Err(Error::format("expected a zstd data frame after preface"));
            }

            return frame_content_size(comp).map(Some);
        }

        skip(src, size as u64)?;
    }
}

fn skip(src: &mut impl Seekable, mut remaining: u64) -> Result<()> {
    let mut scratch = [0u8; 4096];
    while remaining > 0 {
        let want = scratch.len().min(usize::try_from(remaining).unwrap_or(scratch.len()));
        src.read_exact(&mut scratch[..want])?;
        remaining -= want as u64;
    }

    Ok(())
}

/// Checks whether the source ends with the trailing seek table magic.
///
/// The read position is restored before returning.
pub(crate) fn probe_eof_marker(src: &mut impl Seekable) -> Result<EofStatus> {
    let saved = match src.offset() {
        Ok(pos) => pos,
        Err(err) if err.is_not_seekable() => return Ok(EofStatus::NonSeekable),
        Err(err) => return Err(err),
    };

    let status = match src.set_offset(OffsetFrom::End(-4)) {
        Ok(_) => {
            let mut magic = [0u8; 4];
            src.read_exact(&mut magic)?;
            if u32::from_le_bytes(magic) == SEEKABLE_MAGIC_NUMBER {
                EofStatus::Present
            } else {
                EofStatus::Absent
            }
        }
        Err(err) if err.is_not_seekable() => EofStatus::NonSeekable,
        Err(err) if err.is_offset_out_of_range() => EofStatus::Absent,
        Err(err) => return Err(err),
    };

    src.set_offset(OffsetFrom::Start(saved))?;
    Ok(status)
}

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use zstd_safe::{CCtx, CParameter, CompressionLevel, ResetDirective};

use crate::{
    DEFAULT_BLOCK_SIZE, DEFAULT_COMPRESSION_LEVEL, MAX_BLOCK_SIZE,
    error::{Error, Result},
    frame::{self, HEADER_PREVIEW_MAX, PREFACE_FRAME_SIZE},
    genomic::GenomicIndex,
    seek_table::SeekTable,
};

/// Flush the output file after this many blocks to amortize sync cost.
const SYNC_INTERVAL: u64 = 32;

/// Options that configure how data is compressed.
///
/// # Examples
///
/// Supports builder like chaining.
///
/// ```
/// use bgzf2::WriteOptions;
///
/// let writer = WriteOptions::new()
///     .compression_level(3)
///     .block_size(64 * 1024)
///     .into_writer(Vec::new())?;
/// # Ok::<(), bgzf2::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct WriteOptions {
    compression_level: CompressionLevel,
    block_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteOptions {
    /// Creates a set of options with default values.
    pub fn new() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Sets the compression level used by zstd.
    ///
    /// Levels outside the regular 1-19 range are clamped by the codec.
    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    /// Sets the target uncompressed size of a block.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Creates a [`Writer`] with the configuration.
    ///
    /// # Errors
    ///
    /// Fails if the block size is out of range or the compression context cannot be
    /// allocated.
    pub fn into_writer<W: Write + Send + 'static>(self, writer: W) -> Result<Writer<W>> {
        Writer::with_opts(writer, self)
    }

    /// Creates the file at `path` and returns a [`Writer`] for it.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created or the writer cannot be built.
    pub fn create(self, path: impl AsRef<Path>) -> Result<Writer<File>> {
        let file = File::create(path)?;
        self.into_writer(file)
    }
}

fn new_cctx(level: CompressionLevel) -> Result<CCtx<'static>> {
    let mut cctx =
        CCtx::try_create().ok_or_else(|| Error::resource("compression context allocation"))?;
    cctx.set_parameter(CParameter::CompressionLevel(level))?;
    cctx.set_parameter(CParameter::ChecksumFlag(true))?;
    cctx.set_parameter(CParameter::ContentSizeFlag(true))?;

    Ok(cctx)
}

/// Compresses one block into `comp`, replacing its contents.
fn compress_block(cctx: &mut CCtx<'_>, data: &[u8], comp: &mut Vec<u8>) -> Result<()> {
    cctx.reset(ResetDirective::SessionOnly)
        .expect("Resetting session never fails");
    comp.resize(zstd_safe::compress_bound(data.len()), 0);
    let n = cctx.compress2(&mut comp[..], data)?;
    comp.truncate(n);

    Ok(())
}

/// Compresses a byte stream into the BGZF2 container.
///
/// Data is buffered up to the configured block size and emitted as pairs of preface and
/// Zstd data frames, while the seek table grows alongside. [`Self::finish`] writes the
/// trailing index frames; without it the output lacks the EOF marker.
///
/// The [`std::io::Write`] impl is the splitting write path, records that must not
/// straddle block boundaries go through [`Self::write_block`].
///
/// # Examples
///
/// ```no_run
/// use std::{fs::File, io};
/// use bgzf2::WriteOptions;
///
/// let mut input = File::open("foo")?;
/// let mut writer = WriteOptions::new().create("foo.bgz2")?;
/// io::copy(&mut input, &mut writer)?;
/// writer.finish()?;
/// # Ok::<(), bgzf2::Error>(())
/// ```
pub struct Writer<W: Write> {
    out: Output<W>,
    compression_level: CompressionLevel,
    uncomp: Vec<u8>,
    block_size: usize,
    frame_pos: u64,
    last_flush_try: u64,
    genomic: Option<GenomicIndex>,
    idx_last: Option<(i32, u64)>,
}

enum Output<W: Write> {
    Direct {
        writer: W,
        cctx: CCtx<'static>,
        comp: Vec<u8>,
        seek_table: SeekTable,
        wrote_header: bool,
    },
    Threaded(Pipeline<W>),
}

impl<W: Write + Send + 'static> Writer<W> {
    /// Creates a new `Writer` with default parameters.
    ///
    /// This is equivalent to calling `WriteOptions::new().into_writer(writer)`.
    ///
    /// # Errors
    ///
    /// Fails if the writer cannot be created.
    pub fn new(writer: W) -> Result<Self> {
        Self::with_opts(writer, WriteOptions::new())
    }

    /// Creates a new `Writer` with the given [`WriteOptions`].
    ///
    /// # Errors
    ///
    /// Fails if the writer cannot be created.
    pub fn with_opts(writer: W, opts: WriteOptions) -> Result<Self> {
        if opts.block_size == 0 || opts.block_size > MAX_BLOCK_SIZE {
            return Err(Error::block_too_large(opts.block_size as u64));
        }

        Ok(Self {
            out: Output::Direct {
                writer,
                cctx: new_cctx(opts.compression_level)?,
                comp: Vec::new(),
                seek_table: SeekTable::new(),
                wrote_header: false,
            },
            compression_level: opts.compression_level,
            uncomp: Vec::with_capacity(opts.block_size),
            block_size: opts.block_size,
            frame_pos: 0,
            last_flush_try: 0,
            genomic: None,
            idx_last: None,
        })
    }

    /// The target uncompressed size of a block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Changes the block size, flushing any buffered data first.
    ///
    /// # Errors
    ///
    /// Fails if `size` is zero or exceeds [`MAX_BLOCK_SIZE`], or if the flush fails.
    pub fn set_block_size(&mut self, size: usize) -> Result<()> {
        if size == 0 || size > MAX_BLOCK_SIZE {
            return Err(Error::block_too_large(size as u64));
        }

        self.flush()?;
        self.block_size = size;
        self.uncomp.reserve(size.saturating_sub(self.uncomp.capacity()));

        Ok(())
    }

    /// Appends `data` to the uncompressed stream, returning the number of bytes
    /// consumed. Short writes happen only on error.
    ///
    /// With `can_split` the bytes may straddle block boundaries. Without it the write
    /// is kept in one piece: it goes into the current block, into a fresh block when
    /// the current one has not enough room, or, for writes of at least a full block
    /// size, into a standalone frame of exactly `data.len()` uncompressed bytes.
    pub fn write_block(&mut self, data: &[u8], can_split: bool) -> Result<usize> {
        if can_split {
            let mut written = 0;
            while written < data.len() {
                let room = self.block_size - self.uncomp.len();
                let take = room.min(data.len() - written);
                self.uncomp.extend_from_slice(&data[written..written + take]);
                written += take;
                if self.uncomp.len() == self.block_size {
                    self.flush()?;
                }
            }
            return Ok(data.len());
        }

        if data.len() >= self.block_size {
            if data.len() > MAX_BLOCK_SIZE {
                return Err(Error::block_too_large(data.len() as u64));
            }
            self.flush()?;
            self.emit_block(data)?;
            return Ok(data.len());
        }

        if self.uncomp.len() + data.len() > self.block_size {
            self.flush()?;
        }
        self.uncomp.extend_from_slice(data);

        Ok(data.len())
    }

    /// Flushes the buffered block now if appending `size` more bytes would overflow
    /// it; otherwise remembers the current buffer position as the start of the next
    /// record for [`Self::idx_add`].
    pub fn flush_try(&mut self, size: usize) -> Result<()> {
        if self.uncomp.len() + size > self.block_size {
            self.flush()
        } else {
            self.last_flush_try = self.uncomp.len() as u64;
            Ok(())
        }
    }

    /// Compresses and emits the buffered block, if any.
    pub fn flush(&mut self) -> Result<()> {
        if self.uncomp.is_empty() {
            return Ok(());
        }

        let data = std::mem::take(&mut self.uncomp);
        self.emit_block(&data)?;
        self.uncomp = data;
        self.uncomp.clear();

        Ok(())
    }

    fn emit_block(&mut self, data: &[u8]) -> Result<()> {
        debug_assert!(!data.is_empty());

        match &mut self.out {
            Output::Direct {
                writer,
                cctx,
                comp,
                seek_table,
                wrote_header,
            } => {
                if !*wrote_header {
                    let n = frame::write_file_header(writer, data)?;
                    seek_table.log_frame(n as u32, 0)?;
                    *wrote_header = true;
                }

                compress_block(cctx, data, comp)?;
                frame::write_preface(writer, comp.len() as u32)?;
                writer.write_all(comp)?;
                seek_table.log_frame(PREFACE_FRAME_SIZE, 0)?;
                seek_table.log_frame(comp.len() as u32, data.len() as u32)?;
            }
            Output::Threaded(pipeline) => pipeline.dispatch(data)?,
        }

        self.frame_pos += data.len() as u64;
        self.last_flush_try = 0;

        Ok(())
    }

    /// Records that a range on reference `tid` begins inside the upcoming or current
    /// frame. Repeated calls for the same reference and frame expand the recorded
    /// range instead of adding entries.
    ///
    /// The genomic index is created on the first call and written out by
    /// [`Self::finish`].
    ///
    /// # Errors
    ///
    /// Fails for coordinates that do not fit the on-disk index format.
    pub fn idx_add(&mut self, tid: i32, begin: i64, end: i64) -> Result<()> {
        let expand = self.idx_last == Some((tid, self.frame_pos));
        let frame_start = self.frame_pos + self.last_flush_try;
        self.genomic
            .get_or_insert_with(GenomicIndex::new)
            .add(tid, begin, end, frame_start, expand)?;
        self.idx_last = Some((tid, self.frame_pos));

        Ok(())
    }

    /// Flushes buffered data, drains the worker pipeline and writes the trailing
    /// index frames: the genomic index (when ranges were recorded) followed by the
    /// seek table. Returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Fails if any buffered or in-flight block cannot be written.
    pub fn finish(mut self) -> Result<W> {
        self.flush()?;

        let Writer { out, genomic, .. } = self;
        let (mut writer, seek_table) = match out {
            Output::Direct {
                writer, seek_table, ..
            } => (writer, seek_table),
            Output::Threaded(pipeline) => pipeline.finish()?,
        };

        if let Some(index) = genomic.filter(|g| !g.is_empty()) {
            index.write_to(&mut writer)?;
        }
        seek_table.write_to(&mut writer)?;
        writer.flush()?;

        Ok(writer)
    }
}

impl<W: Write + Send + 'static> Writer<W> {
    /// Hands compression to a pool of `threads` workers and all file I/O to a
    /// dedicated writer thread.
    ///
    /// `queue_size` bounds the number of in-flight blocks, 0 selects the default of
    /// twice the worker count. Blocks buffered so far stay with the caller; frames
    /// already written and the seek table move to the writer thread.
    ///
    /// # Errors
    ///
    /// Fails if a pool is already attached.
    pub fn attach_thread_pool(mut self, threads: usize, queue_size: usize) -> Result<Self> {
        let threads = threads.max(1);
        let queue_size = if queue_size == 0 {
            2 * threads
        } else {
            queue_size
        };

        self.out = match self.out {
            Output::Threaded(_) => return Err(Error::resource("thread pool already attached")),
            Output::Direct {
                writer,
                seek_table,
                wrote_header,
                ..
            } => Output::Threaded(Pipeline::spawn(
                writer,
                seek_table,
                wrote_header,
                self.compression_level,
                threads,
                queue_size,
            )),
        };

        Ok(self)
    }
}

impl<W: Write + Send + 'static> Write for Writer<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_block(buf, true).map_err(std::io::Error::other)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Writer::flush(self).map_err(std::io::Error::other)?;
        if let Output::Direct { writer, .. } = &mut self.out {
            writer.flush()?;
        }

        Ok(())
    }
}

struct Job {
    seq: u64,
    data: Vec<u8>,
}

struct Done {
    seq: u64,
    uncomp_len: u32,
    /// Preview bytes for the file header frame, only present on the first job.
    head: Option<Vec<u8>>,
    result: Result<Vec<u8>>,
}

struct Pipeline<W> {
    job_tx: Sender<Job>,
    spare_rx: Receiver<Vec<u8>>,
    next_seq: u64,
    latch: Arc<Mutex<Option<Error>>>,
    workers: Vec<JoinHandle<()>>,
    io: JoinHandle<Result<(W, SeekTable)>>,
}

impl<W: Write + Send + 'static> Pipeline<W> {
    fn spawn(
        writer: W,
        seek_table: SeekTable,
        wrote_header: bool,
        level: CompressionLevel,
        threads: usize,
        queue_size: usize,
    ) -> Self {
        let (job_tx, job_rx) = bounded::<Job>(queue_size);
        let (done_tx, done_rx) = bounded::<Done>(queue_size);
        // Recycled uncompressed buffers flow back to the caller, compressed ones to
        // the workers.
        let (spare_tx, spare_rx) = unbounded::<Vec<u8>>();
        let (comp_tx, comp_rx) = unbounded::<Vec<u8>>();
        let latch = Arc::new(Mutex::new(None));

        let workers = (0..threads)
            .map(|_| {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let spare_tx = spare_tx.clone();
                let comp_rx = comp_rx.clone();
                std::thread::spawn(move || worker_loop(&job_rx, &done_tx, &spare_tx, &comp_rx, level))
            })
            .collect();
        drop(done_tx);

        let io = {
            let latch = Arc::clone(&latch);
            std::thread::spawn(move || {
                writer_loop(writer, seek_table, wrote_header, &done_rx, &comp_tx, &latch)
            })
        };

        Self {
            job_tx,
            spare_rx,
            next_seq: 0,
            latch,
            workers,
            io,
        }
    }

    fn dispatch(&mut self, data: &[u8]) -> Result<()> {
        if let Some(err) = self.latch.lock().expect("latch mutex is never poisoned").take() {
            return Err(err);
        }

        let mut buf = self.spare_rx.try_recv().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(data);

        let job = Job {
            seq: self.next_seq,
            data: buf,
        };
        self.next_seq += 1;
        self.job_tx
            .send(job)
            .map_err(|_| Error::resource("encode pipeline terminated"))?;

        Ok(())
    }

    fn finish(self) -> Result<(W, SeekTable)> {
        let Pipeline {
            job_tx,
            workers,
            io,
            latch,
            ..
        } = self;

        // Closing the job channel drains the workers, which in turn lets the writer
        // thread run dry and return the file.
        drop(job_tx);
        for worker in workers {
            worker
                .join()
                .map_err(|_| Error::resource("encode worker panicked"))?;
        }

        match io
            .join()
            .map_err(|_| Error::resource("writer thread panicked"))?
        {
            Ok(done) => Ok(done),
            Err(err) => Err(latch
                .lock()
                .expect("latch mutex is never poisoned")
                .take()
                .unwrap_or(err)),
        }
    }
}

fn worker_loop(
    job_rx: &Receiver<Job>,
    done_tx: &Sender<Done>,
    spare_tx: &Sender<Vec<u8>>,
    comp_rx: &Receiver<Vec<u8>>,
    level: CompressionLevel,
) {
    let mut cctx = new_cctx(level);

    for job in job_rx.iter() {
        let head = (job.seq == 0)
            .then(|| job.data[..job.data.len().min(HEADER_PREVIEW_MAX)].to_vec());

        let mut comp = comp_rx.try_recv().unwrap_or_default();
        let result = match &mut cctx {
            Ok(cctx) => compress_block(cctx, &job.data, &mut comp).map(|()| comp),
            Err(_) => Err(Error::resource("compression context allocation")),
        };

        let done = Done {
            seq: job.seq,
            uncomp_len: job.data.len() as u32,
            head,
            result,
        };
        let _ = spare_tx.send(job.data);
        if done_tx.send(done).is_err() {
            break;
        }
    }
}

fn writer_loop<W: Write>(
    mut writer: W,
    mut seek_table: SeekTable,
    mut wrote_header: bool,
    done_rx: &Receiver<Done>,
    comp_tx: &Sender<Vec<u8>>,
    latch: &Mutex<Option<Error>>,
) -> Result<(W, SeekTable)> {
    let mut pending: BTreeMap<u64, Done> = BTreeMap::new();
    let mut next = 0u64;
    let mut blocks = 0u64;
    let mut failed = false;

    for done in done_rx.iter() {
        pending.insert(done.seq, done);
        while let Some(done) = pending.remove(&next) {
            next += 1;
            // Results after a failure are drained but not written
            if failed {
                continue;
            }
            if let Err(err) = write_done(
                &mut writer,
                done,
                &mut seek_table,
                &mut wrote_header,
                &mut blocks,
                comp_tx,
            ) {
                *latch.lock().expect("latch mutex is never poisoned") = Some(err);
                failed = true;
            }
        }
    }

    if failed {
        return Err(Error::resource("writer thread failed"));
    }

    Ok((writer, seek_table))
}

fn write_done<W: Write>(
    writer: &mut W,
    done: Done,
    seek_table: &mut SeekTable,
    wrote_header: &mut bool,
    blocks: &mut u64,
    comp_tx: &Sender<Vec<u8>>,
) -> Result<()> {
    let comp = done.result?;

    if !*wrote_header {
        let head = done.head.as_deref().unwrap_or_default();
        let n = frame::write_file_header(writer, head)?;
        seek_table.log_frame(n as u32, 0)?;
        *wrote_header = true;
    }

    frame::write_preface(writer, comp.len() as u32)?;
    writer.write_all(&comp)?;
    seek_table.log_frame(PREFACE_FRAME_SIZE, 0)?;
    seek_table.log_frame(comp.len() as u32, done.uncomp_len)?;
    let _ = comp_tx.send(comp);

    *blocks += 1;
    if *blocks % SYNC_INTERVAL == 0 {
        writer.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_frames(file: &[u8]) -> Vec<(u32, u32)> {
        // (magic, total size) of each frame in the file
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < file.len() {
            let magic = u32::from_le_bytes(file[pos..pos + 4].try_into().unwrap());
            let size = u32::from_le_bytes(file[pos + 4..pos + 8].try_into().unwrap());
            if frame::is_skippable(magic) {
                frames.push((magic, size + 8));
                pos += size as usize + 8;
            } else {
                // Data frame, use the preceding preface to size it
                let (_, preface_size) = *frames.last().unwrap();
                assert_eq!(preface_size, PREFACE_FRAME_SIZE);
                frames.push((magic, 0));
                break;
            }
        }
        frames
    }

    #[test]
    fn first_flush_emits_header_frame() {
        let mut writer = WriteOptions::new()
            .block_size(8)
            .into_writer(Vec::new())
            .unwrap();
        writer.write_block(b"12345678", true).unwrap();
        let out = writer.finish().unwrap();

        let frames = raw_frames(&out);
        assert_eq!(frames[0].0, frame::HEADER_MAGIC);
        // Tag plus full preview
        assert_eq!(frames[0].1, 8 + 4 + 8);
        assert_eq!(frames[1], (frame::PREFACE_MAGIC, PREFACE_FRAME_SIZE));
        assert_eq!(&out[8..12], frame::HEADER_TAG);
    }

    #[test]
    fn split_write_fills_blocks() {
        let mut writer = WriteOptions::new()
            .block_size(10)
            .into_writer(Vec::new())
            .unwrap();
        let n = writer.write_block(&[7u8; 25], true).unwrap();
        assert_eq!(n, 25);
        // Two full blocks flushed, 5 bytes still buffered
        assert_eq!(writer.frame_pos, 20);
        assert_eq!(writer.uncomp.len(), 5);
        writer.finish().unwrap();
    }

    #[test]
    fn unsplit_write_keeps_records_whole() {
        let mut writer = WriteOptions::new()
            .block_size(10)
            .into_writer(Vec::new())
            .unwrap();

        writer.write_block(&[1u8; 6], false).unwrap();
        assert_eq!(writer.uncomp.len(), 6);
        // Does not fit, previous block gets flushed first
        writer.write_block(&[2u8; 7], false).unwrap();
        assert_eq!(writer.frame_pos, 6);
        assert_eq!(writer.uncomp.len(), 7);
        // At least a full block goes out standalone, buffered data first
        writer.write_block(&[3u8; 32], false).unwrap();
        assert_eq!(writer.frame_pos, 6 + 7 + 32);
        assert_eq!(writer.uncomp.len(), 0);
        writer.finish().unwrap();
    }

    #[test]
    fn flush_try_tracks_record_starts() {
        let mut writer = WriteOptions::new()
            .block_size(10)
            .into_writer(Vec::new())
            .unwrap();

        writer.flush_try(4).unwrap();
        writer.write_block(&[0u8; 4], false).unwrap();
        writer.flush_try(4).unwrap();
        assert_eq!(writer.last_flush_try, 4);

        // Would overflow, flushes and resets the record start
        writer.write_block(&[0u8; 4], false).unwrap();
        writer.flush_try(4).unwrap();
        assert_eq!(writer.last_flush_try, 0);
        assert_eq!(writer.frame_pos, 8);
        writer.finish().unwrap();
    }

    #[test]
    fn block_size_bounds() {
        assert!(
            WriteOptions::new()
                .block_size(0)
                .into_writer(Vec::new())
                .err()
                .unwrap()
                .is_block_too_large()
        );
        assert!(
            WriteOptions::new()
                .block_size(MAX_BLOCK_SIZE + 1)
                .into_writer(Vec::new())
                .err()
                .unwrap()
                .is_block_too_large()
        );

        let mut writer = WriteOptions::new().into_writer(Vec::new()).unwrap();
        assert!(writer.set_block_size(MAX_BLOCK_SIZE).is_ok());
        assert!(writer.set_block_size(0).unwrap_err().is_block_too_large());
    }

    #[test]
    fn threaded_output_matches_direct() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        let mut direct = WriteOptions::new()
            .block_size(1000)
            .into_writer(Vec::new())
            .unwrap();
        direct.write_block(&data, true).unwrap();
        let direct = direct.finish().unwrap();

        for threads in [1, 4] {
            let mut threaded = WriteOptions::new()
                .block_size(1000)
                .into_writer(Vec::new())
                .unwrap()
                .attach_thread_pool(threads, 0)
                .unwrap();
            threaded.write_block(&data, true).unwrap();
            let threaded = threaded.finish().unwrap();
            assert_eq!(direct, threaded);
        }
    }
}

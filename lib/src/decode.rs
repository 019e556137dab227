use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded, unbounded};
use zstd_safe::{DCtx, InBuffer, OutBuffer, ResetDirective};

use crate::{
    MAX_BLOCK_SIZE,
    command::{CommandChannel, ReaderCommand},
    error::{Error, Result},
    frame::{self, EofStatus},
    genomic::GenomicIndex,
    seek_table::SeekTable,
    seekable::{OffsetFrom, Seekable},
};

/// How often the reader thread re-checks the command channel while the dispatch
/// queue is full.
const DISPATCH_POLL: Duration = Duration::from_millis(20);

fn new_dctx() -> Result<DCtx<'static>> {
    DCtx::try_create().ok_or_else(|| Error::resource("decompression context allocation"))
}

/// Decompresses one data frame into `uncomp`, replacing its contents.
///
/// With a known `content_size` the frame is decoded in one shot and the output length
/// verified. Frames without a content size field (pzstd produces such frames) are
/// decoded streaming, growing the output with the observed compression ratio plus 5%
/// headroom, and by half plus a constant once the input is exhausted.
pub(crate) fn decompress_frame(
    dctx: &mut DCtx<'_>,
    comp: &[u8],
    uncomp: &mut Vec<u8>,
    content_size: Option<u64>,
) -> Result<()> {
    dctx.reset(ResetDirective::SessionOnly)
        .expect("Resetting session never fails");

    if let Some(size) = content_size {
        let size = usize::try_from(size)?;
        uncomp.resize(size, 0);
        let written = dctx.decompress(&mut uncomp[..], comp)?;
        if written != size {
            return Err(Error::size_mismatch(size as u64, written as u64));
        }
        return Ok(());
    }

    let mut in_buf = InBuffer::around(comp);
    uncomp.resize((comp.len() * 4 + 1000).min(MAX_BLOCK_SIZE), 0);
    let mut written = 0;

    loop {
        let mut out_buf = OutBuffer::around(&mut uncomp[written..]);
        let hint = dctx.decompress_stream(&mut out_buf, &mut in_buf)?;
        let progressed = out_buf.pos() > 0;
        written += out_buf.pos();
        let input_done = in_buf.pos() == comp.len();

        if hint == 0 {
            // Frame end
            if !input_done {
                return Err(Error::format("garbage after zstd frame"));
            }
            break;
        }

        if written == uncomp.len() {
            let grown = if input_done {
                written + written / 2 + 100_000
            } else {
                let ratio = written as f64 / in_buf.pos().max(1) as f64;
                ((comp.len() as f64 * ratio * 1.05) as usize + 1000).max(written + 1)
            };
            let grown = grown.min(MAX_BLOCK_SIZE);
            if grown <= written {
                return Err(Error::block_too_large(written as u64 + 1));
            }
            uncomp.resize(grown, 0);
        } else if !progressed && input_done {
            return Err(Error::format("decompression made no progress"));
        }
    }

    uncomp.truncate(written);
    Ok(())
}

/// Options that configure how data is decompressed.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    seek_table: Option<SeekTable>,
}

impl ReadOptions {
    /// Creates a set of options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a [`SeekTable`] to use instead of reading it from the source on the
    /// first seek.
    pub fn seek_table(mut self, seek_table: SeekTable) -> Self {
        self.seek_table = Some(seek_table);
        self
    }

    /// Builds a [`Reader`] with the configuration.
    ///
    /// # Errors
    ///
    /// Fails if the decompression context cannot be allocated.
    pub fn into_reader<S: Seekable>(self, src: S) -> Result<Reader<S>> {
        Ok(Reader {
            mode: Mode::Direct {
                src,
                dctx: new_dctx()?,
                comp: Vec::new(),
            },
            uncomp: Vec::new(),
            pos: 0,
            block_start: 0,
            pending_rel: None,
            at_eof: false,
            seek_table: self.seek_table,
            table_start: None,
            genomic: None,
            genomic_loaded: false,
        })
    }
}

/// Reads the uncompressed byte stream of a BGZF2 file.
///
/// A reader decodes block by block and serves byte reads, line reads and seeks by
/// uncompressed offset. By default everything happens on the caller thread;
/// [`Self::attach_thread_pool`] moves frame parsing to a dedicated reader thread and
/// decompression to a worker pool.
///
/// # Examples
///
/// ```no_run
/// use std::io::Read;
/// use bgzf2::Reader;
///
/// let mut reader = Reader::open("data.bgz2")?;
/// reader.set_offset(1024)?;
/// let mut buf = [0u8; 64];
/// reader.read(&mut buf)?;
/// # Ok::<(), bgzf2::Error>(())
/// ```
pub struct Reader<S: Seekable> {
    mode: Mode<S>,
    uncomp: Vec<u8>,
    pos: usize,
    block_start: u64,
    /// Offset into the next decoded block, set by a seek.
    pending_rel: Option<u64>,
    at_eof: bool,
    seek_table: Option<SeekTable>,
    table_start: Option<u64>,
    genomic: Option<GenomicIndex>,
    genomic_loaded: bool,
}

enum Mode<S> {
    Direct {
        src: S,
        dctx: DCtx<'static>,
        comp: Vec<u8>,
    },
    Threaded(Pipeline),
}

impl Reader<File> {
    /// Opens the BGZF2 file at `path` for reading.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the reader cannot be built.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<S: Seekable> Reader<S> {
    /// Creates a new `Reader` with default options.
    ///
    /// This is equivalent to calling `ReadOptions::new().into_reader(src)`.
    ///
    /// # Errors
    ///
    /// Fails if the reader cannot be created.
    pub fn new(src: S) -> Result<Self> {
        ReadOptions::new().into_reader(src)
    }

    /// Reads up to `buf.len()` bytes of uncompressed data.
    ///
    /// Returns the number of bytes read, 0 at end of file. Reads do not cross block
    /// boundaries, so short reads are common; use [`std::io::Read::read_exact`] for
    /// exact amounts.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pos == self.uncomp.len() {
            if !self.fill_block()? {
                return Ok(0);
            }
        }

        let n = (self.uncomp.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.uncomp[self.pos..self.pos + n]);
        self.pos += n;

        Ok(n)
    }

    /// Returns up to `len` bytes of the current block without copying.
    ///
    /// The returned slice may be shorter than `len` when the block ends, and empty at
    /// end of file.
    pub fn read_zero_copy(&mut self, len: usize) -> Result<&[u8]> {
        while self.pos == self.uncomp.len() {
            if !self.fill_block()? {
                return Ok(&[]);
            }
        }

        let n = (self.uncomp.len() - self.pos).min(len);
        let start = self.pos;
        self.pos += n;

        Ok(&self.uncomp[start..start + n])
    }

    /// Returns the next uncompressed byte without consuming it, `None` at end of
    /// file.
    pub fn peek(&mut self) -> Result<Option<u8>> {
        while self.pos == self.uncomp.len() {
            if !self.fill_block()? {
                return Ok(None);
            }
        }

        Ok(Some(self.uncomp[self.pos]))
    }

    /// Appends one line, terminated by `delim`, to `buf`.
    ///
    /// The delimiter is consumed but not stored; a carriage return before a newline
    /// delimiter is stripped as well. Returns the number of bytes appended, or `None`
    /// at end of file.
    pub fn getline(&mut self, delim: u8, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        let start = buf.len();
        let mut found = false;

        loop {
            if self.pos == self.uncomp.len() {
                if !self.fill_block()? {
                    break;
                }
                continue;
            }

            let chunk = &self.uncomp[self.pos..];
            if let Some(at) = chunk.iter().position(|&b| b == delim) {
                buf.extend_from_slice(&chunk[..at]);
                self.pos += at + 1;
                found = true;
                break;
            }
            buf.extend_from_slice(chunk);
            self.pos = self.uncomp.len();
        }

        if !found && buf.len() == start {
            return Ok(None);
        }
        if delim == b'\n' && buf.last() == Some(&b'\r') {
            buf.pop();
        }

        Ok(Some(buf.len() - start))
    }

    /// The current position in the uncompressed stream.
    pub fn position(&self) -> u64 {
        self.block_start + self.pos as u64
    }

    /// Moves the read position to the uncompressed offset `offset`.
    ///
    /// Loads the seek table from the end of the source on first use. Seeking to the
    /// total uncompressed size is allowed and puts the reader at end of file.
    ///
    /// # Errors
    ///
    /// Fails with an out-of-range error past the end of data, a no-index error when
    /// the source carries no seek table, and a not-seekable error on sources that
    /// cannot seek.
    pub fn set_offset(&mut self, offset: u64) -> Result<()> {
        if matches!(self.mode, Mode::Threaded(_)) {
            let Mode::Threaded(pipeline) = &mut self.mode else {
                unreachable!()
            };
            let rel = pipeline.seek(offset)?;
            self.at_eof = false;
            self.uncomp.clear();
            self.pos = 0;
            self.block_start = offset - rel;
            self.pending_rel = Some(rel);
            return Ok(());
        }

        self.load_seek_table()?;
        let table = self.seek_table.as_ref().expect("seek table was just loaded");

        if offset == table.size_decomp() {
            self.uncomp.clear();
            self.pos = 0;
            self.pending_rel = None;
            self.at_eof = true;
            self.block_start = offset;
            return Ok(());
        }

        let point = table.query(offset)?;
        let Mode::Direct { src, .. } = &mut self.mode else {
            unreachable!()
        };
        src.set_offset(OffsetFrom::Start(point.comp_offset))?;

        self.at_eof = false;
        self.uncomp.clear();
        self.pos = 0;
        self.block_start = point.uncomp_offset;
        self.pending_rel = Some(offset - point.uncomp_offset);
        if !self.fill_block()? {
            return Err(Error::format("missing data frame at seek target"));
        }

        Ok(())
    }

    /// Checks whether the source ends with the trailing seek table magic.
    pub fn check_eof(&mut self) -> Result<EofStatus> {
        match &mut self.mode {
            Mode::Direct { src, .. } => frame::probe_eof_marker(src),
            Mode::Threaded(pipeline) => pipeline.check_eof(),
        }
    }

    /// Returns the seek table, loading it from the end of the source if necessary.
    ///
    /// # Errors
    ///
    /// Fails with a no-index error when the source carries no seek table, and with a
    /// not-seekable error when it cannot be located.
    pub fn load_seek_table(&mut self) -> Result<&SeekTable> {
        if self.seek_table.is_none() {
            self.locate_indices()?;
        }

        self.seek_table.as_ref().ok_or_else(Error::no_index)
    }

    /// The total uncompressed size of the file, from the seek table.
    pub fn size_decomp(&mut self) -> Result<u64> {
        self.load_seek_table().map(SeekTable::size_decomp)
    }

    /// Finds the uncompressed offset at which records overlapping `[begin, end]` on
    /// reference `tid` can start, from the genomic index.
    ///
    /// `None` means past the end of all indexed data. The returned offset is meant to
    /// be passed to [`Self::set_offset`]; the caller filters records that do not
    /// actually fall in the range.
    ///
    /// # Errors
    ///
    /// Fails with a no-index error when the file carries no genomic index.
    pub fn query(&mut self, tid: i32, begin: i64, end: i64) -> Result<Option<u64>> {
        self.ensure_genomic()?;
        match &self.genomic {
            Some(index) => Ok(index.query(tid, begin, end)),
            None => Err(Error::no_index()),
        }
    }

    /// Loads seek table and table start position in direct mode, restoring the
    /// current read position.
    fn locate_indices(&mut self) -> Result<()> {
        if self.table_start.is_some() {
            return Ok(());
        }

        if let Mode::Direct { src, .. } = &mut self.mode {
            let saved = src.offset()?;
            let loaded = SeekTable::load(src);
            src.set_offset(OffsetFrom::Start(saved))?;
            let (table, start) = loaded?;
            if self.seek_table.is_none() {
                self.seek_table = Some(table);
            }
            self.table_start = Some(start);
        }

        Ok(())
    }

    fn ensure_genomic(&mut self) -> Result<()> {
        if self.genomic_loaded {
            return Ok(());
        }
        if matches!(self.mode, Mode::Threaded(_)) {
            // The threaded reader loads indices when the pool is attached
            self.genomic_loaded = true;
            return Ok(());
        }

        self.locate_indices()?;
        let start = self.table_start.ok_or_else(Error::no_index)?;
        if let Mode::Direct { src, .. } = &mut self.mode {
            let saved = src.offset()?;
            let loaded = GenomicIndex::from_seekable(src, start);
            src.set_offset(OffsetFrom::Start(saved))?;
            self.genomic = loaded?;
        }
        self.genomic_loaded = true;

        Ok(())
    }

    /// Decodes the next block into the handle. Returns false at end of file.
    fn fill_block(&mut self) -> Result<bool> {
        if self.at_eof {
            return Ok(false);
        }

        let filled = match &mut self.mode {
            Mode::Direct { src, dctx, comp } => match frame::next_data_frame(src, comp)? {
                None => false,
                Some(content_size) => {
                    self.block_start += self.uncomp.len() as u64;
                    decompress_frame(dctx, comp, &mut self.uncomp, content_size)?;
                    true
                }
            },
            Mode::Threaded(pipeline) => match pipeline.next_block()? {
                BlockMsg::Eof => false,
                BlockMsg::Data(data) => {
                    self.block_start += self.uncomp.len() as u64;
                    let spent = std::mem::replace(&mut self.uncomp, data);
                    pipeline.recycle(spent);
                    true
                }
            },
        };

        if filled {
            let rel = self.pending_rel.take().unwrap_or(0) as usize;
            self.pos = rel.min(self.uncomp.len());
            Ok(true)
        } else {
            self.block_start += self.uncomp.len() as u64;
            self.uncomp.clear();
            self.pos = 0;
            self.at_eof = true;
            Ok(false)
        }
    }
}

impl<S: Seekable + Send + 'static> Reader<S> {
    /// Hands frame parsing to a dedicated reader thread that owns the source, and
    /// decompression to a pool of `threads` workers. Decoded blocks arrive in file
    /// order; seeks are coordinated with the reader thread through a command channel.
    ///
    /// `queue_size` bounds the number of in-flight blocks, 0 selects the default of
    /// twice the worker count. The seek table and genomic index are loaded up front
    /// when the source allows it; on a non-seekable source the reader degrades to
    /// sequential streaming.
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

        // Best effort: a missing or unreachable index only disables seeking
        let _ = self.locate_indices();
        let _ = self.ensure_genomic();

        let Reader {
            mode,
            uncomp,
            pos,
            block_start,
            pending_rel,
            at_eof,
            seek_table,
            table_start,
            genomic,
            ..
        } = self;

        let mode = match mode {
            Mode::Threaded(_) => return Err(Error::resource("thread pool already attached")),
            Mode::Direct { src, .. } => {
                Mode::Threaded(Pipeline::spawn(src, seek_table.clone(), threads, queue_size))
            }
        };

        Ok(Reader {
            mode,
            uncomp,
            pos,
            block_start,
            pending_rel,
            at_eof,
            seek_table,
            table_start,
            genomic,
            genomic_loaded: true,
        })
    }
}

impl<S: Seekable> std::io::Read for Reader<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Reader::read(self, buf).map_err(std::io::Error::other)
    }
}

impl<S: Seekable> std::io::Seek for Reader<S> {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        use std::io::{self, SeekFrom};

        let offset = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(n) => self
                .position()
                .checked_add_signed(n)
                .ok_or_else(|| io::Error::other(Error::offset_out_of_range()))?,
            SeekFrom::End(n) => {
                let size = self.size_decomp().map_err(io::Error::other)?;
                size.checked_add_signed(n)
                    .ok_or_else(|| io::Error::other(Error::offset_out_of_range()))?
            }
        };

        Reader::set_offset(self, offset).map_err(io::Error::other)?;
        Ok(offset)
    }
}

enum BlockMsg {
    Data(Vec<u8>),
    Eof,
}

struct DecodeJob {
    seq: u64,
    epoch: u64,
    comp: Vec<u8>,
    content_size: Option<u64>,
}

type DecodeResult = (u64, u64, Result<BlockMsg>);

struct Pipeline {
    result_rx: Receiver<DecodeResult>,
    recycle_tx: Sender<Vec<u8>>,
    command: Arc<CommandChannel>,
    pending: BTreeMap<u64, Result<BlockMsg>>,
    next_seq: u64,
    epoch: u64,
    reader: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    fn spawn<S: Seekable + Send + 'static>(
        src: S,
        seek_table: Option<SeekTable>,
        threads: usize,
        queue_size: usize,
    ) -> Self {
        let (job_tx, job_rx) = bounded::<DecodeJob>(queue_size);
        // In-flight results are bounded by the job queue, the result channel itself
        // must never block the threads or seeks could starve.
        let (result_tx, result_rx) = unbounded::<DecodeResult>();
        let (recycle_tx, recycle_rx) = unbounded::<Vec<u8>>();
        let (comp_tx, comp_rx) = unbounded::<Vec<u8>>();
        let command = Arc::new(CommandChannel::new());

        let workers = (0..threads)
            .map(|_| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let recycle_rx = recycle_rx.clone();
                let comp_tx = comp_tx.clone();
                std::thread::spawn(move || decode_worker(&job_rx, &result_tx, &recycle_rx, &comp_tx))
            })
            .collect();

        let reader = {
            let command = Arc::clone(&command);
            std::thread::spawn(move || reader_loop(src, seek_table, &job_tx, &result_tx, &comp_rx, &command))
        };

        Self {
            result_rx,
            recycle_tx,
            command,
            pending: BTreeMap::new(),
            next_seq: 0,
            epoch: 0,
            reader: Some(reader),
            workers,
        }
    }

    /// Takes the next block in dispatch order, blocking until it is decoded.
    fn next_block(&mut self) -> Result<BlockMsg> {
        loop {
            if let Some(result) = self.pending.remove(&self.next_seq) {
                self.next_seq += 1;
                return result;
            }

            match self.result_rx.recv() {
                Ok((epoch, seq, result)) => {
                    // Results dispatched before a seek are dropped
                    if epoch != self.epoch {
                        if let Ok(BlockMsg::Data(data)) = result {
                            let _ = self.recycle_tx.send(data);
                        }
                        continue;
                    }
                    self.pending.insert(seq, result);
                }
                Err(_) => return Err(Error::resource("decode pipeline terminated")),
            }
        }
    }

    /// Coordinates a seek with the reader thread, returning the offset within the
    /// first block of the new epoch.
    fn seek(&mut self, offset: u64) -> Result<u64> {
        let (rel, epoch) = self.command.request_seek(offset)?;

        for (_, result) in std::mem::take(&mut self.pending) {
            if let Ok(BlockMsg::Data(data)) = result {
                let _ = self.recycle_tx.send(data);
            }
        }
        self.next_seq = 0;
        self.epoch = epoch;

        Ok(rel)
    }

    fn check_eof(&self) -> Result<EofStatus> {
        self.command.request_eof_check()
    }

    fn recycle(&self, spent: Vec<u8>) {
        if spent.capacity() > 0 {
            let _ = self.recycle_tx.send(spent);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.command.request_close();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        // The reader thread held the job sender, the workers drain and exit
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn decode_worker(
    job_rx: &Receiver<DecodeJob>,
    result_tx: &Sender<DecodeResult>,
    recycle_rx: &Receiver<Vec<u8>>,
    comp_tx: &Sender<Vec<u8>>,
) {
    let mut dctx = new_dctx();

    for job in job_rx.iter() {
        let DecodeJob {
            seq,
            epoch,
            comp,
            content_size,
        } = job;

        let mut uncomp = recycle_rx.try_recv().unwrap_or_default();
        let result = match &mut dctx {
            Ok(dctx) => decompress_frame(dctx, &comp, &mut uncomp, content_size)
                .map(|()| BlockMsg::Data(uncomp)),
            Err(_) => Err(Error::resource("decompression context allocation")),
        };

        let _ = comp_tx.send(comp);
        if result_tx.send((epoch, seq, result)).is_err() {
            break;
        }
    }
}

enum Parked {
    Resume(u64),
    Shutdown,
}

fn reader_loop<S: Seekable>(
    mut src: S,
    mut seek_table: Option<SeekTable>,
    job_tx: &Sender<DecodeJob>,
    result_tx: &Sender<DecodeResult>,
    comp_rx: &Receiver<Vec<u8>>,
    command: &CommandChannel,
) {
    let mut seq = 0u64;
    let mut epoch = 0u64;

    'reading: loop {
        match command.poll() {
            Some(ReaderCommand::Close) => break,
            Some(ReaderCommand::Seek(to)) => {
                if let Some(e) = handle_seek(&mut src, &mut seek_table, to, command) {
                    epoch = e;
                    seq = 0;
                }
                continue;
            }
            Some(ReaderCommand::HasEof) => {
                command.complete_eof_check(frame::probe_eof_marker(&mut src));
                continue;
            }
            None => {}
        }

        let mut comp = comp_rx.try_recv().unwrap_or_default();
        match frame::next_data_frame(&mut src, &mut comp) {
            Ok(Some(content_size)) => {
                let mut job = DecodeJob {
                    seq,
                    epoch,
                    comp,
                    content_size,
                };
                seq += 1;

                loop {
                    match job_tx.send_timeout(job, DISPATCH_POLL) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(returned)) => {
                            job = returned;
                            match command.poll() {
                                Some(ReaderCommand::Close) => break 'reading,
                                Some(ReaderCommand::Seek(to)) => {
                                    // The undispatched job belongs to the old epoch
                                    if let Some(e) =
                                        handle_seek(&mut src, &mut seek_table, to, command)
                                    {
                                        epoch = e;
                                        seq = 0;
                                    }
                                    continue 'reading;
                                }
                                Some(ReaderCommand::HasEof) => {
                                    command
                                        .complete_eof_check(frame::probe_eof_marker(&mut src));
                                }
                                None => {}
                            }
                        }
                        Err(SendTimeoutError::Disconnected(_)) => break 'reading,
                    }
                }
            }
            Ok(None) => {
                if result_tx.send((epoch, seq, Ok(BlockMsg::Eof))).is_err() {
                    break;
                }
                seq += 1;
                match park_after_end(&mut src, &mut seek_table, command) {
                    Parked::Resume(e) => {
                        epoch = e;
                        seq = 0;
                    }
                    Parked::Shutdown => break,
                }
            }
            Err(err) => {
                if result_tx.send((epoch, seq, Err(err))).is_err() {
                    break;
                }
                seq += 1;
                match park_after_end(&mut src, &mut seek_table, command) {
                    Parked::Resume(e) => {
                        epoch = e;
                        seq = 0;
                    }
                    Parked::Shutdown => break,
                }
            }
        }
    }
}

/// Waits on the command channel after the input ran dry. A successful seek restarts
/// the dispatch loop.
fn park_after_end<S: Seekable>(
    src: &mut S,
    seek_table: &mut Option<SeekTable>,
    command: &CommandChannel,
) -> Parked {
    loop {
        match command.wait() {
            ReaderCommand::Close => return Parked::Shutdown,
            ReaderCommand::Seek(to) => {
                if let Some(epoch) = handle_seek(src, seek_table, to, command) {
                    return Parked::Resume(epoch);
                }
            }
            ReaderCommand::HasEof => {
                command.complete_eof_check(frame::probe_eof_marker(src));
            }
        }
    }
}

/// Performs a seek on behalf of the caller. Returns the new epoch on success; a
/// failure is reported through the command channel.
fn handle_seek<S: Seekable>(
    src: &mut S,
    seek_table: &mut Option<SeekTable>,
    to: u64,
    command: &CommandChannel,
) -> Option<u64> {
    if seek_table.is_none() {
        match SeekTable::from_seekable(src) {
            Ok(table) => *seek_table = Some(table),
            Err(err) => {
                command.fail_seek(err);
                return None;
            }
        }
    }

    let table = seek_table.as_ref().expect("seek table was just loaded");
    let (target, rel) = if to == table.size_decomp() {
        // Position at the trailing index frames, the next parse reports EOF
        (table.size_comp(), 0)
    } else {
        match table.query(to) {
            Ok(point) => (point.comp_offset, to - point.uncomp_offset),
            Err(err) => {
                command.fail_seek(err);
                return None;
            }
        }
    };

    if let Err(err) = src.set_offset(OffsetFrom::Start(target)) {
        command.fail_seek(err);
        return None;
    }

    Some(command.complete_seek(rel))
}

use std::sync::{Condvar, Mutex};

use crate::{
    error::{Error, Result},
    frame::EofStatus,
};

/// Commands exchanged between the caller and the reader thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    None,
    Seek,
    SeekDone,
    SeekFail,
    HasEof,
    HasEofDone,
    Close,
}

#[derive(Debug)]
struct State {
    cmd: Command,
    /// Absolute uncompressed target on `Seek`, rewritten to the offset within the
    /// first decoded block on `SeekDone`.
    seek_to: u64,
    /// Bumped by the reader thread on every completed seek; results from older
    /// epochs are discarded by the consumer.
    epoch: u64,
    eof_status: EofStatus,
    error: Option<Error>,
}

/// A request the reader thread has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderCommand {
    Seek(u64),
    HasEof,
    Close,
}

/// Coordinates mid-flight seeks, EOF probes and shutdown between the caller and
/// the dedicated reader thread.
pub(crate) struct CommandChannel {
    state: Mutex<State>,
    cond: Condvar,
}

impl CommandChannel {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                cmd: Command::None,
                seek_to: 0,
                epoch: 0,
                eof_status: EofStatus::Absent,
                error: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Caller side: requests a seek to the absolute uncompressed `offset` and waits
    /// for the reader thread to acknowledge it.
    ///
    /// On success returns the offset within the first block of the new epoch and the
    /// new epoch number.
    pub(crate) fn request_seek(&self, offset: u64) -> Result<(u64, u64)> {
        let mut state = self.state.lock().expect("command mutex is never poisoned");
        state.cmd = Command::Seek;
        state.seek_to = offset;
        self.cond.notify_all();

        loop {
            match state.cmd {
                Command::SeekDone => {
                    let rel = state.seek_to;
                    let epoch = state.epoch;
                    state.cmd = Command::None;
                    return Ok((rel, epoch));
                }
                Command::SeekFail => {
                    let err = state
                        .error
                        .take()
                        .unwrap_or_else(|| Error::resource("seek failed on reader thread"));
                    state.cmd = Command::None;
                    return Err(err);
                }
                // Still pending, wake the reader again in case the signal was missed
                _ => {
                    self.cond.notify_all();
                    state = self
                        .cond
                        .wait(state)
                        .expect("command mutex is never poisoned");
                }
            }
        }
    }

    /// Caller side: asks the reader thread to probe for the trailing EOF marker.
    pub(crate) fn request_eof_check(&self) -> Result<EofStatus> {
        let mut state = self.state.lock().expect("command mutex is never poisoned");
        state.cmd = Command::HasEof;
        self.cond.notify_all();

        loop {
            match state.cmd {
                Command::HasEofDone => {
                    state.cmd = Command::None;
                    if let Some(err) = state.error.take() {
                        return Err(err);
                    }
                    return Ok(state.eof_status);
                }
                _ => {
                    self.cond.notify_all();
                    state = self
                        .cond
                        .wait(state)
                        .expect("command mutex is never poisoned");
                }
            }
        }
    }

    /// Caller side: tells the reader thread to shut down. Does not wait.
    pub(crate) fn request_close(&self) {
        let mut state = self.state.lock().expect("command mutex is never poisoned");
        state.cmd = Command::Close;
        self.cond.notify_all();
    }

    /// Reader side: non-blocking check for a pending request.
    pub(crate) fn poll(&self) -> Option<ReaderCommand> {
        let state = self.state.lock().expect("command mutex is never poisoned");
        match state.cmd {
            Command::Seek => Some(ReaderCommand::Seek(state.seek_to)),
            Command::HasEof => Some(ReaderCommand::HasEof),
            Command::Close => Some(ReaderCommand::Close),
            _ => None,
        }
    }

    /// Reader side: blocks until a request arrives. Used after EOF, when there are
    /// no frames left to dispatch.
    pub(crate) fn wait(&self) -> ReaderCommand {
        let mut state = self.state.lock().expect("command mutex is never poisoned");
        loop {
            match state.cmd {
                Command::Seek => return ReaderCommand::Seek(state.seek_to),
                Command::HasEof => return ReaderCommand::HasEof,
                Command::Close => return ReaderCommand::Close,
                _ => {
                    state = self
                        .cond
                        .wait(state)
                        .expect("command mutex is never poisoned");
                }
            }
        }
    }

    /// Reader side: acknowledges a seek, publishing the in-block offset `rel` and a
    /// fresh epoch. Returns the new epoch.
    pub(crate) fn complete_seek(&self, rel: u64) -> u64 {
        let mut state = self.state.lock().expect("command mutex is never poisoned");
        state.epoch += 1;
        state.seek_to = rel;
        state.cmd = Command::SeekDone;
        self.cond.notify_all();
        state.epoch
    }

    /// Reader side: reports a failed seek.
    pub(crate) fn fail_seek(&self, err: Error) {
        let mut state = self.state.lock().expect("command mutex is never poisoned");
        state.error = Some(err);
        state.cmd = Command::SeekFail;
        self.cond.notify_all();
    }

    /// Reader side: publishes the result of an EOF probe.
    pub(crate) fn complete_eof_check(&self, result: Result<EofStatus>) {
        let mut state = self.state.lock().expect("command mutex is never poisoned");
        match result {
            Ok(status) => state.eof_status = status,
            Err(err) => state.error = Some(err),
        }
        state.cmd = Command::HasEofDone;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn seek_handshake() {
        let chan = Arc::new(CommandChannel::new());
        let reader = {
            let chan = Arc::clone(&chan);
            std::thread::spawn(move || {
                loop {
                    match chan.wait() {
                        ReaderCommand::Seek(to) => {
                            assert_eq!(to, 1234);
                            chan.complete_seek(34);
                        }
                        ReaderCommand::HasEof => {
                            chan.complete_eof_check(Ok(EofStatus::Present));
                        }
                        ReaderCommand::Close => break,
                    }
                }
            })
        };

        let (rel, epoch) = chan.request_seek(1234).unwrap();
        assert_eq!(rel, 34);
        assert_eq!(epoch, 1);
        assert_eq!(chan.request_eof_check().unwrap(), EofStatus::Present);

        chan.request_close();
        reader.join().unwrap();
    }

    #[test]
    fn failed_seek_surfaces_error() {
        let chan = Arc::new(CommandChannel::new());
        let reader = {
            let chan = Arc::clone(&chan);
            std::thread::spawn(move || {
                if let ReaderCommand::Seek(_) = chan.wait() {
                    chan.fail_seek(Error::offset_out_of_range());
                }
                assert_eq!(chan.wait(), ReaderCommand::Close);
            })
        };

        assert!(
            chan.request_seek(u64::MAX)
                .unwrap_err()
                .is_offset_out_of_range()
        );
        chan.request_close();
        reader.join().unwrap();
    }
}

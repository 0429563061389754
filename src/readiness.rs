//! Waiting for a transport to become readable or writable.

use std::{io, time::Duration};

use log::*;

use crate::stream::Transport;

/// What to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Only incoming data.
    Read,
    /// Only room to write.
    Write,
    /// Whichever comes first.
    ReadWrite,
}

impl WaitMode {
    /// `ReadWrite` while there is something to flush, `Read` otherwise.
    pub fn for_pending(pending: usize) -> Self {
        if pending > 0 {
            WaitMode::ReadWrite
        } else {
            WaitMode::Read
        }
    }

    fn wants_read(self) -> bool {
        matches!(self, WaitMode::Read | WaitMode::ReadWrite)
    }

    fn wants_write(self) -> bool {
        matches!(self, WaitMode::Write | WaitMode::ReadWrite)
    }
}

/// One outcome of a readiness wait.
#[derive(Debug)]
pub enum Ready {
    /// The readiness check itself failed.
    Error(io::Error),
    /// The transport can be read.
    Read,
    /// The transport can be written.
    Write,
}

/// Block until `transport` is ready for `mode`.
///
/// The result is either a single [`Ready::Error`], or `Read` followed by
/// `Write` for whichever of the two the transport reported. Both may be
/// present in `ReadWrite` mode and neither if `timeout` ran out.
pub fn wait<T>(transport: &mut T, mode: WaitMode, timeout: Option<Duration>) -> Vec<Ready>
where
    T: Transport + ?Sized,
{
    trace!("Waiting for {:?} (timeout {:?})", mode, timeout);
    match transport.poll_ready(mode, timeout) {
        Err(err) => vec![Ready::Error(err)],
        Ok(readiness) => {
            let mut ready = Vec::with_capacity(2);
            if readiness.readable && mode.wants_read() {
                ready.push(Ready::Read);
            }
            if readiness.writable && mode.wants_write() {
                ready.push(Ready::Write);
            }
            ready
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Result as IoResult, Write},
        net::Shutdown,
    };

    use super::*;
    use crate::stream::Readiness;

    struct Fixed(IoResult<Readiness>);

    impl Read for Fixed {
        fn read(&mut self, _: &mut [u8]) -> IoResult<usize> {
            Ok(0)
        }
    }

    impl Write for Fixed {
        fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> IoResult<()> {
            Ok(())
        }
    }

    impl Transport for Fixed {
        fn set_blocking(&mut self, _: bool) -> bool {
            true
        }
        fn is_alive(&self) -> bool {
            true
        }
        fn poll_ready(&mut self, _: WaitMode, _: Option<Duration>) -> IoResult<Readiness> {
            match &self.0 {
                Ok(r) => Ok(*r),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
        fn shutdown(&mut self, _: Shutdown) -> IoResult<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn address(&self) -> String {
            String::new()
        }
        fn lifetime(&self) -> Duration {
            Duration::ZERO
        }
    }

    fn both() -> Fixed {
        Fixed(Ok(Readiness { readable: true, writable: true }))
    }

    #[test]
    fn read_comes_before_write() {
        let ready = wait(&mut both(), WaitMode::ReadWrite, None);
        assert!(matches!(ready[..], [Ready::Read, Ready::Write]));
    }

    #[test]
    fn mode_filters_events() {
        assert!(matches!(wait(&mut both(), WaitMode::Read, None)[..], [Ready::Read]));
        assert!(matches!(wait(&mut both(), WaitMode::Write, None)[..], [Ready::Write]));
    }

    #[test]
    fn timeout_yields_nothing() {
        let mut idle = Fixed(Ok(Readiness::default()));
        assert!(wait(&mut idle, WaitMode::ReadWrite, Some(Duration::from_millis(1))).is_empty());
    }

    #[test]
    fn failure_is_reported_alone() {
        let mut broken = Fixed(Err(io::ErrorKind::Other.into()));
        let ready = wait(&mut broken, WaitMode::ReadWrite, None);
        assert_eq!(ready.len(), 1);
        assert!(matches!(ready[0], Ready::Error(_)));
    }

    #[test]
    fn pending_output_selects_mode() {
        assert_eq!(WaitMode::for_pending(0), WaitMode::Read);
        assert_eq!(WaitMode::for_pending(12), WaitMode::ReadWrite);
    }
}

//! Unix socket transport with file descriptor passing
//!
//! Regular bytes and `SCM_RIGHTS` ancillary data go through
//! `nix::sys::socket::{sendmsg, recvmsg}`, driven by tokio readiness so
//! no call ever blocks the runtime.

use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};
use tokio::io::Interest;
use tokio::net::UnixStream;

/// Most file descriptors accepted in one receive
const MAX_FDS_PER_RECV: usize = 28;

/// Bytes read per receive call
pub const RECV_CHUNK: usize = 4096;

/// Stream socket to the compositor
#[derive(Debug)]
pub struct WireSocket {
    stream: UnixStream,
}

impl WireSocket {
    /// Connect to a socket path
    pub async fn connect(path: &Path) -> io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Write a whole message, attaching `fds` to its first byte
    pub async fn send(&self, bytes: &[u8], fds: &[RawFd]) -> io::Result<()> {
        let fd = self.stream.as_raw_fd();
        let mut written = 0;
        let mut pending_fds = fds;

        while written < bytes.len() {
            let chunk = &bytes[written..];
            let n = self
                .stream
                .async_io(Interest::WRITABLE, || {
                    let iov = [IoSlice::new(chunk)];
                    let rights = [ControlMessage::ScmRights(pending_fds)];
                    let cmsgs: &[ControlMessage<'_>] =
                        if pending_fds.is_empty() { &[] } else { &rights };
                    socket::sendmsg::<()>(fd, &iov, cmsgs, MsgFlags::MSG_NOSIGNAL, None)
                        .map_err(io::Error::from)
                })
                .await?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "compositor socket accepted no bytes",
                ));
            }
            // Ancillary data rides along with the first successful write only
            pending_fds = &[];
            written += n;
        }
        Ok(())
    }

    /// Receive available bytes into `buf`, queueing any received fds
    ///
    /// Returns 0 when the peer closed the connection.
    pub async fn recv(&self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
        let fd = self.stream.as_raw_fd();
        let (n, received) = self
            .stream
            .async_io(Interest::READABLE, || {
                let mut cmsg_buf = nix::cmsg_space!([RawFd; MAX_FDS_PER_RECV]);
                let mut iov = [IoSliceMut::new(&mut *buf)];
                let msg = socket::recvmsg::<()>(
                    fd,
                    &mut iov,
                    Some(&mut cmsg_buf),
                    MsgFlags::MSG_CMSG_CLOEXEC,
                )
                .map_err(io::Error::from)?;

                let mut received = Vec::new();
                for cmsg in msg.cmsgs().map_err(io::Error::from)? {
                    if let ControlMessageOwned::ScmRights(raw) = cmsg {
                        received.extend(raw);
                    }
                }
                Ok((msg.bytes, received))
            })
            .await?;

        for raw in received {
            // recvmsg handed us fresh descriptors that nothing else owns
            fds.push_back(unsafe { OwnedFd::from_raw_fd(raw) });
        }
        Ok(n)
    }
}

use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use iop_wire::{FrameHeader, DEFAULT_MAX_PAYLOAD_LEN, HEADER_LEN, MAX_FDS_PER_SEND};
use tokio::io::unix::AsyncFd;

use crate::{Frame, TransportBackend, TransportError};

/// Transport over `AF_UNIX SOCK_SEQPACKET`, the only backend that can carry
/// file descriptors (§4.1, §6, §10.6). `tokio` has no built-in seqpacket
/// socket type, so the raw fd is created with `libc::socket` and driven
/// through `tokio::io::unix::AsyncFd` for readiness, with the actual
/// `sendmsg`/`recvmsg` calls (and their `SCM_RIGHTS` ancillary data) issued
/// directly via `libc`.
///
/// Each datagram carries exactly one frame: `SOCK_SEQPACKET` preserves
/// message boundaries, so there is no header-then-payload reassembly loop
/// like the stream backend's.
pub struct SeqpacketTransport {
    fd: AsyncFd<RawFdHandle>,
    owned: OwnedFd,
    closed: AtomicBool,
}

/// `tokio::io::unix::AsyncFd` requires its parameter to implement
/// [`AsRawFd`] itself; `RawFd` (a bare `c_int`) does not, so the descriptor
/// is wrapped in this zero-cost newtype purely to satisfy that bound. The
/// real owner of the descriptor is `SeqpacketTransport::owned`.
struct RawFdHandle(RawFd);

impl AsRawFd for RawFdHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl SeqpacketTransport {
    /// Wrap an already-connected seqpacket socket (e.g. one accepted by a
    /// listener, or one half of [`SeqpacketTransport::pair`]).
    pub fn from_owned_fd(owned: OwnedFd) -> io::Result<Self> {
        set_nonblocking(owned.as_raw_fd())?;
        let fd = AsyncFd::new(RawFdHandle(owned.as_raw_fd()))?;
        Ok(Self { fd, owned, closed: AtomicBool::new(false) })
    }

    /// Connect to a seqpacket socket bound at `path`.
    pub fn connect(path: &Path) -> io::Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut addr: libc::sockaddr_un = unsafe { MaybeUninit::zeroed().assume_init() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let path_bytes = path.as_os_str().as_encoded_bytes();
        if path_bytes.len() >= addr.sun_path.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "socket path too long"));
        }
        for (dst, src) in addr.sun_path.iter_mut().zip(path_bytes.iter()) {
            *dst = *src as libc::c_char;
        }
        let len = std::mem::size_of::<libc::sa_family_t>() + path_bytes.len() + 1;
        let ret = unsafe {
            libc::connect(fd, &addr as *const _ as *const libc::sockaddr, len as libc::socklen_t)
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Self::from_owned_fd(owned)
    }

    /// A connected in-process pair, handy for tests and for local mode when
    /// FD passing is actually needed (rare: local mode usually prefers
    /// `Payload::Local`).
    pub fn pair() -> io::Result<(Self, Self)> {
        let mut fds = [0 as libc::c_int; 2];
        let ret = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0, fds.as_mut_ptr())
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        let a = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let b = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        Ok((Self::from_owned_fd(a)?, Self::from_owned_fd(b)?))
    }

    /// Credentials of the process on the other end of this socket (§10.6),
    /// captured once at connect time by the caller — not re-read per frame.
    pub fn peer_credentials(&self) -> io::Result<PeerCredentials> {
        peer_credentials(self.owned.as_raw_fd())
    }

    fn check_closed(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    async fn send_datagram(&self, bytes: &[u8], fds: &[OwnedFd]) -> Result<(), TransportError> {
        self.check_closed()?;
        if fds.len() > MAX_FDS_PER_SEND {
            return Err(TransportError::TooManyFds { count: fds.len(), max: MAX_FDS_PER_SEND });
        }
        loop {
            let mut guard = self.fd.writable().await.map_err(TransportError::Io)?;
            match guard.try_io(|inner| send_scm_rights(inner.get_ref().as_raw_fd(), bytes, fds)) {
                Ok(result) => return result.map_err(TransportError::Io),
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv_datagram(&self) -> Result<(Vec<u8>, Vec<OwnedFd>), TransportError> {
        self.check_closed()?;
        loop {
            let mut guard = self.fd.readable().await.map_err(TransportError::Io)?;
            match guard.try_io(|inner| recv_scm_rights(inner.get_ref().as_raw_fd())) {
                Ok(result) => return result.map_err(TransportError::Io),
                Err(_would_block) => continue,
            }
        }
    }
}

impl TransportBackend for SeqpacketTransport {
    async fn send_frame(&self, frame: Frame, fds: Vec<OwnedFd>) -> Result<(), TransportError> {
        let encoded = frame.encode();
        if encoded.len() > iop_wire::MAX_FRAME_LEN {
            // A datagram is one `sendmsg` call; unlike a stream, there is no way to
            // split a frame across more than one without losing the message boundary.
            return Err(TransportError::FrameTooLarge { len: frame.header.payload_len, max: iop_wire::MAX_FRAME_LEN as u32 });
        }
        self.send_datagram(&encoded, &fds).await
    }

    async fn recv_frame(&self) -> Result<(Frame, Vec<OwnedFd>), TransportError> {
        let (bytes, fds) = self.recv_datagram().await?;
        if bytes.len() < HEADER_LEN {
            return Err(TransportError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "short datagram")));
        }
        let header_bytes: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().unwrap();
        let header = FrameHeader::from_bytes(&header_bytes);
        if header.payload_len > DEFAULT_MAX_PAYLOAD_LEN {
            return Err(TransportError::FrameTooLarge { len: header.payload_len, max: DEFAULT_MAX_PAYLOAD_LEN });
        }
        let mut payload = BytesMut::with_capacity(bytes.len() - HEADER_LEN);
        payload.extend_from_slice(&bytes[HEADER_LEN..]);
        Ok((Frame::new(header, Bytes::from(payload)), fds))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `sendmsg` with up to [`MAX_FDS_PER_SEND`] descriptors attached as
/// `SCM_RIGHTS` ancillary data in a single control message.
fn send_scm_rights(fd: RawFd, data: &[u8], fds: &[OwnedFd]) -> io::Result<()> {
    let mut iov = libc::iovec { iov_base: data.as_ptr() as *mut libc::c_void, iov_len: data.len() };

    let mut cmsg_buf;
    let (control_ptr, control_len) = if fds.is_empty() {
        (std::ptr::null_mut(), 0)
    } else {
        let fds_bytes = fds.len() * std::mem::size_of::<libc::c_int>();
        let space = unsafe { libc::CMSG_SPACE(fds_bytes as u32) } as usize;
        cmsg_buf = vec![0u8; space];
        let mut msg = libc::msghdr {
            msg_name: std::ptr::null_mut(),
            msg_namelen: 0,
            msg_iov: &mut iov,
            msg_iovlen: 1,
            msg_control: cmsg_buf.as_mut_ptr() as *mut libc::c_void,
            msg_controllen: space as _,
            msg_flags: 0,
        };
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(fds_bytes as u32) as _;
            let data_ptr = libc::CMSG_DATA(cmsg) as *mut libc::c_int;
            for (i, fd) in fds.iter().enumerate() {
                std::ptr::write_unaligned(data_ptr.add(i), fd.as_raw_fd());
            }
        }
        (cmsg_buf.as_mut_ptr() as *mut libc::c_void, space as libc::socklen_t)
    };

    let msg = libc::msghdr {
        msg_name: std::ptr::null_mut(),
        msg_namelen: 0,
        msg_iov: &mut iov,
        msg_iovlen: 1,
        msg_control: control_ptr,
        msg_controllen: control_len as _,
        msg_flags: 0,
    };

    let n = unsafe { libc::sendmsg(fd, &msg, libc::MSG_DONTWAIT) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `recvmsg` into a fixed-size buffer big enough for one seqpacket message,
/// extracting any `SCM_RIGHTS` descriptors from the control data.
fn recv_scm_rights(fd: RawFd) -> io::Result<(Vec<u8>, Vec<OwnedFd>)> {
    let mut data_buf = vec![0u8; iop_wire::MAX_FRAME_LEN];
    let cmsg_space = unsafe { libc::CMSG_SPACE((MAX_FDS_PER_SEND * std::mem::size_of::<libc::c_int>()) as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut iov = libc::iovec { iov_base: data_buf.as_mut_ptr() as *mut libc::c_void, iov_len: data_buf.len() };
    let mut msg = libc::msghdr {
        msg_name: std::ptr::null_mut(),
        msg_namelen: 0,
        msg_iov: &mut iov,
        msg_iovlen: 1,
        msg_control: cmsg_buf.as_mut_ptr() as *mut libc::c_void,
        msg_controllen: cmsg_buf.len() as _,
        msg_flags: 0,
    };

    let n = unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_DONTWAIT) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed seqpacket socket"));
    }
    data_buf.truncate(n as usize);

    let mut fds = Vec::new();
    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    while !cmsg.is_null() {
        let level = unsafe { (*cmsg).cmsg_level };
        let ty = unsafe { (*cmsg).cmsg_type };
        if level == libc::SOL_SOCKET && ty == libc::SCM_RIGHTS {
            let data = unsafe { libc::CMSG_DATA(cmsg) };
            let count = (unsafe { (*cmsg).cmsg_len } as usize - unsafe { libc::CMSG_LEN(0) } as usize)
                / std::mem::size_of::<libc::c_int>();
            for i in 0..count {
                let raw: libc::c_int = unsafe { std::ptr::read_unaligned(data.add(i * std::mem::size_of::<libc::c_int>()) as *const libc::c_int) };
                fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
    }

    Ok((data_buf, fds))
}

/// Capture `SO_PEERCRED` (Linux) / `LOCAL_PEERCRED` (Apple) credentials of
/// the process on the other end of a connected Unix socket (§10.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

#[cfg(target_os = "linux")]
pub fn peer_credentials(fd: RawFd) -> io::Result<PeerCredentials> {
    let mut cred: libc::ucred = unsafe { MaybeUninit::zeroed().assume_init() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(PeerCredentials { uid: cred.uid, gid: cred.gid, pid: Some(cred.pid) })
}

#[cfg(target_os = "macos")]
pub fn peer_credentials(fd: RawFd) -> io::Result<PeerCredentials> {
    let mut euid: libc::uid_t = 0;
    let mut egid: libc::gid_t = 0;
    let ret = unsafe { libc::getpeereid(fd, &mut euid, &mut egid) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(PeerCredentials { uid: euid, gid: egid, pid: None })
}

impl Drop for SeqpacketTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

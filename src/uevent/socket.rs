//! `NETLINK_KOBJECT_UEVENT` socket.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use log::debug;

use super::listener::DatagramSource;

/// Subscribe to every multicast group.
const ALL_GROUPS: u32 = 0xFFFF_FFFF;

/// Requested kernel receive buffer; bursts during trigger are large.
const RECV_BUFFER_BYTES: libc::c_int = 1024 * 1024;

/// Raw netlink socket bound to the kernel's device-event broadcast.
#[derive(Debug)]
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    pub fn open() -> io::Result<Self> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: raw is a freshly created descriptor we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain old data.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // Port id 0 lets the kernel assign a unique one.
        addr.nl_pid = 0;
        addr.nl_groups = ALL_GROUPS;

        // SAFETY: addr is a valid sockaddr_nl of the length we pass.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let socket = Self { fd };
        if let Err(e) = socket.grow_receive_buffer() {
            debug!("uevent socket: keeping default receive buffer: {}", e);
        }
        Ok(socket)
    }

    /// Try SO_RCVBUFFORCE (needs CAP_NET_ADMIN), then plain SO_RCVBUF.
    fn grow_receive_buffer(&self) -> io::Result<()> {
        let size = RECV_BUFFER_BYTES;
        for option in [libc::SO_RCVBUFFORCE, libc::SO_RCVBUF] {
            // SAFETY: size is a c_int and we pass its exact length.
            let rc = unsafe {
                libc::setsockopt(
                    self.fd.as_raw_fd(),
                    libc::SOL_SOCKET,
                    option,
                    &size as *const libc::c_int as *const libc::c_void,
                    mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if rc == 0 {
                return Ok(());
            }
        }
        Err(io::Error::last_os_error())
    }
}

impl DatagramSource for UeventSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for writes of buf.len() bytes.
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

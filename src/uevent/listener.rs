//! The receive loop.
//!
//! Its only suspension point is the blocking receive. Every parsed event is
//! handed to the dispatcher, which must not block, and the loop goes
//! straight back to receiving.

use std::io;

use log::{debug, warn};

use super::HotplugEvent;

/// Something that yields whole datagrams.
pub trait DatagramSource {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Receive one datagram and dispatch it if it parses.
///
/// Returns the receive error, if any; unparsable datagrams are not errors.
pub fn pump<S, F>(source: &mut S, buf: &mut [u8], dispatch: &mut F) -> io::Result<()>
where
    S: DatagramSource + ?Sized,
    F: FnMut(HotplugEvent),
{
    let len = source.recv(buf)?;
    match HotplugEvent::parse(&buf[..len]) {
        Ok(event) => dispatch(event),
        Err(e) => debug!("uevent: ignoring datagram: {}", e),
    }
    Ok(())
}

/// Run the receive loop forever.
///
/// Receive errors (including `ENOBUFS` overruns) are logged and the loop
/// continues.
pub fn serve<S, F>(source: &mut S, buffer_size: usize, mut dispatch: F)
where
    S: DatagramSource + ?Sized,
    F: FnMut(HotplugEvent),
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        match pump(source, &mut buf, &mut dispatch) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                warn!("uevent: receive buffer overrun, events were lost");
            }
            Err(e) => warn!("uevent: receive failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<io::Result<Vec<u8>>>);

    impl DatagramSource for Scripted {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let datagram = self.0.pop_front().expect("script exhausted")?;
            buf[..datagram.len()].copy_from_slice(&datagram);
            Ok(datagram.len())
        }
    }

    #[test]
    fn test_pump_dispatches_and_survives_errors() {
        let mut source = Scripted(VecDeque::from(vec![
            Ok(b"add@/devices/a\0MODALIAS=usb:v1\0".to_vec()),
            Err(io::Error::from_raw_os_error(libc::ENOBUFS)),
            Ok(b"libudev\0binary".to_vec()),
            Ok(b"remove@/devices/a\0".to_vec()),
        ]));
        let mut buf = vec![0u8; 256];
        let mut events = Vec::new();
        let mut dispatch = |event: HotplugEvent| events.push(event);

        pump(&mut source, &mut buf, &mut dispatch).unwrap();
        assert!(pump(&mut source, &mut buf, &mut dispatch).is_err());
        pump(&mut source, &mut buf, &mut dispatch).unwrap();
        pump(&mut source, &mut buf, &mut dispatch).unwrap();

        let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["add", "remove"]);
        assert_eq!(events[0].modalias(), Some("usb:v1"));
    }
}

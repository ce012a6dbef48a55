//! The link worker: the only owner of an open serial connection to the robot.

use serialport::SerialPort;
use tracing::{debug, info, trace, warn};

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::BridgeConfig;
use crate::error::LinkFault;
use crate::playback::PlaybackFlag;
use crate::queue::{Command, CommandQueue};
use crate::telemetry::{self, Telemetry};

use super::port::{self, PortProvider};

/// The maximum number of bytes read from the device per iteration.
const READ_CHUNK: usize = 64;
/// Inbound lines longer than this are discarded, since the device never sends them.
const MAX_LINE_LEN: usize = 256;
/// The number of consecutive writes that may time out without progress before the device is
/// considered stalled.
const MAX_STALLED_WRITES: u32 = 100;

/// Everything a link worker needs. The worker owns its device handle, and shares the rest with the
/// supervisor and the producers.
pub struct WorkerContext {
    /// The path of the device to open.
    pub path: String,
    pub ports: Arc<dyn PortProvider>,
    pub config: BridgeConfig,
    pub queue: CommandQueue,
    pub telemetry: Telemetry,
    pub playback: PlaybackFlag,
    /// Set by the supervisor to stop the worker, or by the worker itself when it faults.
    pub halt: Arc<AtomicBool>,
}

/// Starts a worker on a new thread.
pub fn spawn(ctx: WorkerContext) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("link-worker".to_string())
        .spawn(move || run(ctx))
}

/// Sets the halt flag when dropped, so that the supervisor sees the worker as gone however it
/// exits, including by panicking.
struct HaltOnExit<'a>(&'a AtomicBool);

impl Drop for HaltOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Runs the worker until it is halted or hits a fault. The device is closed before this returns.
pub fn run(ctx: WorkerContext) {
    let _halt_on_exit = HaltOnExit(&ctx.halt);
    info!("Link worker starting on {}", ctx.path);

    let result = port::open_port(&*ctx.ports, &ctx.path, &ctx.config)
        .map_err(LinkFault::Open)
        .and_then(|p| serve(&ctx, p));

    match result {
        Ok(()) => info!("Link worker on {} stopped", ctx.path),
        Err(e) => warn!("Link fault on {}: {}", ctx.path, e),
    }
}

/// Processes I/O on `port` until halted. Takes ownership of the port so that it is closed on every
/// return path.
fn serve(ctx: &WorkerContext, mut port: Box<dyn SerialPort>) -> Result<(), LinkFault> {
    let mut lines = LineBuffer::new();
    let mut read_buf = [0; READ_CHUNK];
    // The unwritten tail of the command currently being written
    let mut data_to_write: Option<Vec<u8>> = None;
    let mut stalled_writes = 0;

    while !ctx.halt.load(Ordering::SeqCst) {
        // Finish the current command before taking the next one
        if data_to_write.is_none() {
            data_to_write = ctx.queue.drain_if_nonempty().map(|c| {
                debug!("Sending command: {}", c);
                frame(&c)
            });
        }

        let mut active = false;

        if let Some(ref d) = data_to_write {
            active = true;
            let remaining = write_pending(&mut port, d)?;

            stalled_writes = match remaining {
                Some(ref r) if r.len() == d.len() => stalled_writes + 1,
                _ => 0,
            };
            if stalled_writes > MAX_STALLED_WRITES {
                return Err(LinkFault::Write(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "device stopped accepting data",
                )));
            }

            data_to_write = remaining;
        }

        let read = read_available(port.as_mut(), &mut read_buf)?;
        if !read.is_empty() {
            active = true;

            for line in read.iter().filter_map(|b| lines.push(*b)) {
                handle_line(&ctx.telemetry, &line);
            }
        }

        if ctx.playback.is_active() {
            trace!("Exclusive playback active, slowing down");
            thread::sleep(ctx.config.backpressure_interval);
        } else if !active {
            thread::sleep(ctx.config.poll_interval);
        }
    }

    Ok(())
}

/// Returns the bytes to write for `command`.
fn frame(command: &Command) -> Vec<u8> {
    let mut data = Vec::with_capacity(command.as_str().len() + 1);
    data.extend_from_slice(command.as_str().as_bytes());
    data.push(b'\n');
    data
}

/// Writes as much of `data` as possible. Returns the data that is still left to be written, or a
/// fault if the device failed.
fn write_pending<W: Write>(out: W, data: &[u8]) -> Result<Option<Vec<u8>>, LinkFault> {
    match write(out, data) {
        Ok(remaining) => Ok(remaining),
        Err(e) if is_temporary(&e) => Ok(Some(data.to_vec())),
        Err(e) => Err(LinkFault::Write(e)),
    }
}

/// Reads the bytes that are currently available from `port`, up to the size of `buf`.
fn read_available<'a>(
    port: &mut dyn SerialPort,
    buf: &'a mut [u8],
) -> Result<&'a [u8], LinkFault> {
    let available = port.bytes_to_read()? as usize;
    if available == 0 {
        return Ok(&[]);
    }

    let len = available.min(buf.len());
    match port.read(&mut buf[..len]) {
        Ok(bytes) => Ok(&buf[..bytes]),
        Err(e) if is_temporary(&e) => Ok(&[]),
        Err(e) => Err(LinkFault::Read(e)),
    }
}

/// Parses a complete inbound line and applies any telemetry it carries.
fn handle_line(telemetry: &Telemetry, line: &str) {
    debug!("Received: {}", line);

    if let Some(event) = telemetry::parse_line(line) {
        telemetry.apply(&event);
    }
}

/// Returns whether `e` is a transient failure that should be retried rather than treated as a
/// fault.
fn is_temporary(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Writes `data` to `out`. Returns `Ok(None)` if all the data was successfully written, or
/// `Ok(Some)` with the remaining data otherwise.
fn write<F: Write>(mut out: F, data: &[u8]) -> Result<Option<Vec<u8>>, io::Error> {
    let bytes = out.write(data)?;

    if bytes < data.len() {
        Ok(Some(data[bytes..].to_vec()))
    } else {
        Ok(None)
    }
}

/// Reassembles inbound bytes into lines terminated by `\n` or `\r`.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Set while skipping the rest of an overlong line.
    overflowed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer::default()
    }

    /// Adds a byte to the buffer. Returns the completed line if `byte` terminated one. Empty lines
    /// are skipped.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\n' | b'\r' => {
                let overflowed = std::mem::replace(&mut self.overflowed, false);

                if self.buf.is_empty() || overflowed {
                    self.buf.clear();
                    None
                } else {
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    Some(line)
                }
            }
            _ if self.overflowed => None,
            _ => {
                if self.buf.len() == MAX_LINE_LEN {
                    debug!("Discarding overlong inbound line");
                    self.buf.clear();
                    self.overflowed = true;
                } else {
                    self.buf.push(byte);
                }

                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_all(lines: &mut LineBuffer, data: &[u8]) -> Vec<String> {
        data.iter().filter_map(|b| lines.push(*b)).collect()
    }

    #[test]
    fn test_write() {
        let mut buf = vec![0; 4];
        let data = vec![1, 2, 3, 4];
        // All the data was written
        assert_eq!(None, write(&mut buf[..], &data).unwrap());

        let mut buf = vec![0; 3];
        let data = vec![1, 2, 3, 4];
        // Remaining data is returned
        assert_eq!(Some(vec![4]), write(&mut buf[..], &data).unwrap());
    }

    /// A writer that fails with the given error kind.
    struct FailingWriter(io::ErrorKind);

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(self.0.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_pending() {
        let mut buf = vec![0; 8];
        assert_eq!(None, write_pending(&mut buf[..], b"X10\n").unwrap());
        assert_eq!(b"X10\n", &buf[..4]);

        // Temporary failures keep the data for the next attempt
        let res = write_pending(FailingWriter(io::ErrorKind::TimedOut), b"Y5\n");
        assert_eq!(Some(b"Y5\n".to_vec()), res.unwrap());

        // Anything else is a fault
        let res = write_pending(FailingWriter(io::ErrorKind::BrokenPipe), b"Y5\n");
        assert!(matches!(res, Err(LinkFault::Write(_))));
    }

    #[test]
    fn test_frame() {
        assert_eq!(b"A3\n".to_vec(), frame(&Command::animation("3")));
    }

    #[test]
    fn test_line_buffer() {
        let mut lines = LineBuffer::new();

        assert_eq!(vec!["Battery_87"], push_all(&mut lines, b"Battery_87\n"));
        // Carriage returns terminate lines too, and the empty line between \r and \n is skipped
        assert_eq!(vec!["Ready", "Battery_50"], push_all(&mut lines, b"Ready\r\nBattery_50\r\n"));
        // Partial lines are kept until terminated
        assert!(push_all(&mut lines, b"Batt").is_empty());
        assert_eq!(vec!["Battery_12"], push_all(&mut lines, b"ery_12\n"));
    }

    #[test]
    fn test_line_buffer_invalid_utf8() {
        let mut lines = LineBuffer::new();

        assert_eq!(vec!["A\u{fffd}B"], push_all(&mut lines, b"A\xffB\n"));
    }

    #[test]
    fn test_line_buffer_overflow() {
        let mut lines = LineBuffer::new();

        let long = vec![b'x'; MAX_LINE_LEN + 10];
        assert!(push_all(&mut lines, &long).is_empty());
        // The overlong line is dropped as a whole, and the next one is intact
        assert!(push_all(&mut lines, b"\n").is_empty());
        assert_eq!(vec!["Battery_9"], push_all(&mut lines, b"Battery_9\n"));
    }
}

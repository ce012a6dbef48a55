//! A mock serial device.

use serialport::{
    ClearBuffer, DataBits, ErrorKind, FlowControl, Parity, SerialPort, SerialPortInfo,
    SerialPortType, StopBits,
};

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A scriptable stand-in for the robot's microcontroller. This type is a handle that can be cloned
/// to control the device from multiple locations; each call to [`open`][Self::open] returns a new
/// [`TestPort`] connected to it.
#[derive(Clone)]
pub struct TestDevice {
    inner: Arc<Shared>,
}

struct Shared {
    /// The path the device is listed under.
    path: String,
    /// Bytes written to the device by the bridge.
    written: Mutex<Vec<u8>>,
    /// Bytes waiting to be read by the bridge.
    inbound: Mutex<VecDeque<u8>>,
    /// Whether opening the device fails.
    fail_open: AtomicBool,
    /// Whether writes fail. Simulates a physical disconnect on the next write.
    fail_writes: AtomicBool,
    /// Whether reads fail.
    fail_reads: AtomicBool,
    /// Whether writes time out without accepting any data.
    stall_writes: AtomicBool,
    /// The number of ports to this device that are currently open.
    open_ports: AtomicUsize,
    /// The number of times the device was opened.
    open_count: AtomicUsize,
    /// The number of times pending input was discarded.
    clear_count: AtomicUsize,
}

impl TestDevice {
    /// Returns a new `TestDevice` listed under `path` that has no errors.
    pub fn new(path: &str) -> Self {
        TestDevice {
            inner: Arc::new(Shared {
                path: path.to_string(),
                written: Mutex::new(Vec::new()),
                inbound: Mutex::new(VecDeque::new()),
                fail_open: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                fail_reads: AtomicBool::new(false),
                stall_writes: AtomicBool::new(false),
                open_ports: AtomicUsize::new(0),
                open_count: AtomicUsize::new(0),
                clear_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Returns how the device appears in a port listing.
    pub fn info(&self) -> SerialPortInfo {
        SerialPortInfo {
            port_name: self.inner.path.clone(),
            port_type: SerialPortType::Unknown,
        }
    }

    /// Opens a new port to the device, or fails if [`set_fail_open`][Self::set_fail_open] was set.
    pub fn open(&self) -> serialport::Result<Box<dyn SerialPort>> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(serialport::Error::new(ErrorKind::NoDevice, "device unavailable"));
        }

        self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestPort::new(self.clone())))
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every write time out, as a device that stopped draining its input would.
    pub fn set_stall_writes(&self, stall: bool) {
        self.inner.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// Queues data for the bridge to read, as if the device had sent it.
    pub fn send(&self, data: &[u8]) {
        self.inbound().extend(data);
    }

    /// Returns everything the bridge has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.written.lock().unwrap().clone()
    }

    /// Returns the complete lines the bridge has written so far.
    pub fn written_lines(&self) -> Vec<String> {
        let written = self.written();
        let text = String::from_utf8_lossy(&written);

        text.split_terminator('\n').map(str::to_string).collect()
    }

    /// Returns the number of bytes the bridge has not read yet.
    pub fn pending_inbound(&self) -> usize {
        self.inbound().len()
    }

    /// Returns the number of ports to the device that are open right now.
    pub fn open_ports(&self) -> usize {
        self.inner.open_ports.load(Ordering::SeqCst)
    }

    /// Returns the number of times the device has been opened.
    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    /// Returns the number of times pending input was discarded through any port. The bridge does
    /// this right after opening, so tests can wait for it before sending data.
    pub fn clear_count(&self) -> usize {
        self.inner.clear_count.load(Ordering::SeqCst)
    }

    fn inbound(&self) -> MutexGuard<VecDeque<u8>> {
        self.inner.inbound.lock().unwrap()
    }
}

/// An open port to a [`TestDevice`]. The device counts its open ports, so tests can check that
/// every port is eventually closed (dropped).
pub struct TestPort {
    device: TestDevice,
}

impl TestPort {
    fn new(device: TestDevice) -> Self {
        device.inner.open_ports.fetch_add(1, Ordering::SeqCst);

        TestPort {
            device,
        }
    }

    // Returns `Err` if `flag` is set, or `Ok` otherwise.
    fn try_access(&self, flag: &AtomicBool) -> io::Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(io::ErrorKind::BrokenPipe.into())
        } else {
            Ok(())
        }
    }

    fn try_read(&self) -> io::Result<()> {
        self.try_access(&self.device.inner.fail_reads)
    }
}

impl Drop for TestPort {
    fn drop(&mut self) {
        self.device.inner.open_ports.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Write for TestPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.device.inner.stall_writes.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::TimedOut.into());
        }

        self.try_access(&self.device.inner.fail_writes)
            .and_then(|_| self.device.inner.written.lock().unwrap().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.try_access(&self.device.inner.fail_writes)
    }
}

impl Read for TestPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_read().map(|_| {
            let mut inbound = self.device.inbound();

            let bytes = buf.len().min(inbound.len());
            for (b, d) in buf.iter_mut().zip(inbound.drain(..bytes)) {
                *b = d;
            }

            bytes
        })
    }
}

impl SerialPort for TestPort {
    fn name(&self) -> Option<String> {
        Some(self.device.inner.path.clone())
    }

    fn baud_rate(&self) -> serialport::Result<u32> {
        Ok(115_200)
    }

    fn data_bits(&self) -> serialport::Result<DataBits> {
        Ok(DataBits::Eight)
    }

    fn flow_control(&self) -> serialport::Result<FlowControl> {
        Ok(FlowControl::None)
    }

    fn parity(&self) -> serialport::Result<Parity> {
        Ok(Parity::None)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> serialport::Result<()> {
        Ok(())
    }

    fn stop_bits(&self) -> serialport::Result<StopBits> {
        Ok(StopBits::One)
    }

    fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
        Ok(())
    }

    fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
        Ok(())
    }

    fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> serialport::Result<()> {
        Ok(())
    }

    fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
        Ok(())
    }

    fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
        Ok(())
    }

    fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
        Ok(true)
    }

    fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
        Ok(true)
    }

    fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
        Ok(true)
    }

    fn bytes_to_read(&self) -> serialport::Result<u32> {
        self.try_read()
            .map(|_| self.device.inbound().len() as u32)
            .map_err(Into::into)
    }

    fn bytes_to_write(&self) -> serialport::Result<u32> {
        Ok(0)
    }

    fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
        Ok(true)
    }

    fn clear(&self, buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
        match buffer_to_clear {
            ClearBuffer::Input | ClearBuffer::All => {
                self.device.inbound().clear();
                self.device.inner.clear_count.fetch_add(1, Ordering::SeqCst);
            }
            ClearBuffer::Output => {},
        }

        Ok(())
    }

    fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
        Ok(Box::new(TestPort::new(self.device.clone())))
    }

    fn set_break(&self) -> serialport::Result<()> {
        Ok(())
    }

    fn clear_break(&self) -> serialport::Result<()> {
        Ok(())
    }
}

//! Stream transport and frame delimiting.
//!
//! The codecs expect one complete frame per call. [`StreamTransport`] turns a
//! byte stream into frames using a [`Framing`] strategy:
//!
//! - [`TpktFraming`] - ISO-on-TCP (S7), length from the TPKT header
//! - [`MbapFraming`] - Modbus TCP, length from the MBAP header
//!
//! The transport is synchronous. Timeouts are the stream's own read and
//! write timeouts; a read that times out yields [`CodecError::Timeout`].
//!
//! # Example
//!
//! ```no_run
//! use plc_wire::{StreamTransport, TpktFraming, TransportConfig};
//! use std::time::Duration;
//!
//! let config = TransportConfig::new().with_timeout(Duration::from_secs(5));
//! let mut transport = StreamTransport::connect(
//!     "192.168.0.1:102".parse().unwrap(),
//!     TpktFraming::new(config.max_frame_size),
//!     &config,
//! )?;
//! let cotp_connect = hex::decode("0300001611e00000000100c0010ac1020100c2020102").unwrap();
//! let response = transport.send_receive(&cotp_connect)?;
//! # Ok::<(), plc_wire::CodecError>(())
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::{CodecError, Result};
use crate::modbus::{MBAP_HEADER_SIZE, MODBUS_PROTOCOL_ID};
use crate::s7::{TPKT_HEADER_SIZE, TPKT_PROTOCOL_ID};

/// Default timeout for stream operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest TPKT frame accepted by default.
pub const MAX_TPKT_FRAME: usize = 8192;

/// Largest Modbus TCP frame: MBAP header plus a 253-byte PDU.
pub const MAX_MBAP_FRAME: usize = MBAP_HEADER_SIZE + 253;

const READ_CHUNK: usize = 1024;

/// What a [`Framing`] found at the start of the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// More bytes are needed.
    Incomplete,
    /// The first `n` bytes form one frame.
    Complete(usize),
    /// The first `n` bytes cannot start a frame and are discarded.
    Skip(usize),
}

/// Decides where frames start and end in a byte stream.
pub trait Framing {
    /// Inspects the bytes received so far.
    ///
    /// Errors are unrecoverable for the stream, e.g. a length that exceeds
    /// the frame limit.
    fn frame_status(&self, buffer: &[u8]) -> Result<FrameStatus>;
}

/// TPKT (RFC 1006) framing.
///
/// Bytes before a `03 00` header are skipped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpktFraming {
    max_frame_size: usize,
}

impl TpktFraming {
    /// Creates a TPKT framing that rejects frames over `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for TpktFraming {
    fn default() -> Self {
        Self::new(MAX_TPKT_FRAME)
    }
}

impl Framing for TpktFraming {
    fn frame_status(&self, buffer: &[u8]) -> Result<FrameStatus> {
        let start = buffer.windows(2).position(|w| w == [TPKT_PROTOCOL_ID, 0x00]);
        match start {
            Some(0) => {}
            Some(offset) => return Ok(FrameStatus::Skip(offset)),
            None => {
                // a trailing 0x03 may be the start of the next header
                let keep = usize::from(buffer.last() == Some(&TPKT_PROTOCOL_ID));
                return Ok(match buffer.len() - keep {
                    0 => FrameStatus::Incomplete,
                    n => FrameStatus::Skip(n),
                });
            }
        }
        if buffer.len() < TPKT_HEADER_SIZE {
            return Ok(FrameStatus::Incomplete);
        }
        let length = usize::from(u16::from_be_bytes([buffer[2], buffer[3]]));
        if length <= TPKT_HEADER_SIZE {
            return Err(CodecError::invalid_frame_at(
                "TPKTPacket",
                16,
                format!("length {} is shorter than a COTP header", length),
            ));
        }
        if length > self.max_frame_size {
            return Err(CodecError::invalid_frame_at(
                "TPKTPacket",
                16,
                format!("length {} exceeds the maximum of {} bytes", length, self.max_frame_size),
            ));
        }
        Ok(if buffer.len() >= length {
            FrameStatus::Complete(length)
        } else {
            FrameStatus::Incomplete
        })
    }
}

/// Modbus TCP (MBAP) framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MbapFraming;

impl Framing for MbapFraming {
    fn frame_status(&self, buffer: &[u8]) -> Result<FrameStatus> {
        // transaction id, protocol id, length
        if buffer.len() < 6 {
            return Ok(FrameStatus::Incomplete);
        }
        let protocol = u16::from_be_bytes([buffer[2], buffer[3]]);
        if protocol != MODBUS_PROTOCOL_ID {
            return Err(CodecError::invalid_frame_at("MBAP", 16, format!("protocol id 0x{:04X}", protocol)));
        }
        // the length counts the unit id and the PDU
        let length = 6 + usize::from(u16::from_be_bytes([buffer[4], buffer[5]]));
        if length < MBAP_HEADER_SIZE + 1 || length > MAX_MBAP_FRAME {
            return Err(CodecError::invalid_frame_at("MBAP", 32, format!("frame of {} bytes", length)));
        }
        Ok(if buffer.len() >= length {
            FrameStatus::Complete(length)
        } else {
            FrameStatus::Incomplete
        })
    }
}

/// Configuration for [`StreamTransport::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Connect, read and write timeout.
    pub timeout: Duration,
    /// Largest frame accepted by the framing.
    pub max_frame_size: usize,
}

impl TransportConfig {
    /// Creates a configuration with the default timeout and TPKT frame limit.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::TransportConfig;
    /// use std::time::Duration;
    ///
    /// let config = TransportConfig::new().with_timeout(Duration::from_millis(500));
    /// assert_eq!(config.max_frame_size, 8192);
    /// ```
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_frame_size: MAX_TPKT_FRAME,
        }
    }

    /// Sets the timeout (default is 2 seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the largest accepted frame.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Request/response transport over any blocking byte stream.
///
/// Bytes received after a complete frame are kept for the next call.
pub struct StreamTransport<S, F> {
    stream: S,
    framing: F,
    buffer: Vec<u8>,
}

impl<F: Framing> StreamTransport<TcpStream, F> {
    /// Opens a TCP connection and applies the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Timeout`] if the connection is not established
    /// in time and [`CodecError::Io`] for other socket errors.
    pub fn connect(addr: SocketAddr, framing: F, config: &TransportConfig) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, config.timeout).map_err(map_io)?;
        stream.set_read_timeout(Some(config.timeout))?;
        stream.set_write_timeout(Some(config.timeout))?;
        stream.set_nodelay(true)?;
        log::debug!("connected to {}", addr);
        Ok(Self::new(stream, framing))
    }
}

impl<S: Read + Write, F: Framing> StreamTransport<S, F> {
    /// Wraps a connected stream.
    pub fn new(stream: S, framing: F) -> Self {
        Self {
            stream,
            framing,
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Sends one frame and waits for one frame in response.
    ///
    /// # Errors
    ///
    /// - [`CodecError::Timeout`] if the stream times out
    /// - [`CodecError::InvalidFrame`] if the framing rejects the data
    /// - [`CodecError::Io`] for other I/O errors, including the peer closing
    ///   the connection
    pub fn send_receive(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.send(data)?;
        self.receive()
    }

    /// Sends one frame.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).map_err(map_io)?;
        self.stream.flush().map_err(map_io)?;
        log::debug!("sent frame of {} bytes", data.len());
        Ok(())
    }

    /// Receives one frame.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.framing.frame_status(&self.buffer)? {
                FrameStatus::Complete(length) => {
                    let frame: Vec<u8> = self.buffer.drain(..length).collect();
                    log::debug!("received frame of {} bytes", frame.len());
                    return Ok(frame);
                }
                FrameStatus::Skip(count) => {
                    log::warn!("discarding {} bytes before frame start", count);
                    self.buffer.drain(..count);
                }
                FrameStatus::Incomplete => self.fill()?,
            }
        }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Returns a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Consumes the transport, returning the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(CodecError::Io(ErrorKind::UnexpectedEof.into())),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io(e)),
            }
        }
    }
}

impl<S, F: std::fmt::Debug> std::fmt::Debug for StreamTransport<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("framing", &self.framing)
            .field("pending", &self.buffer.len())
            .finish()
    }
}

fn map_io(e: std::io::Error) -> CodecError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => CodecError::Timeout,
        _ => CodecError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serves scripted reads in fixed-size pieces, then times out.
    struct MockStream {
        input: VecDeque<u8>,
        piece: usize,
        written: Vec<u8>,
    }

    impl MockStream {
        fn new(input: &[u8], piece: usize) -> Self {
            Self {
                input: input.iter().copied().collect(),
                piece,
                written: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.input.is_empty() {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = self.piece.min(buf.len()).min(self.input.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.input.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(2));
        assert_eq!(MAX_TPKT_FRAME, 8192);
        assert_eq!(MAX_MBAP_FRAME, 260);
        assert_eq!(TransportConfig::default(), TransportConfig::new());
    }

    #[test]
    fn test_tpkt_reassembles_split_frame() {
        let frame = hex("0300 0016 11e00000000100c0010ac1020100c2020102");
        let mut transport = StreamTransport::new(MockStream::new(&frame, 3), TpktFraming::default());
        let response = transport.send_receive(&[0x01, 0x02]).unwrap();
        assert_eq!(response, frame);
        assert_eq!(transport.get_ref().written, vec![0x01, 0x02]);
        assert!(transport.pending().is_empty());
    }

    #[test]
    fn test_tpkt_keeps_following_frame() {
        let first = hex("0300 0007 02f080");
        let second = hex("0300 0008 02f08001");
        let input = [first.clone(), second.clone()].concat();
        let mut transport = StreamTransport::new(MockStream::new(&input, 64), TpktFraming::default());
        assert_eq!(transport.receive().unwrap(), first);
        assert_eq!(transport.pending(), &second[..]);
        assert_eq!(transport.receive().unwrap(), second);
    }

    #[test]
    fn test_tpkt_resyncs_on_garbage() {
        let frame = hex("0300 0007 02f080");
        let input = [hex("ffee03"), frame.clone()].concat();
        let mut transport = StreamTransport::new(MockStream::new(&input, 2), TpktFraming::default());
        assert_eq!(transport.receive().unwrap(), frame);
    }

    #[test]
    fn test_tpkt_status() {
        let framing = TpktFraming::default();
        assert_eq!(framing.frame_status(&[]).unwrap(), FrameStatus::Incomplete);
        assert_eq!(framing.frame_status(&[0x03]).unwrap(), FrameStatus::Incomplete);
        assert_eq!(framing.frame_status(&[0x11, 0x22, 0x03]).unwrap(), FrameStatus::Skip(2));
        assert_eq!(framing.frame_status(&[0x03, 0x00, 0x00]).unwrap(), FrameStatus::Incomplete);
        assert_eq!(framing.frame_status(&[0x00, 0x03, 0x00]).unwrap(), FrameStatus::Skip(1));
    }

    #[test]
    fn test_tpkt_rejects_oversized_frame() {
        let framing = TpktFraming::default();
        let err = framing.frame_status(&[0x03, 0x00, 0x20, 0x01]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame { position: Some(16), .. }), "{}", err);
        assert!(TpktFraming::new(16).frame_status(&[0x03, 0x00, 0x00, 0x11]).is_err());
        assert!(framing.frame_status(&[0x03, 0x00, 0x00, 0x04]).is_err());
    }

    #[test]
    fn test_mbap_framing() {
        let frame = hex("0001 0000 0006 ff 03 0000 0002");
        let mut transport = StreamTransport::new(MockStream::new(&frame, 5), MbapFraming);
        assert_eq!(transport.send_receive(&frame).unwrap(), frame);

        assert!(matches!(
            MbapFraming.frame_status(&hex("0001 0001 0006")),
            Err(CodecError::InvalidFrame { .. })
        ));
        assert!(MbapFraming.frame_status(&hex("0001 0000 0000")).is_err());
        assert!(MbapFraming.frame_status(&hex("0001 0000 00ff")).is_err());
    }

    #[test]
    fn test_timeout_mapped() {
        let mut transport = StreamTransport::new(MockStream::new(&hex("0300 00"), 8), TpktFraming::default());
        assert!(matches!(transport.receive(), Err(CodecError::Timeout)));
    }

    #[test]
    fn test_closed_stream() {
        struct Closed;
        impl Read for Closed {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Ok(0)
            }
        }
        impl Write for Closed {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut transport = StreamTransport::new(Closed, MbapFraming);
        assert!(matches!(transport.send_receive(&[0x00]), Err(CodecError::Io(_))));
    }

    #[test]
    fn test_debug() {
        let transport = StreamTransport::new(MockStream::new(&[], 1), MbapFraming);
        assert!(format!("{:?}", transport).contains("StreamTransport"));
    }
}

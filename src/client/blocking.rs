//! Blocking (synchronous) GPSD session
//!
//! Same lifecycle and stream semantics as the async session, over any
//! [`Transport`] (plain [`TcpStream`] by default). Streams borrow the
//! session and are ordinary iterators; dropping a stream, or the session,
//! stops GPSD streaming and releases the socket.
//!
//! # Example
//! ```no_run
//! use gpsd_stream::client::{Endpoint, ReportOptions, blocking::Session};
//!
//! let mut session = Session::new(Endpoint::default());
//! let opts = ReportOptions::new().filter(["TPV"]).convert_timestamps(true);
//!
//! for report in session.report_stream(opts).take(10) {
//!     let report = report?;
//!     println!("{:?} {:?}", report.time("time"), report.get_f64("lat"));
//! }
//! # Ok::<(), gpsd_stream::error::GpsdError>(())
//! ```

use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use super::{
    Endpoint, Handshake, MAX_HANDSHAKE_FRAMES, ReportOptions, SessionOptions, SessionState,
    handshake_eof, handshake_exhausted, handshake_step,
};
use crate::{
    Result,
    error::GpsdError,
    protocol::{Frames, GpsdJsonEncode, v3},
    report::{FilterSet, Report},
};

/// Byte stream a blocking session can run over
///
/// Only `Read + Write` is required; the hooks default to no-ops so test
/// doubles and pre-opened streams can be attached with [`Session::open`].
pub trait Transport: Read + Write {
    /// Dials `endpoint`, giving up after `timeout` if one is set
    fn connect(endpoint: &Endpoint, timeout: Option<Duration>) -> std::io::Result<Self>
    where
        Self: Sized,
    {
        let _ = (endpoint, timeout);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "transport cannot dial an endpoint",
        ))
    }

    /// Bounds each subsequent read; `None` waits indefinitely
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        let _ = timeout;
        Ok(())
    }

    /// Releases the underlying connection
    fn shutdown(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn connect(endpoint: &Endpoint, timeout: Option<Duration>) -> std::io::Result<Self> {
        let addrs: Vec<_> = (endpoint.host(), endpoint.port()).to_socket_addrs()?.collect();

        let Some(timeout) = timeout else {
            return TcpStream::connect(addrs.as_slice());
        };

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "endpoint resolved to no addresses",
            )
        }))
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Blocking GPSD session
///
/// Owns its transport exclusively; one session per connection.
#[derive(Debug)]
pub struct Session<T: Transport = TcpStream> {
    endpoint: Endpoint,
    options: SessionOptions,
    state: SessionState,
    frames: Option<Frames<BufReader<T>>>,
    watch: Option<v3::types::Watch>,
}

impl Session<TcpStream> {
    /// Creates an idle TCP session; nothing is dialled until it is used
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_options(endpoint, SessionOptions::default())
    }
}

impl<T: Transport> Session<T> {
    /// Idle session with explicit deadlines
    pub fn with_options(endpoint: Endpoint, options: SessionOptions) -> Self {
        Session {
            endpoint,
            options,
            state: SessionState::Idle,
            frames: None,
            watch: None,
        }
    }

    /// Wraps an already-open transport; the session starts `Connected`
    pub fn open(endpoint: Endpoint, options: SessionOptions, transport: T) -> Self {
        let mut session = Self::with_options(endpoint, options);
        session.frames = Some(Frames::new(BufReader::new(transport)));
        session.state = SessionState::Connected;
        session
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Endpoint the session was created for
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Deadlines the session applies
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn transport(&mut self) -> Result<&mut T> {
        self.frames
            .as_mut()
            .map(|frames| frames.get_mut().get_mut())
            .ok_or(GpsdError::SessionClosed)
    }

    /// Opens the transport
    ///
    /// A no-op once connected. A failure leaves the session `Failed`.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected | SessionState::Watching => return Ok(()),
            SessionState::Closed | SessionState::Failed => return Err(GpsdError::SessionClosed),
            SessionState::Idle | SessionState::Connecting => {}
        }

        self.state = SessionState::Connecting;
        debug!(endpoint = %self.endpoint, "connecting to gpsd");

        match T::connect(&self.endpoint, self.options.connect_timeout_value()) {
            Ok(transport) => {
                self.frames = Some(Frames::new(BufReader::new(transport)));
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "failed to connect to gpsd");
                self.state = SessionState::Failed;
                Err(GpsdError::from_io(format!("connect to {}", self.endpoint), err))
            }
        }
    }

    /// Puts GPSD into JSON watch mode, connecting first if needed
    ///
    /// `device` overrides the endpoint's device. Returns GPSD's
    /// acknowledgement. Any failure closes the session.
    pub fn enable_streaming(&mut self, device: Option<&str>) -> Result<v3::types::Watch> {
        match self.state {
            SessionState::Watching => {
                if let Some(watch) = &self.watch {
                    return Ok(watch.clone());
                }
            }
            SessionState::Closed | SessionState::Failed => return Err(GpsdError::SessionClosed),
            _ => {}
        }
        self.connect()?;

        let device = device.or(self.endpoint.watched_device()).map(str::to_owned);
        match self.handshake(&v3::types::Watch::json(device.as_deref())) {
            Ok(ack) => {
                debug!(endpoint = %self.endpoint, device = ?device, "watch mode enabled");
                self.state = SessionState::Watching;
                self.watch = Some(ack.clone());
                Ok(ack)
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "watch handshake failed");
                self.release();
                Err(err)
            }
        }
    }

    fn handshake(&mut self, request: &v3::types::Watch) -> Result<v3::types::Watch> {
        let connect_timeout = self.options.connect_timeout_value();
        let read_timeout = self.options.read_timeout_value();

        let transport = self.transport()?;
        transport
            .set_read_timeout(connect_timeout)
            .map_err(|e| GpsdError::from_io("configure read timeout", e))?;
        transport
            .write_request(request)
            .map_err(|e| GpsdError::from_io("send watch command", e))?;

        let frames = self.frames.as_mut().ok_or(GpsdError::SessionClosed)?;
        let mut ack = None;
        for frame in frames.by_ref().take(MAX_HANDSHAKE_FRAMES) {
            let line = match frame {
                Ok(line) => line,
                Err(GpsdError::Decode(_)) => continue,
                Err(GpsdError::Timeout { .. }) => {
                    return Err(GpsdError::Timeout {
                        operation: "watch acknowledgement".into(),
                    });
                }
                Err(err) => return Err(err),
            };
            if let Handshake::Acknowledged(watch) = handshake_step(&line)? {
                ack = Some(watch);
                break;
            }
        }

        let Some(ack) = ack else {
            return Err(if self.frames.as_ref().is_some_and(|f| f.is_exhausted()) {
                handshake_eof()
            } else {
                handshake_exhausted()
            });
        };

        self.transport()?
            .set_read_timeout(read_timeout)
            .map_err(|e| GpsdError::from_io("configure read timeout", e))?;
        Ok(ack)
    }

    fn ensure_watching(&mut self) -> Result<()> {
        match self.state {
            SessionState::Watching => Ok(()),
            SessionState::Closed | SessionState::Failed => Err(GpsdError::SessionClosed),
            _ => self.enable_streaming(None).map(drop),
        }
    }

    /// Pulls the next raw line, starting the stream if needed
    ///
    /// `Ok(None)` marks the end of the stream, after which the session is
    /// closed.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        self.ensure_watching()?;

        let frames = self.frames.as_mut().ok_or(GpsdError::SessionClosed)?;
        match frames.next() {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(err)) if !err.is_terminal() => Err(err),
            Some(Err(err)) => {
                warn!(endpoint = %self.endpoint, error = %err, "stream ended with an error");
                self.release();
                Err(err)
            }
            None => {
                debug!(endpoint = %self.endpoint, "gpsd closed the stream");
                self.release();
                Ok(None)
            }
        }
    }

    /// Pulls the next report that passes `options`
    pub fn next_report(&mut self, options: &ReportOptions) -> Result<Option<Report>> {
        loop {
            let line = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(GpsdError::Decode(err)) => match options.screen(err) {
                    Some(err) => return Err(err),
                    None => continue,
                },
                Err(err) => return Err(err),
            };

            match options.refine(&line) {
                Ok(Some(report)) => return Ok(Some(report)),
                Ok(None) => continue,
                Err(err) => {
                    if let Some(err) = options.screen(err) {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Raw lines, in arrival order
    pub fn text_stream(&mut self) -> TextStream<'_, T> {
        self.text_stream_filtered(FilterSet::all())
    }

    /// Raw lines whose class passes `filter`
    pub fn text_stream_filtered(&mut self, filter: FilterSet) -> TextStream<'_, T> {
        TextStream {
            session: self,
            filter,
            finished: false,
        }
    }

    /// Decoded reports that pass `options`, in arrival order
    pub fn report_stream(&mut self, options: ReportOptions) -> ReportStream<'_, T> {
        ReportStream {
            session: self,
            options,
            finished: false,
        }
    }

    /// Stops streaming and releases the transport
    ///
    /// Safe to call repeatedly; shutdown errors are swallowed.
    pub fn close(&mut self) {
        if let Some(mut frames) = self.frames.take() {
            let transport = frames.get_mut().get_mut();
            if self.state == SessionState::Watching {
                let _ = transport.write_request(&v3::types::Watch::disable());
            }
            let _ = transport.shutdown();
            debug!(endpoint = %self.endpoint, "session closed");
        }
        self.finish();
    }

    /// Releases the transport without talking to GPSD
    fn release(&mut self) {
        if let Some(mut frames) = self.frames.take() {
            let _ = frames.get_mut().get_mut().shutdown();
            debug!(endpoint = %self.endpoint, "transport released");
        }
        self.finish();
    }

    fn finish(&mut self) {
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
        self.watch = None;
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Iterator over raw lines; see [`Session::text_stream`]
///
/// Ends after the first terminal error. Dropping it closes the session.
#[derive(Debug)]
pub struct TextStream<'a, T: Transport> {
    session: &'a mut Session<T>,
    filter: FilterSet,
    finished: bool,
}

impl<T: Transport> Iterator for TextStream<'_, T> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.session.next_line() {
                Ok(Some(line)) if self.filter.allows_line(&line) => return Some(Ok(line)),
                Ok(Some(_)) => continue,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => {
                    self.finished = err.is_terminal();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<T: Transport> std::iter::FusedIterator for TextStream<'_, T> {}

impl<T: Transport> Drop for TextStream<'_, T> {
    fn drop(&mut self) {
        self.session.close();
    }
}

/// Iterator over decoded reports; see [`Session::report_stream`]
///
/// Ends after the first terminal error. Dropping it closes the session.
#[derive(Debug)]
pub struct ReportStream<'a, T: Transport> {
    session: &'a mut Session<T>,
    options: ReportOptions,
    finished: bool,
}

impl<T: Transport> Iterator for ReportStream<'_, T> {
    type Item = Result<Report>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.session.next_report(&self.options) {
            Ok(Some(report)) => Some(Ok(report)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = err.is_terminal();
                Some(Err(err))
            }
        }
    }
}

impl<T: Transport> std::iter::FusedIterator for ReportStream<'_, T> {}

impl<T: Transport> Drop for ReportStream<'_, T> {
    fn drop(&mut self) {
        self.session.close();
    }
}

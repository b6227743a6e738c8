//! GPSD sessions: connection lifecycle, watch handshake and streaming
//!
//! A session owns one transport to GPSD and moves through
//! [`SessionState`]s as it connects, enables watch mode, streams, and
//! closes. Two consumption modes sit on top of it: raw text lines and
//! decoded [`Report`]s.
//!
//! This module holds the async session (over any `futures-io` stream, with
//! tokio TCP under the `tokio` feature) and the pieces shared with the
//! blocking session in [`blocking`].
//!
//! # Example
//!
//! ```no_run
//! use gpsd_stream::client::{Endpoint, GpsdSession, ReportOptions};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = GpsdSession::new(Endpoint::default());
//! session.connect().await?;
//!
//! let opts = ReportOptions::new().filter(["TPV"]).convert_timestamps(true);
//! let mut reports = std::pin::pin!(session.report_stream(opts));
//! while let Some(report) = reports.next().await {
//!     let report = report?;
//!     println!("lat {:?} lon {:?}", report.get_f64("lat"), report.get_f64("lon"));
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use futures_util::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::{
    Result,
    error::{DecodeError, GpsdError},
    protocol::{GpsdFrameReadAsync, GpsdJsonEncodeAsync, frame_text, v3},
    report::{DecodeOptions, FilterSet, Report, TimestampPolicy},
};

/// Blocking (synchronous) session implementation
pub mod blocking;

/// Host GPSD is assumed to run on
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub use v3::DEFAULT_PORT;

/// Frames read while waiting for the WATCH acknowledgement before giving up
const MAX_HANDSHAKE_FRAMES: usize = 32;

/// Where to find GPSD, and which device to watch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    device: Option<String>,
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            device: None,
        }
    }
}

impl Endpoint {
    /// Endpoint for GPSD at `host:port`, watching every device
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
            device: None,
        }
    }

    /// Scopes watch mode to one device, e.g. `/dev/ttyUSB0`
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Host name or address, as given
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port, [`DEFAULT_PORT`] unless overridden
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Device the watch is scoped to, if any
    pub fn watched_device(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

impl core::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Deadlines for a session
///
/// Without a read timeout, pulls on a watching session wait as long as GPSD
/// stays quiet. A zero duration counts as no timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SessionOptions {
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl SessionOptions {
    /// No deadlines
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the TCP connect and each read of the watch handshake
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Bounds each pull once streaming
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Connect and handshake deadline; `None` when unset or zero
    pub fn connect_timeout_value(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Per-pull deadline; `None` when unset or zero
    pub fn read_timeout_value(&self) -> Option<Duration> {
        self.read_timeout
    }
}

/// What a report stream does with a record it cannot decode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MalformedPolicy {
    /// Yield the [`DecodeError`] for that record, then carry on
    #[default]
    Surface,
    /// Log the record at `warn` and carry on
    Skip,
}

/// Options for decoded report streams
///
/// Defaults: no filtering, timestamps left as text (lenient when
/// converted), malformed records surfaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOptions {
    filter: FilterSet,
    decode: DecodeOptions,
    malformed: MalformedPolicy,
}

impl ReportOptions {
    /// Every class, timestamps untouched, malformed records surfaced
    pub fn new() -> Self {
        Self::default()
    }

    /// Only yields reports of these classes
    pub fn filter<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = classes.into_iter().collect();
        self
    }

    /// Like [`ReportOptions::filter`], from a prebuilt set
    pub fn filter_set(mut self, filter: FilterSet) -> Self {
        self.filter = filter;
        self
    }

    /// Converts `time`/`activated` fields to `DateTime<Utc>`
    pub fn convert_timestamps(mut self, enable: bool) -> Self {
        self.decode = self.decode.convert_timestamps(enable);
        self
    }

    /// What to do with a timestamp that does not parse
    pub fn timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.decode = self.decode.timestamp_policy(policy);
        self
    }

    /// What to do with a record that does not decode
    pub fn malformed(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }

    /// Classes the stream keeps
    pub fn filter_classes(&self) -> &FilterSet {
        &self.filter
    }

    /// Timestamp handling
    pub fn decode_options(&self) -> &DecodeOptions {
        &self.decode
    }

    /// Malformed-record handling
    pub fn malformed_policy(&self) -> MalformedPolicy {
        self.malformed
    }

    /// Turns one frame into a report, or `None` when the filter drops it
    ///
    /// Timestamps are converted after filtering, so a strict timestamp
    /// failure is only raised for a report the caller asked for.
    fn refine(&self, line: &str) -> core::result::Result<Option<Report>, DecodeError> {
        let mut report = Report::decode(line)?;
        if !self.filter.allows(report.class()) {
            trace!(class = report.class(), "report filtered out");
            return Ok(None);
        }

        if self.decode.converts_timestamps() {
            report.convert_timestamps(self.decode.policy())?;
        }
        Ok(Some(report))
    }

    /// Applies the malformed-record policy to a decode failure
    ///
    /// Returns the error to surface, or `None` to skip the record.
    fn screen(&self, err: DecodeError) -> Option<GpsdError> {
        match self.malformed {
            MalformedPolicy::Surface => Some(err.into()),
            MalformedPolicy::Skip => {
                warn!(error = %err, "skipping malformed record");
                None
            }
        }
    }
}

/// Lifecycle of a session
///
/// `Idle -> Connecting -> Connected -> Watching -> Closed`, with
/// `Connecting -> Failed` when the transport cannot be opened. `Closed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed, nothing dialled yet
    Idle,
    /// Transport being opened
    Connecting,
    /// Transport open, watch mode not yet enabled
    Connected,
    /// GPSD acknowledged watch mode and is streaming
    Watching,
    /// Transport released; no further use
    Closed,
    /// Transport could not be opened; no further use
    Failed,
}

impl SessionState {
    /// True for `Closed` and `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Outcome of one handshake frame
enum Handshake {
    Pending,
    Acknowledged(v3::types::Watch),
}

/// Interprets one frame received while waiting for the WATCH reply
///
/// VERSION, DEVICES and any other chatter before the reply are consumed.
fn handshake_step(line: &str) -> Result<Handshake> {
    let report = match Report::decode(line) {
        Ok(report) => report,
        Err(err) => {
            return Err(GpsdError::Protocol(format!(
                "unexpected reply during watch handshake: {err}"
            )));
        }
    };

    match report.class() {
        "VERSION" => return check_version(&report).map(|()| Handshake::Pending),
        "WATCH" | "ERROR" => {}
        other => {
            trace!(class = other, "skipping handshake chatter");
            return Ok(Handshake::Pending);
        }
    }

    let message = report
        .into_message()
        .map_err(|err| GpsdError::Protocol(format!("malformed handshake reply: {err}")))?;

    match message {
        v3::ResponseMessage::Watch(watch) if watch.is_enabled() => Ok(Handshake::Acknowledged(watch)),
        v3::ResponseMessage::Watch(_) => Err(GpsdError::Protocol(
            "gpsd did not confirm watch mode".into(),
        )),
        v3::ResponseMessage::Error(error) => Err(GpsdError::Protocol(format!(
            "gpsd rejected the watch command: {}",
            error.message
        ))),
        _ => Ok(Handshake::Pending),
    }
}

/// Rejects a daemon whose protocol major version differs from ours
///
/// Releases that omit the version numbers are let through.
fn check_version(report: &Report) -> Result<()> {
    let proto = |field: &str| {
        report
            .get(field)
            .and_then(serde_json::Value::as_i64)
            .and_then(|v| i32::try_from(v).ok())
    };
    let (major, minor) = (proto("proto_major"), proto("proto_minor"));
    debug!(release = ?report.get_str("release"), ?major, ?minor, "gpsd version");

    match major {
        Some(major) if major != v3::API_VERSION_MAJOR => Err(GpsdError::UnsupportedProtocolVersion {
            major,
            minor: minor.unwrap_or_default(),
        }),
        _ => Ok(()),
    }
}

fn handshake_exhausted() -> GpsdError {
    GpsdError::Protocol(format!(
        "no watch acknowledgement within {MAX_HANDSHAKE_FRAMES} replies"
    ))
}

fn handshake_eof() -> GpsdError {
    GpsdError::Protocol("connection closed before watch acknowledgement".into())
}

/// Async byte stream a session can run over
pub trait AsyncTransport: futures_io::AsyncRead + futures_io::AsyncWrite + Unpin {
    /// Dials `endpoint`
    ///
    /// Transports that cannot dial are attached with [`Session::open`].
    fn connect(endpoint: &Endpoint) -> impl std::future::Future<Output = std::io::Result<Self>> + Send
    where
        Self: Sized,
    {
        let _ = endpoint;
        async {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "transport cannot dial an endpoint",
            ))
        }
    }
}

#[cfg(feature = "tokio")]
impl AsyncTransport for tokio_util::compat::Compat<tokio::net::TcpStream> {
    fn connect(endpoint: &Endpoint) -> impl std::future::Future<Output = std::io::Result<Self>> + Send
    where
        Self: Sized,
    {
        use tokio_util::compat::TokioAsyncReadCompatExt;

        let addr = (endpoint.host().to_owned(), endpoint.port());
        async move {
            let stream = tokio::net::TcpStream::connect(addr).await?;
            Ok(stream.compat())
        }
    }
}

/// Runs `fut` under an optional deadline
#[cfg(feature = "tokio")]
async fn with_deadline<T>(
    limit: Option<Duration>,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> std::io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into())),
        None => fut.await,
    }
}

/// Deadlines need a timer; without the `tokio` feature they are ignored
#[cfg(not(feature = "tokio"))]
async fn with_deadline<T>(
    _limit: Option<Duration>,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> std::io::Result<T> {
    fut.await
}

/// Async GPSD session
///
/// Owns the transport exclusively. Dropping the session releases the
/// transport; [`Session::close`] additionally asks GPSD to stop streaming
/// first.
#[derive(Debug)]
pub struct Session<S> {
    endpoint: Endpoint,
    options: SessionOptions,
    state: SessionState,
    reader: Option<futures_util::io::BufReader<S>>,
    buf: Vec<u8>,
    watch: Option<v3::types::Watch>,
}

/// Async session over tokio TCP
#[cfg(feature = "tokio")]
pub type GpsdSession = Session<tokio_util::compat::Compat<tokio::net::TcpStream>>;

impl<S: AsyncTransport> Session<S> {
    /// Creates an idle session; nothing is dialled until it is used
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_options(endpoint, SessionOptions::default())
    }

    /// Idle session with explicit deadlines
    pub fn with_options(endpoint: Endpoint, options: SessionOptions) -> Self {
        Session {
            endpoint,
            options,
            state: SessionState::Idle,
            reader: None,
            buf: Vec::new(),
            watch: None,
        }
    }

    /// Wraps an already-open transport; the session starts `Connected`
    pub fn open(endpoint: Endpoint, options: SessionOptions, stream: S) -> Self {
        let mut session = Self::with_options(endpoint, options);
        session.reader = Some(futures_util::io::BufReader::new(stream));
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

    /// Opens the transport
    ///
    /// A no-op once connected. A failure leaves the session `Failed`.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected | SessionState::Watching => return Ok(()),
            SessionState::Closed | SessionState::Failed => return Err(GpsdError::SessionClosed),
            SessionState::Idle | SessionState::Connecting => {}
        }

        self.state = SessionState::Connecting;
        debug!(endpoint = %self.endpoint, "connecting to gpsd");

        match with_deadline(self.options.connect_timeout, S::connect(&self.endpoint)).await {
            Ok(stream) => {
                self.reader = Some(futures_util::io::BufReader::new(stream));
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
    pub async fn enable_streaming(&mut self, device: Option<&str>) -> Result<v3::types::Watch> {
        match self.state {
            SessionState::Watching => {
                if let Some(watch) = &self.watch {
                    return Ok(watch.clone());
                }
            }
            SessionState::Closed | SessionState::Failed => return Err(GpsdError::SessionClosed),
            _ => {}
        }
        self.connect().await?;

        let device = device.or(self.endpoint.watched_device()).map(str::to_owned);
        match self.handshake(&v3::types::Watch::json(device.as_deref())).await {
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

    async fn handshake(&mut self, request: &v3::types::Watch) -> Result<v3::types::Watch> {
        let deadline = self.options.connect_timeout;
        let reader = self.reader.as_mut().ok_or(GpsdError::SessionClosed)?;

        with_deadline(deadline, reader.get_mut().write_request_async(request))
            .await
            .map_err(|e| GpsdError::from_io("send watch command", e))?;

        for _ in 0..MAX_HANDSHAKE_FRAMES {
            let more = with_deadline(deadline, reader.read_frame_async(&mut self.buf))
                .await
                .map_err(|e| GpsdError::from_io("read watch acknowledgement", e))?;
            if !more {
                return Err(handshake_eof());
            }

            let Ok(line) = frame_text(&self.buf) else {
                continue;
            };
            if let Handshake::Acknowledged(ack) = handshake_step(&line)? {
                return Ok(ack);
            }
        }
        Err(handshake_exhausted())
    }

    async fn ensure_watching(&mut self) -> Result<()> {
        match self.state {
            SessionState::Watching => Ok(()),
            SessionState::Closed | SessionState::Failed => Err(GpsdError::SessionClosed),
            _ => self.enable_streaming(None).await.map(drop),
        }
    }

    /// Pulls the next raw line, starting the stream if needed
    ///
    /// `Ok(None)` marks the end of the stream, after which the session is
    /// closed.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.ensure_watching().await?;

        let deadline = self.options.read_timeout;
        let reader = self.reader.as_mut().ok_or(GpsdError::SessionClosed)?;
        match with_deadline(deadline, reader.read_frame_async(&mut self.buf)).await {
            Ok(true) => Ok(Some(frame_text(&self.buf)?)),
            Ok(false) => {
                debug!(endpoint = %self.endpoint, "gpsd closed the stream");
                self.release();
                Ok(None)
            }
            Err(err) => {
                self.release();
                Err(GpsdError::from_io("read", err))
            }
        }
    }

    /// Pulls the next report that passes `options`
    pub async fn next_report(&mut self, options: &ReportOptions) -> Result<Option<Report>> {
        loop {
            let line = match self.next_line().await {
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
    ///
    /// Ends after the first terminal error. Dropping the stream releases the
    /// session without sending the disable command; call
    /// [`Session::close`] beforehand for a graceful stop.
    pub fn text_stream(&mut self) -> impl futures_util::Stream<Item = Result<String>> + '_ {
        self.text_stream_filtered(FilterSet::all())
    }

    /// Raw lines whose class passes `filter`
    pub fn text_stream_filtered(
        &mut self,
        filter: FilterSet,
    ) -> impl futures_util::Stream<Item = Result<String>> + '_ {
        futures_util::stream::unfold(Some((StreamGuard(self), filter)), |state| async move {
            let Some((guard, filter)) = state else {
                return None;
            };
            loop {
                match guard.0.next_line().await {
                    Ok(Some(line)) if filter.allows_line(&line) => {
                        return Some((Ok(line), Some((guard, filter))));
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => return None,
                    Err(err) if err.is_terminal() => return Some((Err(err), None)),
                    Err(err) => return Some((Err(err), Some((guard, filter)))),
                }
            }
        })
    }

    /// Decoded reports that pass `options`, in arrival order
    ///
    /// Same end and drop behaviour as [`Session::text_stream`].
    pub fn report_stream(
        &mut self,
        options: ReportOptions,
    ) -> impl futures_util::Stream<Item = Result<Report>> + '_ {
        futures_util::stream::unfold(Some((StreamGuard(self), options)), |state| async move {
            let Some((guard, options)) = state else {
                return None;
            };
            match guard.0.next_report(&options).await {
                Ok(Some(report)) => Some((Ok(report), Some((guard, options)))),
                Ok(None) => None,
                Err(err) if err.is_terminal() => Some((Err(err), None)),
                Err(err) => Some((Err(err), Some((guard, options)))),
            }
        })
    }

    /// Stops streaming and releases the transport
    ///
    /// Safe to call repeatedly; shutdown errors are swallowed.
    pub async fn close(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            let deadline = self.options.connect_timeout;
            if self.state == SessionState::Watching {
                let disable = v3::types::Watch::disable();
                let _ = with_deadline(deadline, reader.get_mut().write_request_async(&disable)).await;
            }
            let _ = with_deadline(deadline, reader.get_mut().close()).await;
            debug!(endpoint = %self.endpoint, "session closed");
        }
        self.finish();
    }
}

impl<S> Session<S> {
    /// Drops the transport without talking to GPSD
    fn release(&mut self) {
        if self.reader.take().is_some() {
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

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Session borrow held by an async stream
///
/// Dropping the stream, idle or mid-pull, drops the guard and releases the
/// session before control returns to the caller.
struct StreamGuard<'a, S>(&'a mut Session<S>);

impl<S> Drop for StreamGuard<'_, S> {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures::StreamExt;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    pub(crate) const VERSION: &str = r#"{"class":"VERSION","release":"3.25","rev":"3.25","proto_major":3,"proto_minor":15}"#;
    pub(crate) const DEVICES: &str =
        r#"{"class":"DEVICES","devices":[{"class":"DEVICE","path":"/dev/ttyACM0","driver":"u-blox","activated":"2024-01-01T00:00:00.000Z"}]}"#;
    pub(crate) const WATCH_ACK: &str = r#"{"class":"WATCH","enable":true,"json":true,"nmea":false,"raw":0,"scaled":false,"timing":false,"split24":false,"pps":false}"#;

    /// Bytes a daemon would send: handshake replies, then `lines`
    pub(crate) fn script(lines: &[&str]) -> Vec<u8> {
        let mut out = String::new();
        for line in [VERSION, DEVICES, WATCH_ACK].iter().chain(lines) {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.into_bytes()
    }

    #[derive(Debug)]
    struct MockStream {
        input: Vec<u8>,
        pos: usize,
        written: Arc<Mutex<Vec<u8>>>,
        closes: Arc<Mutex<usize>>,
    }

    impl MockStream {
        fn new(input: Vec<u8>) -> Self {
            MockStream {
                input,
                pos: 0,
                written: Arc::default(),
                closes: Arc::default(),
            }
        }
    }

    impl futures_io::AsyncRead for MockStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<std::io::Result<usize>> {
            let remaining = &self.input[self.pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.pos += n;
            Poll::Ready(Ok(n))
        }
    }

    impl futures_io::AsyncWrite for MockStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            *self.closes.lock().unwrap() += 1;
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncTransport for MockStream {}

    fn open(input: Vec<u8>) -> (Session<MockStream>, Arc<Mutex<Vec<u8>>>, Arc<Mutex<usize>>) {
        let stream = MockStream::new(input);
        let written = stream.written.clone();
        let closes = stream.closes.clone();
        let session = Session::open(Endpoint::default(), SessionOptions::default(), stream);
        (session, written, closes)
    }

    #[test]
    fn test_endpoint_defaults_and_display() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 2947);
        assert_eq!(endpoint.watched_device(), None);
        assert_eq!(endpoint.to_string(), "127.0.0.1:2947");
        assert_eq!(Endpoint::new("::1", 2948).to_string(), "[::1]:2948");
    }

    #[test]
    fn test_zero_timeouts_mean_none() {
        let options = SessionOptions::new()
            .connect_timeout(Some(Duration::ZERO))
            .read_timeout(Some(Duration::from_millis(250)));
        assert_eq!(options.connect_timeout_value(), None);
        assert_eq!(options.read_timeout_value(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_handshake_rejects_old_protocol() {
        let line = r#"{"class":"VERSION","release":"2.0","rev":"","proto_major":2,"proto_minor":1}"#;
        assert!(matches!(
            handshake_step(line),
            Err(GpsdError::UnsupportedProtocolVersion { major: 2, minor: 1 })
        ));
    }

    #[test]
    fn test_handshake_tolerates_unversioned_release() {
        let line = r#"{"class":"VERSION","release":"3.20"}"#;
        assert!(matches!(handshake_step(line), Ok(Handshake::Pending)));
        assert!(matches!(
            handshake_step(WATCH_ACK),
            Ok(Handshake::Acknowledged(ack)) if ack.is_enabled()
        ));
    }

    #[test]
    fn test_handshake_surfaces_gpsd_errors() {
        let err = handshake_step(r#"{"class":"ERROR","message":"Unrecognized request"}"#)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("Unrecognized request"));
    }

    #[tokio::test]
    async fn test_report_stream_filters_in_order() {
        let (mut session, written, _) = open(script(&[
            r#"{"class":"TPV","lat":1.0,"lon":2.0}"#,
            r#"{"class":"SKY","satellites":[]}"#,
            r#"{"class":"TPV","lat":3.0,"lon":4.0}"#,
        ]));

        let reports: Vec<_> = session
            .report_stream(ReportOptions::new().filter(["TPV"]))
            .collect()
            .await;
        let lats: Vec<_> = reports
            .into_iter()
            .map(|r| r.unwrap().get_f64("lat").unwrap())
            .collect();
        assert_eq!(lats, [1.0, 3.0]);

        assert_eq!(session.state(), SessionState::Closed);
        let written = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert_eq!(written, r#"?WATCH={"enable":true,"json":true};"#);
    }

    #[tokio::test]
    async fn test_text_stream_surfaces_then_ends() {
        let (mut session, _, _) = open(script(&["one", r#"{"class":"TPV"}"#]));
        {
            let mut lines = std::pin::pin!(session.text_stream());
            assert_eq!(lines.next().await.unwrap().unwrap(), "one");
            assert_eq!(lines.next().await.unwrap().unwrap(), r#"{"class":"TPV"}"#);
            assert!(lines.next().await.is_none());
        }

        let err = session.next_line().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionClosed);
    }

    #[tokio::test]
    async fn test_malformed_records_surface_or_skip() {
        let input = script(&["not json", r#"{"class":"TPV"}"#]);

        let (mut session, _, _) = open(input.clone());
        let mut reports = std::pin::pin!(session.report_stream(ReportOptions::new()));
        let err = reports.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(reports.next().await.unwrap().unwrap().class(), "TPV");

        let (mut session, _, _) = open(input);
        let options = ReportOptions::new().malformed(MalformedPolicy::Skip);
        let mut reports = std::pin::pin!(session.report_stream(options));
        assert_eq!(reports.next().await.unwrap().unwrap().class(), "TPV");
        assert!(reports.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_disables_watch_once() {
        let (mut session, written, closes) = open(script(&[r#"{"class":"TPV"}"#]));
        session.enable_streaming(Some("/dev/ttyACM0")).await.unwrap();
        assert_eq!(session.state(), SessionState::Watching);

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(*closes.lock().unwrap(), 1);

        let written = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert_eq!(
            written,
            r#"?WATCH={"device":"/dev/ttyACM0","enable":true,"json":true};?WATCH={"enable":false};"#
        );
    }

    #[tokio::test]
    async fn test_early_break_releases_session() {
        let tpv = r#"{"class":"TPV","lat":1.0}"#;
        let (mut session, written, _) = open(script(&[tpv, tpv]));
        {
            let mut reports = std::pin::pin!(session.report_stream(ReportOptions::new()));
            assert_eq!(reports.next().await.unwrap().unwrap().class(), "TPV");
        }

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.reader.is_none());
        assert_eq!(
            session.next_line().await.unwrap_err().kind(),
            ErrorKind::SessionClosed
        );
        let written = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert_eq!(written, r#"?WATCH={"enable":true,"json":true};"#);

        let (mut session, _, _) = open(script(&[tpv, tpv]));
        let lines: Vec<_> = session
            .text_stream_filtered(FilterSet::from_iter(["TPV"]))
            .take(1)
            .collect()
            .await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].as_ref().unwrap(), tpv);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_unacknowledged_watch_closes_session() {
        let input = format!("{VERSION}\n{{\"class\":\"WATCH\",\"enable\":false}}\n");
        let (mut session, _, _) = open(input.into_bytes());

        let err = session.enable_streaming(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            session.connect().await.unwrap_err().kind(),
            ErrorKind::SessionClosed
        );
    }

    #[tokio::test]
    async fn test_dialless_transport_fails_to_connect() {
        let mut session = Session::<MockStream>::new(Endpoint::default());
        let err = session.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(session.state(), SessionState::Failed);
    }
}

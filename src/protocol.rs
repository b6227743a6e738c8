//! Wire-level framing for the GPSD JSON protocol
//!
//! GPSD talks newline-delimited JSON. This module splits a byte stream into
//! frames (one per line, terminator removed) and encodes commands going the
//! other way. It knows nothing about report classes; see [`crate::report`]
//! for decoding.
//!
//! Framing rules:
//! - a frame ends at `\n`; a `\r` right before it belongs to the terminator
//! - empty lines carry no frame and are skipped
//! - a non-empty trailing segment at end of stream is emitted as a final frame

use crate::{
    Result,
    error::{DecodeError, GpsdError},
};

pub mod v3;

/// Strips the line terminator (`\n` or `\r\n`) from a raw line
fn trim_terminator(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
}

/// Converts a frame's bytes into text, failing only for that frame
pub(crate) fn frame_text(buf: &[u8]) -> core::result::Result<String, DecodeError> {
    String::from_utf8(buf.to_vec()).map_err(DecodeError::Utf8)
}

/// Frame reading over any buffered reader
pub trait GpsdFrameRead: std::io::BufRead {
    /// Reads the next non-empty frame into `buf`, terminator removed
    ///
    /// Returns `Ok(false)` at end of stream. Only the bytes of the frame
    /// being assembled are buffered.
    fn read_frame(&mut self, buf: &mut Vec<u8>) -> std::io::Result<bool> {
        loop {
            buf.clear();
            let bytes_read = self.read_until(b'\n', buf)?;
            if bytes_read == 0 {
                return Ok(false);
            }

            trim_terminator(buf);
            if !buf.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl<R: std::io::BufRead + ?Sized> GpsdFrameRead for R {}

/// Frame reading over any async buffered reader
pub trait GpsdFrameReadAsync: futures_io::AsyncBufRead + Unpin {
    /// Async counterpart of [`GpsdFrameRead::read_frame`]
    fn read_frame_async<'a>(
        &'a mut self,
        buf: &'a mut Vec<u8>,
    ) -> impl std::future::Future<Output = std::io::Result<bool>> + 'a {
        use futures_util::AsyncBufReadExt;

        async move {
            loop {
                buf.clear();
                let bytes_read = self.read_until(b'\n', buf).await?;
                if bytes_read == 0 {
                    return Ok(false);
                }

                trim_terminator(buf);
                if !buf.is_empty() {
                    return Ok(true);
                }
            }
        }
    }
}

impl<R: futures_io::AsyncBufRead + Unpin + ?Sized> GpsdFrameReadAsync for R {}

/// Iterator over the frames of a buffered reader
///
/// Yields one `String` per frame in arrival order. A frame that is not
/// UTF-8 yields a [`DecodeError::Utf8`] and iteration continues; a read
/// error is yielded once and ends the iteration.
///
/// # Example
/// ```
/// use gpsd_stream::protocol::Frames;
///
/// let input = b"{\"class\":\"VERSION\"}\r\n{\"class\":\"TPV\"}".as_slice();
/// let frames: Vec<String> = Frames::new(input).map(|f| f.unwrap()).collect();
/// assert_eq!(frames, ["{\"class\":\"VERSION\"}", "{\"class\":\"TPV\"}"]);
/// ```
#[derive(Debug)]
pub struct Frames<R> {
    reader: R,
    buf: Vec<u8>,
    done: bool,
}

impl<R> Frames<R> {
    pub fn new(reader: R) -> Self {
        Frames {
            reader,
            buf: Vec::new(),
            done: false,
        }
    }

    /// Gives access to the underlying reader, e.g. to write commands
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// True once end of stream or a read error has been seen
    pub fn is_exhausted(&self) -> bool {
        self.done
    }
}

impl<R: std::io::BufRead> Iterator for Frames<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.read_frame(&mut self.buf) {
            Ok(true) => Some(frame_text(&self.buf).map_err(GpsdError::from)),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(GpsdError::from_io("read", e)))
            }
        }
    }
}

impl<R: std::io::BufRead> std::iter::FusedIterator for Frames<R> {}

/// A command that can be sent to GPSD
pub trait GpsdJsonRequest {
    /// Renders the command in wire form, e.g. `?WATCH={"enable":true};`
    fn to_command(&self) -> serde_json::Result<String>;
}

/// Command writing over any writer
pub trait GpsdJsonEncode: std::io::Write {
    fn write_request(&mut self, request: &impl GpsdJsonRequest) -> std::io::Result<()> {
        let cmd = request.to_command()?;
        self.write_all(cmd.as_bytes())?;
        self.flush()
    }
}

impl<W: std::io::Write + ?Sized> GpsdJsonEncode for W {}

/// Command writing over any async writer
pub trait GpsdJsonEncodeAsync: futures_io::AsyncWrite + Unpin {
    fn write_request_async<'a>(
        &'a mut self,
        request: &'a impl GpsdJsonRequest,
    ) -> impl std::future::Future<Output = std::io::Result<()>> + 'a {
        use futures_util::AsyncWriteExt;

        async move {
            let cmd = request.to_command()?;
            self.write_all(cmd.as_bytes()).await?;
            self.flush().await
        }
    }
}

impl<W: futures_io::AsyncWrite + Unpin + ?Sized> GpsdJsonEncodeAsync for W {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    /// Reader that fails once its input is exhausted
    struct Broken<'a>(&'a [u8]);

    impl std::io::Read for Broken<'_> {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                return Err(std::io::ErrorKind::ConnectionReset.into());
            }
            let n = self.0.len().min(out.len());
            out[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    fn collect(input: &[u8]) -> Vec<String> {
        Frames::new(input).map(|frame| frame.unwrap()).collect()
    }

    #[test]
    fn test_frames_strip_crlf_and_skip_blank_lines() {
        let frames = collect(b"{\"class\":\"TPV\"}\r\n\r\n\n{\"class\":\"SKY\"}\n");
        assert_eq!(frames, ["{\"class\":\"TPV\"}", "{\"class\":\"SKY\"}"]);
    }

    #[test]
    fn test_frames_emit_trailing_partial_segment() {
        assert_eq!(collect(b"first\nsecond"), ["first", "second"]);
        assert_eq!(collect(b"only"), ["only"]);
        assert!(collect(b"").is_empty());
        assert!(collect(b"\r\n").is_empty());
    }

    #[test]
    fn test_frames_keep_going_after_invalid_utf8() {
        let mut frames = Frames::new(b"\xff\xfe\nok\n".as_slice());
        let err = frames.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(frames.next().unwrap().unwrap(), "ok");
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_frames_stop_after_read_error() {
        let reader = std::io::BufReader::new(Broken(b"one\ntw"));
        let mut frames = Frames::new(reader);
        assert_eq!(frames.next().unwrap().unwrap(), "one");
        let err = frames.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(frames.next().is_none());
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_write_request() {
        let mut out = Vec::new();
        out.write_request(&v3::types::Watch::disable()).unwrap();
        assert_eq!(out, b"?WATCH={\"enable\":false};");
    }

    #[test]
    fn test_async_frames() {
        let input = futures_util::io::BufReader::new(b"a\r\n\nb".as_slice());
        futures::executor::block_on(async move {
            let mut input = input;
            let mut buf = Vec::new();
            assert!(input.read_frame_async(&mut buf).await.unwrap());
            assert_eq!(buf, b"a");
            assert!(input.read_frame_async(&mut buf).await.unwrap());
            assert_eq!(buf, b"b");
            assert!(!input.read_frame_async(&mut buf).await.unwrap());
        });
    }

    proptest! {
        #[test]
        fn prop_framing_round_trips(lines in prop::collection::vec("[^\r\n]{1,40}", 0..20)) {
            let mut stream = String::new();
            for line in &lines {
                stream.push_str(line);
                stream.push('\n');
            }

            let frames = collect(stream.as_bytes());
            prop_assert!(frames.iter().all(|f| !f.contains('\n')));
            prop_assert_eq!(&frames, &lines);

            let mut reassembled = String::new();
            for frame in &frames {
                reassembled.push_str(frame);
                reassembled.push('\n');
            }
            prop_assert_eq!(reassembled, stream);
        }
    }
}

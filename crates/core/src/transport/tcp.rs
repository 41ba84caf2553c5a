use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use url::Url;

use crate::error::{Result, RtspError};
use crate::message::Message;
use crate::pipeline::Pipeline;

/// Port used when the URI has none (RFC 2326 §3.2).
pub const DEFAULT_PORT: u16 = 554;

/// How long a read may block before timers get a chance to fire.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Why [`Connection::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The server closed the connection; the pipeline has seen its end.
    Closed,
    /// The `running` flag was cleared.
    Stopped,
}

/// Blocking TCP connection to an RTSP server, carrying both the control
/// channel and the interleaved media.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Connect to the host and port of an `rtsp://` URI.
    pub fn open(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| RtspError::InvalidUri(format!("{uri}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| RtspError::InvalidUri(uri.to_string()))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let stream = TcpStream::connect((host, port))?;
        Self::from_stream(stream)
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        tracing::info!(%peer_addr, "connected");
        Ok(Self { stream, peer_addr })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// A second handle on the socket, for the pipeline's source to write
    /// requests to.
    pub fn writer(&self) -> Result<TcpStream> {
        Ok(self.stream.try_clone()?)
    }

    /// Feed everything the server sends into `pipeline`, polling its timers
    /// between reads, until the server hangs up or `running` is cleared.
    pub fn run(&mut self, pipeline: &mut Pipeline, running: &AtomicBool) -> Result<Exit> {
        let mut buf = vec![0u8; READ_BUFFER_BYTES];
        while running.load(Ordering::SeqCst) {
            if self.step(pipeline, &mut buf)? {
                return Ok(Exit::Closed);
            }
        }
        tracing::debug!(peer = %self.peer_addr, "transport loop stopped");
        Ok(Exit::Stopped)
    }

    /// [`run`](Self::run) for at most `timeout`, give or take one
    /// [`POLL_INTERVAL`].
    pub fn run_for(&mut self, pipeline: &mut Pipeline, timeout: Duration) -> Result<Exit> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; READ_BUFFER_BYTES];
        while Instant::now() < deadline {
            if self.step(pipeline, &mut buf)? {
                return Ok(Exit::Closed);
            }
        }
        Ok(Exit::Stopped)
    }

    /// One read, at most [`POLL_INTERVAL`] long, then a timer poll.
    /// Returns `true` once the server has closed the connection.
    fn step(&mut self, pipeline: &mut Pipeline, buf: &mut [u8]) -> Result<bool> {
        match self.stream.read(buf) {
            Ok(0) => {
                tracing::info!(peer = %self.peer_addr, "connection closed by server");
                pipeline.end()?;
                return Ok(true);
            }
            Ok(n) => {
                tracing::trace!(bytes = n, "read from transport");
                pipeline.feed(Message::Raw(Bytes::copy_from_slice(&buf[..n])))?;
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e.into()),
        }
        pipeline.poll(Instant::now())?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::pipeline::io::{QueueSink, StreamSource};

    #[test]
    fn open_rejects_bad_uri() {
        assert!(matches!(
            Connection::open("not a uri"),
            Err(RtspError::InvalidUri(_))
        ));
        assert!(matches!(
            Connection::open("file:///tmp/x"),
            Err(RtspError::InvalidUri(_))
        ));
    }

    #[test]
    fn run_feeds_until_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"hello").unwrap();
        });

        let mut conn = Connection::open(&format!("rtsp://127.0.0.1:{port}/stream")).unwrap();
        let sink = QueueSink::new();
        let queue = sink.handle();
        let (pipeline, _) = Pipeline::builder(StreamSource::new(conn.writer().unwrap()));
        let (mut pipeline, _) = pipeline.sink(sink);

        let running = AtomicBool::new(true);
        assert_eq!(conn.run(&mut pipeline, &running).unwrap(), Exit::Closed);
        server.join().unwrap();

        let data: Vec<u8> = queue
            .drain()
            .into_iter()
            .flat_map(|msg| match msg {
                Message::Raw(data) => data.to_vec(),
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn run_stops_when_flag_cleared() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let _server_side = listener.accept().unwrap();

        let mut conn = Connection::from_stream(stream).unwrap();
        let (mut pipeline, _) = Pipeline::builder(StreamSource::new(conn.writer().unwrap()))
            .0
            .sink(QueueSink::new());
        let running = AtomicBool::new(false);
        assert_eq!(conn.run(&mut pipeline, &running).unwrap(), Exit::Stopped);
        assert_eq!(
            conn.run_for(&mut pipeline, Duration::from_millis(60)).unwrap(),
            Exit::Stopped
        );
    }
}

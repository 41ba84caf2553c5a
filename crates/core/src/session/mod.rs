//! RTSP client session (RFC 2326 §3, §12.37).
//!
//! [`RtspSession`] is the tube that drives the control connection. It
//! queues commands, sends them one at a time, and reacts to responses:
//!
//! - A unique session ID, captured from the first response that carries a
//!   `Session` header.
//! - The playback state: Idle -> Playing <-> Paused.
//! - A renewal deadline derived from the session timeout. An OPTIONS
//!   request is sent before the server expires the session.
//! - Per-channel RTCP time bases used to stamp RTP packets with wall-clock
//!   presentation times.
//!
//! ## Session lifecycle (RFC 2326 §A.2)
//!
//! ```text
//! play()   Idle    -> OPTIONS, DESCRIBE          -> Playing
//! SDP              -> SETUP per media, PLAY
//! pause()  Playing -> PAUSE                      -> Paused
//! play()   Paused  -> PLAY                       -> Playing
//! stop()   any     -> TEARDOWN (if established)  -> Idle
//! ```
//!
//! Only one request is in flight at a time: the next queued command is
//! sent when the response to the previous one arrives.

pub mod auth;
pub mod transport;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::Depacketizer;
use crate::media::aac::AacDepacketizer;
use crate::media::h264::H264Depacketizer;
use crate::media::onvif::OnvifDepacketizer;
use crate::media::rtcp::{RtcpPacket, SENDER_REPORT};
use crate::media::rtp::RtpPacket;
use crate::message::{Message, RtcpMessage, RtpMessage};
use crate::pipeline::{Component, Context, Stage, Tube};
use crate::protocol::request::{Command, Headers, Method, RtspRequest};
use crate::protocol::response::{PlayRange, RtspResponse};
use crate::protocol::sdp::{MediaDescription, Sdp};
pub use auth::Auth;
pub use transport::TransportHeader;

/// Renewal never happens more often than this, in seconds.
const MIN_SESSION_TIMEOUT_SECS: u64 = 5;

/// Connection settings for an [`RtspSession`].
///
/// Either `uri` or `hostname` must be set. Without a URI, one is derived
/// from the hostname and parameters:
/// `rtsp://{hostname}/axis-media/media.amp?{parameters joined by &}`.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub uri: Option<String>,
    pub hostname: Option<String>,
    /// Query parameters for the derived URI, e.g. `"resolution=640x480"`.
    pub parameters: Vec<String>,
    /// Headers sent with every request.
    pub default_headers: Headers,
    /// Headers per method. An entry replaces the built-in preset for that
    /// method.
    pub headers: HashMap<Method, Headers>,
}

impl SessionConfig {
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Default::default()
        }
    }

    /// The effective session URI.
    pub fn resolve_uri(&self) -> Result<String> {
        if let Some(uri) = &self.uri {
            return Ok(uri.clone());
        }
        let hostname = self.hostname.as_deref().ok_or(RtspError::MissingUri)?;
        let mut uri = format!("rtsp://{hostname}/axis-media/media.amp");
        if !self.parameters.is_empty() {
            uri.push('?');
            uri.push_str(&self.parameters.join("&"));
        }
        Ok(uri)
    }

    /// Built-in per-method headers overlaid with the configured ones.
    fn method_headers(&self) -> HashMap<Method, Headers> {
        let mut presets = HashMap::from([
            (Method::Setup, Headers::new().with("Blocksize", "64000")),
            (Method::Describe, Headers::new().with("Accept", "application/sdp")),
        ]);
        for (method, headers) in &self.headers {
            presets.insert(*method, headers.clone());
        }
        presets
    }
}

/// Client-side playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Playing,
    Paused,
}

/// Keep-alive deadline for the server session.
#[derive(Debug, Clone, Copy)]
struct Renewal {
    interval: Duration,
    due: Instant,
}

/// RTP clock of one interleaved channel, synchronized by RTCP.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelClock {
    clock_rate: u32,
    /// RTP timestamp and wall-clock milliseconds of the last sender report.
    sync: Option<(u32, f64)>,
}

type SdpCallback = Box<dyn FnMut(&Sdp) + Send>;
type PlayCallback = Box<dyn FnMut(Option<PlayRange>) + Send>;
type ErrorCallback = Box<dyn FnMut(RtspError) + Send>;

/// RTSP control tube.
///
/// Consumes RTSP responses, passes every other message on. SDP messages
/// trigger the SETUP requests; RTCP sender reports set the time base that
/// stamps later RTP packets of the same media with `ntp_timestamp`.
pub struct RtspSession {
    uri: String,
    default_headers: Headers,
    method_headers: HashMap<Method, Headers>,
    /// Seconds, sent as `Range: npt=<start>-` with PLAY.
    start_time: f64,

    sequence: u32,
    queue: VecDeque<Command>,
    /// Method of every request sent, by CSeq.
    history: HashMap<u32, Method>,
    last_sent: Option<Command>,
    waiting: bool,
    state: SessionState,

    content_base: Option<String>,
    session_id: Option<String>,
    renewal: Option<Renewal>,
    clocks: HashMap<u8, ChannelClock>,
    outgoing_closed: bool,

    on_sdp: Option<SdpCallback>,
    on_play: Option<PlayCallback>,
    on_error: Option<ErrorCallback>,
}

impl RtspSession {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let uri = config.resolve_uri()?;
        tracing::debug!(%uri, "RTSP session created");
        Ok(Self {
            uri,
            default_headers: config.default_headers.clone(),
            method_headers: config.method_headers(),
            start_time: 0.0,
            sequence: 1,
            queue: VecDeque::new(),
            history: HashMap::new(),
            last_sent: None,
            waiting: false,
            state: SessionState::Idle,
            content_base: None,
            session_id: None,
            renewal: None,
            clocks: HashMap::new(),
            outgoing_closed: false,
            on_sdp: None,
            on_play: None,
            on_error: None,
        })
    }

    /// Replace the URI and headers.
    pub fn update(&mut self, config: SessionConfig) -> Result<()> {
        self.uri = config.resolve_uri()?;
        self.default_headers = config.default_headers.clone();
        self.method_headers = config.method_headers();
        Ok(())
    }

    /// Called with every SDP the session sees.
    pub fn on_sdp(&mut self, f: impl FnMut(&Sdp) + Send + 'static) {
        self.on_sdp = Some(Box::new(f));
    }

    /// Called with the `Range` of every PLAY response.
    pub fn on_play(&mut self, f: impl FnMut(Option<PlayRange>) + Send + 'static) {
        self.on_play = Some(Box::new(f));
    }

    /// Called with [`RtspError::Status`] for every response of 400 or above.
    pub fn on_error(&mut self, f: impl FnMut(RtspError) + Send + 'static) {
        self.on_error = Some(Box::new(f));
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn content_base(&self) -> Option<&str> {
        self.content_base.as_deref()
    }

    /// Interval of the armed renewal, if any.
    pub fn renewal_interval(&self) -> Option<Duration> {
        self.renewal.map(|r| r.interval)
    }

    /// Commands waiting for the in-flight request to complete.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn outgoing_closed(&self) -> bool {
        self.outgoing_closed
    }

    /// Start or resume playback.
    ///
    /// From idle this describes the stream first, `start_time` (seconds)
    /// becomes the PLAY range start. From paused the session is resumed.
    pub fn play(&mut self, start_time: f64, ctx: &mut Context) -> Result<()> {
        match self.state {
            SessionState::Idle => {
                self.start_time = start_time;
                self.queue.push_back(Command::new(Method::Options));
                self.queue.push_back(Command::new(Method::Describe));
            }
            SessionState::Paused => {
                let session_id = self.session_id.clone().ok_or(RtspError::NoSession)?;
                self.queue
                    .push_back(Command::new(Method::Play).with_header("Session", session_id));
            }
            SessionState::Playing => {}
        }
        self.set_state(SessionState::Playing);
        self.dequeue(ctx);
        Ok(())
    }

    pub fn pause(&mut self, ctx: &mut Context) {
        self.queue.push_back(Command::new(Method::Pause));
        self.set_state(SessionState::Paused);
        self.dequeue(ctx);
    }

    /// Tear the session down, or drop queued commands if none exists.
    pub fn stop(&mut self, ctx: &mut Context) {
        if self.session_id.is_some() {
            self.queue.push_back(Command::new(Method::Teardown));
        } else {
            self.queue.clear();
        }
        self.set_state(SessionState::Idle);
        self.renewal = None;
        self.dequeue(ctx);
    }

    /// Resend the last request with a new CSeq.
    pub fn retry(&mut self, ctx: &mut Context) {
        match self.last_sent.clone() {
            Some(command) => self.send(command, ctx),
            None => tracing::warn!("no request sent, can't retry"),
        }
    }

    /// Send `command` now, bypassing the queue.
    ///
    /// Headers are merged in order: CSeq, default headers, the method's
    /// headers, the command's own headers, then the session ID.
    pub fn send(&mut self, command: Command, ctx: &mut Context) {
        self.waiting = true;
        self.last_sent = Some(command.clone());

        let cseq = self.sequence;
        self.sequence += 1;
        let mut headers = Headers::new().with("CSeq", cseq.to_string());
        headers.merge(&self.default_headers);
        if let Some(preset) = self.method_headers.get(&command.method) {
            headers.merge(preset);
        }
        headers.merge(&command.headers);
        if let Some(session_id) = &self.session_id {
            headers.set("Session", session_id.clone());
        }
        self.history.insert(cseq, command.method);

        let request = RtspRequest {
            method: command.method,
            uri: command.uri.unwrap_or_else(|| self.uri.clone()),
            headers,
        };
        if self.outgoing_closed {
            tracing::warn!(method = %request.method, "connection closed, request not sent");
            return;
        }
        tracing::debug!(cseq, method = %request.method, uri = %request.uri, "sending request");
        ctx.push_outgoing(Message::Request(request));
    }

    fn dequeue(&mut self, ctx: &mut Context) {
        if self.waiting {
            return;
        }
        if let Some(command) = self.queue.pop_front() {
            self.send(command, ctx);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(old_state = ?self.state, new_state = ?state, "state transition");
            self.state = state;
        }
    }

    fn arm_renewal(&mut self, timeout_secs: u64) {
        let interval = Duration::from_secs(
            timeout_secs
                .saturating_sub(5)
                .max(MIN_SESSION_TIMEOUT_SECS),
        );
        tracing::debug!(?interval, "session renewal armed");
        self.renewal = Some(Renewal {
            interval,
            due: Instant::now() + interval,
        });
    }

    fn on_response(&mut self, response: RtspResponse, ctx: &mut Context) -> Result<()> {
        self.waiting = false;

        let status = response.status_code();
        let ended = response.connection_ended();
        let cseq = response
            .cseq()
            .ok_or(RtspError::parse(ParseErrorKind::MissingCSeq))?;
        let method = self.history.get(&cseq).copied();
        tracing::debug!(cseq, status, method = ?method, "response received");
        tracing::trace!(%response, "response");

        if self.session_id.is_none() && !ended {
            if let Some(session_id) = response.session_id() {
                tracing::info!(session_id, "session established");
                self.session_id = Some(session_id.to_string());
            }
            if let Some(timeout) = response.session_timeout() {
                self.arm_renewal(timeout);
            }
        }

        if self.content_base.is_none() {
            self.content_base = response.content_base().map(str::to_string);
        }

        if status >= 400 {
            tracing::warn!(status, reason = response.reason(), "request failed");
            if let Some(on_error) = self.on_error.as_mut() {
                on_error(RtspError::Status {
                    code: status,
                    response: response.to_string(),
                });
            }
        }

        if method == Some(Method::Play)
            && let Some(on_play) = self.on_play.as_mut()
        {
            on_play(response.range());
        }

        if ended {
            tracing::info!(session_id = ?self.session_id, status, "session ended by server");
            self.session_id = None;
        }

        self.dequeue(ctx);
        Ok(())
    }

    fn on_rtcp(&mut self, rtcp: &RtcpMessage) -> Result<()> {
        if rtcp.data.get(1) != Some(&SENDER_REPORT) {
            return Ok(());
        }
        let RtcpPacket::SenderReport(report) = RtcpPacket::parse(&rtcp.data)? else {
            return Ok(());
        };
        let rtp_channel = rtcp.channel.wrapping_sub(1);
        let clock = self.clocks.entry(rtp_channel).or_default();
        clock.sync = Some((report.rtp_timestamp, report.ntp_millis()));
        tracing::trace!(
            channel = rtp_channel,
            rtp_timestamp = report.rtp_timestamp,
            "sender report"
        );
        Ok(())
    }

    fn on_rtp(&self, rtp: &mut RtpMessage) -> Result<()> {
        let Some(clock) = self.clocks.get(&rtp.channel) else {
            return Ok(());
        };
        let Some((t0, n0)) = clock.sync else {
            return Ok(());
        };
        if clock.clock_rate == 0 {
            return Ok(());
        }
        let t = RtpPacket::new(&rtp.data)?.timestamp();
        // The delta is taken in signed 32-bit to survive timestamp wrap.
        let dt = t.wrapping_sub(t0) as i32;
        rtp.ntp_timestamp = Some(dt as f64 / clock.clock_rate as f64 * 1000.0 + n0);
        Ok(())
    }

    fn on_sdp_message(&mut self, sdp: &Sdp, ctx: &mut Context) {
        self.clocks.clear();
        for (index, media) in sdp.media.iter().enumerate() {
            let Some(rtpmap) = media.rtpmap() else {
                continue;
            };
            if !is_supported(media) {
                tracing::debug!(
                    index,
                    encoding = %rtpmap.encoding_name,
                    "no depacketizer for media, skipping SETUP"
                );
                continue;
            }
            let Some(control) = media.control() else {
                continue;
            };

            let Some(transport) = TransportHeader::interleaved(index) else {
                tracing::warn!(index, "no interleaved channels left for media, skipping SETUP");
                continue;
            };
            self.queue.push_back(
                Command::new(Method::Setup)
                    .with_uri(self.resolve_control(control))
                    .with_header("Transport", transport.to_string()),
            );
            self.clocks.insert(
                transport.rtp_channel,
                ChannelClock {
                    clock_rate: rtpmap.clock_rate,
                    sync: None,
                },
            );
        }

        if self.state == SessionState::Playing {
            self.queue.push_back(
                Command::new(Method::Play).with_header("Range", format!("npt={}-", self.start_time)),
            );
        }
        self.dequeue(ctx);
    }

    /// Resolve a media control attribute against Content-Base, or the
    /// session URI when the server sent none.
    fn resolve_control(&self, control: &str) -> String {
        let base = self.content_base.as_deref().unwrap_or(&self.uri);
        if control == "*" {
            return base.to_string();
        }
        if is_absolute(control) {
            return control.to_string();
        }
        match url::Url::parse(base).and_then(|base| base.join(control)) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => format!("{base}{control}"),
        }
    }
}

fn is_absolute(uri: &str) -> bool {
    uri.split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && !scheme.contains(':'))
}

/// Whether a depacketizer exists for the media.
fn is_supported(media: &MediaDescription) -> bool {
    H264Depacketizer::accepts(media)
        || AacDepacketizer::accepts(media)
        || OnvifDepacketizer::accepts(media)
}

impl Stage for RtspSession {
    fn incoming(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        match msg {
            Message::Rtsp(response) => self.on_response(response, ctx)?,
            Message::Rtcp(rtcp) => {
                self.on_rtcp(&rtcp)?;
                ctx.push(Message::Rtcp(rtcp));
            }
            Message::Rtp(mut rtp) => {
                self.on_rtp(&mut rtp)?;
                ctx.push(Message::Rtp(rtp));
            }
            Message::Sdp(sdp) => {
                self.on_sdp_message(&sdp, ctx);
                if let Some(on_sdp) = self.on_sdp.as_mut() {
                    on_sdp(&sdp);
                }
                ctx.push(Message::Sdp(sdp));
            }
            other => ctx.push(other),
        }
        Ok(())
    }

    fn end(&mut self, _ctx: &mut Context) -> Result<()> {
        tracing::info!("inbound stream ended, closing outgoing");
        self.outgoing_closed = true;
        self.renewal = None;
        Ok(())
    }

    fn poll(&mut self, now: Instant, ctx: &mut Context) -> Result<()> {
        let Some(renewal) = self.renewal.as_mut() else {
            return Ok(());
        };
        if now < renewal.due {
            return Ok(());
        }
        renewal.due = now + renewal.interval;
        tracing::debug!("renewing session");
        self.queue.push_back(Command::new(Method::Options));
        self.dequeue(ctx);
        Ok(())
    }
}

impl Component for RtspSession {
    type Role = Tube;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::test_fixtures::{RTCP_SR_SDES, SDP_VIDEO_AUDIO_SVG, SETUP_RESPONSE};

    const URI: &str = "rtsp://192.168.0.90/axis-media/media.amp?video=1&audio=1&svg=on";

    fn session() -> RtspSession {
        RtspSession::new(SessionConfig::with_uri(URI)).unwrap()
    }

    fn response(text: &str) -> Message {
        Message::Rtsp(RtspResponse::parse(Bytes::from(text.to_string())).unwrap())
    }

    fn ok(cseq: u32, extra: &str) -> Message {
        response(&format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n{extra}\r\n"))
    }

    fn requests(ctx: &mut Context) -> Vec<RtspRequest> {
        ctx.take_outgoing()
            .into_iter()
            .map(|msg| match msg {
                Message::Request(request) => request,
                other => panic!("expected request, got {}", other.kind()),
            })
            .collect()
    }

    fn only_request(ctx: &mut Context) -> RtspRequest {
        let mut sent = requests(ctx);
        assert_eq!(sent.len(), 1, "expected exactly one request");
        sent.remove(0)
    }

    // --- configuration ---

    #[test]
    fn uri_derived_from_hostname() {
        let config = SessionConfig {
            hostname: Some("hostname".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_uri().unwrap(), "rtsp://hostname/axis-media/media.amp");

        let config = SessionConfig {
            hostname: Some("hostname".into()),
            parameters: vec!["resolution=640x480".into(), "fps=15".into()],
            ..Default::default()
        };
        assert_eq!(
            config.resolve_uri().unwrap(),
            "rtsp://hostname/axis-media/media.amp?resolution=640x480&fps=15"
        );
    }

    #[test]
    fn missing_uri_and_hostname_fails() {
        assert!(matches!(
            RtspSession::new(SessionConfig::default()),
            Err(RtspError::MissingUri)
        ));
    }

    #[test]
    fn update_replaces_uri() {
        let mut s = session();
        s.update(SessionConfig::with_uri("rtsp://other/stream")).unwrap();
        assert_eq!(s.uri(), "rtsp://other/stream");
    }

    // --- sending ---

    #[test]
    fn cseq_starts_at_one_and_increments() {
        let mut s = session();
        let mut ctx = Context::default();
        s.send(Command::new(Method::Describe), &mut ctx);
        s.send(Command::new(Method::Options), &mut ctx);
        let sent = requests(&mut ctx);
        assert_eq!(sent[0].cseq(), Some(1));
        assert_eq!(sent[0].method, Method::Describe);
        assert_eq!(sent[0].uri, URI);
        assert_eq!(sent[0].headers.get("Accept"), Some("application/sdp"));
        assert_eq!(sent[1].cseq(), Some(2));
    }

    #[test]
    fn header_precedence() {
        let config = SessionConfig {
            uri: Some(URI.into()),
            default_headers: Headers::new()
                .with("customheader", "customVal")
                .with("Blocksize", "1"),
            ..Default::default()
        };
        let mut s = RtspSession::new(config).unwrap();
        let mut ctx = Context::default();
        s.send(
            Command::new(Method::Setup).with_header("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1"),
            &mut ctx,
        );
        let request = only_request(&mut ctx);
        assert_eq!(request.headers.get("customheader"), Some("customVal"));
        // The method preset beats the default.
        assert_eq!(request.headers.get("Blocksize"), Some("64000"));
        assert!(request.headers.get("Transport").is_some());
        assert_eq!(request.headers.iter().next(), Some(("CSeq", "1")));
    }

    #[test]
    fn configured_method_headers_replace_preset() {
        let config = SessionConfig {
            uri: Some(URI.into()),
            headers: HashMap::from([(Method::Setup, Headers::new().with("Blocksize", "1400"))]),
            ..Default::default()
        };
        let mut s = RtspSession::new(config).unwrap();
        let mut ctx = Context::default();
        s.send(Command::new(Method::Setup), &mut ctx);
        assert_eq!(only_request(&mut ctx).headers.get("Blocksize"), Some("1400"));
    }

    #[test]
    fn retry_uses_fresh_cseq() {
        let mut s = session();
        let mut ctx = Context::default();
        s.retry(&mut ctx);
        assert!(ctx.take_outgoing().is_empty());

        s.send(Command::new(Method::Describe).with_header("X-Test", "1"), &mut ctx);
        s.retry(&mut ctx);
        let sent = requests(&mut ctx);
        assert_eq!(sent[1].cseq(), Some(2));
        assert_eq!(sent[1].method, sent[0].method);
        assert_eq!(sent[1].uri, sent[0].uri);
        assert_eq!(sent[1].headers.get("X-Test"), Some("1"));
    }

    #[test]
    fn nothing_sent_after_inbound_end() {
        let mut s = session();
        let mut ctx = Context::default();
        assert!(!s.outgoing_closed());
        s.end(&mut ctx).unwrap();
        assert!(s.outgoing_closed());
        s.send(Command::new(Method::Options), &mut ctx);
        assert!(ctx.take_outgoing().is_empty());
    }

    // --- handshake ---

    #[test]
    fn play_from_idle_runs_full_handshake() {
        let mut s = session();
        let mut ctx = Context::default();

        s.play(0.0, &mut ctx).unwrap();
        assert_eq!(only_request(&mut ctx).method, Method::Options);
        assert_eq!(s.pending(), 1);

        s.incoming(ok(1, ""), &mut ctx).unwrap();
        assert_eq!(only_request(&mut ctx).method, Method::Describe);

        s.incoming(
            ok(2, "Content-Base: rtsp://192.168.0.90/axis-media/media.amp/\r\n"),
            &mut ctx,
        )
        .unwrap();
        assert!(ctx.take_outgoing().is_empty());
        let sdp = Sdp::parse(SDP_VIDEO_AUDIO_SVG).unwrap();
        s.incoming(Message::Sdp(sdp), &mut ctx).unwrap();
        assert!(matches!(ctx.take_incoming().as_slice(), [Message::Sdp(_)]));

        let setup = only_request(&mut ctx);
        assert_eq!(setup.method, Method::Setup);
        assert_eq!(
            setup.uri,
            "rtsp://192.168.0.90/axis-media/media.amp/stream=0?video=1&audio=1&svg=on"
        );
        assert_eq!(
            setup.headers.get("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=0-1")
        );
        assert_eq!(setup.headers.get("Blocksize"), Some("64000"));
        // Audio SETUP and PLAY are queued; SVG has no depacketizer.
        assert_eq!(s.pending(), 2);

        s.incoming(ok(3, "Session: Bk48Ak7wjcWaAgRD; timeout=60\r\n"), &mut ctx)
            .unwrap();
        let setup = only_request(&mut ctx);
        assert_eq!(setup.method, Method::Setup);
        assert_eq!(
            setup.headers.get("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=2-3")
        );
        assert_eq!(setup.headers.get("Session"), Some("Bk48Ak7wjcWaAgRD"));

        s.incoming(ok(4, "Session: Bk48Ak7wjcWaAgRD; timeout=60\r\n"), &mut ctx)
            .unwrap();
        let play = only_request(&mut ctx);
        assert_eq!(play.method, Method::Play);
        assert_eq!(play.uri, URI);
        assert_eq!(play.headers.get("Range"), Some("npt=0-"));
        assert_eq!(s.state(), SessionState::Playing);
    }

    #[test]
    fn media_beyond_channel_range_are_not_set_up() {
        let mut sdp = String::from("v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n");
        for i in 0..130 {
            sdp.push_str(&format!(
                "m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:stream={i}\r\n"
            ));
        }
        let mut s = session();
        let mut ctx = Context::default();
        s.incoming(Message::Sdp(Sdp::parse(&sdp).unwrap()), &mut ctx).unwrap();

        let first = only_request(&mut ctx);
        assert_eq!(
            first.headers.get("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=0-1")
        );
        // Media 128 and 129 would need channels past 255.
        assert_eq!(s.pending(), 127);
        assert_eq!(s.clocks.len(), 128);
        assert!(s.clocks.contains_key(&254));
    }

    #[test]
    fn relative_control_resolved_against_content_base() {
        let mut s = session();
        s.content_base = Some("rtsp://camera/media/".into());
        assert_eq!(s.resolve_control("stream=0"), "rtsp://camera/media/stream=0");
        assert_eq!(s.resolve_control("rtsp://other/x"), "rtsp://other/x");
        assert_eq!(s.resolve_control("*"), "rtsp://camera/media/");
        s.content_base = None;
        assert_eq!(s.resolve_control("trackID=1"), "rtsp://192.168.0.90/axis-media/trackID=1");
    }

    #[test]
    fn session_captured_from_setup_response() {
        let mut s = session();
        let mut ctx = Context::default();
        assert_eq!(s.session_id(), None);
        assert_eq!(s.renewal_interval(), None);
        s.incoming(response(SETUP_RESPONSE), &mut ctx).unwrap();
        assert_eq!(s.session_id(), Some("Bk48Ak7wjcWaAgRD"));
        assert_eq!(s.renewal_interval(), Some(Duration::from_secs(55)));
        // Responses are consumed.
        assert!(ctx.take_incoming().is_empty());
    }

    #[test]
    fn no_renewal_without_timeout() {
        let mut s = session();
        let mut ctx = Context::default();
        s.incoming(ok(1, "Session: abc\r\n"), &mut ctx).unwrap();
        assert_eq!(s.session_id(), Some("abc"));
        assert_eq!(s.renewal_interval(), None);
    }

    #[test]
    fn short_timeout_renews_every_five_seconds() {
        let mut s = session();
        let mut ctx = Context::default();
        s.incoming(ok(1, "Session: abc;timeout=3\r\n"), &mut ctx).unwrap();
        assert_eq!(s.renewal_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn renewal_sends_options_when_due() {
        let mut s = session();
        let mut ctx = Context::default();
        s.incoming(response(SETUP_RESPONSE), &mut ctx).unwrap();

        let start = Instant::now();
        s.poll(start + Duration::from_secs(50), &mut ctx).unwrap();
        assert!(ctx.take_outgoing().is_empty());

        s.poll(start + Duration::from_secs(56), &mut ctx).unwrap();
        let options = only_request(&mut ctx);
        assert_eq!(options.method, Method::Options);
        assert_eq!(options.headers.get("Session"), Some("Bk48Ak7wjcWaAgRD"));
    }

    #[test]
    fn missing_cseq_is_an_error() {
        let mut s = session();
        let mut ctx = Context::default();
        let result = s.incoming(response("RTSP/1.0 200 OK\r\nServer: x\r\n\r\n"), &mut ctx);
        assert!(matches!(
            result,
            Err(RtspError::Parse {
                kind: ParseErrorKind::MissingCSeq
            })
        ));
    }

    // --- callbacks ---

    #[test]
    fn error_status_reported_and_queue_continues() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let mut s = session();
        let sink = errors.clone();
        s.on_error(move |e| sink.lock().push(e));
        let mut ctx = Context::default();

        s.play(0.0, &mut ctx).unwrap();
        ctx.take_outgoing();
        s.incoming(response("RTSP/1.0 404 Not Found\r\nCSeq: 1\r\n\r\n"), &mut ctx)
            .unwrap();

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], RtspError::Status { code: 404, .. }));
        assert_eq!(only_request(&mut ctx).method, Method::Describe);
    }

    #[test]
    fn play_response_reports_range() {
        let ranges = Arc::new(Mutex::new(Vec::new()));
        let mut s = session();
        let sink = ranges.clone();
        s.on_play(move |range| sink.lock().push(range));
        let mut ctx = Context::default();

        s.send(Command::new(Method::Play), &mut ctx);
        s.incoming(ok(1, "Range: npt=now-\r\n"), &mut ctx).unwrap();
        let ranges = ranges.lock();
        let range = ranges[0].as_ref().unwrap();
        assert_eq!(range.start, "now");
        assert_eq!(range.end, None);
    }

    #[test]
    fn sdp_callback_sees_description() {
        let seen = Arc::new(Mutex::new(0));
        let mut s = session();
        let counter = seen.clone();
        s.on_sdp(move |sdp| *counter.lock() = sdp.media.len());
        let mut ctx = Context::default();
        s.incoming(Message::Sdp(Sdp::parse(SDP_VIDEO_AUDIO_SVG).unwrap()), &mut ctx)
            .unwrap();
        assert_eq!(*seen.lock(), 3);
    }

    // --- pause / stop ---

    #[test]
    fn pause_then_resume() {
        let mut s = session();
        let mut ctx = Context::default();
        s.incoming(ok(1, "Session: abc\r\n"), &mut ctx).unwrap();

        s.pause(&mut ctx);
        assert_eq!(s.state(), SessionState::Paused);
        assert_eq!(only_request(&mut ctx).method, Method::Pause);
        s.incoming(ok(2, ""), &mut ctx).unwrap();

        s.play(0.0, &mut ctx).unwrap();
        let play = only_request(&mut ctx);
        assert_eq!(play.method, Method::Play);
        assert_eq!(play.headers.get("Session"), Some("abc"));
    }

    #[test]
    fn resume_without_session_fails() {
        let mut s = session();
        let mut ctx = Context::default();
        s.pause(&mut ctx);
        assert!(matches!(s.play(0.0, &mut ctx), Err(RtspError::NoSession)));
    }

    #[test]
    fn stop_tears_down_established_session() {
        let mut s = session();
        let mut ctx = Context::default();
        s.incoming(response(SETUP_RESPONSE), &mut ctx).unwrap();
        s.stop(&mut ctx);
        assert_eq!(only_request(&mut ctx).method, Method::Teardown);
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.renewal_interval(), None);
    }

    #[test]
    fn stop_without_session_clears_queue() {
        let mut s = session();
        let mut ctx = Context::default();
        s.play(0.0, &mut ctx).unwrap();
        ctx.take_outgoing();
        assert_eq!(s.pending(), 1);
        s.stop(&mut ctx);
        assert_eq!(s.pending(), 0);
        assert!(ctx.take_outgoing().is_empty());
    }

    #[test]
    fn connection_close_clears_session() {
        let mut s = session();
        let mut ctx = Context::default();
        s.incoming(ok(1, "Session: abc\r\n"), &mut ctx).unwrap();
        s.incoming(ok(2, "Connection: close\r\n"), &mut ctx).unwrap();
        assert_eq!(s.session_id(), None);
    }

    // --- presentation time ---

    #[test]
    fn sender_report_sets_rtp_wall_clock() {
        let mut s = session();
        let mut ctx = Context::default();
        s.incoming(Message::Sdp(Sdp::parse(SDP_VIDEO_AUDIO_SVG).unwrap()), &mut ctx)
            .unwrap();

        let sr = Bytes::copy_from_slice(&RTCP_SR_SDES[..28]);
        let RtcpPacket::SenderReport(report) = RtcpPacket::parse(&sr).unwrap() else {
            panic!("expected sender report");
        };
        s.incoming(Message::Rtcp(RtcpMessage { channel: 1, data: sr }), &mut ctx)
            .unwrap();

        // One second later on the 90 kHz clock, and one second earlier
        // across the 32-bit wrap.
        for (delta, offset_ms) in [(90_000u32, 1000.0), (0u32.wrapping_sub(90_000), -1000.0)] {
            let ts = report.rtp_timestamp.wrapping_add(delta);
            let mut data = vec![0x80, 0x60, 0, 1];
            data.extend_from_slice(&ts.to_be_bytes());
            data.extend_from_slice(&[0, 0, 0, 1]);
            let rtp = RtpMessage {
                channel: 0,
                data: Bytes::from(data),
                ntp_timestamp: None,
            };
            s.incoming(Message::Rtp(rtp), &mut ctx).unwrap();
            let out = ctx.take_incoming();
            let Some(Message::Rtp(rtp)) = out.last() else {
                panic!("expected rtp");
            };
            let ntp = rtp.ntp_timestamp.unwrap();
            assert!((ntp - (report.ntp_millis() + offset_ms)).abs() < 1e-6);
        }
    }

    #[test]
    fn rtp_without_sender_report_is_unstamped() {
        let mut s = session();
        let mut ctx = Context::default();
        let rtp = RtpMessage {
            channel: 0,
            data: Bytes::from_static(&[0x80, 0x60, 0, 1, 0, 0, 0, 9, 0, 0, 0, 1]),
            ntp_timestamp: None,
        };
        s.incoming(Message::Rtp(rtp), &mut ctx).unwrap();
        let out = ctx.take_incoming();
        assert!(matches!(&out[0], Message::Rtp(r) if r.ntp_timestamp.is_none()));
    }
}

//! RTSP authentication (RFC 2617 Basic and Digest, as used by RFC 2326).
//!
//! [`Auth`] sits between the [`RtspParser`](crate::RtspParser) and the
//! [`RtspSession`](super::RtspSession). It remembers the last request sent
//! and, when the server answers `401 Unauthorized`, resends it with an
//! `Authorization` header built from the `WWW-Authenticate` challenge. Every
//! later request carries the header too.
//!
//! ```text
//! C -> S  DESCRIBE ... CSeq: 2
//! S -> C  RTSP/1.0 401 Unauthorized
//!         WWW-Authenticate: Digest realm="AXIS", nonce="0005a1b2"
//! C -> S  DESCRIBE ... CSeq: 2
//!         Authorization: Digest username="root", realm="AXIS", ...
//! S -> C  RTSP/1.0 200 OK
//! ```
//!
//! The retry keeps the original CSeq, so the session sees a single answer
//! for the request it sent. A second 401 for the same request is handed to
//! the session, which reports it as a status error.

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use md5::{Digest, Md5};

use crate::error::Result;
use crate::message::Message;
use crate::pipeline::{Component, Context, Stage, Tube};
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;

const UNAUTHORIZED: u16 = 401;

/// Answers authentication challenges on behalf of the session.
pub struct Auth {
    username: String,
    password: String,
    last_sent: Option<RtspRequest>,
    scheme: Option<Scheme>,
    retried: bool,
}

impl Auth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            last_sent: None,
            scheme: None,
            retried: false,
        }
    }

    /// Whether a challenge has been answered and requests are signed.
    pub fn authenticated(&self) -> bool {
        self.scheme.is_some()
    }

    fn authorize(&mut self, request: &mut RtspRequest) {
        if let Some(scheme) = self.scheme.as_mut() {
            let cnonce = format!("{:08x}", rand::random::<u32>());
            let value = scheme.authorization(request.method.as_str(), &request.uri, &cnonce);
            request.headers.set("Authorization", value);
        }
    }

    /// Pick up the challenge in `response` and resend the last request.
    /// Returns false when the 401 must reach the session instead.
    fn answer(&mut self, response: &RtspResponse, ctx: &mut Context) -> bool {
        if self.retried {
            tracing::warn!("credentials rejected");
            return false;
        }
        let Some(mut request) = self.last_sent.clone() else {
            tracing::warn!("401 without a request to resend");
            return false;
        };
        let Some(header) = response.header("WWW-Authenticate") else {
            tracing::warn!("401 without a WWW-Authenticate header");
            return false;
        };
        let Some(scheme) = Scheme::from_challenge(header, &self.username, &self.password) else {
            tracing::warn!(challenge = header, "unsupported authentication challenge");
            return false;
        };

        tracing::debug!(scheme = scheme.name(), method = %request.method, "answering challenge");
        self.scheme = Some(scheme);
        self.retried = true;
        self.authorize(&mut request);
        ctx.push_outgoing(Message::Request(request));
        true
    }
}

impl Stage for Auth {
    fn incoming(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        if let Message::Rtsp(response) = &msg {
            if response.status_code() == UNAUTHORIZED {
                if self.answer(response, ctx) {
                    return Ok(());
                }
            } else {
                self.retried = false;
            }
        }
        ctx.push(msg);
        Ok(())
    }

    fn outgoing(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        match msg {
            Message::Request(mut request) => {
                self.authorize(&mut request);
                self.last_sent = Some(request.clone());
                ctx.push_outgoing(Message::Request(request));
            }
            other => ctx.push_outgoing(other),
        }
        Ok(())
    }
}

impl Component for Auth {
    type Role = Tube;
}

/// Credentials prepared for one challenge.
#[derive(Debug)]
enum Scheme {
    Basic(String),
    Digest(DigestAuth),
}

impl Scheme {
    fn from_challenge(header: &str, username: &str, password: &str) -> Option<Self> {
        let header = header.trim();
        let (name, params) = header.split_once(' ').unwrap_or((header, ""));
        if name.eq_ignore_ascii_case("basic") {
            let token = BASE64_STANDARD.encode(format!("{username}:{password}"));
            Some(Scheme::Basic(format!("Basic {token}")))
        } else if name.eq_ignore_ascii_case("digest") {
            DigestAuth::new(&challenge_params(params), username, password).map(Scheme::Digest)
        } else {
            None
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Scheme::Basic(_) => "basic",
            Scheme::Digest(_) => "digest",
        }
    }

    fn authorization(&mut self, method: &str, uri: &str, cnonce: &str) -> String {
        match self {
            Scheme::Basic(value) => value.clone(),
            Scheme::Digest(digest) => digest.authorization(method, uri, cnonce),
        }
    }
}

/// Split `realm="a, b", nonce=c` into name/value pairs, honouring quotes.
fn challenge_params(params: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let Some((name, after)) = rest.split_once('=') else {
            break;
        };
        let name = name.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remainder) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => match after.find(',') {
                Some(end) => (after[..end].trim(), &after[end..]),
                None => (after.trim(), ""),
            },
        };
        out.push((name, value.to_string()));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    fn as_str(self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }
}

/// Digest access authentication state (RFC 2617 §3.2.2).
#[derive(Debug)]
struct DigestAuth {
    username: String,
    realm: String,
    nonce: String,
    opaque: Option<String>,
    qop: Option<Qop>,
    session: bool,
    /// `MD5(username:realm:password)`.
    ha1_base: String,
    count: u32,
}

impl DigestAuth {
    /// `None` without a realm and nonce.
    fn new(params: &[(String, String)], username: &str, password: &str) -> Option<Self> {
        let get = |key: &str| {
            params
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str())
        };
        let realm = get("realm")?.to_string();
        let nonce = get("nonce")?.to_string();
        let session = get("algorithm").is_some_and(|a| a.eq_ignore_ascii_case("md5-sess"));
        let qop = get("qop").and_then(|offered| {
            let offered: Vec<&str> = offered.split(',').map(str::trim).collect();
            if offered.contains(&"auth") {
                Some(Qop::Auth)
            } else if offered.contains(&"auth-int") {
                Some(Qop::AuthInt)
            } else {
                None
            }
        });

        Some(Self {
            username: username.to_string(),
            ha1_base: md5_hex(&format!("{username}:{realm}:{password}")),
            realm,
            nonce,
            opaque: get("opaque").map(str::to_string),
            qop,
            session,
            count: 0,
        })
    }

    /// Header value for one request. Each call uses the next nonce count.
    fn authorization(&mut self, method: &str, uri: &str, cnonce: &str) -> String {
        self.count += 1;
        let nc = format!("{:08x}", self.count);

        let ha1 = if self.session {
            md5_hex(&format!("{}:{}:{cnonce}", self.ha1_base, self.nonce))
        } else {
            self.ha1_base.clone()
        };
        // Requests carry no body, so auth-int hashes the empty string.
        let ha2 = match self.qop {
            Some(Qop::AuthInt) => md5_hex(&format!("{method}:{uri}:{}", md5_hex(""))),
            _ => md5_hex(&format!("{method}:{uri}")),
        };
        let response = match self.qop {
            Some(qop) => md5_hex(&format!(
                "{ha1}:{}:{nc}:{cnonce}:{}:{ha2}",
                self.nonce,
                qop.as_str()
            )),
            None => md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce)),
        };

        let mut params = vec![
            format!("username=\"{}\"", self.username),
            format!("realm=\"{}\"", self.realm),
            format!("nonce=\"{}\"", self.nonce),
            format!("uri=\"{uri}\""),
        ];
        if self.session {
            params.push("algorithm=MD5-sess".to_string());
        }
        if let Some(qop) = self.qop {
            params.push(format!("qop={}", qop.as_str()));
            params.push(format!("nc={nc}"));
        }
        if self.qop.is_some() || self.session {
            params.push(format!("cnonce=\"{cnonce}\""));
        }
        params.push(format!("response=\"{response}\""));
        if let Some(opaque) = &self.opaque {
            params.push(format!("opaque=\"{opaque}\""));
        }
        format!("Digest {}", params.join(", "))
    }
}

fn md5_hex(input: &str) -> String {
    Md5::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::protocol::request::Method;
    use crate::session::{RtspSession, SessionConfig};

    const URI: &str = "rtsp://192.168.0.90/axis-media/media.amp";

    fn response(text: &str) -> Message {
        Message::Rtsp(RtspResponse::parse(Bytes::from(text.to_string())).unwrap())
    }

    fn unauthorized(cseq: u32, challenge: &str) -> Message {
        response(&format!(
            "RTSP/1.0 401 Unauthorized\r\nCSeq: {cseq}\r\nWWW-Authenticate: {challenge}\r\n\r\n"
        ))
    }

    fn ok(cseq: u32) -> Message {
        response(&format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n"))
    }

    fn request(method: Method, cseq: u32) -> Message {
        Message::Request(RtspRequest::new(method, URI).add_header("CSeq", cseq.to_string()))
    }

    fn only_request(ctx: &mut Context) -> RtspRequest {
        match ctx.take_outgoing().as_slice() {
            [Message::Request(request)] => request.clone(),
            other => panic!("expected one request, got {other:?}"),
        }
    }

    fn param<'a>(header: &'a str, name: &str) -> &'a str {
        let start = header.find(&format!("{name}=")).unwrap() + name.len() + 1;
        let value = header[start..].split(", ").next().unwrap();
        value.trim_matches('"')
    }

    #[test]
    fn basic_challenge_resends_last_request() {
        let mut auth = Auth::new("root", "pass");
        let mut ctx = Context::default();

        auth.outgoing(request(Method::Options, 1), &mut ctx).unwrap();
        assert_eq!(only_request(&mut ctx).headers.get("Authorization"), None);

        auth.incoming(unauthorized(1, "Basic realm=\"AXIS_ACCC8E000000\""), &mut ctx)
            .unwrap();
        assert!(ctx.take_incoming().is_empty(), "401 is consumed");
        let retry = only_request(&mut ctx);
        assert_eq!(retry.method, Method::Options);
        assert_eq!(retry.cseq(), Some(1));
        assert_eq!(retry.headers.get("Authorization"), Some("Basic cm9vdDpwYXNz"));
        assert!(auth.authenticated());

        auth.incoming(ok(1), &mut ctx).unwrap();
        assert!(matches!(ctx.take_incoming().as_slice(), [Message::Rtsp(_)]));

        auth.outgoing(request(Method::Describe, 2), &mut ctx).unwrap();
        assert_eq!(
            only_request(&mut ctx).headers.get("Authorization"),
            Some("Basic cm9vdDpwYXNz")
        );
    }

    #[test]
    fn digest_challenge_without_qop() {
        let mut auth = Auth::new("root", "pass");
        let mut ctx = Context::default();
        auth.outgoing(request(Method::Describe, 2), &mut ctx).unwrap();
        ctx.take_outgoing();

        let challenge = "Digest realm=\"AXIS_ACCC8E000000\", nonce=\"0005a1b2c3d4e5f6\", stale=FALSE";
        auth.incoming(unauthorized(2, challenge), &mut ctx).unwrap();
        let retry = only_request(&mut ctx);
        let header = retry.headers.get("Authorization").unwrap();

        assert!(header.starts_with("Digest "));
        assert_eq!(param(header, "username"), "root");
        assert_eq!(param(header, "realm"), "AXIS_ACCC8E000000");
        assert_eq!(param(header, "uri"), URI);
        assert_eq!(param(header, "response"), "0ade733b92c9bb73d4aff6f9ba2afd58");
        assert!(!header.contains("cnonce"));
    }

    #[test]
    fn digest_with_qop_matches_rfc_example() {
        let params = challenge_params(
            "realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        );
        let mut digest = DigestAuth::new(&params, "Mufasa", "Circle Of Life").unwrap();
        let header = digest.authorization("GET", "/dir/index.html", "0a4f113b");

        assert_eq!(param(&header, "qop"), "auth");
        assert_eq!(param(&header, "nc"), "00000001");
        assert_eq!(param(&header, "cnonce"), "0a4f113b");
        assert_eq!(param(&header, "response"), "6629fae49393a05397450978507c4ef1");
        assert_eq!(param(&header, "opaque"), "5ccc069c403ebaf9f0171e9517f40e41");

        let header = digest.authorization("GET", "/dir/index.html", "0a4f113b");
        assert_eq!(param(&header, "nc"), "00000002");
    }

    #[test]
    fn challenge_params_keep_quoted_commas() {
        let params = challenge_params("realm=\"a, b\", nonce=xyz , qop=\"auth\"");
        assert_eq!(
            params,
            [
                ("realm".to_string(), "a, b".to_string()),
                ("nonce".to_string(), "xyz".to_string()),
                ("qop".to_string(), "auth".to_string()),
            ]
        );
    }

    #[test]
    fn digest_needs_realm_and_nonce() {
        assert!(Scheme::from_challenge("Digest realm=\"x\"", "u", "p").is_none());
        assert!(Scheme::from_challenge("Bearer token", "u", "p").is_none());
    }

    #[test]
    fn rejected_credentials_reach_the_session() {
        let mut auth = Auth::new("root", "wrong");
        let mut ctx = Context::default();
        auth.outgoing(request(Method::Options, 1), &mut ctx).unwrap();
        ctx.take_outgoing();

        auth.incoming(unauthorized(1, "Basic realm=\"x\""), &mut ctx).unwrap();
        assert_eq!(ctx.take_outgoing().len(), 1);
        auth.incoming(unauthorized(1, "Basic realm=\"x\""), &mut ctx).unwrap();
        assert!(ctx.take_outgoing().is_empty());
        assert!(matches!(ctx.take_incoming().as_slice(), [Message::Rtsp(r)] if r.status_code() == 401));
    }

    #[test]
    fn unauthorized_without_challenge_passes_through() {
        let mut auth = Auth::new("root", "pass");
        let mut ctx = Context::default();
        auth.outgoing(request(Method::Options, 1), &mut ctx).unwrap();
        ctx.take_outgoing();

        auth.incoming(response("RTSP/1.0 401 Unauthorized\r\nCSeq: 1\r\n\r\n"), &mut ctx)
            .unwrap();
        assert!(ctx.take_outgoing().is_empty());
        assert_eq!(ctx.take_incoming().len(), 1);
        assert!(!auth.authenticated());
    }

    #[test]
    fn session_handshake_continues_after_challenge() {
        let mut session = RtspSession::new(SessionConfig::with_uri(URI)).unwrap();
        let mut auth = Auth::new("root", "pass");
        let mut ctx = Context::default();

        // Session -> auth -> wire.
        session.play(0.0, &mut ctx).unwrap();
        for msg in ctx.take_outgoing() {
            auth.outgoing(msg, &mut ctx).unwrap();
        }
        let options = only_request(&mut ctx);
        assert_eq!(options.method, Method::Options);

        auth.incoming(unauthorized(1, "Basic realm=\"AXIS\""), &mut ctx).unwrap();
        assert!(ctx.take_incoming().is_empty());
        let retry = only_request(&mut ctx);
        assert_eq!(retry.cseq(), options.cseq());
        assert!(retry.headers.get("Authorization").is_some());

        // Wire -> auth -> session.
        auth.incoming(ok(1), &mut ctx).unwrap();
        for msg in ctx.take_incoming() {
            session.incoming(msg, &mut ctx).unwrap();
        }
        for msg in ctx.take_outgoing() {
            auth.outgoing(msg, &mut ctx).unwrap();
        }
        let describe = only_request(&mut ctx);
        assert_eq!(describe.method, Method::Describe);
        assert_eq!(describe.cseq(), Some(2));
        assert_eq!(describe.headers.get("Authorization"), Some("Basic cm9vdDpwYXNz"));
    }
}

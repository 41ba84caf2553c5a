//! Captures from Axis cameras shared by the unit tests.

/// DESCRIBE body from an Axis camera with video, audio and SVG overlay.
pub const SDP_VIDEO_AUDIO_SVG: &str = "v=0\r\n\
    o=- 1188340656180883 1 IN IP4 192.168.0.96\r\n\
    s=Session streamed with GStreamer\r\n\
    i=rtsp-server\r\n\
    t=0 0\r\n\
    a=tool:GStreamer\r\n\
    a=type:broadcast\r\n\
    a=range:npt=now-\r\n\
    a=control:rtsp://192.168.0.90/axis-media/media.amp?video=1&audio=1&svg=on\r\n\
    m=video 0 RTP/AVP 96\r\n\
    c=IN IP4 0.0.0.0\r\n\
    b=AS:50000\r\n\
    a=rtpmap:96 H264/90000\r\n\
    a=fmtp:96 packetization-mode=1;profile-level-id=4d0032;sprop-parameter-sets=Z00AMuKQBRAevy4C3AQEBpB4kRU=,aO48gA==\r\n\
    a=control:rtsp://192.168.0.90/axis-media/media.amp/stream=0?video=1&audio=1&svg=on\r\n\
    a=framerate:12.000000\r\n\
    a=transform:1.000000,0.000000,0.000000;0.000000,1.000000,0.000000;0.000000,0.000000,1.000000\r\n\
    m=audio 0 RTP/AVP 97\r\n\
    c=IN IP4 0.0.0.0\r\n\
    b=AS:32\r\n\
    a=rtpmap:97 MPEG4-GENERIC/16000/1\r\n\
    a=fmtp:97 streamtype=5;profile-level-id=2;mode=AAC-hbr;config=1408;sizelength=13;indexlength=3;indexdeltalength=3\r\n\
    a=control:rtsp://192.168.0.90/axis-media/media.amp/stream=1?video=1&audio=1&svg=on\r\n\
    m=application 0 RTP/AVP 99\r\n\
    c=IN IP4 0.0.0.0\r\n\
    a=rtpmap:99 image.svg.data/90000\r\n\
    a=control:rtsp://192.168.0.90/axis-media/media.amp/stream=2?video=1&audio=1&svg=on\r\n\
    \r\n";

/// DESCRIBE response carrying a single H.264 video media.
pub const SDP_RESPONSE: &str = "RTSP/1.0 200 OK\r\n\
    CSeq: 3\r\n\
    Content-Type: application/sdp\r\n\
    Content-Base: rtsp://192.168.0.3/axis-media/media.amp/\r\n\
    Server: GStreamer RTSP server\r\n\
    Date: Wed, 03 Jun 2015 14:23:42 GMT\r\n\
    Content-Length: 623\r\n\
    \r\n\
    v=0\r\n\
    o=- 1188340656180883 1 IN IP4 192.168.0.3\r\n\
    s=Session streamed with GStreamer\r\n\
    i=rtsp-server\r\n\
    t=0 0\r\n\
    a=tool:GStreamer\r\n\
    a=type:broadcast\r\n\
    a=range:npt=now-\r\n\
    a=control:rtsp://192.168.0.3/axis-media/media.amp?resolution=176x144&fps=1\r\n\
    m=video 0 RTP/AVP 96\r\n\
    c=IN IP4 0.0.0.0\r\n\
    b=AS:50000\r\n\
    a=rtpmap:96 H264/90000\r\n\
    a=fmtp:96 packetization-mode=1;profile-level-id=4d0029;sprop-parameter-sets=Z00AKeKQWJ2AtwEBAaQeJEVA,aO48gA==\r\n\
    a=control:rtsp://192.168.0.3/axis-media/media.amp/stream=0?resolution=176x144&fps=1\r\n\
    a=framerate:1.000000\r\n\
    a=transform:0.916667,0.000000,0.000000;0.000000,1.000000,0.000000;0.000000,0.000000,1.000000\r\n";

/// SETUP response with a session timeout of 60 seconds.
pub const SETUP_RESPONSE: &str = "RTSP/1.0 200 OK\r\n\
    CSeq: 5\r\n\
    RTP-Info: url=rtsp://192.168.0.3/axis-media/media.amp/stream=0?resolution=176x144&fps=1;seq=10176;rtptime=2419713327\r\n\
    Range: npt=now-\r\n\
    Server: GStreamer RTSP server\r\n\
    Session: Bk48Ak7wjcWaAgRD; timeout=60\r\n\
    Date: Wed, 03 Jun 2015 14:23:42 GMT\r\n\
    \r\n";

/// Sender report followed by a source description, as one compound packet.
pub const RTCP_SR_SDES: [u8; 80] = [
    128, 200, 0, 6, 250, 42, 84, 81, 218, 165, 232, 198, 26, 142, 79, 185,
    102, 235, 61, 79, 0, 0, 6, 198, 0, 19, 131, 105, 129, 202, 0, 12,
    250, 42, 84, 81, 1, 28, 117, 115, 101, 114, 49, 53, 53, 54, 52, 55,
    56, 51, 53, 56, 64, 104, 111, 115, 116, 45, 57, 54, 57, 55, 97, 99,
    98, 53, 6, 9, 71, 83, 116, 114, 101, 97, 109, 101, 114, 0, 0, 0,
];

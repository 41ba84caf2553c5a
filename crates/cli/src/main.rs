use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::Parser;
use rtsp::pipeline::io::{StreamSource, WriterSink};
use rtsp::transport::Exit;
use rtsp::{AacDepay, Auth, Connection, H264Depay, Mp4Muxer, Pipeline, RtspParser, RtspSession, SessionConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-record",
    about = "Record an RTSP camera stream to fragmented MP4"
)]
struct Args {
    /// Stream URI, e.g. rtsp://192.168.0.90/axis-media/media.amp
    #[arg(long, short)]
    uri: String,

    /// Output file
    #[arg(long, short, default_value = "out.mp4")]
    output: String,

    /// Stop after this many seconds (default: until the server hangs up)
    #[arg(long, short)]
    duration: Option<u64>,

    /// Playback start, in seconds, sent as the PLAY range
    #[arg(long, default_value_t = 0.0)]
    start_time: f64,

    /// User name for cameras that require authentication
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Password for cameras that require authentication
    #[arg(long, requires = "username")]
    password: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match record(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Recording failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn record(args: &Args) -> rtsp::Result<()> {
    let output = File::create(&args.output)?;
    let mut conn = Connection::open(&args.uri)?;

    let (mut builder, _) = Pipeline::builder(StreamSource::new(conn.writer()?));
    builder.tube(RtspParser::new());
    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        builder.tube(Auth::new(username, password));
    }
    let session = builder.tube(RtspSession::new(SessionConfig::with_uri(&args.uri))?);
    builder.tube(H264Depay::new());
    builder.tube(AacDepay::new());
    let muxer = builder.tube(Mp4Muxer::new());
    let (mut pipeline, sink) = builder.sink(WriterSink::new(BufWriter::new(output)));

    pipeline.control(&session, |session, ctx| session.play(args.start_time, ctx))?;

    let exit = match args.duration {
        Some(secs) => conn.run_for(&mut pipeline, Duration::from_secs(secs))?,
        None => conn.run(&mut pipeline, &AtomicBool::new(true))?,
    };
    tracing::info!(?exit, "recording finished");

    if exit == Exit::Stopped {
        pipeline.control(&session, |session, ctx| {
            session.stop(ctx);
            Ok(())
        })?;
        pipeline.end()?;
    }

    for track in pipeline.stage(&muxer)?.tracks() {
        tracing::info!(
            track = track.id,
            codec = %track.codec,
            bitrate = track.bitrate,
            framerate = track.framerate,
            "track summary"
        );
    }
    let written = pipeline.stage(&sink)?.written();
    println!("Wrote {} bytes to {}", written, args.output);
    Ok(())
}

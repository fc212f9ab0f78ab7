//! Command line front end: one session per invocation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::info;
use url::Url;

use crate::config::{
    CandidateDelivery, Endpoints, OfferProfile, SessionConfig, TurnSettings, DEFAULT_ICE_SERVERS,
};
use crate::logger::{init_tracing, SessionEvent};
use crate::peer::{IceServer, PacketCounterSink, RecordingSink, VideoSink, WebRtcConnector};
use crate::session::SignalingSession;
use crate::signaling::HttpSignaling;
use crate::utils::add_ice_url_scheme;

#[derive(Parser, Debug)]
#[command(name = "rtcview")]
#[command(version, about = "Receive a WebRTC video stream negotiated over HTTP", long_about = None)]
pub struct Args {
    /// Web server that serves /offer, /iceSignaling and /iceServers
    #[arg(short, long, env = "RTCVIEW_SERVER", default_value = "http://127.0.0.1:8080")]
    pub server: Url,

    #[arg(long, value_name = "PATH", default_value = "/iceServers")]
    pub ice_servers_path: String,

    #[arg(long, value_name = "PATH", default_value = "/offer")]
    pub offer_path: String,

    #[arg(long, value_name = "PATH", default_value = "/iceSignaling")]
    pub ice_signaling_path: String,

    /// How local ICE candidates are delivered
    #[arg(long, value_enum, default_value = "trickle")]
    pub delivery: CandidateDelivery,

    #[arg(long, value_enum, default_value = "audio-video")]
    pub offer_profile: OfferProfile,

    /// Don't ask the server for additional ICE servers
    #[arg(long)]
    pub no_remote_ice_servers: bool,

    /// STUN server URL, replaces the default (repeatable)
    #[arg(long = "stun", value_name = "URL")]
    pub stun: Vec<String>,

    #[arg(long, env = "TURN_SERVER_URL", value_name = "URL")]
    pub turn_url: Option<String>,

    #[arg(long, env = "TURN_SERVER_USERNAME")]
    pub turn_username: Option<String>,

    #[arg(long, env = "TURN_SERVER_PASSWORD", hide_env_values = true)]
    pub turn_password: Option<String>,

    /// Delay between stopping transceivers and closing the connection
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub stop_grace_ms: u64,

    /// Per-request HTTP timeout; none by default
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Record the video track (.ivf for VP8/VP9, .h264 for H.264)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            base: self.server.clone(),
            ice_servers: self.ice_servers_path.clone(),
            offer: self.offer_path.clone(),
            ice_signaling: self.ice_signaling_path.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let default_ice_servers = if self.stun.is_empty() {
            DEFAULT_ICE_SERVERS.clone()
        } else {
            self.stun
                .iter()
                .map(|url| IceServer::stun(add_ice_url_scheme(url, false)))
                .collect()
        };

        SessionConfig {
            default_ice_servers,
            turn: TurnSettings::from_parts(
                self.turn_url.clone(),
                self.turn_username.clone(),
                self.turn_password.clone(),
            ),
            fetch_ice_servers: !self.no_remote_ice_servers,
            candidate_delivery: self.delivery,
            offer_profile: self.offer_profile,
            stop_grace: Duration::from_millis(self.stop_grace_ms),
        }
    }

    pub fn effective_log_level(&self) -> &str {
        match self.verbose {
            0 => &self.log_level,
            1 => "debug",
            _ => "trace",
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.effective_log_level());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run_session(args))
}

async fn run_session(args: Args) -> anyhow::Result<()> {
    let config = args.session_config();
    config.validate()?;

    let transport = match args.timeout_secs {
        Some(secs) => HttpSignaling::with_timeout(args.endpoints(), Duration::from_secs(secs))?,
        None => HttpSignaling::new(args.endpoints()),
    };
    let sink: Arc<dyn VideoSink> = match &args.output {
        Some(path) => Arc::new(RecordingSink::new(path)),
        None => Arc::new(PacketCounterSink::new()),
    };
    let grace = config.stop_grace;

    let session = Arc::new(SignalingSession::new(
        config,
        Arc::new(transport),
        Arc::new(WebRtcConnector::new()),
        sink,
    ));

    // alerts go to the terminal the way the page would pop them up
    let mut events = session.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Alert(message)) => eprintln!("rtcview: {}", message),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("Starting session against {}", args.server);
    if let Err(e) = session.start().await {
        session.stop().await;
        sleep(grace).await;
        return Err(e).context("session failed to start");
    }

    match args.duration {
        Some(secs) => sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
        }
    }

    info!("Stopping session");
    session.stop().await;
    // the close is scheduled after the grace period
    sleep(grace + Duration::from_millis(100)).await;
    Ok(())
}

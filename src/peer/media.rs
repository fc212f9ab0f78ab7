//! Media sinks for the inbound video track

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};
use webrtc::media::io::h264_writer::H264Writer;
use webrtc::media::io::ivf_reader::IVFFileHeader;
use webrtc::media::io::ivf_writer::IVFWriter;
use webrtc::media::io::Writer;
use webrtc::rtp::packet::Packet;

use crate::error::{ClientError, Result};
use crate::peer::types::InboundTrack;

/// Readable RTP stream of a remote track
#[async_trait]
pub trait RtpSource: Send + Sync {
    fn mime_type(&self) -> String;

    /// `None` once the track has ended
    async fn read_rtp(&self) -> Option<Packet>;
}

/// Counters for what a sink consumed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkReport {
    pub packets: u64,
    pub bytes: u64,
}

/// Where the first inbound video track ends up
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Consume the track until it ends
    async fn attach(&self, track: InboundTrack) -> Result<SinkReport>;
}

/// Drains the track and keeps packet/byte counts
#[derive(Debug, Default)]
pub struct PacketCounterSink {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl PacketCounterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> SinkReport {
        SinkReport {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

const LOG_EVERY_PACKETS: u64 = 1000;

#[async_trait]
impl VideoSink for PacketCounterSink {
    async fn attach(&self, track: InboundTrack) -> Result<SinkReport> {
        info!(
            "Receiving {} track {} ({})",
            track.kind,
            track.track_id,
            track.source.mime_type()
        );

        while let Some(packet) = track.source.read_rtp().await {
            let n = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
            self.bytes
                .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
            if n % LOG_EVERY_PACKETS == 0 {
                debug!("Track {}: {} packets received", track.track_id, n);
            }
        }

        let report = self.report();
        info!(
            "Track {} ended after {} packets / {} bytes",
            track.track_id, report.packets, report.bytes
        );
        Ok(report)
    }
}

/// Output container chosen from the track codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Ivf([u8; 4]),
    AnnexB,
}

impl Container {
    pub fn for_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type.to_ascii_lowercase().as_str() {
            "video/vp8" => Some(Container::Ivf(*b"VP80")),
            "video/vp9" => Some(Container::Ivf(*b"VP90")),
            "video/h264" => Some(Container::AnnexB),
            _ => None,
        }
    }
}

/// Writes the track to disk: VP8/VP9 as IVF, H.264 as an Annex-B stream
#[derive(Debug, Clone)]
pub struct RecordingSink {
    path: PathBuf,
}

impl RecordingSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open_writer(&self, container: Container) -> Result<Box<dyn Writer + Send>> {
        let file = File::create(&self.path)?;
        let writer: Box<dyn Writer + Send> = match container {
            Container::Ivf(four_cc) => {
                let header = IVFFileHeader {
                    signature: *b"DKIF",
                    version: 0,
                    header_size: 32,
                    four_cc,
                    width: 640,
                    height: 480,
                    timebase_denominator: 30,
                    timebase_numerator: 1,
                    num_frames: 900,
                    unused: 0,
                };
                Box::new(
                    IVFWriter::new(file, &header)
                        .map_err(|e| ClientError::Media(format!("IVF writer: {}", e)))?,
                )
            }
            Container::AnnexB => Box::new(H264Writer::new(file)),
        };
        Ok(writer)
    }
}

#[async_trait]
impl VideoSink for RecordingSink {
    async fn attach(&self, track: InboundTrack) -> Result<SinkReport> {
        let mime_type = track.source.mime_type();
        let container = Container::for_mime_type(&mime_type).ok_or_else(|| {
            ClientError::Media(format!("cannot record codec {}", mime_type))
        })?;
        let mut writer = self.open_writer(container)?;
        info!(
            "Recording {} track {} to {}",
            mime_type,
            track.track_id,
            self.path.display()
        );

        let mut report = SinkReport::default();
        while let Some(packet) = track.source.read_rtp().await {
            report.packets += 1;
            report.bytes += packet.payload.len() as u64;
            writer
                .write_rtp(&packet)
                .map_err(|e| ClientError::Media(format!("write failed: {}", e)))?;
        }

        writer
            .close()
            .map_err(|e| ClientError::Media(format!("close failed: {}", e)))?;
        info!(
            "Recording of track {} finished: {} packets",
            track.track_id, report.packets
        );
        Ok(report)
    }
}

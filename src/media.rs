// author: kodeholic
// 로컬 미디어 획득/해제 — 브라우저 getUserMedia의 headless 대응물.
//
// 트랙은 통화 세션당 최대 1회 획득되고 teardown에서 정확히 1회 정지됩니다.
// stop() 이후 트랙 상태는 is_stopped()로 관찰 가능하며, 세션 재시작 시에는
// 재사용 없이 새로 획득합니다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::config;
use crate::error::CallResult;

// ----------------------------------------------------------------------------
// [LocalTrack] RTP 트랙 + 정지 플래그
// ----------------------------------------------------------------------------

pub struct LocalTrack {
    pub rtp_track: Arc<TrackLocalStaticSample>,
    stopped:       Arc<AtomicBool>,
}

impl LocalTrack {
    fn new(codec: RTCRtpCodecCapability, track_id: &str) -> Self {
        Self {
            rtp_track: Arc::new(TrackLocalStaticSample::new(
                codec,
                track_id.to_string(),
                config::MEDIA_STREAM_ID.to_string(),
            )),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

// ----------------------------------------------------------------------------
// [LocalMedia] 획득된 트랙 묶음 — 세션이 단독 소유
// ----------------------------------------------------------------------------

pub struct LocalMedia {
    tracks:   Vec<LocalTrack>,
    released: AtomicBool,
}

impl LocalMedia {
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// 모든 트랙 정지. 멱등 — 두 번째 호출부터는 no-op.
    pub fn stop(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            trace!("LocalMedia.stop() 재호출 — 무시");
            return;
        }
        for track in &self.tracks {
            track.stop();
        }
        trace!("로컬 미디어 트랙 {}개 정지 완료", self.tracks.len());
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.is_stopped())
    }
}

// ----------------------------------------------------------------------------
// [계약] 미디어 장치 trait — 권한 거부/장치 부재 시 MediaAccess 에러
// ----------------------------------------------------------------------------

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self) -> CallResult<LocalMedia>;
}

// ----------------------------------------------------------------------------
// [구현] 합성 미디어 소스
// 실제 캠/마이크 대신 Opus 무음 프레임을 주기 송출하는 오디오 비컨 +
// 샘플 없는 VP8 트랙. RTP가 실제로 흐르므로 상대측 on_track이 발화합니다.
// ----------------------------------------------------------------------------

pub struct SyntheticMediaDevices {
    beacon: bool,
}

impl SyntheticMediaDevices {
    /// 오디오 비컨 포함 (운영/통합테스트용)
    pub fn new() -> Self {
        Self { beacon: true }
    }

    /// 비컨 없이 트랙만 생성 (단위 테스트용)
    pub fn silent() -> Self {
        Self { beacon: false }
    }
}

impl Default for SyntheticMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn acquire(&self) -> CallResult<LocalMedia> {
        let audio = LocalTrack::new(
            RTCRtpCodecCapability {
                mime_type:     MIME_TYPE_OPUS.to_string(),
                clock_rate:    48000,
                channels:      2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            config::AUDIO_TRACK_ID,
        );
        let video = LocalTrack::new(
            RTCRtpCodecCapability {
                mime_type:  MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            config::VIDEO_TRACK_ID,
        );

        if self.beacon {
            spawn_audio_beacon(Arc::clone(&audio.rtp_track), Arc::clone(&audio.stopped));
        }

        trace!("합성 미디어 획득 완료 (beacon={})", self.beacon);
        Ok(LocalMedia {
            tracks:   vec![audio, video],
            released: AtomicBool::new(false),
        })
    }
}

/// 20ms마다 Opus 무음 프레임 1개 송출.
/// 트랙이 peer connection에 바인딩되기 전의 write 실패는 정상 — 무시합니다.
fn spawn_audio_beacon(track: Arc<TrackLocalStaticSample>, stopped: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(config::AUDIO_BEACON_INTERVAL_MS));
        while !stopped.load(Ordering::Relaxed) {
            ticker.tick().await;
            let sample = Sample {
                data: Bytes::from_static(&config::OPUS_SILENCE_FRAME),
                duration: Duration::from_millis(config::AUDIO_BEACON_INTERVAL_MS),
                ..Default::default()
            };
            let _ = track.write_sample(&sample).await;
        }
        trace!("오디오 비컨 종료");
    });
}

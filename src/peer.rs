// author: kodeholic
// ICE/미디어 협상 엔진 — 통화 세션당 RTCPeerConnection 1개를 단독 소유.
//
// Offer/Answer/ICE 교환만 담당하며, 누가 상대인지(룸 멤버십)와
// 언제 협상을 시작할지(생명주기)는 세션 컨트롤러가 결정합니다.
// 엔진 내부에서 발생하는 비동기 이벤트(candidate 발견, 원격 트랙 도착,
// 연결 실패)는 채널로 컨트롤러에 전달됩니다.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use crate::config;
use crate::error::{CallError, CallResult};
use crate::media::LocalMedia;
use crate::signaling::{CandidateInit, SessionDescription};

// ----------------------------------------------------------------------------
// [ICE 서버 설정] STUN 기본 + TURN 선택 (자격증명 포함 시)
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct IceServerConfig {
    pub urls:       Vec<String>,
    pub username:   Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// 공개 STUN 기본 목록
    pub fn default_stun() -> Vec<Self> {
        vec![Self {
            urls:       config::DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            username:   None,
            credential: None,
        }]
    }
}

// ----------------------------------------------------------------------------
// [엔진 이벤트] PeerLink → CallSession
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub enum EngineEvent {
    /// 새 로컬 candidate 발견 — 현재 선정된 상대에게 송신할 것
    LocalCandidate(CandidateInit),
    /// 원격 미디어 트랙 도착 — Connected 전환 트리거
    RemoteTrack { kind: String },
    /// peer connection이 복구 불가 상태로 진입
    LinkFailed(String),
}

// ----------------------------------------------------------------------------
// [PeerLink] 협상 엔진 본체
// ----------------------------------------------------------------------------

pub struct PeerLink {
    pc: Arc<RTCPeerConnection>,
}

impl PeerLink {
    /// peer connection 생성 + 로컬 트랙 바인딩 + 콜백 배선.
    /// LocalMedia는 세션이 소유하며 여기서는 트랙 참조만 연결합니다.
    pub async fn new(
        ice_servers: &[IceServerConfig],
        media: &LocalMedia,
        events: mpsc::Sender<EngineEvent>,
    ) -> CallResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::Negotiation(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| CallError::Negotiation(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls:       s.urls.clone(),
                    username:   s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| CallError::Negotiation(e.to_string()))?,
        );

        // 로컬 트랙 바인딩 + sender별 RTCP drain (인터셉터 동작에 필요)
        for track in media.tracks() {
            let rtp_sender = pc
                .add_track(Arc::clone(&track.rtp_track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| CallError::Negotiation(e.to_string()))?;

            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
            });
        }

        // candidate 발견 → 세션으로 전달 (수신 측 선정/태깅은 세션 몫)
        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(init) => {
                            let event = EngineEvent::LocalCandidate(CandidateInit {
                                candidate:       init.candidate,
                                sdp_mid:         init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            });
                            if tx.try_send(event).is_err() {
                                warn!("candidate 이벤트 큐 포화 — drop");
                            }
                        }
                        Err(e) => warn!("candidate 직렬화 실패: {}", e),
                    }
                }
            })
        }));

        // 원격 트랙 도착 → Connected 트리거 + RTP drain
        let track_tx = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = track.kind().to_string();
            trace!("원격 트랙 도착: kind={} ssrc={}", kind, track.ssrc());
            let tx = track_tx.clone();

            Box::pin(async move {
                // 상태를 나르는 1회성 이벤트 — candidate와 달리 큐 포화로 유실 금지
                if tx.send(EngineEvent::RemoteTrack { kind }).await.is_err() {
                    trace!("이벤트 큐 닫힘 — 원격 트랙 이벤트 폐기");
                }
                let mut buf = vec![0u8; 1500];
                while let Ok((_, _)) = track.read(&mut buf).await {}
                trace!("원격 트랙 수신 종료");
            })
        }));

        // 연결 상태 감시 — Failed만 세션에 보고 (Disconnected는 ICE가 자체 복구 시도)
        let state_tx = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            trace!("peer connection 상태: {}", state);
            let tx = state_tx.clone();
            Box::pin(async move {
                if state == RTCPeerConnectionState::Failed {
                    let _ = tx
                        .send(EngineEvent::LinkFailed("peer connection failed".to_string()))
                        .await;
                }
            })
        }));

        Ok(Self { pc })
    }

    // ------------------------------------------------------------------------
    // Offer/Answer 경로
    // ------------------------------------------------------------------------

    /// Caller 경로: Offer 생성 → 로컬 기술로 설정 → 반환 (송신은 세션 몫)
    pub async fn create_offer(&self) -> CallResult<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::Negotiation(e.to_string()))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| CallError::Negotiation(e.to_string()))?;
        trace!("로컬 Offer 설정 완료");
        Ok(SessionDescription::offer(sdp))
    }

    /// Callee 경로: 원격 Offer 설정 → Answer 생성/설정 → 반환
    pub async fn accept_offer(&self, remote: &SessionDescription) -> CallResult<SessionDescription> {
        if remote.sdp_type != "offer" {
            return Err(CallError::Negotiation(format!(
                "expected offer, got {}", remote.sdp_type
            )));
        }
        let desc = RTCSessionDescription::offer(remote.sdp.clone())
            .map_err(|e| CallError::Negotiation(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| CallError::Negotiation(e.to_string()))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::Negotiation(e.to_string()))?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| CallError::Negotiation(e.to_string()))?;
        trace!("원격 Offer 수용 + 로컬 Answer 설정 완료");
        Ok(SessionDescription::answer(sdp))
    }

    /// Answer 수신: 원격 기술 설정만 — 회신 없음
    pub async fn accept_answer(&self, remote: &SessionDescription) -> CallResult<()> {
        if remote.sdp_type != "answer" {
            return Err(CallError::Negotiation(format!(
                "expected answer, got {}", remote.sdp_type
            )));
        }
        let desc = RTCSessionDescription::answer(remote.sdp.clone())
            .map_err(|e| CallError::Negotiation(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| CallError::Negotiation(e.to_string()))?;
        trace!("원격 Answer 설정 완료");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // ICE candidate 적용
    // ------------------------------------------------------------------------

    /// 원격 candidate 등록. 실패는 삼킨다 — ICE 수집 과정의 정상적인
    /// 레이스(원격 기술 설정 전 도착, 중복 전달)이며, ICE 에이전트가
    /// 후속 candidate로 자체 복구합니다. 재시도하지 않습니다.
    pub async fn apply_candidate(&self, candidate: &CandidateInit) {
        if self.pc.remote_description().await.is_none() {
            // 기술 설정 전 도착 — 버퍼링 없이 폐기 (기술로 승격 금지)
            warn!(
                "{}",
                CallError::IceApply("candidate arrived before remote description — dropped".to_string())
            );
            return;
        }

        let init = RTCIceCandidateInit {
            candidate:       candidate.candidate.clone(),
            sdp_mid:         candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };

        if let Err(e) = self.pc.add_ice_candidate(init).await {
            warn!("{}", CallError::IceApply(e.to_string()));
        }
    }

    // ------------------------------------------------------------------------
    // 상태 관찰 / 해제
    // ------------------------------------------------------------------------

    /// 현재 로컬 기술의 타입 ("offer"/"answer"), 미설정이면 None
    pub async fn local_description_type(&self) -> Option<String> {
        self.pc
            .local_description()
            .await
            .map(|d| d.sdp_type.to_string())
    }

    pub async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    /// peer connection 해제. 멱등 — close 이후 재호출은 무해.
    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("peer connection close 실패: {}", e);
        }
    }
}

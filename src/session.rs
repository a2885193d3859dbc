// author: kodeholic
// 통화 세션 컨트롤러 — 통화 1건의 전체 생명주기를 조율하는 최상위 오케스트레이터.
//
// init → join → negotiate → connected → teardown 순서를 관리하며,
// 전송/멤버십/협상 엔진 사이를 중개합니다. 세션의 가변 상태는 전부
// 단일 이벤트 루프 태스크 안에서만 변경되므로 내부 락이 필요 없습니다.
// 중단점(미디어 획득, 기술 생성, 전송 송신)의 모든 에러는 이 경계에서
// 잡혀 status로 변환됩니다 — 상위 UI로 throw되지 않습니다.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::config;
use crate::error::{CallError, CallResult};
use crate::media::{MediaDevices, SyntheticMediaDevices};
use crate::peer::{EngineEvent, IceServerConfig, PeerLink};
use crate::room::RoomRoster;
use crate::signaling::{
    ClientSignal, ServerSignal, SignalingConnector, SignalingTransport, WsConnector,
};

// ----------------------------------------------------------------------------
// [상태 머신]
//
// Initializing -> NotAuthenticated   (자격증명 없음)
// Initializing -> Joining            (미디어 + 전송 획득 완료, 참가 요청)
// Joining -> Ready                   (룸 참가 완료, 아직 혼자)
// Ready -> Connecting                (상대 등장, 협상 시작)
// Connecting -> Connected            (원격 미디어 트랙 수신)
// any -> Failed(reason)              (미디어/전송/협상 에러)
// any -> Initializing                (stop() 호출 시)
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum CallStatus {
    Initializing,
    NotAuthenticated,
    Joining,
    Ready,
    Connecting,
    Connected,
    Failed(String),
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Initializing     => write!(f, "initializing"),
            CallStatus::NotAuthenticated => write!(f, "not-authenticated"),
            CallStatus::Joining          => write!(f, "joining"),
            CallStatus::Ready            => write!(f, "ready"),
            CallStatus::Connecting       => write!(f, "connecting"),
            CallStatus::Connected        => write!(f, "connected"),
            CallStatus::Failed(reason)   => write!(f, "failed: {}", reason),
        }
    }
}

// ----------------------------------------------------------------------------
// [세션 설정]
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CallConfig {
    pub server_url:   String,
    pub display_name: String,
    pub ice_servers:  Vec<IceServerConfig>,
}

impl CallConfig {
    pub fn new(server_url: &str, display_name: &str) -> Self {
        Self {
            server_url:   server_url.to_string(),
            display_name: display_name.to_string(),
            ice_servers:  IceServerConfig::default_stun(),
        }
    }
}

// ----------------------------------------------------------------------------
// [CallSession] 룸 방문 1회당 1개 생성 — 전역 싱글턴 없음
// ----------------------------------------------------------------------------

pub struct CallSession {
    cfg:         CallConfig,
    devices:     Arc<dyn MediaDevices>,
    connector:   Arc<dyn SignalingConnector>,
    status_tx:   watch::Sender<CallStatus>,
    shutdown_tx: watch::Sender<bool>,
    task:        Mutex<Option<JoinHandle<()>>>,
}

impl CallSession {
    pub fn new(
        cfg: CallConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn SignalingConnector>,
    ) -> Self {
        let (status_tx, _)   = watch::channel(CallStatus::Initializing);
        let (shutdown_tx, _) = watch::channel(false);
        Self { cfg, devices, connector, status_tx, shutdown_tx, task: Mutex::new(None) }
    }

    /// 기본 조립: 합성 미디어 + WebSocket 전송
    pub fn with_defaults(cfg: CallConfig) -> Self {
        Self::new(cfg, Arc::new(SyntheticMediaDevices::new()), Arc::new(WsConnector))
    }

    /// 현재 status 구독 (UI/CLI 표시용)
    pub fn status(&self) -> watch::Receiver<CallStatus> {
        self.status_tx.subscribe()
    }

    /// 통화 시작: 미디어 획득 → 전송 인증/연결 → 룸 참가 → 이벤트 루프.
    /// 진행 상황은 status로 관찰하며, 이 함수 자체는 spawn 후 즉시 반환합니다.
    pub async fn start(&self, room_id: &str, credential: Option<&str>) {
        let mut task = self.task.lock().await;
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            warn!("start() 중복 호출 — 기존 세션 유지");
            return;
        }

        let _ = self.shutdown_tx.send(false);
        self.status_tx.send_replace(CallStatus::Initializing);

        let credential = match credential {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => {
                // 자격증명 부재는 에러가 아니라 별도 상태 — 상위에서 로그인 유도
                self.status_tx.send_replace(CallStatus::NotAuthenticated);
                return;
            }
        };

        *task = Some(tokio::spawn(run_call(
            self.cfg.clone(),
            room_id.to_string(),
            credential,
            Arc::clone(&self.devices),
            Arc::clone(&self.connector),
            self.status_tx.clone(),
            self.shutdown_tx.subscribe(),
        )));
    }

    /// 통화 종료. 멱등 — 어떤 상태에서 몇 번을 불러도 안전합니다.
    /// 진행 중인 중단점(미디어 획득 등)은 취소되고, 뒤늦게 완료된 자원은
    /// 붙지 않고 폐기됩니다. 자원 해제는 세션 태스크의 teardown이 수행합니다.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("세션 태스크 join 실패: {}", e);
            }
        }

        // 재사용 가능 상태로 복귀 (start() 시 미디어/전송은 새로 획득)
        self.status_tx.send_replace(CallStatus::Initializing);
    }
}

// ----------------------------------------------------------------------------
// [세션 태스크] 모든 종료 경로에서 teardown 보장
// ----------------------------------------------------------------------------

async fn run_call(
    cfg: CallConfig,
    room_id: String,
    credential: String,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn SignalingConnector>,
    status: watch::Sender<CallStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    // 1. 로컬 미디어 획득 — stop()이 먼저 오면 결과를 붙이지 않고 폐기
    let media = tokio::select! {
        res = devices.acquire() => match res {
            Ok(m)  => m,
            Err(e) => return fail(&status, e),
        },
        _ = shutdown.changed() => {
            trace!("미디어 획득 중 stop() — 세션 태스크 종료");
            return;
        }
    };
    if *shutdown.borrow() {
        media.stop();
        return;
    }

    // 2. 시그널링 전송 연결 (자격증명 인증 포함)
    let connected = tokio::select! {
        res = connector.connect(&cfg.server_url, &credential) => res,
        _ = shutdown.changed() => {
            media.stop();
            return;
        }
    };
    let mut transport = match connected {
        Ok(t) => t,
        Err(e) => {
            media.stop();
            return fail(&status, e);
        }
    };

    // 3. 협상 엔진 — peer connection은 이 세션이 단독 소유
    let (engine_tx, mut engine_rx) = mpsc::channel(config::ENGINE_QUEUE_SIZE);
    let built = tokio::select! {
        res = PeerLink::new(&cfg.ice_servers, &media, engine_tx) => res,
        _ = shutdown.changed() => {
            transport.close().await;
            media.stop();
            return;
        }
    };
    let link = match built {
        Ok(l) => l,
        Err(e) => {
            transport.close().await;
            media.stop();
            return fail(&status, e);
        }
    };

    // 4. 룸 참가 요청
    status.send_replace(CallStatus::Joining);
    let mut roster = RoomRoster::new(&room_id);
    let join = ClientSignal::JoinRoom {
        room_id:   room_id.clone(),
        user_name: cfg.display_name.clone(),
    };
    let joined = tokio::select! {
        res = transport.send(&join) => res,
        _ = shutdown.changed() => {
            link.close().await;
            transport.close().await;
            media.stop();
            return;
        }
    };
    if let Err(e) = joined {
        link.close().await;
        transport.close().await;
        media.stop();
        return fail(&status, e);
    }

    // 5. 이벤트 루프 — 전송 이벤트와 엔진 이벤트가 유일한 상태 변경 경로.
    // 핸들러 내부의 중단점(전송 송신, 기술 생성)도 stop()으로 취소되어야
    // 하므로, 핸들러 await 역시 shutdown과 경합시킵니다.
    let mut failure: Option<CallError> = None;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            signal = transport.recv() => match signal {
                Some(signal) => {
                    let handled = tokio::select! {
                        res = handle_signal(signal, &mut roster, &link, transport.as_mut(), &status) => res,
                        _ = shutdown.changed() => break,
                    };
                    if let Err(e) = handled {
                        failure = Some(e);
                        break;
                    }
                }
                None => {
                    // 자동 재접속 없음 — 사용자가 start()를 다시 호출해야 함
                    if !*shutdown.borrow() {
                        failure = Some(CallError::Transport("signaling channel closed".to_string()));
                    }
                    break;
                }
            },

            event = engine_rx.recv() => match event {
                Some(event) => {
                    let handled = tokio::select! {
                        res = handle_engine_event(event, &roster, transport.as_mut(), &status) => res,
                        _ = shutdown.changed() => break,
                    };
                    if let Err(e) = handled {
                        failure = Some(e);
                        break;
                    }
                }
                None => {
                    // 엔진 송신단은 peer connection이 소유 — 통화 중 닫히면 내부 결함
                    if !*shutdown.borrow() {
                        failure = Some(CallError::InternalError(
                            "negotiation engine channel closed".to_string(),
                        ));
                    }
                    break;
                }
            },
        }
    }

    // 6. teardown — 정상 종료/에러/stop() 공통 경로
    link.close().await;
    media.stop();
    transport.close().await;

    match failure {
        Some(e) => fail(&status, e),
        None    => trace!("세션 태스크 종료 - room:{}", room_id),
    }
}

// ----------------------------------------------------------------------------
// [시그널 핸들러]
// ----------------------------------------------------------------------------

async fn handle_signal(
    signal: ServerSignal,
    roster: &mut RoomRoster,
    link: &PeerLink,
    transport: &mut dyn SignalingTransport,
    status: &watch::Sender<CallStatus>,
) -> CallResult<()> {
    match signal {
        ServerSignal::RoomUsers { self_id, users } => {
            match roster.apply_room_users(&self_id, &users) {
                // 기존 참가자가 있으면 그쪽이 user-joined를 받아 Caller가 됨 —
                // 우리는 Offer 도착을 기다림
                Some(peer) => info!("룸 참가 완료 - 기존 참가자 {} 의 Offer 대기", peer.id),
                None       => info!("룸 참가 완료 - 첫 입장"),
            }
            status.send_replace(CallStatus::Ready);
            Ok(())
        }

        ServerSignal::UserJoined { user_id, user_name } => {
            // Caller 경로: 내 이후 입장자에게 Offer (마지막 입장자 승리)
            let peer = roster.apply_user_joined(&user_id, &user_name);
            info!("참가자 입장: {} ({}) — Offer 송신", peer.name, peer.id);
            begin_negotiation(status);

            let offer = link.create_offer().await?;
            transport
                .send(&ClientSignal::Offer {
                    description: offer,
                    room_id:     roster.room_id().to_string(),
                    target_id:   peer.id,
                })
                .await
        }

        ServerSignal::Offer { description, sender_id, .. } => {
            // Callee 경로: 원격 설정 → Answer 생성 → 발신자에게 회신
            let peer = roster.adopt_offer_sender(&sender_id);
            info!("Offer 수신 - sender:{} — Answer 회신", peer.id);
            begin_negotiation(status);

            let answer = link.accept_offer(&description).await?;
            transport
                .send(&ClientSignal::Answer {
                    description: answer,
                    room_id:     roster.room_id().to_string(),
                    target_id:   peer.id,
                })
                .await
        }

        ServerSignal::Answer { description, sender_id, .. } => {
            trace!("Answer 수신 - sender:{}", sender_id);
            link.accept_answer(&description).await
        }

        ServerSignal::IceCandidate { candidate, sender_id, .. } => {
            trace!("원격 candidate 수신 - sender:{}", sender_id);
            // 적용 실패는 엔진이 로그 후 삼킴 — 세션은 계속 진행
            link.apply_candidate(&candidate).await;
            Ok(())
        }

        ServerSignal::Error { code, reason } => {
            if (1000..2000).contains(&code) {
                Err(CallError::Auth(format!("[{}] {}", code, reason)))
            } else {
                Err(CallError::Transport(format!("[{}] {}", code, reason)))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// [엔진 이벤트 핸들러]
// ----------------------------------------------------------------------------

async fn handle_engine_event(
    event: EngineEvent,
    roster: &RoomRoster,
    transport: &mut dyn SignalingTransport,
    status: &watch::Sender<CallStatus>,
) -> CallResult<()> {
    match event {
        EngineEvent::LocalCandidate(candidate) => match roster.remote() {
            Some(peer) => {
                transport
                    .send(&ClientSignal::IceCandidate {
                        candidate,
                        room_id:   roster.room_id().to_string(),
                        target_id: peer.id.clone(),
                    })
                    .await
            }
            None => {
                // 상대 미선정 — ICE는 후속 candidate로 자체 복구하므로 drop
                trace!("통화 상대 미선정 — 로컬 candidate drop");
                Ok(())
            }
        },

        EngineEvent::RemoteTrack { kind } => {
            info!("원격 {} 트랙 수신 — 통화 성립", kind);
            status.send_replace(CallStatus::Connected);
            Ok(())
        }

        EngineEvent::LinkFailed(reason) => Err(CallError::Negotiation(reason)),
    }
}

/// 협상 개시 시 Connecting 전환 — 재협상(Connected 중 신규 입장)은 유지
fn begin_negotiation(status: &watch::Sender<CallStatus>) {
    let already_connected = *status.borrow() == CallStatus::Connected;
    if !already_connected {
        status.send_replace(CallStatus::Connecting);
    }
}

fn fail(status: &watch::Sender<CallStatus>, err: CallError) {
    error!("통화 세션 실패: {}", err);
    status.send_replace(CallStatus::Failed(err.to_string()));
}

// ----------------------------------------------------------------------------
// [테스트] 스크립트 가능한 인메모리 전송으로 상태 머신 검증
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{CandidateInit, PeerInfo, SessionDescription};
    use async_trait::async_trait;
    use std::time::Duration;

    // ------------------------------------------------------------------------
    // 테스트 전송: 채널 기반, 테스트 코드가 서버 역할을 스크립트
    // ------------------------------------------------------------------------

    struct ChannelTransport {
        tx: mpsc::Sender<ClientSignal>,
        rx: mpsc::Receiver<ServerSignal>,
    }

    #[async_trait]
    impl SignalingTransport for ChannelTransport {
        async fn send(&mut self, signal: &ClientSignal) -> CallResult<()> {
            self.tx
                .send(signal.clone())
                .await
                .map_err(|_| CallError::Transport("test peer closed".to_string()))
        }

        async fn recv(&mut self) -> Option<ServerSignal> {
            self.rx.recv().await
        }

        async fn close(&mut self) {
            self.rx.close();
        }
    }

    struct ChannelConnector {
        slot:   std::sync::Mutex<Option<ChannelTransport>>,
        reject: bool,
    }

    #[async_trait]
    impl SignalingConnector for ChannelConnector {
        async fn connect(
            &self,
            _url: &str,
            _credential: &str,
        ) -> CallResult<Box<dyn SignalingTransport>> {
            if self.reject {
                return Err(CallError::Auth("rejected by test server".to_string()));
            }
            let transport = self
                .slot
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| CallError::Transport("already connected".to_string()))?;
            Ok(Box::new(transport))
        }
    }

    /// 미디어 권한 거부 시뮬레이션
    struct DeniedDevices;

    #[async_trait]
    impl MediaDevices for DeniedDevices {
        async fn acquire(&self) -> CallResult<crate::media::LocalMedia> {
            Err(CallError::MediaAccess("permission denied".to_string()))
        }
    }

    struct Harness {
        session:     CallSession,
        to_client:   mpsc::Sender<ServerSignal>,
        from_client: mpsc::Receiver<ClientSignal>,
    }

    fn harness_with(reject: bool) -> Harness {
        let (to_client, client_rx)  = mpsc::channel(32);
        let (client_tx, from_client) = mpsc::channel(32);

        let connector = ChannelConnector {
            slot:   std::sync::Mutex::new(Some(ChannelTransport { tx: client_tx, rx: client_rx })),
            reject,
        };
        // 외부 네트워크 의존 제거 — ICE 서버 없이 host candidate만 사용
        let cfg = CallConfig {
            server_url:   "test://signaling".to_string(),
            display_name: "tester".to_string(),
            ice_servers:  vec![],
        };
        let session = CallSession::new(
            cfg,
            Arc::new(SyntheticMediaDevices::silent()),
            Arc::new(connector),
        );
        Harness { session, to_client, from_client }
    }

    fn harness() -> Harness {
        harness_with(false)
    }

    async fn wait_status<F>(rx: &mut watch::Receiver<CallStatus>, label: &str, pred: F)
    where
        F: Fn(&CallStatus) -> bool,
    {
        let waited = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| pred(s))).await;
        match waited {
            Ok(res) => {
                res.expect("status 채널 종료");
            }
            Err(_) => panic!("{} 대기 타임아웃", label),
        }
    }

    async fn recv_signal(rx: &mut mpsc::Receiver<ClientSignal>) -> ClientSignal {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("클라이언트 시그널 대기 타임아웃")
            .expect("클라이언트 측 종료")
    }

    fn peer(id: &str) -> PeerInfo {
        PeerInfo { id: id.to_string(), name: format!("name-{}", id) }
    }

    // ------------------------------------------------------------------------
    // [시나리오 1] 자격증명 없음 → NotAuthenticated, 아무것도 획득하지 않음
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn missing_credential_sets_not_authenticated() {
        let mut h = harness();
        let mut status = h.session.status();

        h.session.start("room-1", None).await;
        wait_status(&mut status, "NotAuthenticated", |s| *s == CallStatus::NotAuthenticated).await;

        // 전송 연결 시도조차 없어야 함
        assert!(h.from_client.try_recv().is_err());
    }

    // ------------------------------------------------------------------------
    // [시나리오 2] stop() 멱등성 — 어떤 상태에서도, 몇 번이고 안전
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn stop_is_idempotent_before_start() {
        let h = harness();
        h.session.stop().await;
        h.session.stop().await;
        assert_eq!(*h.session.status().borrow(), CallStatus::Initializing);
    }

    #[tokio::test]
    async fn stop_is_idempotent_after_start() {
        let mut h = harness();
        let mut status = h.session.status();

        h.session.start("room-1", Some("tok")).await;
        // JoinRoom까지 진행 확인 후 종료
        let join = recv_signal(&mut h.from_client).await;
        assert!(matches!(join, ClientSignal::JoinRoom { .. }));
        wait_status(&mut status, "Joining", |s| *s == CallStatus::Joining).await;

        h.session.stop().await;
        h.session.stop().await;
        assert_eq!(*status.borrow(), CallStatus::Initializing);
    }

    // ------------------------------------------------------------------------
    // [시나리오 3] 미디어 거부 → Failed(MediaAccess) — 자동 재시도 없음
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn denied_media_fails_terminally() {
        let (to_client, client_rx)   = mpsc::channel(8);
        let (client_tx, from_client) = mpsc::channel(8);
        let _keep = (to_client, from_client);

        let connector = ChannelConnector {
            slot:   std::sync::Mutex::new(Some(ChannelTransport { tx: client_tx, rx: client_rx })),
            reject: false,
        };
        let session = CallSession::new(
            CallConfig { server_url: "test://".to_string(), display_name: "t".to_string(), ice_servers: vec![] },
            Arc::new(DeniedDevices),
            Arc::new(connector),
        );

        let mut status = session.status();
        session.start("room-1", Some("tok")).await;
        wait_status(&mut status, "Failed", |s| matches!(s, CallStatus::Failed(_))).await;

        match status.borrow().clone() {
            CallStatus::Failed(reason) => assert!(reason.contains("Media device access failed")),
            other => panic!("Failed 이어야 합니다: {}", other),
        };
    }

    // ------------------------------------------------------------------------
    // [시나리오 4] 자격증명 거부 → Failed(Auth)
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn rejected_credential_fails_auth() {
        let h = harness_with(true);
        let mut status = h.session.status();

        h.session.start("room-1", Some("bad-token")).await;
        wait_status(&mut status, "Failed", |s| matches!(s, CallStatus::Failed(_))).await;

        match status.borrow().clone() {
            CallStatus::Failed(reason) => assert!(reason.contains("credential rejected")),
            other => panic!("Failed 이어야 합니다: {}", other),
        };
    }

    // ------------------------------------------------------------------------
    // [시나리오 5] Caller 경로 — Joining → Ready → Connecting, Offer 송신
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn caller_path_offers_to_new_joiner() {
        let mut h = harness();
        let mut status = h.session.status();

        h.session.start("room-42", Some("tok")).await;

        let join = recv_signal(&mut h.from_client).await;
        match join {
            ClientSignal::JoinRoom { room_id, user_name } => {
                assert_eq!(room_id, "room-42");
                assert_eq!(user_name, "tester");
            }
            other => panic!("JoinRoom이 아닙니다: {:?}", other),
        }
        wait_status(&mut status, "Joining", |s| *s == CallStatus::Joining).await;

        // 첫 입장 — 빈 로스터 (본인만)
        h.to_client
            .send(ServerSignal::RoomUsers { self_id: "me".to_string(), users: vec![peer("me")] })
            .await
            .unwrap();
        wait_status(&mut status, "Ready", |s| *s == CallStatus::Ready).await;

        // 신규 입장자 → 내가 Caller
        h.to_client
            .send(ServerSignal::UserJoined {
                user_id:   "peer_b".to_string(),
                user_name: "b".to_string(),
            })
            .await
            .unwrap();

        let offer = recv_signal(&mut h.from_client).await;
        match offer {
            ClientSignal::Offer { description, room_id, target_id } => {
                assert_eq!(description.sdp_type, "offer");
                assert_eq!(room_id, "room-42");
                assert_eq!(target_id, "peer_b");
            }
            other => panic!("Offer가 아닙니다: {:?}", other),
        }
        wait_status(&mut status, "Connecting", |s| *s == CallStatus::Connecting).await;

        h.session.stop().await;
    }

    // ------------------------------------------------------------------------
    // [시나리오 6] Callee 경로 — 기존 참가자의 Offer에 Answer 회신
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn callee_path_answers_offer() {
        let mut h = harness();
        let mut status = h.session.status();

        h.session.start("room-42", Some("tok")).await;
        recv_signal(&mut h.from_client).await; // JoinRoom

        // 로스터 [A, me] — A 선정, 단 Offer는 A가 보냄 (나는 대기)
        h.to_client
            .send(ServerSignal::RoomUsers {
                self_id: "me".to_string(),
                users:   vec![peer("peer_a"), peer("me")],
            })
            .await
            .unwrap();
        wait_status(&mut status, "Ready", |s| *s == CallStatus::Ready).await;
        assert!(h.from_client.try_recv().is_err(), "뒤 입장자는 Offer를 보내면 안 됩니다.");

        // 실제 Offer SDP 생성용 보조 peer
        let remote_media = SyntheticMediaDevices::silent().acquire().await.unwrap();
        let (tx, _rx) = mpsc::channel(config::ENGINE_QUEUE_SIZE);
        let remote_link = PeerLink::new(&[], &remote_media, tx).await.unwrap();
        let remote_offer = remote_link.create_offer().await.unwrap();

        h.to_client
            .send(ServerSignal::Offer {
                description: remote_offer,
                room_id:     "room-42".to_string(),
                sender_id:   "peer_a".to_string(),
            })
            .await
            .unwrap();

        let answer = recv_signal(&mut h.from_client).await;
        match answer {
            ClientSignal::Answer { description, target_id, .. } => {
                assert_eq!(description.sdp_type, "answer");
                assert_eq!(target_id, "peer_a");
            }
            other => panic!("Answer가 아닙니다: {:?}", other),
        }
        wait_status(&mut status, "Connecting", |s| *s == CallStatus::Connecting).await;

        remote_link.close().await;
        remote_media.stop();
        h.session.stop().await;
    }

    // ------------------------------------------------------------------------
    // [시나리오 7] 원격 기술 설정 전 candidate 도착 — 세션 생존
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn early_candidate_does_not_kill_session() {
        let mut h = harness();
        let mut status = h.session.status();

        h.session.start("room-42", Some("tok")).await;
        recv_signal(&mut h.from_client).await; // JoinRoom

        h.to_client
            .send(ServerSignal::RoomUsers { self_id: "me".to_string(), users: vec![peer("me")] })
            .await
            .unwrap();
        wait_status(&mut status, "Ready", |s| *s == CallStatus::Ready).await;

        // 협상 시작 전 candidate — 버퍼링/승격 없이 폐기되어야 함
        h.to_client
            .send(ServerSignal::IceCandidate {
                candidate: CandidateInit {
                    candidate:       "candidate:1 1 udp 2130706431 192.0.2.7 9 typ host".to_string(),
                    sdp_mid:         Some("0".to_string()),
                    sdp_mline_index: Some(0),
                },
                room_id:   "room-42".to_string(),
                sender_id: "peer_x".to_string(),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*status.borrow(), CallStatus::Ready, "early candidate로 세션이 죽으면 안 됩니다.");

        h.session.stop().await;
    }

    // ------------------------------------------------------------------------
    // [시나리오 8] 시그널링 단절 → Failed, 재접속 없음
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn transport_drop_fails_session() {
        let mut h = harness();
        let mut status = h.session.status();

        h.session.start("room-42", Some("tok")).await;
        recv_signal(&mut h.from_client).await; // JoinRoom
        wait_status(&mut status, "Joining", |s| *s == CallStatus::Joining).await;

        drop(h.to_client); // 서버 측 단절

        wait_status(&mut status, "Failed", |s| matches!(s, CallStatus::Failed(_))).await;
        match status.borrow().clone() {
            CallStatus::Failed(reason) => assert!(reason.contains("signaling channel closed")),
            other => panic!("Failed 이어야 합니다: {}", other),
        };
    }

    // ------------------------------------------------------------------------
    // [시나리오 9] 송신이 걸려 있어도 stop()은 반환 — 중단점 취소
    // ------------------------------------------------------------------------

    /// Offer 송신이 영원히 완료되지 않는 전송 — 죽은 피어/TCP 백프레셔 재현
    struct StallingTransport {
        tx: mpsc::Sender<ClientSignal>,
        rx: mpsc::Receiver<ServerSignal>,
    }

    #[async_trait]
    impl SignalingTransport for StallingTransport {
        async fn send(&mut self, signal: &ClientSignal) -> CallResult<()> {
            if matches!(signal, ClientSignal::Offer { .. }) {
                std::future::pending::<()>().await;
            }
            self.tx
                .send(signal.clone())
                .await
                .map_err(|_| CallError::Transport("test peer closed".to_string()))
        }

        async fn recv(&mut self) -> Option<ServerSignal> {
            self.rx.recv().await
        }

        async fn close(&mut self) {
            self.rx.close();
        }
    }

    struct StallingConnector {
        slot: std::sync::Mutex<Option<StallingTransport>>,
    }

    #[async_trait]
    impl SignalingConnector for StallingConnector {
        async fn connect(
            &self,
            _url: &str,
            _credential: &str,
        ) -> CallResult<Box<dyn SignalingTransport>> {
            let transport = self
                .slot
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| CallError::Transport("already connected".to_string()))?;
            Ok(Box::new(transport))
        }
    }

    #[tokio::test]
    async fn stop_returns_while_send_is_stalled() {
        let (to_client, client_rx)       = mpsc::channel(32);
        let (client_tx, mut from_client) = mpsc::channel(32);
        let connector = StallingConnector {
            slot: std::sync::Mutex::new(Some(StallingTransport { tx: client_tx, rx: client_rx })),
        };
        let session = CallSession::new(
            CallConfig {
                server_url:   "test://signaling".to_string(),
                display_name: "tester".to_string(),
                ice_servers:  vec![],
            },
            Arc::new(SyntheticMediaDevices::silent()),
            Arc::new(connector),
        );
        let mut status = session.status();

        session.start("room-42", Some("tok")).await;
        recv_signal(&mut from_client).await; // JoinRoom
        to_client
            .send(ServerSignal::RoomUsers { self_id: "me".to_string(), users: vec![peer("me")] })
            .await
            .unwrap();
        wait_status(&mut status, "Ready", |s| *s == CallStatus::Ready).await;

        // Caller 경로 진입 — Offer 송신이 걸린 채로 멈추는 상태를 만든다
        to_client
            .send(ServerSignal::UserJoined {
                user_id:   "peer_b".to_string(),
                user_name: "b".to_string(),
            })
            .await
            .unwrap();
        wait_status(&mut status, "Connecting", |s| *s == CallStatus::Connecting).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 송신 중단점에 걸려 있어도 stop()은 제한 시간 안에 반환해야 함
        tokio::time::timeout(Duration::from_secs(3), session.stop())
            .await
            .expect("송신 중단점이 stop()을 막으면 안 됩니다.");
        assert_eq!(*status.borrow(), CallStatus::Initializing);
    }

    // ------------------------------------------------------------------------
    // [시나리오 10] 잘못된 Answer → Failed(Negotiation)
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn malformed_answer_fails_negotiation() {
        let mut h = harness();
        let mut status = h.session.status();

        h.session.start("room-42", Some("tok")).await;
        recv_signal(&mut h.from_client).await; // JoinRoom

        h.to_client
            .send(ServerSignal::RoomUsers { self_id: "me".to_string(), users: vec![peer("me")] })
            .await
            .unwrap();
        wait_status(&mut status, "Ready", |s| *s == CallStatus::Ready).await;

        h.to_client
            .send(ServerSignal::Answer {
                description: SessionDescription::answer("garbage".to_string()),
                room_id:     "room-42".to_string(),
                sender_id:   "peer_a".to_string(),
            })
            .await
            .unwrap();

        wait_status(&mut status, "Failed", |s| matches!(s, CallStatus::Failed(_))).await;
    }
}

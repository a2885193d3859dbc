// author: kodeholic
// 룸 멤버십 추적 — 네트워크 로직과 분리된 순수 상태 모듈.
//
// 이 설계는 엄격한 1:1 통화 전용입니다. 룸에 3명 이상이 들어오면
// "마지막 입장자 승리" 정책으로 통화 상대가 바뀝니다. 다자 통화로
// 일반화하려면 select_remote_peer를 안정적 페어링 정책으로 교체해야 합니다.

use tracing::trace;

use crate::signaling::PeerInfo;

/// 초기 로스터에서 통화 상대 선정: 본인을 제외한 첫 번째 참가자.
/// 정책 함수로 분리해 둔 것이므로, 다자 지원 시 이 함수만 교체합니다.
pub fn select_remote_peer(roster: &[PeerInfo], local_id: &str) -> Option<PeerInfo> {
    roster.iter().find(|p| p.id != local_id).cloned()
}

// ----------------------------------------------------------------------------
// [RoomRoster] 통화 세션 1개가 소유하는 룸 상태
// ----------------------------------------------------------------------------

pub struct RoomRoster {
    room_id:  String,
    local_id: Option<String>,
    remote:   Option<PeerInfo>,
}

impl RoomRoster {
    pub fn new(room_id: &str) -> Self {
        Self {
            room_id:  room_id.to_string(),
            local_id: None,
            remote:   None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// 현재 선정된 통화 상대 (없으면 아직 혼자)
    pub fn remote(&self) -> Option<&PeerInfo> {
        self.remote.as_ref()
    }

    /// room-users 응답 반영 — transport가 부여한 본인 id와 본인 포함 로스터.
    /// 이미 다른 참가자가 있으면 그쪽이 Caller가 되어 Offer를 보내오므로
    /// 여기서는 상대 선정만 하고 협상은 시작하지 않습니다.
    pub fn apply_room_users(&mut self, self_id: &str, users: &[PeerInfo]) -> Option<PeerInfo> {
        self.local_id = Some(self_id.to_string());
        self.remote = select_remote_peer(users, self_id);
        trace!(
            "room-users 반영 - room:{} self:{} remote:{:?}",
            self.room_id, self_id,
            self.remote.as_ref().map(|p| p.id.as_str()),
        );
        self.remote.clone()
    }

    /// user-joined 이벤트 반영 — 마지막 입장자가 통화 상대가 됩니다.
    /// 이 이벤트를 받은 쪽(먼저 들어와 있던 쪽)이 Caller 역할입니다.
    pub fn apply_user_joined(&mut self, user_id: &str, user_name: &str) -> PeerInfo {
        let peer = PeerInfo { id: user_id.to_string(), name: user_name.to_string() };
        trace!("user-joined 반영 - room:{} remote:{}", self.room_id, user_id);
        self.remote = Some(peer.clone());
        peer
    }

    /// Offer 발신자를 통화 상대로 확정 (Callee 경로).
    /// 로스터에 없던 발신자라도 그대로 수용 — 이름은 이후 이벤트로 보강됩니다.
    pub fn adopt_offer_sender(&mut self, sender_id: &str) -> PeerInfo {
        match &self.remote {
            Some(p) if p.id == sender_id => p.clone(),
            _ => {
                trace!("Offer 발신자를 상대로 채택 - room:{} sender:{}", self.room_id, sender_id);
                let peer = PeerInfo { id: sender_id.to_string(), name: sender_id.to_string() };
                self.remote = Some(peer.clone());
                peer
            }
        }
    }
}

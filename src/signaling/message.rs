// author: kodeholic

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// [통신 규약] 시그널링 JSON 메시지 포맷
//
// 클라이언트 ↔ 시그널링 서버 사이의 전체 계약입니다.
// offer/answer/ice-candidate는 서버가 target_id로 특정 참가자에게 릴레이하고,
// 수신 측에는 sender_id를 붙여 전달합니다.
// ----------------------------------------------------------------------------

/// 통화 상대의 세션 기술 (Offer 또는 Answer). 내용(sdp)은 불투명 blob으로 취급.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionDescription {
    /// "offer" | "answer"
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp:      String,
}

impl SessionDescription {
    pub fn offer(sdp: String) -> Self {
        Self { sdp_type: "offer".to_string(), sdp }
    }

    pub fn answer(sdp: String) -> Self {
        Self { sdp_type: "answer".to_string(), sdp }
    }
}

/// ICE candidate 한 건 — 브라우저 RTCIceCandidateInit과 동일한 형태
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CandidateInit {
    pub candidate:       String,
    pub sdp_mid:         Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// 룸 참가자 한 명 (id는 transport가 부여)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub id:   String,
    pub name: String,
}

// ----------------------------------------------------------------------------
// [C→S] 클라이언트 발신 시그널
// ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientSignal {
    /// 룸 참가 요청 — 응답으로 room-users 수신
    JoinRoom {
        room_id:   String,
        user_name: String,
    },
    /// Caller 경로: 신규 참가자에게 Offer 전달 요청
    Offer {
        description: SessionDescription,
        room_id:     String,
        target_id:   String,
    },
    /// Callee 경로: Offer 발신자에게 Answer 회신 요청
    Answer {
        description: SessionDescription,
        room_id:     String,
        target_id:   String,
    },
    /// 로컬 ICE candidate 릴레이 요청 — 순서 무관, 최소 1회 전달
    IceCandidate {
        candidate: CandidateInit,
        room_id:   String,
        target_id: String,
    },
}

// ----------------------------------------------------------------------------
// [S→C] 서버 발신 시그널
// ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerSignal {
    /// join-room 응답 — 본인 포함 현재 로스터와 transport가 부여한 본인 id
    RoomUsers {
        self_id: String,
        users:   Vec<PeerInfo>,
    },
    /// 내 이후에 도착한 참가자 알림 — 수신 측이 Caller가 됨
    UserJoined {
        user_id:   String,
        user_name: String,
    },
    Offer {
        description: SessionDescription,
        room_id:     String,
        sender_id:   String,
    },
    Answer {
        description: SessionDescription,
        room_id:     String,
        sender_id:   String,
    },
    IceCandidate {
        candidate: CandidateInit,
        room_id:   String,
        sender_id: String,
    },
    /// 서버 측 거부/오류. 1xxx = 인증 계열
    Error {
        code:   u16,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_wire_format() {
        let json = serde_json::to_value(ClientSignal::JoinRoom {
            room_id:   "room-42".to_string(),
            user_name: "dr.kim".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "join-room");
        assert_eq!(json["room_id"], "room-42");
        assert_eq!(json["user_name"], "dr.kim");
    }

    #[test]
    fn offer_carries_nested_description_type() {
        let json = serde_json::to_value(ClientSignal::Offer {
            description: SessionDescription::offer("v=0...".to_string()),
            room_id:     "room-42".to_string(),
            target_id:   "peer_2".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["description"]["type"], "offer");
        assert_eq!(json["target_id"], "peer_2");
    }

    #[test]
    fn parse_room_users_response() {
        let raw = r#"{
            "type": "room-users",
            "self_id": "peer_2",
            "users": [
                { "id": "peer_1", "name": "dr.kim" },
                { "id": "peer_2", "name": "patient.lee" }
            ]
        }"#;
        match serde_json::from_str::<ServerSignal>(raw).unwrap() {
            ServerSignal::RoomUsers { self_id, users } => {
                assert_eq!(self_id, "peer_2");
                assert_eq!(users.len(), 2);
                assert_eq!(users[0].id, "peer_1");
            }
            other => panic!("room-users가 아닙니다: {:?}", other),
        }
    }

    #[test]
    fn parse_ice_candidate_with_null_mid() {
        let raw = r#"{
            "type": "ice-candidate",
            "candidate": { "candidate": "candidate:1 1 udp ...", "sdp_mid": null, "sdp_mline_index": 0 },
            "room_id": "room-42",
            "sender_id": "peer_1"
        }"#;
        match serde_json::from_str::<ServerSignal>(raw).unwrap() {
            ServerSignal::IceCandidate { candidate, .. } => {
                assert!(candidate.sdp_mid.is_none());
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("ice-candidate가 아닙니다: {:?}", other),
        }
    }
}

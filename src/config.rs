// author: kodeholic
// 매직 넘버를 배제하고 통화 클라이언트 전체의 성능과 한계를 제어하는 상수 모음입니다.

/// 시그널링 서버 기본 접속 URL (tmcall CLI 기본값)
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080/ws";

/// 협상 엔진 → 세션 컨트롤러 이벤트 큐 사이즈.
/// ICE candidate 발견 이벤트가 몰려도 밀리지 않도록 여유 확보.
pub const ENGINE_QUEUE_SIZE: usize = 64;

/// 오디오 비컨 송출 주기 (밀리초) — Opus 프레임 1개당 20ms
pub const AUDIO_BEACON_INTERVAL_MS: u64 = 20;

/// Opus 무음 프레임 (DTX silence).
/// 합성 미디어 소스가 RTP를 실제로 흘려보내기 위한 최소 페이로드.
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// 로컬 오디오 트랙 식별자
pub const AUDIO_TRACK_ID: &str = "tm-audio";

/// 로컬 비디오 트랙 식별자
pub const VIDEO_TRACK_ID: &str = "tm-video";

/// 로컬 트랙이 묶이는 스트림 식별자
pub const MEDIA_STREAM_ID: &str = "tm-stream";

// ----------------------------------------------------------------------------
// ICE 서버 기본 목록 (공개 STUN)
// TURN은 운영 선택사항 — CallConfig.ice_servers에 자격증명과 함께 추가
// ----------------------------------------------------------------------------
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:global.stun.twilio.com:3478",
];

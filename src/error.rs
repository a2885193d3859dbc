// author: kodeholic
// 통화 수립 과정에서 발생하는 에러 분류.
// 모든 에러는 CallSession 경계에서 잡혀 status로 변환되며, 상위로 throw되지 않습니다.

use std::fmt;

#[derive(Debug)]
pub enum CallError {
    /// 카메라/마이크 획득 실패 또는 권한 거부 — 재시도 없음, 사용자 조치 필요
    MediaAccess(String),
    /// 시그널링 서버가 자격증명을 거부 — 상위에서 재인증 필요
    Auth(String),
    /// Offer/Answer 세션 기술(SD) 연산 실패
    Negotiation(String),
    /// ICE candidate 등록 실패 — 로그 후 무시 (정상적인 레이스로 간주)
    IceApply(String),
    /// 시그널링 채널 단절/송신 실패 — 자동 재접속 없음
    Transport(String),
    /// 시그널링 메시지 파싱 실패
    InvalidPayload(String),
    /// 발생해서는 안 되는 내부 상태 (통화 중 엔진 이벤트 채널 종료 등)
    InternalError(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::MediaAccess(msg)    => write!(f, "Media device access failed: {}", msg),
            CallError::Auth(msg)           => write!(f, "Signaling credential rejected: {}", msg),
            CallError::Negotiation(msg)    => write!(f, "Session description error: {}", msg),
            CallError::IceApply(msg)       => write!(f, "ICE candidate apply failed: {}", msg),
            CallError::Transport(msg)      => write!(f, "Signaling transport error: {}", msg),
            CallError::InvalidPayload(msg) => write!(f, "Invalid signaling payload: {}", msg),
            CallError::InternalError(msg)  => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for CallError {}

pub type CallResult<T> = Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefix_identifies_category() {
        let cases = [
            (CallError::MediaAccess("denied".to_string()),     "Media device access failed"),
            (CallError::Auth("401".to_string()),               "Signaling credential rejected"),
            (CallError::InternalError("engine channel closed".to_string()), "Internal error"),
        ];
        for (err, prefix) in cases {
            assert!(err.to_string().starts_with(prefix), "{}", err);
        }
    }
}

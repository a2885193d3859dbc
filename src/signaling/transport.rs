// author: kodeholic
// 시그널링 전송 계층 — 통화 세션당 인증된 양방향 채널 1개.
//
// 전송 자체는 외부 협력자(시그널링 서버)에 의존하며, 여기서는
// 계약(trait)과 WebSocket 구현만 제공합니다. 연결 단절 시 자동 재접속은
// 하지 않습니다 — 세션은 Failed로 이동하고 사용자가 start()를 다시 호출해야 합니다.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{trace, warn};

use crate::error::{CallError, CallResult};
use crate::signaling::message::{ClientSignal, ServerSignal};

// ----------------------------------------------------------------------------
// [계약] 전송 trait — 테스트에서는 인메모리 채널 구현으로 대체
// ----------------------------------------------------------------------------

#[async_trait]
pub trait SignalingTransport: Send {
    /// 시그널 1건 송신. 실패는 Transport 에러.
    async fn send(&mut self, signal: &ClientSignal) -> CallResult<()>;

    /// 시그널 1건 수신. None = 채널 종료 (정상 Close 포함).
    async fn recv(&mut self) -> Option<ServerSignal>;

    /// 클라이언트 주도 종료. 멱등 — 몇 번을 불러도 안전해야 합니다.
    async fn close(&mut self);
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// 자격증명으로 인증된 채널을 연다. 거부 시 Auth 에러.
    async fn connect(&self, url: &str, credential: &str) -> CallResult<Box<dyn SignalingTransport>>;
}

// ----------------------------------------------------------------------------
// [구현] WebSocket 전송 (tokio-tungstenite)
// 자격증명은 HTTP Upgrade의 Authorization: Bearer 헤더로 전달
// ----------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    ws: WsStream,
}

pub struct WsConnector;

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self, url: &str, credential: &str) -> CallResult<Box<dyn SignalingTransport>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| CallError::Transport(format!("invalid signaling url: {}", e)))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|e| CallError::Auth(format!("malformed credential: {}", e)))?;
        request.headers_mut().insert("Authorization", bearer);

        let (ws, _) = connect_async(request).await.map_err(map_connect_error)?;
        trace!("시그널링 WS 연결 성립: {}", url);

        Ok(Box::new(WsTransport { ws }))
    }
}

/// HTTP Upgrade 거부 중 401/403은 인증 실패로 분류
fn map_connect_error(err: WsError) -> CallError {
    match err {
        WsError::Http(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
            CallError::Auth(format!("signaling server returned {}", resp.status()))
        }
        other => CallError::Transport(other.to_string()),
    }
}

#[async_trait]
impl SignalingTransport for WsTransport {
    async fn send(&mut self, signal: &ClientSignal) -> CallResult<()> {
        let json = serde_json::to_string(signal)
            .map_err(|e| CallError::InvalidPayload(e.to_string()))?;
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| CallError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ServerSignal> {
        while let Some(msg) = self.ws.next().await {
            let text = match msg {
                Ok(Message::Text(t))  => t,
                Ok(Message::Close(_)) => return None,
                Err(e) => {
                    warn!("시그널링 WS 에러: {}", e);
                    return None;
                }
                _ => continue,
            };

            match serde_json::from_str::<ServerSignal>(&text) {
                Ok(signal) => return Some(signal),
                Err(e) => {
                    // 알 수 없는 메시지는 버리고 수신 지속 (규약 확장 내성)
                    warn!("잘못된 시그널 포맷 수신: {}", e);
                    continue;
                }
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

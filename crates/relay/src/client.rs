//! 릴레이 클라이언트 — 연결 관리와 플로우 스트림
//!
//! 프로세스 내에서 역할(브로드캐스터)당 하나의 업스트림 스트림만 유지합니다.
//! 스트림 에러는 호출자에게 반환되며, 호출자가 고정 백오프로 재시도합니다.

use std::time::Duration;

use metrics::counter;
use tokio::sync::broadcast;
use tonic::transport::{Channel, Endpoint};

use flowguard_core::error::RelayError;
use flowguard_core::flow::Flow;
use flowguard_core::metrics::{CONNECTION_ERRORS_TOTAL, DECODE_ERRORS_TOTAL, LABEL_ERROR_TYPE};

use crate::normalize;
use crate::proto::{FlowFilter, GetFlowsRequest, ObserverClient};

/// 네임스페이스 필터 레이블 접두어
const NAMESPACE_LABEL_PREFIX: &str = "k8s:io.kubernetes.pod.namespace=";

/// 옵저버 릴레이 클라이언트
///
/// 전송 계층은 지연 연결(lazy) 채널이며, 클러스터 내부 사용을 전제로
/// TLS 없이 연결합니다.
#[derive(Debug, Clone)]
pub struct RelayClient {
    channel: Channel,
    server: String,
}

impl RelayClient {
    /// 릴레이 주소로 클라이언트를 생성합니다. 실제 연결은 첫 호출 시 수립됩니다.
    pub fn connect(server: &str) -> Result<Self, RelayError> {
        let endpoint = endpoint_for(server)?;
        Ok(Self {
            channel: endpoint.connect_lazy(),
            server: server.to_owned(),
        })
    }

    /// 동기 연결 점검 — 데드라인 내에 전송 계층이 준비되면 Ok.
    pub async fn test_connection(&self, deadline: Duration) -> Result<(), RelayError> {
        let endpoint = endpoint_for(&self.server)?;
        match tokio::time::timeout(deadline, endpoint.connect()).await {
            Ok(Ok(_)) => {
                tracing::info!(server = %self.server, "connected to observer relay");
                Ok(())
            }
            Ok(Err(e)) => Err(RelayError::NotReady(e.to_string())),
            Err(_) => Err(RelayError::NotReady(
                "timeout waiting for connection".to_owned(),
            )),
        }
    }

    /// 플로우 스트림을 열고 각 이벤트를 `on_flow`로 전달합니다.
    ///
    /// `namespaces`의 각 항목에 대해 source/destination 레이블 필터 한 쌍을
    /// whitelist에 추가합니다 (OR 결합). `shutdown` 수신 또는 스트림 종료까지
    /// 블록하며, 전송 에러는 그대로 반환합니다. 단건 디코딩 실패는
    /// 카운터 증가 후 폐기되고 스트림은 계속됩니다.
    pub async fn stream_flows<F>(
        &self,
        mut shutdown: broadcast::Receiver<()>,
        namespaces: &[String],
        mut on_flow: F,
    ) -> Result<(), RelayError>
    where
        F: FnMut(Flow),
    {
        let mut client = ObserverClient::new(self.channel.clone());
        let request = build_request(namespaces);

        tracing::info!(
            server = %self.server,
            namespaces = ?namespaces,
            "opening relay flow stream"
        );

        let mut stream = match client.get_flows(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                counter!(CONNECTION_ERRORS_TOTAL, LABEL_ERROR_TYPE => "stream_start_failed")
                    .increment(1);
                return Err(RelayError::Stream(status.to_string()));
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("relay stream stopped by shutdown signal");
                    return Ok(());
                }
                message = stream.message() => {
                    match message {
                        Ok(Some(response)) => match normalize::flow_from_proto(response.flow) {
                            Some(flow) => on_flow(flow),
                            None => {
                                counter!(DECODE_ERRORS_TOTAL).increment(1);
                                tracing::debug!("dropped relay event without flow payload");
                            }
                        },
                        Ok(None) => {
                            tracing::info!("relay stream ended");
                            return Ok(());
                        }
                        Err(status) => {
                            counter!(
                                CONNECTION_ERRORS_TOTAL,
                                LABEL_ERROR_TYPE => "stream_receive_failed"
                            )
                            .increment(1);
                            return Err(RelayError::Stream(status.to_string()));
                        }
                    }
                }
            }
        }
    }
}

fn endpoint_for(server: &str) -> Result<Endpoint, RelayError> {
    let uri = if server.contains("://") {
        server.to_owned()
    } else {
        format!("http://{server}")
    };
    Endpoint::from_shared(uri)
        .map(|e| e.connect_timeout(Duration::from_secs(10)))
        .map_err(|e| RelayError::Connect(e.to_string()))
}

/// 네임스페이스당 source/destination 필터 한 쌍을 가진 follow 요청을 만듭니다.
fn build_request(namespaces: &[String]) -> GetFlowsRequest {
    let mut whitelist = Vec::with_capacity(namespaces.len() * 2);
    for ns in namespaces {
        let label = format!("{NAMESPACE_LABEL_PREFIX}{ns}");
        whitelist.push(FlowFilter {
            source_label: vec![label.clone()],
            destination_label: vec![],
        });
        whitelist.push(FlowFilter {
            source_label: vec![],
            destination_label: vec![label],
        });
    }
    GetFlowsRequest {
        follow: true,
        whitelist,
    }
}

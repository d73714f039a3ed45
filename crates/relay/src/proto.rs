//! 릴레이 옵저버 프로토콜 — 와이어 메시지와 gRPC 클라이언트
//!
//! 릴레이의 `observer.Observer/GetFlows` server-streaming 호출에 쓰이는
//! prost 메시지를 직접 정의합니다. 코드 생성 없이 손으로 쓴 형태이며,
//! 태그 번호가 곧 와이어 계약입니다.

use tonic::codegen::{Body, Bytes, GrpcMethod, StdError};

/// 플로우 스트림 요청
///
/// `whitelist`의 필터들은 OR로 결합됩니다. 네임스페이스 하나당
/// source/destination 레이블 필터 한 쌍이 들어갑니다.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFlowsRequest {
    /// true면 스트림을 계속 유지합니다 (follow mode).
    #[prost(bool, tag = "1")]
    pub follow: bool,
    #[prost(message, repeated, tag = "2")]
    pub whitelist: ::prost::alloc::vec::Vec<FlowFilter>,
}

/// 플로우 필터 — 필드 내 항목들은 OR, 필드 간에는 AND
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowFilter {
    #[prost(string, repeated, tag = "1")]
    pub source_label: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "2")]
    pub destination_label: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// 스트림 응답 한 건
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFlowsResponse {
    #[prost(message, optional, tag = "1")]
    pub flow: ::core::option::Option<PbFlow>,
}

/// 릴레이가 보내는 원시 플로우 이벤트
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PbFlow {
    #[prost(message, optional, tag = "1")]
    pub time: ::core::option::Option<::prost_types::Timestamp>,
    /// 판정 코드 — [`verdict_code`] 상수 참조
    #[prost(int32, tag = "2")]
    pub verdict: i32,
    #[prost(message, optional, tag = "3")]
    pub ip: ::core::option::Option<PbIp>,
    #[prost(message, optional, tag = "4")]
    pub l4: ::core::option::Option<PbLayer4>,
    #[prost(message, optional, tag = "5")]
    pub l7: ::core::option::Option<PbLayer7>,
    /// 플로우 타입 코드 — [`flow_type_code`] 상수 참조
    #[prost(int32, tag = "6")]
    pub r#type: i32,
    #[prost(message, optional, tag = "7")]
    pub source: ::core::option::Option<PbEndpoint>,
    #[prost(message, optional, tag = "8")]
    pub destination: ::core::option::Option<PbEndpoint>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PbIp {
    #[prost(string, tag = "1")]
    pub source: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub destination: ::prost::alloc::string::String,
}

/// L4 정보 — 와이어 상으로는 TCP/UDP가 둘 다 실릴 수 있으며,
/// 정규화 단계에서 TCP가 우선합니다.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PbLayer4 {
    #[prost(message, optional, tag = "1")]
    pub tcp: ::core::option::Option<PbTcp>,
    #[prost(message, optional, tag = "2")]
    pub udp: ::core::option::Option<PbUdp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PbTcp {
    #[prost(uint32, tag = "1")]
    pub source_port: u32,
    #[prost(uint32, tag = "2")]
    pub destination_port: u32,
    #[prost(message, optional, tag = "3")]
    pub flags: ::core::option::Option<PbTcpFlags>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PbUdp {
    #[prost(uint32, tag = "1")]
    pub source_port: u32,
    #[prost(uint32, tag = "2")]
    pub destination_port: u32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PbTcpFlags {
    #[prost(bool, tag = "1")]
    pub syn: bool,
    #[prost(bool, tag = "2")]
    pub ack: bool,
    #[prost(bool, tag = "3")]
    pub fin: bool,
    #[prost(bool, tag = "4")]
    pub rst: bool,
    #[prost(bool, tag = "5")]
    pub psh: bool,
    #[prost(bool, tag = "6")]
    pub urg: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PbLayer7 {
    /// L7 프로토콜 코드 — [`l7_code`] 상수 참조
    #[prost(int32, tag = "1")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PbEndpoint {
    #[prost(string, tag = "1")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub pod_name: ::prost::alloc::string::String,
    /// `key=value` 형태의 레이블 목록
    #[prost(string, repeated, tag = "3")]
    pub labels: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// 판정 코드
pub mod verdict_code {
    pub const UNKNOWN: i32 = 0;
    pub const FORWARDED: i32 = 1;
    pub const DROPPED: i32 = 2;
    pub const ERROR: i32 = 3;
    pub const AUDIT: i32 = 4;
    pub const REDIRECTED: i32 = 5;
    pub const TRACED: i32 = 6;
    pub const TRANSLATED: i32 = 7;
}

/// 플로우 타입 코드
pub mod flow_type_code {
    pub const UNKNOWN: i32 = 0;
    pub const L3_L4: i32 = 1;
    pub const L7: i32 = 2;
}

/// L7 프로토콜 코드
pub mod l7_code {
    pub const UNKNOWN: i32 = 0;
    pub const HTTP: i32 = 1;
    pub const KAFKA: i32 = 2;
    pub const DNS: i32 = 3;
}

/// 옵저버 gRPC 클라이언트
///
/// tonic 생성 코드와 같은 형태를 손으로 풀어 쓴 것입니다.
#[derive(Debug, Clone)]
pub struct ObserverClient<T> {
    inner: tonic::client::Grpc<T>,
}

impl ObserverClient<tonic::transport::Channel> {
    pub fn new(channel: tonic::transport::Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }
}

impl<T> ObserverClient<T>
where
    T: tonic::client::GrpcService<tonic::body::BoxBody>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
{
    /// server-streaming 플로우 구독을 엽니다.
    pub async fn get_flows(
        &mut self,
        request: impl tonic::IntoRequest<GetFlowsRequest>,
    ) -> Result<tonic::Response<tonic::codec::Streaming<GetFlowsResponse>>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
        })?;
        let codec = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static("/observer.Observer/GetFlows");
        let mut req = request.into_request();
        req.extensions_mut()
            .insert(GrpcMethod::new("observer.Observer", "GetFlows"));
        self.inner.server_streaming(req, path, codec).await
    }
}

//! 메트릭 질의 클라이언트 — instant/range 질의의 얇은 추상화
//!
//! 규칙 엔진이 메트릭 스토어(HTTP query API)에 질의할 때 사용합니다.
//! 타임아웃은 호출 단위이며, 규칙은 Vector와 Scalar 결과만 소비합니다.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use flowguard_core::error::QueryError;

/// range 질의 구간
#[derive(Debug, Clone, Copy)]
pub struct QueryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

/// 질의 결과 값
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Vector(Vec<VectorSample>),
    Scalar(ScalarSample),
    Matrix(Vec<MatrixSeries>),
}

impl QueryValue {
    /// Vector의 첫 샘플 값 또는 Scalar 값 — 단일 시계열 질의용 헬퍼
    pub fn first_value(&self) -> Option<f64> {
        match self {
            Self::Vector(samples) => samples.first().map(|s| s.value),
            Self::Scalar(sample) => Some(sample.value),
            Self::Matrix(_) => None,
        }
    }

    /// Vector 샘플들 — 비어있거나 다른 타입이면 빈 슬라이스
    pub fn samples(&self) -> &[VectorSample] {
        match self {
            Self::Vector(samples) => samples,
            _ => &[],
        }
    }
}

/// instant 질의의 시계열 샘플 한 건
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    pub labels: HashMap<String, String>,
    pub timestamp: f64,
    pub value: f64,
}

impl VectorSample {
    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map_or("", String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSample {
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSeries {
    pub labels: HashMap<String, String>,
    pub samples: Vec<(f64, f64)>,
}

/// HTTP 질의 API 클라이언트
#[derive(Debug, Clone)]
pub struct MetricsQueryClient {
    http: reqwest::Client,
    base_url: String,
}

impl MetricsQueryClient {
    /// 질의 URL이 비어있으면 시작 시점 치명 에러입니다.
    pub fn new(base_url: &str) -> Result<Self, QueryError> {
        if base_url.is_empty() {
            return Err(QueryError::MissingUrl);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// instant 질의를 실행합니다.
    pub async fn query(&self, expr: &str, timeout: Duration) -> Result<QueryValue, QueryError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("query", expr)])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| QueryError::Http(e.to_string()))?;
        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| QueryError::Parse(e.to_string()))?;
        parse_envelope(envelope)
    }

    /// range 질의를 실행합니다.
    pub async fn query_range(
        &self,
        expr: &str,
        range: QueryRange,
        timeout: Duration,
    ) -> Result<QueryValue, QueryError> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", expr.to_owned()),
                ("start", range.start.timestamp().to_string()),
                ("end", range.end.timestamp().to_string()),
                ("step", range.step.as_secs().to_string()),
            ])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| QueryError::Http(e.to_string()))?;
        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| QueryError::Parse(e.to_string()))?;
        parse_envelope(envelope)
    }
}

// --- 응답 봉투 ---

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

fn parse_envelope(envelope: ApiEnvelope) -> Result<QueryValue, QueryError> {
    if envelope.status != "success" {
        return Err(QueryError::Api {
            status: envelope.error_type.unwrap_or(envelope.status),
            reason: envelope.error.unwrap_or_default(),
        });
    }
    let data = envelope
        .data
        .ok_or_else(|| QueryError::Parse("missing data section".to_owned()))?;

    match data.result_type.as_str() {
        "vector" => {
            let samples = data
                .result
                .as_array()
                .ok_or_else(|| QueryError::Parse("vector result is not an array".to_owned()))?
                .iter()
                .map(parse_vector_sample)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(QueryValue::Vector(samples))
        }
        "scalar" => {
            let (timestamp, value) = parse_sample_pair(&data.result)?;
            Ok(QueryValue::Scalar(ScalarSample { timestamp, value }))
        }
        "matrix" => {
            let series = data
                .result
                .as_array()
                .ok_or_else(|| QueryError::Parse("matrix result is not an array".to_owned()))?
                .iter()
                .map(parse_matrix_series)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(QueryValue::Matrix(series))
        }
        other => Err(QueryError::Parse(format!("unknown result type '{other}'"))),
    }
}

fn parse_vector_sample(value: &serde_json::Value) -> Result<VectorSample, QueryError> {
    let labels = parse_labels(value.get("metric"));
    let (timestamp, sample) = parse_sample_pair(
        value
            .get("value")
            .ok_or_else(|| QueryError::Parse("vector sample missing value".to_owned()))?,
    )?;
    Ok(VectorSample {
        labels,
        timestamp,
        value: sample,
    })
}

fn parse_matrix_series(value: &serde_json::Value) -> Result<MatrixSeries, QueryError> {
    let labels = parse_labels(value.get("metric"));
    let samples = value
        .get("values")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| QueryError::Parse("matrix series missing values".to_owned()))?
        .iter()
        .map(parse_sample_pair)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MatrixSeries { labels, samples })
}

fn parse_labels(metric: Option<&serde_json::Value>) -> HashMap<String, String> {
    metric
        .and_then(serde_json::Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}

/// `[timestamp, "value"]` 쌍을 해석합니다. 값은 문자열로 인코딩되어 옵니다.
fn parse_sample_pair(value: &serde_json::Value) -> Result<(f64, f64), QueryError> {
    let pair = value
        .as_array()
        .filter(|arr| arr.len() == 2)
        .ok_or_else(|| QueryError::Parse("sample is not a [ts, value] pair".to_owned()))?;
    let timestamp = pair[0]
        .as_f64()
        .ok_or_else(|| QueryError::Parse("sample timestamp is not a number".to_owned()))?;
    let value = pair[1]
        .as_str()
        .ok_or_else(|| QueryError::Parse("sample value is not a string".to_owned()))?
        .parse::<f64>()
        .map_err(|e| QueryError::Parse(format!("sample value is not numeric: {e}")))?;
    Ok((timestamp, value))
}

//! Telegram 노티파이어 — 봇 API를 통한 알림 전달
//!
//! 전송은 디스패치 호출 안에서 최대 3회, `i·1초` 백오프로 재시도합니다.
//! 비활성화된 노티파이어는 조용히 성공을 반환합니다.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use flowguard_core::config::TelegramConfig;
use flowguard_core::error::NotifyError;
use flowguard_core::rule::{BoxFuture, Notifier};
use flowguard_core::types::Alert;

const MAX_RETRIES: u32 = 3;
const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// 봇 API 요청 본문
#[derive(Debug, Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    parse_mode: &'a str,
}

/// 봇 API 응답
#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    parse_mode: String,
    enabled: bool,
    client: reqwest::Client,
    api_base: String,
    retry_base: Duration,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            parse_mode: config.parse_mode.clone(),
            enabled: config.enabled,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: DEFAULT_API_BASE.to_owned(),
            retry_base: Duration::from_secs(1),
        }
    }

    /// 테스트용 — API 주소와 재시도 간격을 바꿉니다.
    pub fn with_api_base(mut self, api_base: &str, retry_base: Duration) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_owned();
        self.retry_base = retry_base;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 알림을 Telegram 메시지 본문으로 포맷합니다.
    fn format_alert(&self, alert: &Alert) -> String {
        let timestamp = alert.timestamp.format("%Y-%m-%d %H:%M:%S");
        let mut message = format!(
            "🚨 *{} Alert*\n\n*Type:* {}\n*Time:* {}\n*Message:* {}",
            alert.severity, alert.alert_type, timestamp, alert.message,
        );

        if let Some(flow) = &alert.flow_data {
            if let Some(source) = &flow.source {
                message.push_str(&format!(
                    "\n*Source:* {}/{}",
                    source.namespace, source.pod_name
                ));
            }
            if let Some(destination) = &flow.destination {
                message.push_str(&format!(
                    "\n*Destination:* {}/{}",
                    destination.namespace, destination.pod_name
                ));
            }
        }

        message
    }

    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: &self.parse_mode,
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        if !body.ok {
            return Err(NotifyError::Api(body.description.unwrap_or_default()));
        }

        tracing::debug!("alert sent to telegram");
        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    fn send_alert<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            if !self.enabled {
                tracing::debug!("telegram notifier is disabled, skipping alert");
                return Ok(());
            }

            let message = self.format_alert(alert);

            for attempt in 1..=MAX_RETRIES {
                match self.send_message(&message).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(
                            attempt,
                            max_retries = MAX_RETRIES,
                            error = %e,
                            "failed to send telegram alert"
                        );
                        if attempt < MAX_RETRIES {
                            tokio::time::sleep(self.retry_base * attempt).await;
                        }
                    }
                }
            }

            Err(NotifyError::Exhausted {
                attempts: MAX_RETRIES,
            })
        })
    }
}

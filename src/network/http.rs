//! HTTP transport
//!
//! Talks to the relay's JSON API. Frames are base64-armored in the body;
//! the sequence number rides in the envelope beside them.

use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::codec::{armor, unarmor};
use crate::config::TransportConfig;
use crate::error::NetworkError;
use crate::network::transport::Transport;
use crate::protocol::{AudioResponse, EncodedFrame, ResponseStatus, StreamChannel, UploadRequest};

/// Relay client over HTTP
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, NetworkError> {
        let base_url = Url::parse(&config.server_url)
            .map_err(|e| NetworkError::RequestFailed(format!("invalid server_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(NetworkError::RequestFailed(format!(
                "server_url cannot be a base: {}",
                config.server_url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/api/audio/{action}/{device_id}` with the id escaped
    fn endpoint(&self, action: &str, device_id: &str) -> Result<Url, NetworkError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| NetworkError::RequestFailed("server_url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["api", "audio", action, device_id]);
        Ok(url)
    }

    async fn read_response(response: reqwest::Response) -> Result<AudioResponse, NetworkError> {
        let status = response.status();
        if !status.is_success() {
            // The relay still explains itself in JSON for 4xx replies
            if let Ok(body) = response.json::<AudioResponse>().await {
                if let Some(message) = body.message {
                    return Err(NetworkError::Remote(message));
                }
            }
            return Err(NetworkError::Status(status.as_u16()));
        }

        let body: AudioResponse = response
            .json()
            .await
            .map_err(|e| NetworkError::InvalidPayload(e.to_string()))?;
        if body.status == ResponseStatus::Error {
            return Err(NetworkError::Remote(
                body.message.unwrap_or_else(|| "unspecified relay error".into()),
            ));
        }
        Ok(body)
    }
}

fn map_request_error(err: reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        NetworkError::Timeout
    } else {
        NetworkError::RequestFailed(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload(
        &self,
        device_id: &str,
        channel: StreamChannel,
        frame: EncodedFrame,
    ) -> Result<(), NetworkError> {
        let body = UploadRequest {
            audio_data: armor(&frame.bytes),
            audio_type: channel,
            sequence: frame.sequence,
            epoch: frame.epoch,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        };

        let response = self
            .client
            .post(self.endpoint("upload", device_id)?)
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        Self::read_response(response).await.map(|_| ())
    }

    async fn poll(
        &self,
        device_id: &str,
        channel: StreamChannel,
    ) -> Result<Option<EncodedFrame>, NetworkError> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let response = self
            .client
            .get(self.endpoint("download", device_id)?)
            .query(&[("audio_type", channel.as_str()), ("timestamp", timestamp.as_str())])
            .send()
            .await
            .map_err(map_request_error)?;

        let body = Self::read_response(response).await?;
        match body.audio_data.as_deref() {
            None | Some("") => Ok(None),
            Some(text) => {
                let bytes = unarmor(text)?;
                Ok(Some(EncodedFrame {
                    bytes: bytes.into(),
                    sequence: body.sequence,
                    epoch: body.epoch,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(url: &str) -> Result<HttpTransport, NetworkError> {
        HttpTransport::new(&TransportConfig {
            server_url: url.to_string(),
            request_timeout_ms: 40,
        })
    }

    #[test]
    fn test_endpoint_escapes_device_id() {
        let transport = transport("http://relay.local:5000").unwrap();
        let url = transport.endpoint("download", "dev 1/a").unwrap();
        assert_eq!(url.as_str(), "http://relay.local:5000/api/audio/download/dev%201%2Fa");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let transport = transport("http://relay.local/audio-relay/").unwrap();
        let url = transport.endpoint("upload", "abc").unwrap();
        assert_eq!(url.as_str(), "http://relay.local/audio-relay/api/audio/upload/abc");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(transport("not a url").is_err());
        assert!(transport("mailto:someone@example.com").is_err());
    }
}

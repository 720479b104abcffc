use reqwest::{RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::backend::{
    BoxFuture, BuildHttpClientSnafu, ChatBackend, ChatRequest, ChatStream, ClientConfig,
    ClientError, ClientResult, DecodeBodySnafu, RequestSnafu, SensorSource,
    SensorUnavailableSnafu,
};
use super::decode::decode_text_stream;
use super::types::{
    ConversationId, ConversationSummary, Coordinates, HistoryMessage, HistoryTurn, SoilReading,
    WeatherReport,
};

/// Response header carrying the id of a conversation the server just created.
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

const CHAT_STREAM_PATH: &str = "chat/stream";
const CHATS_PATH: &str = "chats";
const CHAT_DETAIL_PREFIX: &str = "chats/";
const WEATHER_PATH: &str = "weather/get-weather";
const SOIL_MOISTURE_PATH: &str = "sensors/soil-moisture";

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "is_empty_history")]
    history: &'a [HistoryMessage],
}

fn is_empty_history(history: &&[HistoryMessage]) -> bool {
    history.is_empty()
}

#[derive(Debug, Serialize)]
struct WeatherRequestBody {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    #[serde(default)]
    success: bool,
    temperature: Option<f64>,
    condition_text: Option<String>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SoilMoistureResponse {
    #[serde(default)]
    success: bool,
    moisture: Option<f64>,
    status: Option<String>,
}

/// reqwest-backed client for the advisory API.
///
/// One instance serves the chat endpoints and the sensor lookups so that every
/// call carries the same credential.
#[derive(Debug, Clone)]
pub struct AdvisoryHttpClient {
    config: ClientConfig,
    base_url: Url,
    http: reqwest::Client,
}

impl AdvisoryHttpClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|error| ClientError::InvalidUrl {
            stage: "parse-base-url",
            url: config.base_url.clone(),
            details: error.to_string(),
        })?;

        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl {
                stage: "validate-base-url",
                url: config.base_url.clone(),
                details: "url cannot carry endpoint paths".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .build()
            .context(BuildHttpClientSnafu {
                stage: "build-client",
            })?;

        Ok(Self {
            config,
            base_url,
            http,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|error| ClientError::InvalidUrl {
                stage: "join-endpoint",
                url: format!("{}{}", self.base_url, path),
                details: error.to_string(),
            })
    }

    fn conversation_endpoint(&self, conversation_id: &ConversationId) -> ClientResult<Url> {
        let mut url = self.endpoint(CHAT_DETAIL_PREFIX)?;
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl {
                stage: "push-conversation-segment",
                url: self.base_url.to_string(),
                details: "url cannot carry endpoint paths".to_string(),
            })?
            .pop_if_empty()
            .push(conversation_id.as_str());
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn ensure_success(
        stage: &'static str,
        endpoint: &Url,
        response: Response,
    ) -> ClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            endpoint = %endpoint,
            status = status.as_u16(),
            "backend rejected request"
        );
        Err(ClientError::UnexpectedStatus {
            stage,
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// A header that is not visible ASCII is ignored: the conversation already
    /// exists server side, so the answer is still worth reading.
    fn conversation_id_header(response: &Response) -> Option<ConversationId> {
        let value = response.headers().get(CONVERSATION_ID_HEADER)?;
        let Ok(raw) = value.to_str() else {
            tracing::warn!(
                header = CONVERSATION_ID_HEADER,
                raw = ?value.as_bytes(),
                "ignoring unreadable conversation id header"
            );
            return None;
        };

        let id = ConversationId::new(raw);
        if id.as_str().is_empty() {
            return None;
        }
        Some(id)
    }

    async fn get_json<T>(&self, stage: &'static str, endpoint: Url) -> ClientResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .authorized(self.http.get(endpoint.clone()))
            .send()
            .await
            .context(RequestSnafu { stage })?;
        let response = Self::ensure_success(stage, &endpoint, response).await?;

        response.json::<T>().await.context(DecodeBodySnafu {
            stage,
            endpoint: endpoint.to_string(),
        })
    }
}

impl ChatBackend for AdvisoryHttpClient {
    fn open_chat<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, ClientResult<ChatStream>> {
        Box::pin(async move {
            let endpoint = self.endpoint(CHAT_STREAM_PATH)?;
            let body = ChatRequestBody {
                question: &request.question,
                history: &request.history,
            };

            let mut builder = self.http.post(endpoint.clone()).json(&body);
            if let Some(conversation_id) = &request.conversation_id {
                builder = builder.query(&[("conversation_id", conversation_id.as_str())]);
            }

            tracing::debug!(
                conversation_id = ?request.conversation_id,
                history_len = request.history.len(),
                "opening chat stream"
            );

            let response = self
                .authorized(builder)
                .send()
                .await
                .context(RequestSnafu {
                    stage: "send-chat-request",
                })?;
            let response = Self::ensure_success("chat-http-status", &endpoint, response).await?;

            // Headers first: the body may take arbitrarily long to arrive.
            let conversation_id = Self::conversation_id_header(&response);
            let deltas = decode_text_stream(response.bytes_stream());

            Ok(ChatStream {
                conversation_id,
                deltas,
            })
        })
    }

    fn load_history<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ClientResult<Vec<HistoryTurn>>> {
        Box::pin(async move {
            let endpoint = self.conversation_endpoint(conversation_id)?;
            self.get_json("load-history", endpoint).await
        })
    }

    fn list_conversations<'a>(&'a self) -> BoxFuture<'a, ClientResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            let endpoint = self.endpoint(CHATS_PATH)?;
            self.get_json("list-conversations", endpoint).await
        })
    }
}

impl SensorSource for AdvisoryHttpClient {
    fn fetch_weather<'a>(
        &'a self,
        coordinates: Coordinates,
    ) -> BoxFuture<'a, ClientResult<WeatherReport>> {
        Box::pin(async move {
            let endpoint = self.endpoint(WEATHER_PATH)?;
            let body = WeatherRequestBody {
                latitude: coordinates.latitude,
                longitude: coordinates.longitude,
            };

            let response = self
                .authorized(self.http.post(endpoint.clone()).json(&body))
                .send()
                .await
                .context(RequestSnafu {
                    stage: "send-weather-request",
                })?;
            let response = Self::ensure_success("weather-http-status", &endpoint, response).await?;
            let payload = response
                .json::<WeatherResponse>()
                .await
                .context(DecodeBodySnafu {
                    stage: "decode-weather",
                    endpoint: endpoint.to_string(),
                })?;

            let unavailable = SensorUnavailableSnafu {
                stage: "weather-payload",
                sensor: "weather",
            };
            if !payload.success {
                return unavailable.fail();
            }
            let (Some(temperature_celsius), Some(condition)) =
                (payload.temperature, payload.condition_text)
            else {
                return unavailable.fail();
            };

            Ok(WeatherReport {
                temperature_celsius,
                condition: condition.trim().to_string(),
                humidity_percent: payload.humidity,
            })
        })
    }

    fn fetch_soil_moisture<'a>(&'a self) -> BoxFuture<'a, ClientResult<SoilReading>> {
        Box::pin(async move {
            let endpoint = self.endpoint(SOIL_MOISTURE_PATH)?;
            let payload: SoilMoistureResponse = self.get_json("soil-moisture", endpoint).await?;

            let unavailable = SensorUnavailableSnafu {
                stage: "soil-moisture-payload",
                sensor: "soil moisture",
            };
            if !payload.success {
                return unavailable.fail();
            }
            let Some(moisture_percent) = payload.moisture else {
                return unavailable.fail();
            };

            Ok(SoilReading {
                moisture_percent,
                status: payload
                    .status
                    .map(|status| status.trim().to_string())
                    .filter(|status| !status.is_empty()),
            })
        })
    }
}

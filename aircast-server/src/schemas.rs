use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    Json,
};

use serde::{de::DeserializeOwned, Deserialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenCreateSchema {
    #[validate(range(min = 1, max = 86400))]
    pub duration_seconds: u64,
    #[validate(range(min = 1))]
    pub max_queue_songs: u32,
    #[validate(range(min = 1))]
    pub max_add_requests: u32,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LivestreamTokenSchema {
    #[validate(range(min = 60, max = 28800))]
    pub max_streaming_seconds: u64,
    #[validate(length(min = 1, max = 128))]
    pub show_name: Option<String>,
    #[validate(range(max = 3600))]
    pub min_recording_duration: Option<u64>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookSubscribeSchema {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    #[validate(length(min = 1))]
    pub events: Vec<String>,
    #[validate(length(min = 16, max = 256))]
    pub signing_key: String,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataSchema {
    #[validate(length(max = 256))]
    pub title: Option<String>,
    #[validate(length(max = 256))]
    pub artist: Option<String>,
    #[validate(length(max = 128))]
    pub genre: Option<String>,
    #[validate(length(max = 2048))]
    pub description: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LivestreamAuthSchema {
    pub user: String,
    pub password: String,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LivestreamConnectSchema {
    pub session_id: String,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LivestreamDisconnectSchema {
    pub session_id: String,
    /// One of `client`, `limit`, `admin`
    pub reason: Option<String>,
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "JSON parse failed"))?;

        extracted_json
            .0
            .validate()
            .map_err(|_| (StatusCode::BAD_REQUEST, "Request body is invalid"))?;

        Ok(Self(extracted_json.0))
    }
}

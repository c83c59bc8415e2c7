use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::{BookingApi, CreateBookingOutcome, RetryPolicy, SlotCandidate, UserInfo};
use crate::errors::BotError;

/// HTTP client for the Altegio partner API.
///
/// Authentication uses a partner token plus a user token in the
/// `Authorization` header; all endpoints are versioned under the configured
/// base URL and answer with a `{ success, data, meta }` envelope.
pub struct AltegioClient {
    http: reqwest::Client,
    base_url: String,
    company_id: i64,
    partner_token: String,
    user_token: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookTime {
    datetime: DateTime<Utc>,
    seance_length: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: serde_json::Value,
}

impl AltegioClient {
    pub fn new(
        base_url: String,
        company_id: i64,
        partner_token: String,
        user_token: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            company_id,
            partner_token,
            user_token,
            retry,
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}, User {}", self.partner_token, self.user_token)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/vnd.api.v2+json")
    }

    async fn read_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, BotError> {
        response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| BotError::InvalidRequest(format!("malformed response body: {e}")))
    }

    fn map_send_error(e: reqwest::Error) -> BotError {
        // The request may or may not have reached the platform.
        BotError::RemoteUnavailable(e.to_string())
    }
}

#[async_trait::async_trait]
impl BookingApi for AltegioClient {
    async fn list_availability(
        &self,
        staff_id: i64,
        service_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<SlotCandidate>, BotError> {
        let path = format!(
            "book_times/{}/{}/{}",
            self.company_id,
            staff_id,
            date.format("%Y-%m-%d")
        );

        self.retry
            .run("list_availability", || async {
                let response = self
                    .request(reqwest::Method::GET, &path)
                    .query(&[("service_ids[]", service_id)])
                    .send()
                    .await
                    .map_err(Self::map_send_error)?;

                let status = response.status();
                if status.is_server_error() {
                    return Err(BotError::RemoteUnavailable(format!(
                        "availability lookup returned {status}"
                    )));
                }
                if status.is_client_error() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(BotError::InvalidRequest(format!(
                        "availability lookup rejected ({status}): {body}"
                    )));
                }

                let envelope: Envelope<Vec<BookTime>> = Self::read_envelope(response).await?;
                let slots = envelope
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|bt| SlotCandidate {
                        staff_id,
                        service_id,
                        starts_at: bt.datetime,
                        duration_min: bt.seance_length.map(|s| s / 60).unwrap_or(0),
                        price: None,
                    })
                    .collect();
                Ok(slots)
            })
            .await
    }

    async fn create_booking(
        &self,
        attempt_token: &str,
        slot: &SlotCandidate,
        user: &UserInfo,
    ) -> Result<CreateBookingOutcome, BotError> {
        let path = format!("book_record/{}", self.company_id);
        let body = serde_json::json!({
            "phone": user.phone,
            "fullname": user.fullname.clone().unwrap_or_default(),
            "appointments": [{
                "id": 1,
                "services": [slot.service_id],
                "staff_id": slot.staff_id,
                "datetime": slot.starts_at.to_rfc3339(),
            }],
        });

        // Internal retries are safe here: the attempt token rides along as an
        // idempotency key, so a replayed request maps to the same booking.
        self.retry
            .run("create_booking", || async {
                let response = self
                    .request(reqwest::Method::POST, &path)
                    .header("Idempotency-Key", attempt_token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(Self::map_send_error)?;

                let status = response.status();
                if status.is_server_error() {
                    return Err(BotError::RemoteUnavailable(format!(
                        "create booking returned {status}"
                    )));
                }

                if status == reqwest::StatusCode::CONFLICT {
                    // Platform saw this idempotency key before. When it hands
                    // back the existing record, the commit already happened.
                    let envelope: Envelope<CreatedRecord> =
                        Self::read_envelope(response).await?;
                    if let Some(record) = envelope.data {
                        return Ok(CreateBookingOutcome::Created(
                            record.id.to_string().trim_matches('"').to_string(),
                        ));
                    }
                    return Ok(CreateBookingOutcome::Rejected(
                        "duplicate booking attempt".to_string(),
                    ));
                }

                if status.is_client_error() {
                    let envelope: Envelope<CreatedRecord> =
                        Self::read_envelope(response).await?;
                    let reason = envelope
                        .meta
                        .and_then(|m| m.message)
                        .unwrap_or_else(|| format!("booking rejected ({status})"));
                    return Ok(CreateBookingOutcome::Rejected(reason));
                }

                let envelope: Envelope<CreatedRecord> = Self::read_envelope(response).await?;
                if !envelope.success {
                    let reason = envelope
                        .meta
                        .and_then(|m| m.message)
                        .unwrap_or_else(|| "booking rejected".to_string());
                    return Ok(CreateBookingOutcome::Rejected(reason));
                }

                let record = envelope.data.ok_or_else(|| {
                    BotError::InvalidRequest("create booking returned no record".to_string())
                })?;
                Ok(CreateBookingOutcome::Created(
                    record.id.to_string().trim_matches('"').to_string(),
                ))
            })
            .await
    }

    async fn cancel_booking(&self, remote_booking_id: &str) -> Result<(), BotError> {
        let path = format!("record/{}/{}", self.company_id, remote_booking_id);

        // No idempotency key: retry only when the request provably never
        // reached the platform.
        let mut attempt = 0u32;
        loop {
            let result = self
                .request(reqwest::Method::DELETE, &path)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        return Err(BotError::RemoteUnavailable(format!(
                            "cancel booking returned {status}"
                        )));
                    }
                    if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(BotError::InvalidRequest(format!(
                            "cancel rejected ({status}): {body}"
                        )));
                    }
                    return Ok(());
                }
                Err(e) if e.is_connect() && attempt + 1 < self.retry.max_attempts.max(1) => {
                    attempt += 1;
                    tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
                }
                Err(e) => return Err(Self::map_send_error(e)),
            }
        }
    }
}

use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use super::{
    AttendanceRecord, AttendanceService, BulkCreate, BulkResult, ClassAttendance, CreateRecord,
    RecordPatch, RosterQuery,
};
use crate::error::ServiceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for the school backend's attendance endpoints.
pub struct RemoteService {
    base_url: Url,
    token: Option<String>,
    client: Client,
}

impl RemoteService {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid base url: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("base url cannot carry a path: {}", base_url);
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::Transport("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ServiceError> {
        let builder = match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        let resp = builder.send()?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            if status == StatusCode::NOT_FOUND {
                return Err(ServiceError::NotFound(message));
            }
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let body = resp.bytes()?;
        serde_json::from_slice(&body).map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}

impl AttendanceService for RemoteService {
    fn kind(&self) -> &'static str {
        "remote"
    }

    fn class_attendance(&self, query: &RosterQuery) -> Result<ClassAttendance, ServiceError> {
        let url = self.endpoint(&["classes", &query.class_id, "attendance"])?;
        tracing::debug!(%url, date = %query.date, "fetching class attendance");
        self.send(self.client.get(url).query(&[
            ("date", query.date.as_str()),
            ("sessionYearId", query.session_year_id.as_str()),
        ]))
    }

    fn create_record(&self, req: &CreateRecord) -> Result<AttendanceRecord, ServiceError> {
        let url = self.endpoint(&["attendance"])?;
        self.send(self.client.post(url).json(req))
    }

    fn update_record(
        &self,
        record_id: &str,
        patch: &RecordPatch,
    ) -> Result<AttendanceRecord, ServiceError> {
        let url = self.endpoint(&["attendance", record_id])?;
        self.send(self.client.patch(url).json(patch))
    }

    fn bulk_create(&self, req: &BulkCreate) -> Result<BulkResult, ServiceError> {
        let url = self.endpoint(&["attendance", "bulk"])?;
        self.send(self.client.post(url).json(req))
    }
}

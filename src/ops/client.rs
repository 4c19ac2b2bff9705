//! HTTP client for a running coordinator, used by the CLI

use anyhow::{bail, Context};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::coordinator::http::ACTOR_HEADER;
use crate::coordinator::records::{Allocation, Application, Room};
use crate::coordinator::reports::HostelOccupancy;
use crate::coordinator::review::NewApplication;
use crate::coordinator::rooms::NewRoom;

pub struct ApiClient {
    base: String,
    actor: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            actor: actor.into(),
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> anyhow::Result<T> {
        let resp = req
            .header(ACTOR_HEADER, &self.actor)
            .send()
            .await
            .with_context(|| format!("cannot reach coordinator at {}", self.base))?;
        decode(resp).await
    }

    pub async fn create_room(&self, room: &NewRoom) -> anyhow::Result<Room> {
        self.send(self.http.post(self.url("/api/rooms")).json(room))
            .await
    }

    pub async fn list_rooms(
        &self,
        hostel_id: Option<&str>,
        available_only: bool,
    ) -> anyhow::Result<Vec<Room>> {
        let mut query = vec![("available_only", available_only.to_string())];
        if let Some(h) = hostel_id {
            query.push(("hostel_id", h.to_string()));
        }
        self.send(self.http.get(self.url("/api/rooms")).query(&query))
            .await
    }

    pub async fn submit_application(&self, new: &NewApplication) -> anyhow::Result<Application> {
        self.send(self.http.post(self.url("/api/applications")).json(new))
            .await
    }

    pub async fn list_applications(&self, status: Option<&str>) -> anyhow::Result<Vec<Application>> {
        let mut req = self.http.get(self.url("/api/applications"));
        if let Some(s) = status {
            req = req.query(&[("status", s)]);
        }
        self.send(req).await
    }

    pub async fn approve_application(&self, id: &str) -> anyhow::Result<Application> {
        self.send(
            self.http
                .patch(self.url(&format!("/api/applications/{}/approve", id))),
        )
        .await
    }

    pub async fn reject_application(&self, id: &str, reason: &str) -> anyhow::Result<Application> {
        self.send(
            self.http
                .patch(self.url(&format!("/api/applications/{}/reject", id)))
                .json(&json!({ "reason": reason })),
        )
        .await
    }

    pub async fn allocate(
        &self,
        application_id: &str,
        room_id: &str,
        bed_label: Option<&str>,
    ) -> anyhow::Result<Allocation> {
        let body = json!({
            "application_id": application_id,
            "room_id": room_id,
            "bed_label": bed_label,
        });
        self.send(self.http.post(self.url("/api/allocations")).json(&body))
            .await
    }

    pub async fn cancel(&self, allocation_id: &str) -> anyhow::Result<Allocation> {
        self.send(
            self.http
                .delete(self.url(&format!("/api/allocations/{}", allocation_id))),
        )
        .await
    }

    pub async fn list_allocations(&self, query: &[(&str, String)]) -> anyhow::Result<Vec<Allocation>> {
        self.send(self.http.get(self.url("/api/allocations")).query(query))
            .await
    }

    pub async fn occupancy(&self, hostel_id: &str) -> anyhow::Result<HostelOccupancy> {
        self.send(
            self.http
                .get(self.url(&format!("/api/hostels/{}/occupancy", hostel_id))),
        )
        .await
    }

    pub async fn verify(&self) -> anyhow::Result<Value> {
        self.send(self.http.get(self.url("/admin/verify"))).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> anyhow::Result<T> {
    let status = resp.status();
    let body: Value = resp.json().await.context("malformed response body")?;
    if !status.is_success() {
        let kind = body["kind"].as_str().unwrap_or("unknown");
        let message = body["error"].as_str().unwrap_or("no message");
        bail!("{} ({}): {}", status, kind, message);
    }
    Ok(serde_json::from_value(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalised() {
        let client = ApiClient::new("http://localhost:5000/", "warden");
        assert_eq!(client.url("/api/rooms"), "http://localhost:5000/api/rooms");
    }
}

//! PostgREST/GoTrue-style HTTP implementation of [`Backend`].

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::{Backend, DaySlotsRequest, RangeSlotsRequest, RawDaySlot, RawRangeSlot, SignUp};
use crate::models::{
    Appointment, AppointmentStatus, AppointmentWrite, AuthSession, Client, ClientBono,
    DuoBookingOutcome, DuoBookingRequest, Professional, Promotion, Service, WorkdayBounds,
};

const APPOINTMENT_COLUMNS: &str =
    "id,client_id,service_id,professional_id,start_time,end_time,status,booking_group_id";

const BONO_EMBED: &str =
    "*,bono_definitions(*,bono_definition_services(service_id,services(*)))";

pub struct RestBackend {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: String) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_key,
        })
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn authed(&self, req: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(bearer.unwrap_or(self.api_key.as_str()))
    }

    /// Fail on non-2xx, logging the body for diagnosis.
    async fn checked(resp: Response, what: &str) -> anyhow::Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        tracing::error!("backend {} failed: {} - {}", what, status, text);
        anyhow::bail!("backend {} error: {}", what, status);
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<Vec<T>> {
        let url = self.url(&format!("rest/v1/{table}"))?;
        let resp = self
            .authed(self.http.get(url), None)
            .query(query)
            .send()
            .await?;
        Ok(Self::checked(resp, table).await?.json().await?)
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        self.select(table, query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("{} row not found", table))
    }

    async fn rpc<T: DeserializeOwned>(&self, function: &str, params: Value) -> anyhow::Result<T> {
        let url = self.url(&format!("rest/v1/rpc/{function}"))?;
        let resp = self
            .authed(self.http.post(url), None)
            .json(&params)
            .send()
            .await?;
        Ok(Self::checked(resp, function).await?.json().await?)
    }

    async fn insert<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let url = self.url(&format!("rest/v1/{table}"))?;
        let resp = self
            .authed(self.http.post(url), None)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        let rows: Vec<T> = Self::checked(resp, table).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("{} insert returned no row", table))
    }

    async fn update<B: Serialize>(&self, table: &str, id: &str, body: &B) -> anyhow::Result<()> {
        let url = self.url(&format!("rest/v1/{table}"))?;
        let resp = self
            .authed(self.http.patch(url), None)
            .query(&[("id", format!("eq.{id}"))])
            .json(body)
            .send()
            .await?;
        Self::checked(resp, table).await?;
        Ok(())
    }

    async fn client_for_user(&self, user_id: &str) -> anyhow::Result<Client> {
        self.select_one(
            "clients",
            &[
                ("select", "*".into()),
                ("user_id", format!("eq.{user_id}")),
            ],
        )
        .await
    }
}

// ── Wire rows ──

#[derive(Deserialize)]
struct BoundsRow {
    earliest_start_time: Option<String>,
    latest_end_time: Option<String>,
    /// Only the per-professional procedure reports this.
    is_working: Option<bool>,
}

impl From<BoundsRow> for WorkdayBounds {
    fn from(row: BoundsRow) -> Self {
        let is_working = row
            .is_working
            .unwrap_or(row.earliest_start_time.is_some());
        Self {
            start_time: row.earliest_start_time,
            end_time: row.latest_end_time,
            is_working,
        }
    }
}

#[derive(Deserialize)]
struct SkillRow {
    professional_id: String,
}

#[derive(Deserialize)]
struct DuoSlotRow {
    slot_start: DateTime<FixedOffset>,
}

#[derive(Deserialize)]
struct ActiveBonoRow {
    client_bono_id: String,
    remaining_sessions: i64,
    #[serde(default)]
    total_sessions: Option<i64>,
    purchase_date: Option<String>,
    bono_name: String,
    bono_type: Option<String>,
    #[serde(default)]
    services: Vec<Service>,
}

#[derive(Deserialize)]
struct BonoRow {
    id: String,
    remaining_sessions: i64,
    #[serde(default)]
    total_sessions: Option<i64>,
    purchase_date: Option<String>,
    bono_definitions: BonoDefinitionRow,
}

#[derive(Deserialize)]
struct BonoDefinitionRow {
    name: String,
    #[serde(rename = "type")]
    bono_type: Option<String>,
    #[serde(default)]
    bono_definition_services: Vec<BonoServiceRow>,
}

#[derive(Deserialize)]
struct BonoServiceRow {
    services: Service,
}

impl From<BonoRow> for ClientBono {
    fn from(row: BonoRow) -> Self {
        Self {
            id: row.id,
            name: row.bono_definitions.name,
            bono_type: row.bono_definitions.bono_type,
            remaining_sessions: row.remaining_sessions,
            total_sessions: row.total_sessions,
            purchase_date: row.purchase_date,
            services: row
                .bono_definitions
                .bono_definition_services
                .into_iter()
                .map(|s| s.services)
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    user: Option<UserRow>,
}

#[derive(Deserialize)]
struct UserRow {
    id: String,
}

/// Procedures answer either a row set or a bare object.
/// One procedure serves both shapes: a lone service goes as `p_service_id`,
/// a set as `p_service_ids`.
fn range_params(req: &RangeSlotsRequest) -> Value {
    let mut params = json!({
        "p_professional_id": req.professional_id,
        "p_start_date": req.start_date,
        "p_end_date": req.end_date,
        "p_ignore_appointment_ids": req.ignore_appointment_ids,
    });
    match req.service_ids.as_slice() {
        [single] => params["p_service_id"] = json!(single),
        many => params["p_service_ids"] = json!(many),
    }
    params
}

fn first_row<T: DeserializeOwned>(value: Value) -> anyhow::Result<T> {
    let row = match value {
        Value::Array(rows) => rows
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("procedure returned no rows"))?,
        other => other,
    };
    Ok(serde_json::from_value(row)?)
}

#[async_trait]
impl Backend for RestBackend {
    async fn health_check(&self) -> anyhow::Result<()> {
        let url = self.url("rest/v1/")?;
        let resp = self.authed(self.http.get(url), None).send().await?;
        Self::checked(resp, "health").await?;
        Ok(())
    }

    async fn services(&self) -> anyhow::Result<Vec<Service>> {
        self.select("v_services", &[("select", "*".into()), ("order", "id.asc".into())])
            .await
    }

    async fn service(&self, id: i64) -> anyhow::Result<Service> {
        self.select_one(
            "v_services",
            &[("select", "*".into()), ("id", format!("eq.{id}"))],
        )
        .await
    }

    async fn professionals(&self) -> anyhow::Result<Vec<Professional>> {
        self.select("professionals", &[("select", "*".into())]).await
    }

    async fn professional(&self, id: &str) -> anyhow::Result<Professional> {
        self.select_one(
            "professionals",
            &[("select", "*".into()), ("id", format!("eq.{id}"))],
        )
        .await
    }

    async fn qualified_professionals(&self, service_id: i64) -> anyhow::Result<Vec<String>> {
        let rows: Vec<SkillRow> = self
            .select(
                "professional_skills",
                &[
                    ("select", "professional_id".into()),
                    ("service_id", format!("eq.{service_id}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.professional_id).collect())
    }

    async fn professional_workday_bounds(
        &self,
        professional_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<WorkdayBounds>> {
        let rows: Vec<BoundsRow> = self
            .rpc(
                "get_professional_workday_bounds",
                json!({ "p_professional_id": professional_id, "p_date": date }),
            )
            .await?;
        Ok(rows.into_iter().next().map(WorkdayBounds::from))
    }

    async fn service_workday_bounds(
        &self,
        service_id: i64,
        date: NaiveDate,
    ) -> anyhow::Result<Option<WorkdayBounds>> {
        let rows: Vec<BoundsRow> = self
            .rpc(
                "get_service_workday_bounds",
                json!({ "p_service_id": service_id, "p_date": date }),
            )
            .await?;
        Ok(rows.into_iter().next().map(WorkdayBounds::from))
    }

    async fn available_slots(&self, req: &DaySlotsRequest) -> anyhow::Result<Vec<RawDaySlot>> {
        match req.service_ids.as_slice() {
            [single] => {
                self.rpc(
                    "get_available_slots",
                    json!({
                        "p_service_id": single,
                        "p_professional_id": req.professional_id,
                        "p_date": req.date,
                        "p_ignore_appointment_ids": req.ignore_appointment_ids,
                    }),
                )
                .await
            }
            many => {
                self.rpc(
                    "get_available_slots_for_multiple_services",
                    json!({
                        "p_service_ids": many,
                        "p_professional_id": req.professional_id,
                        "p_date": req.date,
                        "p_ignore_appointment_ids": req.ignore_appointment_ids,
                    }),
                )
                .await
            }
        }
    }

    async fn available_slots_for_range(
        &self,
        req: &RangeSlotsRequest,
    ) -> anyhow::Result<Vec<RawRangeSlot>> {
        self.rpc("get_available_slots_for_range", range_params(req)).await
    }

    async fn duo_slots(
        &self,
        service_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<DateTime<FixedOffset>>> {
        let rows: Vec<DuoSlotRow> = self
            .rpc(
                "get_available_slots_for_duo_service",
                json!({ "p_service_id": service_id, "p_start_date": start, "p_end_date": end }),
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.slot_start).collect())
    }

    async fn create_appointment(&self, write: &AppointmentWrite) -> anyhow::Result<Appointment> {
        let created: Appointment = self.insert("appointments", write).await?;
        tracing::info!(
            "appointment {} created for client {}",
            created.id,
            write.client_id
        );
        Ok(created)
    }

    async fn update_appointment(&self, id: &str, write: &AppointmentWrite) -> anyhow::Result<()> {
        self.update("appointments", id, write).await?;
        tracing::info!("appointment {} updated", id);
        Ok(())
    }

    async fn cancel_appointment(&self, id: &str) -> anyhow::Result<()> {
        self.update(
            "appointments",
            id,
            &json!({ "status": AppointmentStatus::Cancelled }),
        )
        .await?;
        tracing::info!("appointment {} cancelled", id);
        Ok(())
    }

    async fn appointment(&self, id: &str) -> anyhow::Result<Appointment> {
        self.select_one(
            "appointments",
            &[
                ("select", APPOINTMENT_COLUMNS.into()),
                ("id", format!("eq.{id}")),
            ],
        )
        .await
    }

    async fn client_appointments(&self, client_id: &str) -> anyhow::Result<Vec<Appointment>> {
        self.select(
            "appointments",
            &[
                ("select", APPOINTMENT_COLUMNS.into()),
                ("client_id", format!("eq.{client_id}")),
            ],
        )
        .await
    }

    async fn group_appointments(&self, group_id: &str) -> anyhow::Result<Vec<Appointment>> {
        self.select(
            "appointments",
            &[
                ("select", APPOINTMENT_COLUMNS.into()),
                ("booking_group_id", format!("eq.{group_id}")),
                ("status", "neq.cancelada".into()),
                ("order", "start_time.asc".into()),
            ],
        )
        .await
    }

    async fn create_duo_appointment_with_promo(
        &self,
        req: &DuoBookingRequest,
    ) -> anyhow::Result<DuoBookingOutcome> {
        let value: Value = self
            .rpc(
                "create_duo_appointment_with_promo",
                json!({
                    "p_client_id": req.client_id,
                    "p_service_id": req.service_id,
                    "p_start_time": req.start_time,
                    "p_promotion_id": req.promotion_id,
                    "p_final_price": req.final_price,
                }),
            )
            .await?;
        first_row(value)
    }

    async fn client_active_bonos(&self, client_id: &str) -> anyhow::Result<Vec<ClientBono>> {
        let rows: Vec<ActiveBonoRow> = self
            .rpc("get_client_active_bonos", json!({ "p_client_id": client_id }))
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| ClientBono {
                id: r.client_bono_id,
                name: r.bono_name,
                bono_type: r.bono_type,
                remaining_sessions: r.remaining_sessions,
                total_sessions: r.total_sessions,
                purchase_date: r.purchase_date,
                services: r.services,
            })
            .collect())
    }

    async fn client_bonos(&self, client_id: &str, active: bool) -> anyhow::Result<Vec<ClientBono>> {
        let remaining = if active { "gt.0" } else { "lte.0" };
        let rows: Vec<BonoRow> = self
            .select(
                "client_bonos",
                &[
                    ("select", BONO_EMBED.into()),
                    ("client_id", format!("eq.{client_id}")),
                    ("remaining_sessions", remaining.into()),
                    ("order", "purchase_date.desc".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(ClientBono::from).collect())
    }

    async fn active_promotions(&self) -> anyhow::Result<Vec<Promotion>> {
        self.select(
            "promotions",
            &[("select", "*".into()), ("is_active", "eq.true".into())],
        )
        .await
    }

    async fn sign_in(&self, email: &str, password: &str) -> anyhow::Result<AuthSession> {
        let url = self.url("auth/v1/token")?;
        let resp = self
            .authed(self.http.post(url), None)
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let token: TokenResponse = Self::checked(resp, "sign_in").await?.json().await?;
        let (access_token, user) = match (token.access_token, token.user) {
            (Some(t), Some(u)) => (t, u),
            _ => anyhow::bail!("sign_in returned no session"),
        };
        let client = self.client_for_user(&user.id).await?;
        Ok(AuthSession {
            access_token,
            client,
        })
    }

    async fn sign_up(&self, form: &SignUp) -> anyhow::Result<AuthSession> {
        let url = self.url("auth/v1/signup")?;
        let resp = self
            .authed(self.http.post(url), None)
            .json(&json!({
                "email": form.email,
                "password": form.password,
                "data": { "full_name": form.full_name },
            }))
            .send()
            .await?;
        let token: TokenResponse = Self::checked(resp, "sign_up").await?.json().await?;
        let (access_token, user) = match (token.access_token, token.user) {
            (Some(t), Some(u)) => (t, u),
            _ => anyhow::bail!("sign_up needs email confirmation before a session exists"),
        };
        let client: Client = self
            .insert(
                "clients",
                &json!({
                    "user_id": user.id,
                    "full_name": form.full_name,
                    "email": form.email,
                    "phone": form.phone,
                }),
            )
            .await?;
        tracing::info!("client {} registered", client.id);
        Ok(AuthSession {
            access_token,
            client,
        })
    }

    async fn sign_out(&self, access_token: &str) -> anyhow::Result<()> {
        let url = self.url("auth/v1/logout")?;
        let resp = self
            .authed(self.http.post(url), Some(access_token))
            .send()
            .await?;
        Self::checked(resp, "sign_out").await?;
        Ok(())
    }
}

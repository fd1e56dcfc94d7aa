use chrono::{Duration as ChronoDuration, Utc};
use dentaflow_api::config::ApiConfig;
use dentaflow_auth::{JwtClaims, PrincipalId, Role};
use dentaflow_core::{AggregateId, ClinicId};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    booking_clinic: ClinicId,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let booking_clinic = ClinicId::new();
        let config = ApiConfig::new(JWT_SECRET).with_booking_clinic(booking_clinic);
        let app = dentaflow_api::app::build_app(config).expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            booking_clinic,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(clinic_id: ClinicId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        clinic_id,
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn register_patient(srv: &TestServer, token: &str, phone: &str) -> String {
    let (status, body) = srv
        .post(
            token,
            "/patients",
            json!({
                "first_name": "Asha",
                "last_name": "Rao",
                "phone": phone,
                "date_of_birth": "1990-04-12",
                "gender": "female",
                "allergies": ["penicillin"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

async fn schedule(srv: &TestServer, token: &str, patient_id: &str) -> String {
    let at = (Utc::now() + ChronoDuration::hours(2)).to_rfc3339();
    let (status, body) = srv
        .post(
            token,
            "/appointments",
            json!({ "patient_id": patient_id, "scheduled_at": at, "appointment_type": "Root Canal" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(srv.url("/patients"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn clinic_context_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let clinic_id = ClinicId::new();
    let token = mint_jwt(clinic_id, vec![Role::DOCTOR]);

    let (status, body) = srv.get(&token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clinic_id"].as_str().unwrap(), clinic_id.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "doctor"));
}

#[tokio::test]
async fn visit_is_charted_invoiced_and_paid() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(ClinicId::new(), vec![Role::ADMIN]);

    let (status, body) = srv
        .post(
            &token,
            "/treatments",
            json!({ "code": "RCT", "name": "Root Canal", "standard_cost": 450000, "category": "endodontic" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let treatment_id = body["id"].as_str().unwrap().to_string();

    let patient_id = register_patient(&srv, &token, "+91 98123 45678").await;
    let appointment_id = schedule(&srv, &token, &patient_id).await;

    let (status, body) = srv
        .post(
            &token,
            "/clinical-records",
            json!({
                "appointment_id": appointment_id,
                "procedure_id": treatment_id,
                "tooth_number": "36",
                "diagnosis": "Irreversible pulpitis",
                "cost_override": 400000,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = srv
        .get(&token, &format!("/clinical-records?appointment_id={appointment_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let records = body["items"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["procedure_name"], "Root Canal");
    assert_eq!(records[0]["effective_cost"], 400000);
    assert_eq!(records[0]["cost_overrides"].as_array().unwrap().len(), 1);

    let (status, body) = srv
        .post(&token, &format!("/appointments/{appointment_id}/status"), json!({ "status": "completed" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Completion marks the visit on the patient.
    let (status, body) = srv.get(&token, &format!("/patients/{patient_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["last_visit_at"].is_string(), "{body}");
    assert_eq!(body["full_name"], "Asha Rao");

    let (status, body) = srv
        .post(&token, "/invoices/from-appointment", json!({ "appointment_id": appointment_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let invoice_id = body["id"].as_str().unwrap().to_string();
    assert!(body["invoice_number"].as_str().unwrap().starts_with("INV-"));

    let (status, invoice) = srv.get(&token, &format!("/invoices/{invoice_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(invoice["status"], "PENDING");
    assert_eq!(invoice["total"], 400000);
    assert_eq!(invoice["items"][0]["description"], "Root Canal (Tooth 36)");

    let (status, body) = srv
        .post(
            &token,
            &format!("/invoices/{invoice_id}/payments"),
            json!({ "amount": 500000, "method": "UPI" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "overpayment must be rejected: {body}");

    let (status, body) = srv
        .post(
            &token,
            &format!("/invoices/{invoice_id}/payments"),
            json!({ "amount": 150000, "method": "CASH" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "PARTIAL");
    assert_eq!(body["balance"], 250000);

    let (status, body) = srv
        .post(
            &token,
            &format!("/invoices/{invoice_id}/payments"),
            json!({ "amount": 250000, "method": "CARD", "reference": "TXN-991" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "PAID");

    let (status, body) = srv.get(&token, "/invoices/payments").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let (status, body) = srv.get(&token, "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total_patients"], 1);
    assert_eq!(body["stats"]["total_revenue"], 400000);
    assert_eq!(body["stats"]["pending_invoices"], 0);
}

#[tokio::test]
async fn permissions_are_checked_before_commands() {
    let srv = TestServer::spawn().await;
    let clinic_id = ClinicId::new();
    let admin = mint_jwt(clinic_id, vec![Role::ADMIN]);
    let doctor = mint_jwt(clinic_id, vec![Role::DOCTOR]);
    let stranger = mint_jwt(clinic_id, vec![Role::new("auditor")]);

    let (status, body) = srv
        .post(&doctor, "/treatments", json!({ "name": "Scaling", "standard_cost": 80000, "category": "Preventive" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = srv.get(&stranger, "/patients").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = srv
        .post(
            &doctor,
            "/patients",
            json!({ "first_name": "Ravi", "last_name": "Menon", "phone": "+91 90000 22222", "date_of_birth": "1990-01-01" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let patient_id = register_patient(&srv, &admin, "+91 90000 11111").await;
    let (status, body) = srv
        .post(
            &admin,
            "/invoices",
            json!({
                "patient_id": patient_id,
                "items": [{ "description": "Consultation", "quantity": 1, "unit_price": 50000 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let invoice_id = body["id"].as_str().unwrap().to_string();

    let (status, _) = srv
        .post(&doctor, &format!("/invoices/{invoice_id}/payments"), json!({ "amount": 100, "method": "CASH" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn clinics_do_not_see_each_other() {
    let srv = TestServer::spawn().await;
    let clinic_a = mint_jwt(ClinicId::new(), vec![Role::ADMIN]);
    let clinic_b = mint_jwt(ClinicId::new(), vec![Role::ADMIN]);

    let patient_id = register_patient(&srv, &clinic_a, "+91 98000 22222").await;

    let (status, _) = srv.get(&clinic_b, &format!("/patients/{patient_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = srv.get(&clinic_b, "/patients?q=asha").await;
    assert!(body["items"].as_array().unwrap().is_empty());

    // Booking against another clinic's patient fails as if it did not exist.
    let at = (Utc::now() + ChronoDuration::hours(3)).to_rfc3339();
    let (status, body) = srv
        .post(&clinic_b, "/appointments", json!({ "patient_id": patient_id, "scheduled_at": at }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
}

#[tokio::test]
async fn invalid_requests_map_to_error_envelopes() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(ClinicId::new(), vec![Role::ADMIN]);

    let (status, body) = srv.get(&token, "/patients/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");

    let patient_id = register_patient(&srv, &token, "+91 97000 33333").await;
    let (status, body) = srv
        .post(
            &token,
            "/invoices",
            json!({
                "patient_id": patient_id,
                "items": [{ "description": "Crown", "quantity": 1, "unit_price": 900000 }],
                "discount": { "kind": "percentage", "bps": 12000 },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"], "validation_error");

    let appointment_id = schedule(&srv, &token, &patient_id).await;
    let (status, body) = srv
        .post(&token, "/invoices/from-appointment", json!({ "appointment_id": appointment_id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "no treatments found for this appointment");

    let (status, _) = srv
        .post(&token, &format!("/appointments/{appointment_id}/status"), json!({ "status": "cancelled" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = srv
        .post(&token, &format!("/appointments/{appointment_id}/status"), json!({ "status": "cancelled" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn booking_webhook_registers_and_deduplicates() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/bookings/webhook")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    let stamp = body["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");

    let date = (Utc::now() + ChronoDuration::days(3)).date_naive().format("%Y-%m-%d").to_string();
    let form = json!({
        "data": {
            "fullName": "Ravi Kumar Sharma",
            "phoneNumber": "09876543210",
            "age": "41",
            "gender": "Male",
            "dentalService": "Teeth Cleaning",
            "date": date,
            "time": "10:30",
        }
    });

    let res = srv.client.post(srv.url("/bookings/webhook")).json(&form).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let first: Value = res.json().await.unwrap();
    assert_eq!(first["success"], true);
    assert_eq!(first["duplicate"], false);
    assert_eq!(first["patientCreated"], true);

    let res = srv.client.post(srv.url("/bookings/webhook")).json(&form).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let second: Value = res.json().await.unwrap();
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["appointmentId"], first["appointmentId"]);
    assert_eq!(second["patientId"], first["patientId"]);

    let staff = mint_jwt(srv.booking_clinic, vec![Role::STAFF]);
    let (status, body) = srv.get(&staff, "/patients?q=9876543210").await;
    assert_eq!(status, StatusCode::OK);
    let found = body["items"].as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["first_name"], "Ravi");
    assert_eq!(found[0]["last_name"], "Kumar Sharma");
    assert_eq!(found[0]["phone"], "+919876543210");
    assert_eq!(found[0]["age"], 41);

    let appointment_id = first["appointmentId"].as_str().unwrap();
    let (status, body) = srv.get(&staff, &format!("/appointments/{appointment_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment_type"], "Teeth Cleaning");
    assert_eq!(body["duration_minutes"], 30);
    assert_eq!(body["notes"], "Online booking - Teeth Cleaning");

    let res = srv
        .client
        .post(srv.url("/bookings/webhook"))
        .json(&json!({ "fullName": "No Phone" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Missing required fields: fullName, phoneNumber, date, time");
}

#[tokio::test]
async fn refused_booking_leaves_no_patient_behind() {
    let srv = TestServer::spawn().await;
    let booking = |date: String| {
        json!({
            "data": {
                "fullName": "Meera Iyer",
                "phoneNumber": "9812312345",
                "dentalService": "Consultation",
                "date": date,
                "time": "11:00",
            }
        })
    };

    let too_far = (Utc::now() + ChronoDuration::days(800)).date_naive().format("%Y-%m-%d").to_string();
    let res = srv.client.post(srv.url("/bookings/webhook")).json(&booking(too_far)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);

    let staff = mint_jwt(srv.booking_clinic, vec![Role::STAFF]);
    let (status, body) = srv.get(&staff, "/patients?q=9812312345").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty(), "{body}");

    let date = (Utc::now() + ChronoDuration::days(2)).date_naive().format("%Y-%m-%d").to_string();
    let res = srv.client.post(srv.url("/bookings/webhook")).json(&booking(date)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["patientCreated"], true);

    let (_, body) = srv.get(&staff, "/patients?q=9812312345").await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn inactive_treatments_cannot_be_charted() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(ClinicId::new(), vec![Role::ADMIN]);

    let (status, body) = srv
        .post(
            &token,
            "/treatments",
            json!({ "code": "AMG", "name": "Amalgam Filling", "standard_cost": 120000, "category": "restorative" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let treatment_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = srv.post(&token, &format!("/treatments/{treatment_id}/deactivate"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let patient_id = register_patient(&srv, &token, "+91 98000 11111").await;
    let appointment_id = schedule(&srv, &token, &patient_id).await;

    let (status, body) = srv
        .post(
            &token,
            "/clinical-records",
            json!({ "appointment_id": appointment_id, "procedure_id": treatment_id, "tooth_number": "16" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (_, body) = srv
        .get(&token, &format!("/clinical-records?appointment_id={appointment_id}"))
        .await;
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn archived_patients_cannot_be_scheduled_charted_or_billed() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(ClinicId::new(), vec![Role::ADMIN]);

    let (status, body) = srv
        .post(
            &token,
            "/treatments",
            json!({ "code": "EXT", "name": "Extraction", "standard_cost": 90000, "category": "surgical" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let treatment_id = body["id"].as_str().unwrap().to_string();

    let patient_id = register_patient(&srv, &token, "+91 98000 33333").await;
    let appointment_id = schedule(&srv, &token, &patient_id).await;
    let chart = json!({ "appointment_id": appointment_id, "procedure_id": treatment_id, "tooth_number": "48" });
    let (status, body) = srv.post(&token, "/clinical-records", chart.clone()).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = srv.post(&token, &format!("/patients/{patient_id}/archive"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let start = Utc::now() + ChronoDuration::days(1);
    let (status, body) = srv
        .post(
            &token,
            "/appointments",
            json!({
                "patient_id": patient_id,
                "scheduled_at": start.to_rfc3339(),
                "appointment_type": "Checkup",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, body) = srv.post(&token, "/clinical-records", chart).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, body) = srv
        .post(&token, "/invoices/from-appointment", json!({ "appointment_id": appointment_id }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, body) = srv
        .post(
            &token,
            "/invoices",
            json!({
                "patient_id": patient_id,
                "items": [{ "description": "Consultation", "quantity": 1, "unit_price": 50000 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (_, body) = srv.get(&token, &format!("/invoices?patient_id={patient_id}")).await;
    assert!(body["items"].as_array().unwrap().is_empty(), "{body}");
}

#[tokio::test]
async fn invoices_only_reference_the_patients_own_appointments() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(ClinicId::new(), vec![Role::ADMIN]);

    let owner = register_patient(&srv, &token, "+91 98000 44444").await;
    let other = register_patient(&srv, &token, "+91 98000 55555").await;
    let appointment_id = schedule(&srv, &token, &owner).await;
    let items = json!([{ "description": "X-ray", "quantity": 1, "unit_price": 30000 }]);

    let (status, body) = srv
        .post(
            &token,
            "/invoices",
            json!({ "patient_id": owner, "appointment_id": AggregateId::new().to_string(), "items": items.clone() }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");

    let (status, body) = srv
        .post(&token, "/invoices", json!({ "patient_id": other, "appointment_id": appointment_id, "items": items.clone() }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, body) = srv
        .post(&token, "/invoices", json!({ "patient_id": owner, "appointment_id": appointment_id, "items": items }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn admin_can_rebuild_read_models_from_the_log() {
    let srv = TestServer::spawn().await;
    let clinic_id = ClinicId::new();
    let admin = mint_jwt(clinic_id, vec![Role::ADMIN]);
    let staff = mint_jwt(clinic_id, vec![Role::STAFF]);

    let patient_id = register_patient(&srv, &admin, "+91 98000 33333").await;
    let appointment_id = schedule(&srv, &admin, &patient_id).await;

    let (status, _) = srv.post(&staff, "/admin/projections/rebuild", json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = srv.post(&admin, "/admin/projections/rebuild", json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["events_replayed"].as_u64().unwrap() >= 2);

    let (status, _) = srv.get(&admin, &format!("/patients/{patient_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = srv.get(&admin, &format!("/appointments/{appointment_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["patient_id"], json!(patient_id));
}

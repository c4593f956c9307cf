//! Access gateway
//!
//! The single enforcement point for row-level security. Every entity read and
//! write goes through an [`EntityGateway`], which resolves the caller's tenant
//! scope, injects tenant predicates, verifies membership on fetched records,
//! stamps ownership on writes and redacts job fields for contractors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldops_common::store::{get_path, value_to_decimal, ID_FIELD};
use fieldops_common::{
    Clock, Document, DocumentStore, EventSink, FieldOpsError, FieldOpsResult, LifecycleEvent,
    Principal, Query, ScopedQuery, SystemClock, TenantId, TENANT_FIELD,
};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::entity::{invoice, job, payment, EntityKind, PROTECTED_FIELDS};
use crate::lifecycle::{JobStatus, StatsTrigger};
use crate::resolver::{TenantResolver, TenantScope};
use crate::sanitize;

/// Access gateway over every tenant-scoped collection
pub struct AccessGateway {
    store: Arc<dyn DocumentStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    resolver: TenantResolver,
}

impl AccessGateway {
    pub fn new(store: Arc<dyn DocumentStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            clock: Arc::new(SystemClock),
            resolver: TenantResolver::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    /// Scoped handle for one entity type
    pub fn collection(&self, kind: EntityKind) -> EntityGateway<'_> {
        EntityGateway { gateway: self, kind }
    }

    pub fn jobs(&self) -> EntityGateway<'_> {
        self.collection(EntityKind::Job)
    }

    pub fn clients(&self) -> EntityGateway<'_> {
        self.collection(EntityKind::Client)
    }

    pub fn invoices(&self) -> EntityGateway<'_> {
        self.collection(EntityKind::Invoice)
    }

    pub fn payments(&self) -> EntityGateway<'_> {
        self.collection(EntityKind::Payment)
    }

    async fn run_scoped(
        &self,
        collection: &str,
        scoped: ScopedQuery,
    ) -> FieldOpsResult<Vec<Document>> {
        tracing::debug!(collection, tenant = %scoped.tenant(), "scoped query");
        Ok(self.store.find(collection, &scoped.into_query()).await?)
    }
}

/// Gateway bound to one entity type
pub struct EntityGateway<'a> {
    gateway: &'a AccessGateway,
    kind: EntityKind,
}

impl EntityGateway<'_> {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Records visible to the principal.
    ///
    /// Multi-tenant contractors get one query per tenant, concatenated in
    /// tenant order; caller ordering and limits apply within each tenant's
    /// slice. One failing tenant fails the whole list.
    pub async fn list(
        &self,
        principal: &Principal,
        query: Query,
    ) -> FieldOpsResult<Vec<Document>> {
        let collection = self.kind.collection();
        let docs = match self.gateway.resolver.resolve_tenants(principal) {
            TenantScope::All => self.gateway.store.find(collection, &query).await?,
            TenantScope::Tenants(tenants) => {
                let mut docs = Vec::new();
                for tenant in tenants {
                    let scoped = query.clone().scoped_to(tenant);
                    docs.extend(self.gateway.run_scoped(collection, scoped).await?);
                }
                docs
            }
        };
        Ok(docs.into_iter().map(|doc| self.view(principal, doc)).collect())
    }

    /// Single record. Records of other tenants yield [`FieldOpsError::AccessDenied`].
    pub async fn get(&self, principal: &Principal, id: &str) -> FieldOpsResult<Document> {
        let doc = self.fetch_checked(principal, id).await?;
        Ok(self.view(principal, doc))
    }

    /// Insert a record owned by the principal's tenant
    pub async fn create(
        &self,
        principal: &Principal,
        mut payload: Document,
    ) -> FieldOpsResult<Document> {
        if payload.contains_key(TENANT_FIELD) {
            return Err(FieldOpsError::Validation(
                "tenant_id is assigned by the access layer".into(),
            ));
        }
        let tenant = self
            .gateway
            .resolver
            .home_tenant(principal)
            .ok_or_else(|| FieldOpsError::Validation("principal has no tenant".into()))?;

        for field in PROTECTED_FIELDS {
            payload.remove(*field);
        }
        let now = self.gateway.clock.now();
        let stamp = Value::String(now.to_rfc3339());
        payload.insert(TENANT_FIELD.into(), Value::String(tenant.as_str().to_string()));
        payload.insert("created_by".into(), Value::String(principal.id.clone()));
        payload.insert("created_at".into(), stamp.clone());
        payload.insert("updated_at".into(), stamp);

        let event_input = self.prepare_create(&mut payload)?;

        let doc = self
            .gateway
            .store
            .create(self.kind.collection(), payload)
            .await?;
        tracing::debug!(collection = self.kind.collection(), tenant = %tenant, "entity created");

        if let Some(input) = event_input {
            self.gateway.events.publish(input.into_event(tenant, &doc, now));
        }
        Ok(self.view(principal, doc))
    }

    /// Patch a record after re-checking membership
    pub async fn update(
        &self,
        principal: &Principal,
        id: &str,
        payload: Document,
    ) -> FieldOpsResult<Document> {
        let existing = self.fetch_checked(principal, id).await?;

        let mut patch = payload;
        if !principal.is_super_admin() {
            for field in PROTECTED_FIELDS {
                patch.remove(*field);
            }
        }
        if principal.is_contractor() {
            if self.kind == EntityKind::Job && !sanitize::is_assigned_server(principal, &existing) {
                return Err(FieldOpsError::AccessDenied);
            }
            patch = sanitize::contractor_patch(patch);
        }

        let trigger = match self.kind {
            EntityKind::Job => self.check_status_change(&existing, &patch)?,
            _ => None,
        };

        let now = self.gateway.clock.now();
        patch.insert("updated_at".into(), Value::String(now.to_rfc3339()));
        patch.insert("updated_by".into(), Value::String(principal.id.clone()));

        let updated = self
            .gateway
            .store
            .update(self.kind.collection(), id, patch)
            .await?;

        if let Some(trigger) = trigger {
            if let Some(event) = job_event(trigger, &updated, now) {
                self.gateway.events.publish(event);
            }
        }
        Ok(self.view(principal, updated))
    }

    async fn fetch_checked(&self, principal: &Principal, id: &str) -> FieldOpsResult<Document> {
        let scope = self.gateway.resolver.resolve_tenants(principal);
        let missing = || FieldOpsError::NotFound(format!("{}/{}", self.kind, id));
        if scope.is_empty() {
            return Err(missing());
        }

        let doc = self
            .gateway
            .store
            .find_by_id(self.kind.collection(), id)
            .await?
            .ok_or_else(missing)?;

        let allowed = match document_tenant(&doc) {
            Some(tenant) => scope.contains(&tenant),
            None => scope == TenantScope::All,
        };
        if !allowed {
            tracing::debug!(
                collection = self.kind.collection(),
                id,
                principal = %principal.id,
                "cross-tenant access denied"
            );
            return Err(FieldOpsError::AccessDenied);
        }
        Ok(doc)
    }

    fn view(&self, principal: &Principal, doc: Document) -> Document {
        match self.kind {
            EntityKind::Job => sanitize::job_view(principal, doc),
            _ => doc,
        }
    }

    fn prepare_create(&self, payload: &mut Document) -> FieldOpsResult<Option<CreateEvent>> {
        match self.kind {
            EntityKind::Job => {
                let client_id = required_str(payload, job::CLIENT_ID)?;
                let server_id = payload
                    .get(job::ASSIGNED_SERVER)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let status = if server_id.is_some() {
                    JobStatus::Assigned
                } else {
                    JobStatus::Pending
                };
                payload.insert(job::STATUS.into(), Value::String(status.as_str().into()));
                Ok(Some(CreateEvent::Job { client_id, server_id }))
            }
            EntityKind::Invoice => Ok(Some(CreateEvent::Invoice {
                client_id: required_str(payload, invoice::CLIENT_ID)?,
                amount: required_amount(payload, invoice::TOTAL)?,
            })),
            EntityKind::Payment => Ok(Some(CreateEvent::Payment {
                client_id: required_str(payload, payment::CLIENT_ID)?,
                amount: required_amount(payload, payment::AMOUNT)?,
            })),
            _ => Ok(None),
        }
    }

    fn check_status_change(
        &self,
        existing: &Document,
        patch: &Document,
    ) -> FieldOpsResult<Option<StatsTrigger>> {
        let Some(next) = patch.get(job::STATUS) else {
            return Ok(None);
        };
        let next = next
            .as_str()
            .ok_or_else(|| FieldOpsError::Validation("status must be a string".into()))
            .and_then(|s| {
                JobStatus::parse(s).map_err(|e| FieldOpsError::Validation(e.to_string()))
            })?;
        let current = existing
            .get(job::STATUS)
            .and_then(Value::as_str)
            .map(JobStatus::parse)
            .transpose()
            .map_err(|e| FieldOpsError::Validation(e.to_string()))?
            .unwrap_or(JobStatus::Pending);

        if current == next {
            return Ok(None);
        }
        current
            .transition(next)
            .map_err(|e| FieldOpsError::Validation(e.to_string()))
    }
}

/// Event data captured before the record has an id
enum CreateEvent {
    Job { client_id: String, server_id: Option<String> },
    Invoice { client_id: String, amount: Decimal },
    Payment { client_id: String, amount: Decimal },
}

impl CreateEvent {
    fn into_event(self, company: TenantId, doc: &Document, at: DateTime<Utc>) -> LifecycleEvent {
        let id = doc
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match self {
            Self::Job { client_id, server_id } => LifecycleEvent::JobCreated {
                company,
                client_id,
                server_id,
                job_id: id,
                occurred_at: at,
            },
            Self::Invoice { client_id, amount } => LifecycleEvent::InvoiceCreated {
                company,
                client_id,
                invoice_id: id,
                amount,
                occurred_at: at,
            },
            Self::Payment { client_id, amount } => LifecycleEvent::PaymentReceived {
                company,
                client_id,
                payment_id: id,
                amount,
                occurred_at: at,
            },
        }
    }
}

fn job_event(trigger: StatsTrigger, doc: &Document, at: DateTime<Utc>) -> Option<LifecycleEvent> {
    let company = document_tenant(doc)?;
    let client_id = doc.get(job::CLIENT_ID)?.as_str()?.to_string();
    let server_id = doc
        .get(job::ASSIGNED_SERVER)
        .and_then(Value::as_str)
        .map(str::to_string);
    let job_id = doc.get(ID_FIELD)?.as_str()?.to_string();

    Some(match trigger {
        StatsTrigger::Completed { successful } => LifecycleEvent::JobCompleted {
            company,
            client_id,
            server_id,
            job_id,
            successful,
            completion_days: completion_days(doc, at),
            occurred_at: at,
        },
        StatsTrigger::Cancelled => LifecycleEvent::JobCancelled {
            company,
            client_id,
            server_id,
            job_id,
            occurred_at: at,
        },
        StatsTrigger::Reopened => LifecycleEvent::JobReopened {
            company,
            client_id,
            server_id,
            job_id,
            occurred_at: at,
        },
    })
}

/// Whole days between job creation and `at`
fn completion_days(doc: &Document, at: DateTime<Utc>) -> Option<f64> {
    let created = get_path(doc, job::CREATED_AT)?.as_str()?;
    let created = DateTime::parse_from_rfc3339(created).ok()?.with_timezone(&Utc);
    Some((at - created).num_days().max(0) as f64)
}

fn document_tenant(doc: &Document) -> Option<TenantId> {
    doc.get(TENANT_FIELD)
        .and_then(Value::as_str)
        .map(TenantId::from)
}

fn required_str(payload: &Document, field: &str) -> FieldOpsResult<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FieldOpsError::Validation(format!("{field} is required")))
}

/// Money field as an exact decimal; accepts JSON numbers and decimal strings
fn required_amount(payload: &Document, field: &str) -> FieldOpsResult<Decimal> {
    payload
        .get(field)
        .and_then(value_to_decimal)
        .ok_or_else(|| FieldOpsError::Validation(format!("{field} must be a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fieldops_common::{BufferedEventSink, Filter, FixedClock, InMemoryStore, Role};
    use rust_decimal_macros::dec;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        events: Arc<BufferedEventSink>,
        clock: Arc<FixedClock>,
        gateway: AccessGateway,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(BufferedEventSink::new());
        let clock =
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()));
        let gateway = AccessGateway::new(store.clone(), events.clone()).with_clock(clock.clone());
        Fixture { store, events, clock, gateway }
    }

    fn payload(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn id_of(doc: &Document) -> String {
        doc["id"].as_str().unwrap().to_string()
    }

    async fn seed_job(gateway: &AccessGateway, tenant: &str, server: Option<&str>) -> Document {
        let owner = Principal::owner(format!("owner-{tenant}"), tenant);
        let mut body = json!({
            "client_id": format!("client-{tenant}"),
            "client_name": "Law Office LLP",
            "amount": 75.0,
            "recipient_name": "J. Doe",
        });
        if let Some(server) = server {
            body["assigned_server"] = json!(server);
        }
        gateway.jobs().create(&owner, payload(body)).await.unwrap()
    }

    #[tokio::test]
    async fn test_unaffiliated_principals_see_nothing() {
        let f = fixture();
        let job = seed_job(&f.gateway, "a", None).await;

        for role in [Role::Owner, Role::Employee, Role::Contractor] {
            let nobody = Principal::unaffiliated("ghost", role);
            for kind in EntityKind::ALL {
                let listed = f.gateway.collection(kind).list(&nobody, Query::new()).await.unwrap();
                assert!(listed.is_empty());
            }
            let err = f.gateway.jobs().get(&nobody, &id_of(&job)).await.unwrap_err();
            assert!(matches!(err, FieldOpsError::NotFound(_)));
        }
    }

    #[tokio::test]
    async fn test_contractor_list_is_union_of_its_tenants() {
        let f = fixture();
        for tenant in ["a", "b", "c"] {
            seed_job(&f.gateway, tenant, Some("srv")).await;
            seed_job(&f.gateway, tenant, Some("srv")).await;
        }

        let contractor = Principal::contractor("srv", ["a", "b"]);
        let jobs = f.gateway.jobs().list(&contractor, Query::new()).await.unwrap();

        assert_eq!(jobs.len(), 4);
        let mut ids: Vec<_> = jobs.iter().map(id_of).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert!(jobs.iter().all(|j| j["tenant_id"] != json!("c")));
    }

    #[tokio::test]
    async fn test_one_failing_tenant_fails_the_list() {
        let f = fixture();
        seed_job(&f.gateway, "a", None).await;
        f.store.fail_find_on("jobs", Filter::eq(TENANT_FIELD, "b"));

        let contractor = Principal::contractor("srv", ["a", "b"]);
        assert!(f.gateway.jobs().list(&contractor, Query::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_caller_filters_combine_with_scope() {
        let f = fixture();
        seed_job(&f.gateway, "a", Some("srv")).await;
        seed_job(&f.gateway, "a", None).await;
        seed_job(&f.gateway, "b", Some("srv")).await;

        let owner = Principal::owner("o", "a");
        let assigned = f
            .gateway
            .jobs()
            .list(&owner, Query::new().filter(Filter::eq("status", "assigned")))
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);

        // Asking for another tenant's rows explicitly still stays inside the scope.
        let sneaky = f
            .gateway
            .jobs()
            .list(&owner, Query::new().filter(Filter::eq(TENANT_FIELD, "b")))
            .await
            .unwrap();
        assert!(sneaky.is_empty());
    }

    #[tokio::test]
    async fn test_super_admin_is_unscoped() {
        let f = fixture();
        seed_job(&f.gateway, "a", None).await;
        let other = seed_job(&f.gateway, "b", None).await;

        let admin = Principal::super_admin("root");
        let all = f.gateway.jobs().list(&admin, Query::new()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(f.gateway.jobs().get(&admin, &id_of(&other)).await.is_ok());
    }

    #[tokio::test]
    async fn test_cross_tenant_get_is_denied_but_looks_missing() {
        let f = fixture();
        let job = seed_job(&f.gateway, "a", None).await;
        let intruder = Principal::owner("o", "b");

        let denied = f.gateway.jobs().get(&intruder, &id_of(&job)).await.unwrap_err();
        let missing = f.gateway.jobs().get(&intruder, "no-such-job").await.unwrap_err();

        assert_eq!(denied, FieldOpsError::AccessDenied);
        assert!(matches!(missing, FieldOpsError::NotFound(_)));
        assert_eq!(denied.public_message(), missing.public_message());
    }

    #[tokio::test]
    async fn test_create_stamps_ownership() {
        let f = fixture();
        let employee = Principal::employee("emp-1", "a");

        let client = f
            .gateway
            .clients()
            .create(&employee, payload(json!({"name": "Firm", "id": "forged", "created_by": "x"})))
            .await
            .unwrap();

        assert_eq!(client["tenant_id"], json!("a"));
        assert_eq!(client["created_by"], json!("emp-1"));
        assert_ne!(client["id"], json!("forged"));
        assert_eq!(f.store.count("clients"), 1);
        assert!(f.events.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_tenant_and_requires_one() {
        let f = fixture();
        let owner = Principal::owner("o", "a");

        let forged = f
            .gateway
            .clients()
            .create(&owner, payload(json!({"name": "Firm", "tenant_id": "b"})))
            .await
            .unwrap_err();
        assert!(matches!(forged, FieldOpsError::Validation(_)));

        let homeless = Principal::unaffiliated("u", Role::Owner);
        let err = f
            .gateway
            .clients()
            .create(&homeless, payload(json!({"name": "Firm"})))
            .await
            .unwrap_err();
        assert!(matches!(err, FieldOpsError::Validation(_)));

        let ambiguous = Principal::contractor("srv", ["a", "b"]);
        let err = f
            .gateway
            .collection(EntityKind::Court)
            .create(&ambiguous, payload(json!({"name": "County Court"})))
            .await
            .unwrap_err();
        assert!(matches!(err, FieldOpsError::Validation(_)));
        assert_eq!(f.store.count("clients") + f.store.count("courts"), 0);
    }

    #[tokio::test]
    async fn test_job_create_publishes_event() {
        let f = fixture();
        let job = seed_job(&f.gateway, "a", Some("srv-1")).await;

        assert_eq!(job["status"], json!("assigned"));
        let events = f.events.take();
        assert_eq!(events.len(), 1);
        match &events[0] {
            LifecycleEvent::JobCreated { company, client_id, server_id, job_id, .. } => {
                assert_eq!(company.as_str(), "a");
                assert_eq!(client_id, "client-a");
                assert_eq!(server_id.as_deref(), Some("srv-1"));
                assert_eq!(*job_id, id_of(&job));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_contractor_sees_sanitized_job_unless_assigned() {
        let f = fixture();
        let job = seed_job(&f.gateway, "a", Some("srv-assigned")).await;
        let id = id_of(&job);

        let outsider = Principal::contractor("srv-other", ["a"]);
        let view = f.gateway.jobs().get(&outsider, &id).await.unwrap();
        assert!(view.get("client_id").is_none());
        assert!(view.get("client_name").is_none());
        assert!(view.get("amount").is_none());
        assert_eq!(view["recipient_name"], json!("J. Doe"));

        let listed = f.gateway.jobs().list(&outsider, Query::new()).await.unwrap();
        assert!(listed[0].get("amount").is_none());

        let assigned = Principal::contractor("srv-assigned", ["a"]);
        let full = f.gateway.jobs().get(&assigned, &id).await.unwrap();
        assert_eq!(full["client_name"], json!("Law Office LLP"));
    }

    #[tokio::test]
    async fn test_contractor_update_is_filtered() {
        let f = fixture();
        let job = seed_job(&f.gateway, "a", Some("srv")).await;
        let id = id_of(&job);
        let server = Principal::contractor("srv", ["a"]);

        let updated = f
            .gateway
            .jobs()
            .update(
                &server,
                &id,
                payload(json!({
                    "status": "in_progress",
                    "notes": "on site",
                    "amount": 0.0,
                    "tenant_id": "b",
                })),
            )
            .await
            .unwrap();

        assert_eq!(updated["status"], json!("in_progress"));
        assert_eq!(updated["notes"], json!("on site"));
        assert_eq!(updated["amount"], json!(75.0));
        assert_eq!(updated["tenant_id"], json!("a"));
        assert_eq!(updated["updated_by"], json!("srv"));

        let stranger = Principal::contractor("srv-2", ["a"]);
        let err = f
            .gateway
            .jobs()
            .update(&stranger, &id, payload(json!({"notes": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err, FieldOpsError::AccessDenied);
    }

    #[tokio::test]
    async fn test_status_transitions_publish_stats_events() {
        let f = fixture();
        let job = seed_job(&f.gateway, "a", Some("srv")).await;
        let id = id_of(&job);
        let owner = Principal::owner("o", "a");
        f.events.take();

        f.gateway
            .jobs()
            .update(&owner, &id, payload(json!({"status": "in_progress"})))
            .await
            .unwrap();
        assert!(f.events.is_empty());

        f.clock.advance(Duration::days(3));
        f.gateway
            .jobs()
            .update(&owner, &id, payload(json!({"status": "unable_to_serve"})))
            .await
            .unwrap();
        f.gateway
            .jobs()
            .update(&owner, &id, payload(json!({"status": "assigned"})))
            .await
            .unwrap();

        let events = f.events.take();
        assert_eq!(events.len(), 2);
        match &events[0] {
            LifecycleEvent::JobCompleted { successful, completion_days, server_id, .. } => {
                assert!(!successful);
                assert_eq!(*completion_days, Some(3.0));
                assert_eq!(server_id.as_deref(), Some("srv"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[1] {
            LifecycleEvent::JobReopened { job_id, server_id, .. } => {
                assert_eq!(job_id, &id);
                assert_eq!(server_id.as_deref(), Some("srv"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        f.gateway
            .jobs()
            .update(&owner, &id, payload(json!({"status": "cancelled"})))
            .await
            .unwrap();
        assert!(matches!(f.events.take()[0], LifecycleEvent::JobCancelled { .. }));
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let f = fixture();
        let job = seed_job(&f.gateway, "a", None).await;
        let owner = Principal::owner("o", "a");

        let err = f
            .gateway
            .jobs()
            .update(&owner, &id_of(&job), payload(json!({"status": "completed"})))
            .await
            .unwrap_err();
        assert!(matches!(err, FieldOpsError::Validation(_)));

        let stored = f.gateway.jobs().get(&owner, &id_of(&job)).await.unwrap();
        assert_eq!(stored["status"], json!("pending"));
    }

    #[tokio::test]
    async fn test_invoice_and_payment_publish_financial_events() {
        let f = fixture();
        let owner = Principal::owner("o", "a");

        f.gateway
            .invoices()
            .create(&owner, payload(json!({"client_id": "c1", "total": 250.0})))
            .await
            .unwrap();
        f.gateway
            .payments()
            .create(&owner, payload(json!({"client_id": "c1", "amount": 100})))
            .await
            .unwrap();
        let missing_amount = f
            .gateway
            .payments()
            .create(&owner, payload(json!({"client_id": "c1"})))
            .await;
        assert!(matches!(missing_amount, Err(FieldOpsError::Validation(_))));

        let events = f.events.take();
        assert!(matches!(
            events[0],
            LifecycleEvent::InvoiceCreated { amount, .. } if amount == dec!(250)
        ));
        assert!(matches!(
            events[1],
            LifecycleEvent::PaymentReceived { amount, .. } if amount == dec!(100)
        ));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_amounts_are_read_exactly() {
        let f = fixture();
        let owner = Principal::owner("o", "a");

        for total in [json!(0.1), json!("0.2")] {
            f.gateway
                .invoices()
                .create(&owner, payload(json!({"client_id": "c1", "total": total})))
                .await
                .unwrap();
        }
        let bad = f
            .gateway
            .invoices()
            .create(&owner, payload(json!({"client_id": "c1", "total": "twelve"})))
            .await;
        assert!(matches!(bad, Err(FieldOpsError::Validation(_))));

        let billed: Decimal = f
            .events
            .take()
            .iter()
            .map(|e| match e {
                LifecycleEvent::InvoiceCreated { amount, .. } => *amount,
                other => panic!("unexpected event {other:?}"),
            })
            .sum();
        assert_eq!(billed, dec!(0.3));
    }

    #[tokio::test]
    async fn test_update_rechecks_membership() {
        let f = fixture();
        let job = seed_job(&f.gateway, "a", None).await;
        let intruder = Principal::employee("e", "b");

        let err = f
            .gateway
            .jobs()
            .update(&intruder, &id_of(&job), payload(json!({"notes": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err, FieldOpsError::AccessDenied);
    }
}

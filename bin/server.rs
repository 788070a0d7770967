// Vendor Capital Ledger - REST API Server
//
// Thin HTTP surface over the ledger services for the storefront and vendor
// dashboard collaborators. Authentication itself lives upstream; the caller
// role arrives as a header and is resolved once into capabilities at this
// boundary. Every error body carries the current (unchanged) balance so the
// UI never has to guess whether a call partially succeeded.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capital_ledger::{
    require, Capability, Correlation, LedgerError, LedgerService, OfflineSubledger,
    PartnerCapitalManager, PaymentKind, ReconciliationAudit, Role, TransactionKind,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    ledger: LedgerService,
    partners: PartnerCapitalManager,
    offline: OfflineSubledger,
    audit: ReconciliationAudit,
}

impl AppState {
    fn new(ledger: LedgerService) -> Self {
        Self {
            partners: PartnerCapitalManager::new(ledger.clone()),
            offline: OfflineSubledger::new(ledger.clone()),
            audit: ReconciliationAudit::new(ledger.clone()),
            ledger,
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

/// Error body: code + message + the unchanged balance where known.
#[derive(Serialize)]
struct ApiError {
    success: bool,
    code: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<Decimal>,
    retryable: bool,
}

fn error_code(err: &LedgerError) -> (StatusCode, &'static str) {
    match err {
        LedgerError::InsufficientBalance { .. } => {
            (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE")
        }
        LedgerError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        LedgerError::InvalidKind(_) => (StatusCode::BAD_REQUEST, "INVALID_KIND"),
        LedgerError::NotFound(_, _) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        LedgerError::HasOutstandingSales { .. } => (StatusCode::CONFLICT, "HAS_OUTSTANDING_SALES"),
        LedgerError::IdempotencyConflict => (StatusCode::CONFLICT, "IDEMPOTENCY_CONFLICT"),
        LedgerError::ConcurrentModification => {
            (StatusCode::SERVICE_UNAVAILABLE, "CONCURRENT_MODIFICATION")
        }
        LedgerError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        LedgerError::ChainBroken { .. } | LedgerError::Storage(_) | LedgerError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        }
    }
}

fn fail(state: &AppState, vendor_id: Option<&str>, err: LedgerError) -> axum::response::Response {
    let (status, code) = error_code(&err);
    if status.is_server_error() {
        error!("request failed: {err}");
    }
    // Best effort: nothing was written, so the stored balance is still the
    // caller's balance.
    let balance = vendor_id.and_then(|id| state.ledger.balance(id).ok());
    (
        status,
        Json(ApiError {
            success: false,
            code,
            error: err.to_string(),
            balance,
            retryable: err.is_retryable(),
        }),
    )
        .into_response()
}

// ============================================================================
// Request context (role + vendor headers resolved once)
// ============================================================================

struct Caller {
    vendor_id: String,
    role: Role,
}

fn caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, axum::response::Response> {
    let role = match headers.get("x-role").and_then(|v| v.to_str().ok()) {
        Some(raw) => Role::parse(raw).map_err(|e| fail(state, None, e))?,
        None => Role::Vendor,
    };
    let vendor_id = headers
        .get("x-vendor-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            fail(
                state,
                None,
                LedgerError::NotFound("vendor", "missing x-vendor-id header".to_string()),
            )
        })?;
    Ok(Caller { vendor_id, role })
}

fn authorize(
    state: &AppState,
    c: &Caller,
    capability: Capability,
) -> Result<(), axum::response::Response> {
    require(c.role, capability).map_err(|e| fail(state, Some(&c.vendor_id), e))
}

/// Path ids address rows directly, so every id-addressed handler must check
/// the row belongs to the caller's vendor. A mismatch reads as NotFound:
/// another vendor's ids are indistinguishable from absent ones.
fn ensure_vendor_scope(
    caller_vendor: &str,
    row_vendor: &str,
    what: &'static str,
    id: &str,
) -> Result<(), LedgerError> {
    if caller_vendor == row_vendor {
        Ok(())
    } else {
        Err(LedgerError::NotFound(what, id.to_string()))
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Deserialize)]
struct RecordTransactionRequest {
    kind: String,
    amount: Decimal,
    description: String,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Serialize)]
struct RecordTransactionResponse {
    entry_id: String,
    new_balance: Decimal,
    replayed: bool,
}

#[derive(Deserialize)]
struct ListQuery {
    kind: Option<String>,
    limit: Option<i64>,
    before_seq: Option<i64>,
}

#[derive(Serialize)]
struct BalanceResponse {
    vendor_id: String,
    balance: Decimal,
    initial_capital: Decimal,
}

#[derive(Deserialize)]
struct AddPartnerRequest {
    name: String,
    amount: Decimal,
    percent: Decimal,
}

#[derive(Deserialize)]
struct AdjustPartnerRequest {
    amount: Decimal,
}

#[derive(Deserialize)]
struct PurchaseGoodsRequest {
    purchase_price: Decimal,
    selling_price: Decimal,
    quantity: i64,
    #[serde(default)]
    supplier_id: Option<String>,
}

#[derive(Deserialize)]
struct RecordSaleRequest {
    quantity: i64,
}

#[derive(Deserialize)]
struct CreateSupplierRequest {
    name: String,
}

#[derive(Deserialize)]
struct SupplierPaymentRequest {
    kind: String,
    amount: Decimal,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/capital/transactions - Record a balance mutation
async fn record_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RecordTransactionRequest>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::RecordTransactions) {
        return resp;
    }

    let kind = match TransactionKind::parse(&req.kind) {
        Ok(kind) => kind,
        Err(e) => return fail(&state, Some(&c.vendor_id), e),
    };

    match state.ledger.record_transaction(
        &c.vendor_id,
        kind,
        req.amount,
        &req.description,
        Correlation::none(),
        req.idempotency_key.as_deref(),
    ) {
        Ok(receipt) => (
            StatusCode::OK,
            Json(ApiResponse::ok(RecordTransactionResponse {
                entry_id: receipt.entry_id,
                new_balance: receipt.new_balance,
                replayed: receipt.replayed,
            })),
        )
            .into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// GET /api/capital/transactions - Paginated entries, newest first
async fn list_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ViewLedger) {
        return resp;
    }

    let kind = match query.kind.as_deref() {
        Some(raw) => match TransactionKind::parse(raw) {
            Ok(kind) => Some(kind),
            Err(e) => return fail(&state, Some(&c.vendor_id), e),
        },
        None => None,
    };

    match state.ledger.list_transactions(
        &c.vendor_id,
        kind,
        query.limit.unwrap_or(50),
        query.before_seq,
    ) {
        Ok(entries) => (StatusCode::OK, Json(ApiResponse::ok(entries))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// GET /api/capital/balance - Current balance + initial capital
async fn get_balance(State(state): State<AppState>, headers: HeaderMap) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ViewLedger) {
        return resp;
    }

    match state.ledger.get_vendor(&c.vendor_id) {
        Ok(vendor) => (
            StatusCode::OK,
            Json(ApiResponse::ok(BalanceResponse {
                vendor_id: vendor.id,
                balance: vendor.capital_balance,
                initial_capital: vendor.initial_capital,
            })),
        )
            .into_response(),
        Err(e) => fail(&state, None, e),
    }
}

/// GET /api/capital/audit - Reconciliation check, read-only
async fn run_audit(State(state): State<AppState>, headers: HeaderMap) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::RunAudit) {
        return resp;
    }

    match state.audit.check(&c.vendor_id) {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::ok(report))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// POST /api/partners - Add a partner and deposit its capital
async fn add_partner(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddPartnerRequest>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ManagePartners) {
        return resp;
    }

    match state
        .partners
        .add_partner(&c.vendor_id, &req.name, req.amount, req.percent)
    {
        Ok(share) => (StatusCode::CREATED, Json(ApiResponse::ok(share))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// PUT /api/partners/:id - Adjust a partner's capital to a new amount
async fn adjust_partner(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(partner_id): Path<String>,
    Json(req): Json<AdjustPartnerRequest>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ManagePartners) {
        return resp;
    }
    let share = match state.partners.get_partner(&partner_id) {
        Ok(share) => share,
        Err(e) => return fail(&state, Some(&c.vendor_id), e),
    };
    if let Err(e) = ensure_vendor_scope(&c.vendor_id, &share.vendor_id, "partner", &partner_id) {
        return fail(&state, Some(&c.vendor_id), e);
    }

    match state.partners.adjust_partner_capital(&partner_id, req.amount) {
        Ok(share) => (StatusCode::OK, Json(ApiResponse::ok(share))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// DELETE /api/partners/:id - Withdraw the stake and delete the share
async fn remove_partner(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(partner_id): Path<String>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ManagePartners) {
        return resp;
    }
    let share = match state.partners.get_partner(&partner_id) {
        Ok(share) => share,
        Err(e) => return fail(&state, Some(&c.vendor_id), e),
    };
    if let Err(e) = ensure_vendor_scope(&c.vendor_id, &share.vendor_id, "partner", &partner_id) {
        return fail(&state, Some(&c.vendor_id), e);
    }

    match state.partners.remove_partner(&partner_id) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok("removed"))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// POST /api/offline-goods - Purchase externally sourced stock
async fn purchase_goods(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PurchaseGoodsRequest>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ManageOfflineStock) {
        return resp;
    }

    match state.offline.purchase_goods(
        &c.vendor_id,
        req.supplier_id.as_deref(),
        req.purchase_price,
        req.selling_price,
        req.quantity,
    ) {
        Ok(good) => (StatusCode::CREATED, Json(ApiResponse::ok(good))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// POST /api/offline-goods/:id/sales - Record units sold (moves no capital)
async fn record_sale(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(good_id): Path<String>,
    Json(req): Json<RecordSaleRequest>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ManageOfflineStock) {
        return resp;
    }
    let good = match state.offline.get_good(&good_id) {
        Ok(good) => good,
        Err(e) => return fail(&state, Some(&c.vendor_id), e),
    };
    if let Err(e) = ensure_vendor_scope(&c.vendor_id, &good.vendor_id, "good", &good_id) {
        return fail(&state, Some(&c.vendor_id), e);
    }

    match state.offline.record_sale(&good_id, req.quantity) {
        Ok(good) => (StatusCode::OK, Json(ApiResponse::ok(good))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// DELETE /api/offline-goods/:id - Safe deletion with cost reversal
async fn delete_goods(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(good_id): Path<String>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ManageOfflineStock) {
        return resp;
    }
    let good = match state.offline.get_good(&good_id) {
        Ok(good) => good,
        Err(e) => return fail(&state, Some(&c.vendor_id), e),
    };
    if let Err(e) = ensure_vendor_scope(&c.vendor_id, &good.vendor_id, "good", &good_id) {
        return fail(&state, Some(&c.vendor_id), e);
    }

    match state.offline.delete_goods(&good_id) {
        Ok(receipt) => (
            StatusCode::OK,
            Json(ApiResponse::ok(RecordTransactionResponse {
                entry_id: receipt.entry_id,
                new_balance: receipt.new_balance,
                replayed: receipt.replayed,
            })),
        )
            .into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// POST /api/offline-suppliers - Register a supplier
async fn create_supplier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSupplierRequest>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ManageOfflineStock) {
        return resp;
    }

    match state.offline.create_supplier(&c.vendor_id, &req.name) {
        Ok(supplier) => (StatusCode::CREATED, Json(ApiResponse::ok(supplier))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// POST /api/offline-suppliers/:id/payments - Cash to/from a supplier
async fn supplier_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(supplier_id): Path<String>,
    Json(req): Json<SupplierPaymentRequest>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ManageOfflineStock) {
        return resp;
    }

    let supplier = match state.offline.get_supplier(&supplier_id) {
        Ok(supplier) => supplier,
        Err(e) => return fail(&state, Some(&c.vendor_id), e),
    };
    if let Err(e) = ensure_vendor_scope(&c.vendor_id, &supplier.vendor_id, "supplier", &supplier_id)
    {
        return fail(&state, Some(&c.vendor_id), e);
    }

    let kind = match PaymentKind::parse(&req.kind) {
        Ok(kind) => kind,
        Err(e) => return fail(&state, Some(&c.vendor_id), e),
    };

    match state
        .offline
        .record_supplier_payment(&supplier_id, kind, req.amount)
    {
        Ok(payment) => (StatusCode::CREATED, Json(ApiResponse::ok(payment))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

/// GET /api/offline-suppliers/:id/position - Computed receivable/payable
async fn supplier_position(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(supplier_id): Path<String>,
) -> axum::response::Response {
    let c = match caller(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &c, Capability::ViewLedger) {
        return resp;
    }
    let supplier = match state.offline.get_supplier(&supplier_id) {
        Ok(supplier) => supplier,
        Err(e) => return fail(&state, Some(&c.vendor_id), e),
    };
    if let Err(e) = ensure_vendor_scope(&c.vendor_id, &supplier.vendor_id, "supplier", &supplier_id)
    {
        return fail(&state, Some(&c.vendor_id), e);
    }

    match state.offline.supplier_position(&supplier_id) {
        Ok(position) => (StatusCode::OK, Json(ApiResponse::ok(position))).into_response(),
        Err(e) => fail(&state, Some(&c.vendor_id), e),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "capital_ledger=info,capital_server=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path = std::env::var("CAPITAL_LEDGER_DB").unwrap_or_else(|_| "capital-ledger.db".to_string());
    let addr = std::env::var("CAPITAL_LEDGER_ADDR").unwrap_or_else(|_| "127.0.0.1:3001".to_string());

    let ledger = LedgerService::open(std::path::Path::new(&db_path))?;
    let state = AppState::new(ledger);

    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/capital/transactions", post(record_transaction))
        .route("/api/capital/transactions", get(list_transactions))
        .route("/api/capital/balance", get(get_balance))
        .route("/api/capital/audit", get(run_audit))
        .route("/api/partners", post(add_partner))
        .route("/api/partners/:id", put(adjust_partner))
        .route("/api/partners/:id", delete(remove_partner))
        .route("/api/offline-goods", post(purchase_goods))
        .route("/api/offline-goods/:id/sales", post(record_sale))
        .route("/api/offline-goods/:id", delete(delete_goods))
        .route("/api/offline-suppliers", post(create_supplier))
        .route("/api/offline-suppliers/:id/payments", post(supplier_payment))
        .route("/api/offline-suppliers/:id/position", get(supplier_position))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("capital ledger server listening on {addr} (db: {db_path})");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

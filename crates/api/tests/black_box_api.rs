use reqwest::StatusCode;
use serde_json::{Value, json};

use stockledger_core::{ProductId, UserId, WarehouseId};
use stockledger_infra::LedgerSettings;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over a fresh in-memory store, on an ephemeral port.
        let app = stockledger_api::app::build_in_memory_app(LedgerSettings::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Client {
    http: reqwest::Client,
    user: String,
}

impl Client {
    fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            user: UserId::new().to_string(),
        }
    }

    async fn get(&self, url: String) -> (StatusCode, Value) {
        let res = self.http.get(url).header("x-user-id", &self.user).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, url: String, body: Value) -> (StatusCode, Value) {
        let res = self
            .http
            .post(url)
            .header("x-user-id", &self.user)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }
}

async fn receive(srv: &TestServer, client: &Client, product: ProductId, warehouse: WarehouseId, qty: i64) {
    let (status, body) = client
        .post(
            srv.url("/stock/movements"),
            json!({ "product_id": product, "warehouse_id": warehouse, "kind": "ENTRADA", "quantity": qty }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

async fn stock(srv: &TestServer, client: &Client, product: ProductId, warehouse: WarehouseId) -> Value {
    let (status, body) = client
        .get(srv.url(&format!("/stock?product_id={product}&warehouse_id={warehouse}")))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

#[tokio::test]
async fn health_is_public_and_everything_else_needs_an_actor() {
    let srv = TestServer::spawn().await;
    let http = reqwest::Client::new();

    let res = http.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = http.get(srv.url("/movements")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_actor");

    let res = http
        .get(srv.url("/movements"))
        .header("x-user-id", "nobody")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let client = Client::new();
    let (status, body) = client.get(srv.url("/whoami")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"].as_str().unwrap(), client.user);
}

#[tokio::test]
async fn single_movements_update_stock_and_reject_overdraw() {
    let srv = TestServer::spawn().await;
    let client = Client::new();
    let (product, warehouse) = (ProductId::new(), WarehouseId::new());

    let untouched = stock(&srv, &client, product, warehouse).await;
    assert_eq!(untouched["quantity"], 0);

    receive(&srv, &client, product, warehouse, 100).await;
    let row = stock(&srv, &client, product, warehouse).await;
    assert_eq!(row["quantity"], 100);
    assert_eq!(row["available"], 100);

    let (status, body) = client
        .post(
            srv.url("/stock/movements"),
            json!({ "product_id": product, "warehouse_id": warehouse, "kind": "SALIDA", "quantity": 150 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "stock_insufficient");
    assert_eq!(body["requested"], 150);
    assert_eq!(body["available"], 100);

    let (status, body) = client
        .post(
            srv.url("/stock/movements"),
            json!({ "product_id": product, "warehouse_id": warehouse, "kind": "SALIDA", "quantity": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let (status, page) = client
        .get(srv.url(&format!("/movements?product_id={product}")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["kind"], "ENTRADA");
    assert_eq!(page["items"][0]["user_id"].as_str().unwrap(), client.user);
}

#[tokio::test]
async fn reservation_lifecycle_over_http() {
    let srv = TestServer::spawn().await;
    let client = Client::new();
    let (product, warehouse) = (ProductId::new(), WarehouseId::new());
    receive(&srv, &client, product, warehouse, 1000).await;

    let (status, body) = client
        .post(
            srv.url("/reservations"),
            json!({ "product_id": product, "warehouse_id": warehouse, "quantity": 100, "document_number": "DOC-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["kind"], "RESERVA");

    let row = stock(&srv, &client, product, warehouse).await;
    assert_eq!((row["quantity"].as_i64(), row["reserved"].as_i64()), (Some(1000), Some(100)));
    assert_eq!(row["available"], 900);

    let (status, body) = client.get(srv.url("/reservations/DOC-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reservations"][0]["state"], "reserved");

    let (status, body) = client.post(srv.url("/reservations/DOC-1/consume"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["consumed"], 1);

    let row = stock(&srv, &client, product, warehouse).await;
    assert_eq!((row["quantity"].as_i64(), row["reserved"].as_i64()), (Some(900), Some(0)));

    let (_, page) = client.get(srv.url("/movements?document_number=DOC-1")).await;
    assert_eq!(page["total"], 2);

    let (status, body) = client.post(srv.url("/reservations/DOC-1/release"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 0);

    let (status, body) = client.post(srv.url("/reservations/DOC-1/consume"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_reservation_state");
}

fn upload(product: ProductId, warehouse: WarehouseId, rows: Value) -> Value {
    json!({
        "rows": rows,
        "catalogs": {
            "products": [{ "id": product, "name": "Café Molido" }],
            "warehouses": [{ "id": warehouse, "name": "Almacén Central" }],
        },
        "file_name": "ajustes.xlsx",
    })
}

#[tokio::test]
async fn upload_validate_commit_and_revert() {
    let srv = TestServer::spawn().await;
    let client = Client::new();
    let (product, warehouse) = (ProductId::new(), WarehouseId::new());

    let rows = json!([
        { "producto": "cafe molido", "cantidad": 40, "tipo_operacion": "ajuste_entrada", "tipo_motivo": "sobrante", "almacen": "almacen central" },
        { "producto": "Café Molido", "cantidad": 10, "tipo_operacion": "ajuste_entrada", "tipo_motivo": "sobrante", "almacen": "Almacén Central" },
        { "producto": "Cacao", "cantidad": 5, "tipo_operacion": "entrada", "almacen": "Almacén Central" },
    ]);

    let (status, body) = client
        .post(srv.url("/adjustments/validate"), upload(product, warehouse, rows.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["rows_valid"].as_array().unwrap().len(), 2);
    assert_eq!(body["rows_errored"].as_array().unwrap().len(), 1);
    assert_eq!(body["duplicate_groups"][0]["lines"], json!([1, 2]));
    assert_eq!(body["rows_valid"][1]["stock_after"], 50);

    let (status, batch) = client
        .post(srv.url("/adjustments/commit"), upload(product, warehouse, rows))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{batch}");
    assert_eq!(batch["status"], "processed");
    let id = batch["id"].as_str().unwrap().to_string();
    assert_eq!(stock(&srv, &client, product, warehouse).await["quantity"], 50);

    let (status, detail) = client.get(srv.url(&format!("/batches/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["movements"].as_array().unwrap().len(), 2);

    let (status, body) = client
        .post(srv.url(&format!("/batches/{id}/revert")), json!({ "reason": "" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, reverted) = client
        .post(srv.url(&format!("/batches/{id}/revert")), json!({ "reason": "archivo equivocado" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{reverted}");
    assert_eq!(reverted["status"], "reverted");
    assert_eq!(stock(&srv, &client, product, warehouse).await["quantity"], 0);

    let (status, body) = client
        .post(srv.url(&format!("/batches/{id}/revert")), json!({ "reason": "otra vez" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "batch_not_revertible");

    let (status, page) = client.get(srv.url("/batches?estado=revertido")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn failed_commit_reports_the_line_and_writes_nothing() {
    let srv = TestServer::spawn().await;
    let client = Client::new();
    let (product, warehouse) = (ProductId::new(), WarehouseId::new());

    let rows = json!([
        { "producto": "Café Molido", "cantidad": 10, "tipo_operacion": "entrada", "almacen": "Almacén Central" },
        { "producto": "Café Molido", "cantidad": 50, "tipo_operacion": "salida", "almacen": "Almacén Central" },
    ]);
    let (status, body) = client
        .post(srv.url("/adjustments/commit"), upload(product, warehouse, rows))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["error"], "batch_commit_failed");
    assert_eq!(body["line"], 2);
    assert_eq!(body["cause"], "stock_insufficient");

    assert_eq!(stock(&srv, &client, product, warehouse).await["quantity"], 0);
    let (_, page) = client.get(srv.url("/movements")).await;
    assert_eq!(page["total"], 0);

    let (_, drafts) = client.get(srv.url("/batches?estado=draft")).await;
    assert_eq!(drafts["total"], 1);
    let id = drafts["items"][0]["id"].as_str().unwrap().to_string();
    let (status, cancelled) = client.post(srv.url(&format!("/batches/{id}/cancel")), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
}

#[tokio::test]
async fn unknown_and_malformed_batch_ids() {
    let srv = TestServer::spawn().await;
    let client = Client::new();

    let missing = stockledger_core::BatchId::new();
    let (status, body) = client.get(srv.url(&format!("/batches/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "batch_not_found");

    let (status, _) = client.get(srv.url("/batches/not-an-id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = client.get(srv.url("/movements?kind=TELEPORT")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_parameter");
}

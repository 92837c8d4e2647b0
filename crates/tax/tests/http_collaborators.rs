//! HTTP tax provider and settings source against a local axum server.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use common::Money;
use rust_decimal::Decimal;
use tax::{
    Address, CalculationMethod, DEFAULT_HTTP_TIMEOUT, HttpSettingsSource, HttpTaxProvider, ProviderTaxRequest,
    ProviderTaxResult, SettingsSource, TaxCalculator, TaxLineItem, TaxProvider, TaxProviderKind,
    fetch_tax_settings,
};

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn calculate(
    headers: HeaderMap,
    Json(request): Json<ProviderTaxRequest>,
) -> Result<Json<ProviderTaxResult>, StatusCode> {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "Bearer secret");
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let base: i64 = request.lines.iter().map(|l| l.amount.cents()).sum();
    Ok(Json(ProviderTaxResult {
        amount: Money::from_cents(base / 10),
        breakdown: vec![],
    }))
}

fn provider_app() -> Router {
    Router::new().route("/tax/calculate", post(calculate))
}

fn external_settings() -> tax::TaxSettings {
    tax::TaxSettings {
        enabled: true,
        calculation_method: CalculationMethod::External,
        default_rate: Decimal::new(8, 2),
        ..tax::TaxSettings::default()
    }
}

fn line_items() -> [TaxLineItem; 1] {
    [TaxLineItem {
        id: "line-1".to_string(),
        amount: Money::from_cents(2000),
        quantity: 2,
        tax_code: None,
    }]
}

fn request() -> ProviderTaxRequest {
    ProviderTaxRequest {
        lines: vec![tax::ProviderTaxLine {
            id: "line-1".to_string(),
            amount: Money::from_cents(2000),
            quantity: 2,
            tax_code: None,
        }],
        shipping_cost: None,
        address: Address::new("US").with_state("CA"),
    }
}

#[tokio::test]
async fn http_provider_sends_bearer_key() {
    let base_url = spawn_server(provider_app()).await;
    let provider = HttpTaxProvider::new(base_url, Some("secret".to_string()), DEFAULT_HTTP_TIMEOUT).unwrap();

    let result = provider.calculate(&request()).await.unwrap();

    assert_eq!(result.amount, Money::from_cents(200));
}

#[tokio::test]
async fn http_provider_reports_upstream_status() {
    let base_url = spawn_server(provider_app()).await;
    let provider = HttpTaxProvider::new(base_url, Some("wrong".to_string()), DEFAULT_HTTP_TIMEOUT).unwrap();

    let err = provider.calculate(&request()).await.unwrap_err();

    assert!(matches!(err, tax::TaxError::Upstream { status: 401, .. }));
}

#[tokio::test]
async fn calculator_falls_back_when_provider_rejects() {
    let base_url = spawn_server(provider_app()).await;
    let provider = HttpTaxProvider::new(base_url, None, DEFAULT_HTTP_TIMEOUT).unwrap();
    let calculator = TaxCalculator::new(Arc::new(provider));

    let result = calculator
        .calculate_tax(
            &line_items(),
            Some(&Address::new("US")),
            Money::zero(),
            &external_settings(),
        )
        .await;

    assert_eq!(result.provider, TaxProviderKind::Manual);
    assert_eq!(result.tax_amount, Money::from_cents(160));
}

#[tokio::test]
async fn calculator_falls_back_when_provider_hangs() {
    let app = Router::new().route(
        "/tax/calculate",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK
        }),
    );
    let base_url = spawn_server(app).await;
    let provider = HttpTaxProvider::new(base_url, None, Duration::from_millis(200)).unwrap();
    let calculator = TaxCalculator::new(Arc::new(provider));

    let result = calculator
        .calculate_tax(
            &line_items(),
            Some(&Address::new("US")),
            Money::zero(),
            &external_settings(),
        )
        .await;

    assert_eq!(result.provider, TaxProviderKind::Manual);
    assert_eq!(result.tax_amount, Money::from_cents(160));
}

#[tokio::test]
async fn http_settings_source_reads_settings() {
    let app = Router::new().route(
        "/settings/tax",
        get(|| async {
            Json(serde_json::json!({
                "enabled": true,
                "calculationMethod": "manual",
                "defaultRate": 0.2,
                "taxShipping": false,
                "rates": []
            }))
        }),
    );
    let base_url = spawn_server(app).await;
    let source = HttpSettingsSource::new(format!("{base_url}/"), DEFAULT_HTTP_TIMEOUT).unwrap();

    let settings = source.tax_settings().await.unwrap();

    assert!(settings.enabled);
    assert_eq!(settings.default_rate, Decimal::new(2, 1));
}

#[tokio::test]
async fn http_settings_source_failure_uses_defaults() {
    let app = Router::new().route(
        "/settings/tax",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let base_url = spawn_server(app).await;
    let source = HttpSettingsSource::new(base_url, DEFAULT_HTTP_TIMEOUT).unwrap();

    assert!(source.tax_settings().await.is_err());
    assert_eq!(fetch_tax_settings(&source).await, tax::TaxSettings::default());
}

#[tokio::test]
async fn http_settings_source_times_out() {
    let app = Router::new().route(
        "/settings/tax",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK
        }),
    );
    let base_url = spawn_server(app).await;
    let source = HttpSettingsSource::new(base_url, Duration::from_millis(200)).unwrap();

    let err = source.tax_settings().await.unwrap_err();

    assert!(matches!(err, tax::TaxError::Http(ref e) if e.is_timeout()));
    assert_eq!(fetch_tax_settings(&source).await, tax::TaxSettings::default());
}

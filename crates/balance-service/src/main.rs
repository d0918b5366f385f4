//! Balance service binary entrypoint.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use balance_service::AppState;
use exchange_core::api::BybitClient;
use exchange_core::config::{load_dotenv, BalanceServiceConfig, ExchangeConfig, RiskSettings};
use risk_manager::BaselineResolver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "balance_service=info,risk_manager=info,exchange_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let exchange = ExchangeConfig::from_env()?;
    let risk = RiskSettings::load()?;
    let service = BalanceServiceConfig::from_env();

    let gateway = Arc::new(BybitClient::new(&exchange)?);
    let resolver = BaselineResolver::new(gateway, exchange.settlement_coin.clone())
        .with_breakdown_logging(risk.log_calculation_breakdown);

    let host: IpAddr = service
        .host
        .parse()
        .with_context(|| format!("invalid BALANCE_SERVICE_HOST {:?}", service.host))?;
    let addr = SocketAddr::new(host, service.port);

    balance_service::serve(
        addr,
        AppState {
            source: Arc::new(resolver),
        },
    )
    .await
}

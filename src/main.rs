use std::net::TcpListener;
use std::sync::Arc;
use toolbridge::configuration::get_configuration;
use toolbridge::mcp::tools::builtin_registry;
use toolbridge::startup::run;
use toolbridge::telemetry::{get_subscriber, init_subscriber};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = get_subscriber("toolbridge".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let settings = get_configuration().expect("Failed to read configuration.");

    let registry = builtin_registry(&settings.fetch).expect("Failed to build tool registry.");
    tracing::info!(tools = registry.len(), "Tool registry ready");

    let address = settings.address();
    tracing::info!("Start server at {:?}", &address);
    let listener =
        TcpListener::bind(&address).unwrap_or_else(|_| panic!("failed to bind to {}", address));

    run(listener, settings, Arc::new(registry))?.await
}

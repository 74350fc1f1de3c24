use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::configuration::TelemetrySettings;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured filter. JSON output is meant for log
/// shippers, the plain formatter for local development. Records emitted
/// through the `log` crate (actix-web's access log) are bridged in as well.
pub fn init_telemetry(settings: &TelemetrySettings) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if settings.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stdout)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
            .try_init()
    };

    if let Err(e) = result {
        // A subscriber is already installed, e.g. by a test harness.
        tracing::debug!("Tracing subscriber already initialised: {}", e);
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use designcheck_core::{Assessor, AssessorConfig};
use tracing::info;

use crate::cli::args::ServeArgs;
use crate::exit_codes;
use crate::server::{self, ServerOptions};

pub async fn run(args: ServeArgs, config: AssessorConfig) -> anyhow::Result<i32> {
    anyhow::ensure!(args.max_concurrent > 0, "--max-concurrent must be at least 1");

    let assessor = Arc::new(Assessor::from_config(&config)?);
    info!(
        rubric_version = %assessor.rubric().version,
        model = %config.model,
        max_attempts = config.max_attempts,
        max_concurrent = args.max_concurrent,
        rate_limit_per_minute = args.rate_limit_per_minute,
        trust_forwarded_for = args.trust_forwarded_for,
        "assessor ready"
    );

    let app = server::router(
        assessor,
        ServerOptions {
            max_concurrent: args.max_concurrent,
            rate_limit_per_minute: args.rate_limit_per_minute,
            trust_forwarded_for: args.trust_forwarded_for,
        },
    );
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(server::shutdown_signal())
    .await
    .context("server error")?;

    info!("server stopped");
    Ok(exit_codes::SUCCESS)
}

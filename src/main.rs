/// Modguard - chat moderation backend
///
/// Serves the moderation dashboard API and the message scanning endpoint
/// used by the chat bot.

use modguard::{config::ServerConfig, jobs, server, AppContext};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    init_tracing(&config.logging.level, config.logging.json);

    // Print banner
    print_banner();

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    let handles = scheduler.start();

    // Start server
    let result = server::serve((*ctx).clone()).await;

    for job in handles {
        job.abort();
    }

    result?;
    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("modguard={level},tower_http={level}").into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn print_banner() {
    println!(
        r#"
                     _                           _
  _ __ ___   ___   __| | __ _ _   _  __ _ _ __ __| |
 | '_ ` _ \ / _ \ / _` |/ _` | | | |/ _` | '__/ _` |
 | | | | | | (_) | (_| | (_| | |_| | (_| | | | (_| |
 |_| |_| |_|\___/ \__,_|\__, |\__,_|\__,_|_|  \__,_|
                        |___/
        Chat moderation backend v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}

//! Startup hook (SPEC_FULL.md §4.8): runs at each new interactive session.
//! Validates identity with the same rules the tool host uses, then
//! best-effort registers presence, drains queued offline notifications, and
//! publishes a SESSION_START message. None of the three steps are fatal.

use std::process::ExitCode;
use std::sync::Arc;

use coord_broker::BrokerClient;
use coord_core::Config;
use coord_core::types::{BROADCAST_TARGET, MessageType};

#[tokio::main]
async fn main() -> ExitCode {
    let cwd = std::env::current_dir().unwrap_or_default();
    let identity = match coord_identity::resolve_instance_id(&cwd) {
        Ok(id) => id,
        Err(err) => {
            eprintln!("startup-hook: identity resolution failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config::from_env();
    let store = match coord_redis::RedisStore::connect(&config.redis_url()).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("startup-hook: warning: coordination datastore not available, skipping: {err}");
            return ExitCode::SUCCESS;
        }
    };
    let broker = BrokerClient::new(Arc::new(store), config, identity.clone());

    if let Err(err) = broker.register(&identity, None).await {
        eprintln!("startup-hook: warning: failed to register presence: {err}");
    }

    match broker.pop_notifications(&identity, broker.config().notifications_cap(None)).await {
        Ok(events) if !events.is_empty() => println!("{} queued notification(s) waiting", events.len()),
        Ok(_) => {}
        Err(err) => eprintln!("startup-hook: warning: failed to fetch notifications: {err}"),
    }

    if let Err(err) = broker
        .publish(
            MessageType::StatusUpdate,
            "session_start",
            &format!("{identity} session starting"),
            &identity,
            BROADCAST_TARGET,
            false,
        )
        .await
    {
        eprintln!("startup-hook: warning: failed to publish SESSION_START: {err}");
    }

    ExitCode::SUCCESS
}

use std::process::ExitCode;
use std::sync::Arc;

use coord_broker::BrokerClient;
use coord_core::Config;
use coord_core::kv::KvStore;
use coord_host::protocol::JsonRpcResponse;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let identity = match coord_identity::resolve_instance_id(&std::env::current_dir().unwrap_or_default()) {
        Ok(id) => id,
        Err(err) => {
            eprintln!("coord-host: identity resolution failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(instance_id = %identity, "resolved instance identity");

    let config = Config::from_env();
    let store: Arc<dyn KvStore> = match coord_redis::RedisStore::connect(&config.redis_url()).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("coord-host: failed to connect to the coordination datastore: {err}");
            return ExitCode::FAILURE;
        }
    };

    let broker = BrokerClient::new(store, config, identity.clone());
    if let Err(err) = broker.register(&identity, None).await {
        tracing::warn!(error = %err, "presence registration at startup failed");
    }

    run_stdio(broker).await;
    ExitCode::SUCCESS
}

/// Read one line at a time from stdin; dispatch sequentially, so a tool
/// call in flight always finishes before the next line is read
/// (SPEC_FULL.md §5 "ordering"). Write responses to stdout one at a time,
/// flushing each so the peer sees it immediately.
async fn run_stdio(broker: BrokerClient) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "failed to read from stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match coord_host::parse_request(&line) {
            Ok(req) => coord_host::handle_request(&broker, req).await,
            Err(err) => {
                tracing::warn!(error = %err, "malformed JSON-RPC request, skipping");
                Some(coord_host::malformed_request_response(&err))
            }
        };

        if let Some(response) = response {
            if let Err(err) = write_response(&mut stdout, &response).await {
                tracing::error!(error = %err, "failed to write response to stdout");
                break;
            }
        }
    }
}

async fn write_response(stdout: &mut tokio::io::Stdout, response: &JsonRpcResponse) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}

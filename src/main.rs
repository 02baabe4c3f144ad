use anyhow::Context;
use signup::configuration::get_config;
use signup::domain::CreateUser;
use signup::handler::CreateUserError;
use signup::startup::Application;
use signup::telemetry::{get_subscriber, init_subscriber};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("signup".into(), "info".into(), std::io::stderr);
    init_subscriber(subscriber);

    let config = get_config().context("Failed to read configuration.")?;
    let application = Application::build(config).await?;

    // Commands arrive as JSON lines on stdin; the deferred task worker runs alongside.
    tokio::select! {
        outcome = application.run_until_stopped() => outcome,
        outcome = read_commands(&application) => outcome,
    }
}

async fn read_commands(application: &Application) -> Result<(), anyhow::Error> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let command: CreateUser = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error.message = %e, "Skipping a malformed command");
                continue;
            }
        };

        let reply = match application.command_bus().dispatch(command).await? {
            Ok(result) => serde_json::json!({ "id": result.id }),
            Err(CreateUserError::Validation(errors)) => serde_json::json!({
                "error": "validation",
                "violations": errors.violations(),
            }),
            Err(CreateUserError::Duplicate { field }) => {
                serde_json::json!({ "error": "duplicate", "field": field })
            }
            Err(e @ CreateUserError::Persistence(_)) => {
                serde_json::json!({ "error": "persistence", "message": e.to_string() })
            }
        };
        println!("{reply}");
    }

    // Keep the worker running after stdin closes.
    std::future::pending().await
}

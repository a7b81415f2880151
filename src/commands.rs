//! Command execution.

use agenthq_client::{CallbackResult, GatewayClient, GatewayStatus, SubscriptionId};
use agenthq_protocol::EventFrame;
use colored::Colorize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Formats connection status and server info.
pub fn status(client: &GatewayClient) -> String {
    format_status(&client.get_status())
}

/// Lists the advertised methods and events.
pub fn methods(client: &GatewayClient) -> String {
    let status = client.get_status();
    let mut output = format!("{}\n", "Methods".bold());
    for method in &status.available_methods {
        output.push_str(&format!("  {}\n", method.cyan()));
    }
    output.push_str(&format!("{}\n", "Events".bold()));
    for event in &status.available_events {
        output.push_str(&format!("  {}\n", event.yellow()));
    }
    output.trim_end().to_string()
}

/// Calls an RPC method and pretty-prints its result.
pub async fn call(
    client: &GatewayClient,
    method: &str,
    params: Option<&str>,
) -> Result<String, Box<dyn std::error::Error>> {
    let params = match params {
        Some(arg) => parse_json_arg(arg)?,
        None => json!({}),
    };
    let result = client.send_request(method, params).await?;
    Ok(format_json(&result))
}

/// Streams events to stdout until Ctrl+C. Keeps reconnecting in between.
pub async fn watch(
    client: &GatewayClient,
    events: Vec<String>,
) -> Result<String, Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscriptions: Vec<SubscriptionId> = if events.is_empty() {
        vec![client.on_any_event_sync(forward(tx))]
    } else {
        events
            .into_iter()
            .map(|name| client.on_event_sync(name, forward(tx.clone())))
            .collect()
    };

    if let Err(e) = client.connect().await {
        eprintln!("{}: {} (retrying)", "Connection failed".yellow(), e);
    }
    let mut states = client.state_changes();

    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());
    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                println!("{} {}", event.event.cyan(), event.payload);
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow();
                eprintln!("{} {}", "State:".dimmed(), state);
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping watch...".dimmed());
                break;
            }
        }
    }

    for id in subscriptions {
        client.unsubscribe(id);
    }
    Ok(String::new())
}

fn forward(
    tx: mpsc::UnboundedSender<EventFrame>,
) -> impl Fn(&EventFrame) -> CallbackResult + Send + Sync + 'static {
    move |event: &EventFrame| -> CallbackResult {
        tx.send(event.clone()).map_err(|e| e.to_string().into())
    }
}

fn format_status(status: &GatewayStatus) -> String {
    let state = if status.is_connected() {
        status.state.to_string().green()
    } else {
        status.state.to_string().red()
    };
    let mut output = format!("{} {}\n", "State:".bold(), state);
    if let Some(ref url) = status.endpoint {
        output.push_str(&format!("{} {}\n", "Gateway:".bold(), url));
    }
    if let Some(ref server) = status.server {
        output.push_str(&format!(
            "{} {} ({})\n",
            "Server:".bold(),
            server.version.as_deref().unwrap_or("unknown").cyan(),
            server.commit.as_deref().unwrap_or("-")
        ));
        if let Some(ref conn_id) = server.conn_id {
            output.push_str(&format!("{} {}\n", "Connection:".bold(), conn_id));
        }
    }
    if let Some(uptime) = status.uptime_ms {
        output.push_str(&format!("{} {}s\n", "Uptime:".bold(), uptime / 1000));
    }
    output.push_str(&format!(
        "{} {} methods, {} events",
        "Features:".bold(),
        status.available_methods.len(),
        status.available_events.len()
    ));
    output
}

/// Parses a JSON argument (or @file.json).
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

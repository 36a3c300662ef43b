//! `roslink` – command-line access to a running graph.
//!
//! Three subcommands, each a thin wrapper over the library:
//!
//! * `roslink pub  <topic> <type> <json>`  – publish one message
//! * `roslink echo <topic> <type>`         – print messages until Ctrl-C
//! * `roslink call <service> <type> <json>` – call a service once
//!
//! The master URI comes from `ROS_MASTER_URI` and message schemas are
//! located through `ROS_PACKAGE_PATH`, so the tool needs no configuration
//! of its own.

use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use roslink_msg::MessageValue;
use roslink_node::{Node, TopicEvent};
use roslink_types::RosError;
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    // Structured logging via RUST_LOG (defaults to "warn" so diagnostics do
    // not mix with message output). Set ROSLINK_LOG_FORMAT=json for
    // newline-delimited JSON logs.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    if std::env::var("ROSLINK_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("pub") if args.len() == 4 => cmd_pub(&args[1], &args[2], &args[3]).await,
        Some("echo") if args.len() == 3 => cmd_echo(&args[1], &args[2]).await,
        Some("call") if args.len() == 4 => cmd_call(&args[1], &args[2], &args[3]).await,
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        _ => {
            print_usage();
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("{} – command-line access to a running graph", "roslink".bold());
    println!();
    println!("Usage:");
    println!("  roslink pub  <topic> <type> <json>    publish one message");
    println!("  roslink echo <topic> <type>           print messages until Ctrl-C");
    println!("  roslink call <service> <type> <json>  call a service once");
    println!();
    println!("Environment:");
    println!("  ROS_MASTER_URI    registry to contact (default http://127.0.0.1:11311/)");
    println!("  ROS_PACKAGE_PATH  roots searched for .msg/.srv schema files");
    println!("  RUST_LOG          log filter (default \"warn\")");
}

fn parse_message(descriptor: &std::sync::Arc<roslink_msg::MessageDescriptor>, json: &str) -> Result<MessageValue, RosError> {
    let parsed: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| RosError::InvalidResponse(format!("invalid JSON argument: {e}")))?;
    MessageValue::from_json(descriptor.clone(), &parsed)
}

async fn cmd_pub(topic_name: &str, type_name: &str, json: &str) -> Result<(), RosError> {
    let node = Node::new("/roslink_pub");
    let topic = node.topic(topic_name, type_name).await?;
    let message = parse_message(topic.message_type(), json)?;

    let mut events = topic.events();
    topic.publish(message).await?;
    println!(
        "publishing on {} [{}], waiting for a subscriber …",
        topic.name().bold(),
        type_name
    );

    // The message is held until a peer completes the handshake; leave once
    // that happens or after a grace period.
    let wait = async {
        loop {
            match events.recv().await {
                Ok(TopicEvent::PublisherReady) => break,
                Ok(event) => debug!(?event, "topic event"),
                Err(_) => break,
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(30), wait).await {
        Ok(()) => println!("{}", "delivered".green()),
        Err(_) => println!("{}", "no subscriber appeared within 30s".yellow()),
    }
    topic.unregister_publisher().await
}

async fn cmd_echo(topic_name: &str, type_name: &str) -> Result<(), RosError> {
    let node = Node::new("/roslink_echo");
    let topic = node.topic(topic_name, type_name).await?;
    let mut rx = topic.subscribe().await?;
    println!("listening on {} [{}]", topic.name().bold(), type_name);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(message) => println!("{}", message.to_json()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("{}: dropped {n} message(s)", "lagged".yellow());
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }
    topic.unregister_subscriber().await
}

async fn cmd_call(service_name: &str, type_name: &str, json: &str) -> Result<(), RosError> {
    let node = Node::new("/roslink_call");
    let request_type = roslink_msg::get_service_request(type_name).await?;
    let request = parse_message(&request_type, json)?;
    let response = node.call_service(service_name, request).await?;
    println!("{}", response.to_json());
    Ok(())
}

//! Math service - two nodes on one in-process bus.
//!
//! This example demonstrates:
//! - Starting instances with the builder pattern
//! - Registering typed handlers, directly and through a plugin
//! - Awaiting replies, callbacks, and fire-and-forget sends
//! - Business errors and timeouts as values
//!
//! Run with `RUST_LOG=hemera=debug cargo run --example math` to see the
//! traffic.

use std::time::Duration;

use hemera::transport::MemoryTransport;
use hemera::{Hemera, HemeraError, Pattern, Plugin, ReplyContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Debug)]
struct Operands {
    a: i64,
    b: i64,
}

#[derive(Serialize, Debug)]
struct Sum {
    result: i64,
}

fn math_plugin() -> Plugin {
    Plugin::new("math", |hemera: &Hemera, _options| {
        hemera.add(
            Pattern::new().with("topic", "math").with("cmd", "add"),
            |args: Operands, ctx: ReplyContext| async move {
                ctx.reply(&Sum { result: args.a + args.b }).await
            },
        )?;
        hemera.add(
            Pattern::new().with("topic", "math").with("cmd", "sub"),
            |args: Operands, ctx: ReplyContext| async move {
                ctx.reply(&Sum { result: args.a - args.b }).await
            },
        )?;
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hemera=info".parse()?))
        .with_target(false)
        .init();

    let bus = MemoryTransport::new();

    let server = Hemera::builder(bus.connection())
        .timeout(Duration::from_secs(1))
        .start()
        .await?;
    server.use_plugin(math_plugin())?;
    server.add(
        Pattern::new().with("topic", "math").with("cmd", "div"),
        |args: Operands, ctx: ReplyContext| async move {
            if args.b == 0 {
                return ctx.fail("division by zero").await;
            }
            ctx.reply(&Sum { result: args.a / args.b }).await
        },
    )?;

    let client = Hemera::builder(bus.connection())
        .timeout(Duration::from_millis(200))
        .start()
        .await?;
    client.ready().await?;

    let sum = client
        .act(json!({ "topic": "math", "cmd": "add", "a": 1, "b": 2 }))
        .await?;
    println!("1 + 2 = {}", sum["result"]);

    client.act_with(
        json!({ "topic": "math", "cmd": "sub", "a": 5, "b": 3 }),
        |out| match out {
            Ok(v) => println!("5 - 3 = {}", v["result"]),
            Err(e) => println!("sub failed: {}", e),
        },
    )?;

    match client
        .act(json!({ "topic": "math", "cmd": "div", "a": 1, "b": 0 }))
        .await
    {
        Ok(v) => println!("1 / 0 = {}", v),
        Err(e) => print_error(&e),
    }

    match client.act(json!({ "topic": "email", "cmd": "send" })).await {
        Ok(v) => println!("unexpected reply {}", v),
        Err(e) => print_error(&e),
    }

    client
        .send(json!({ "topic": "math", "cmd": "add", "a": 0, "b": 0 }))
        .await?;

    println!("registered: {:?}", server.list().iter().map(|p| p.to_string()).collect::<Vec<_>>());

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await?;
    server.close().await?;
    Ok(())
}

fn print_error(err: &HemeraError) {
    match err.cause() {
        Some(cause) => println!("{} ({})", err, cause.message()),
        None => println!("{}", err),
    }
}

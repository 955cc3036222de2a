//! gzvrpc CLI: talk to a Gzv node from the terminal.
//!
//! Usage:
//! ```bash
//! # Call a method (bare names get the "Gzv_" prefix)
//! gzvrpc call --url http://127.0.0.1:8101 --method nonce --params '["0xabc"]'
//!
//! # Several calls in one batch
//! gzvrpc batch --url ws://127.0.0.1:8102 \
//!     --calls '[{"method":"blockHeight"},{"method":"nonce","params":["0xabc"]}]'
//!
//! # Namespaces the node serves
//! gzvrpc modules --url /var/run/gzv.ipc
//!
//! # Stream notifications
//! gzvrpc subscribe --url ws://127.0.0.1:8102 --params '["newBlocks"]' --count 10
//! ```

mod logging;

use std::env;
use std::fs;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;

use gzvrpc::{dial, BatchElem, Client, ClientConfig, RpcTransport};

use logging::{init_tracing, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let rest = &args[2..];
    init_tracing(&LogConfig {
        level: parse_flag(rest, "--log-level").unwrap_or_else(|| LogConfig::default().level),
        json: has_flag(rest, "--log-json"),
    });

    let result = match args[1].as_str() {
        "call" => cmd_call(rest).await,
        "batch" => cmd_batch(rest).await,
        "modules" => cmd_modules(rest).await,
        "subscribe" => cmd_subscribe(rest).await,
        "version" | "--version" | "-V" => {
            println!("gzvrpc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("gzvrpc {}", env!("CARGO_PKG_VERSION"));
    println!("JSON-RPC client for Gzv nodes (HTTP, WebSocket, IPC)\n");
    println!("USAGE:");
    println!("    gzvrpc <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    call       Send one JSON-RPC call");
    println!("    batch      Send several calls as one batch");
    println!("    modules    List the namespaces the node serves");
    println!("    subscribe  Print subscription notifications");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --url <URL>          http(s)://, ws(s):// or IPC socket path  [required]");
    println!("    --method <NAME>      method to call (call)");
    println!("    --params <JSON>      JSON array of parameters (call, subscribe)");
    println!("    --calls <JSON>       JSON array of {{\"method\", \"params\"}} (batch)");
    println!("    --namespace <NS>     subscription namespace (subscribe, default Gzv)");
    println!("    --count <N>          stop after N notifications (subscribe)");
    println!("    --timeout-ms <MS>    per-call deadline");
    println!("    --config <FILE>      JSON client configuration");
    println!("    --log-level <LEVEL>  log level when RUST_LOG is unset (default warn)");
    println!("    --log-json           structured JSON logs on stderr");
}

async fn connect(args: &[String]) -> Result<Client> {
    let url = parse_flag(args, "--url").context("--url is required")?;
    let config = match parse_flag(args, "--config") {
        Some(path) => load_config(&path)?,
        None => ClientConfig::default(),
    };
    dial(&url, config)
        .await
        .with_context(|| format!("connecting to {url}"))
}

fn deadline(args: &[String]) -> Result<Option<tokio::time::Instant>> {
    let Some(ms) = parse_flag(args, "--timeout-ms") else {
        return Ok(None);
    };
    let ms: u64 = ms.parse().context("--timeout-ms must be a number")?;
    Ok(Some(tokio::time::Instant::now() + Duration::from_millis(ms)))
}

async fn cmd_call(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").context("--method is required")?;
    let params = parse_params(parse_flag(args, "--params").as_deref())?;
    let deadline = deadline(args)?;

    let client = connect(args).await?;
    let result = client
        .call_with_deadline::<Value>(deadline, &method, params)
        .await;
    client.close().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn cmd_batch(args: &[String]) -> Result<()> {
    let calls = parse_flag(args, "--calls").context("--calls is required")?;
    let mut batch = parse_calls(&calls)?;
    let deadline = deadline(args)?;

    let client = connect(args).await?;
    let result = client.batch_call_with_deadline(deadline, &mut batch).await;
    client.close().await;
    result?;

    for elem in &batch {
        let line = match (&elem.result, &elem.error) {
            (_, Some(err)) => serde_json::json!({"method": elem.method, "error": err.to_string()}),
            (result, None) => serde_json::json!({"method": elem.method, "result": result}),
        };
        println!("{line}");
    }
    Ok(())
}

async fn cmd_modules(args: &[String]) -> Result<()> {
    let client = connect(args).await?;
    let modules = client.supported_modules().await;
    client.close().await;

    let mut modules: Vec<_> = modules?.into_iter().collect();
    modules.sort();
    for (name, version) in modules {
        println!("{name:<16} {version}");
    }
    Ok(())
}

async fn cmd_subscribe(args: &[String]) -> Result<()> {
    let namespace = parse_flag(args, "--namespace").unwrap_or_else(|| "Gzv".into());
    let params = parse_params(parse_flag(args, "--params").as_deref())?;
    let count = match parse_flag(args, "--count") {
        Some(n) => Some(n.parse::<usize>().context("--count must be a number")?),
        None => None,
    };

    let client = connect(args).await?;
    let (tx, mut rx) = mpsc::channel::<Value>(64);
    let mut sub = client.subscribe(&namespace, tx, params).await?;
    tracing::info!(subscription = sub.id(), "subscribed");

    let mut seen = 0usize;
    let outcome = loop {
        if count.is_some_and(|limit| seen >= limit) {
            break Ok(());
        }
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => {
                    println!("{item}");
                    seen += 1;
                }
                None => break Ok(()),
            },
            err = sub.err() => break err.map_or(Ok(()), |e| Err(e.into())),
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    sub.unsubscribe();
    client.close().await;
    outcome
}

fn load_config(path: &str) -> Result<ClientConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {path}"))
}

fn parse_params(raw: Option<&str>) -> Result<Vec<Value>> {
    let Some(raw) = raw else {
        return Ok(vec![]);
    };
    match serde_json::from_str::<Value>(raw).context("--params is not valid JSON")? {
        Value::Array(params) => Ok(params),
        other => bail!("--params must be a JSON array, got {other}"),
    }
}

fn parse_calls(raw: &str) -> Result<Vec<BatchElem>> {
    let calls = serde_json::from_str::<Value>(raw).context("--calls is not valid JSON")?;
    let Value::Array(calls) = calls else {
        bail!("--calls must be a JSON array");
    };
    calls
        .into_iter()
        .map(|call| {
            let method = call["method"]
                .as_str()
                .context("every call needs a \"method\" string")?;
            let params = match &call["params"] {
                Value::Null => vec![],
                Value::Array(params) => params.clone(),
                other => bail!("params of {method} must be an array, got {other}"),
            };
            Ok(BatchElem::new(method, params))
        })
        .collect()
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_are_found_by_name() {
        let a = args(&["--url", "ws://node", "--log-json", "--method", "nonce"]);
        assert_eq!(parse_flag(&a, "--url").as_deref(), Some("ws://node"));
        assert_eq!(parse_flag(&a, "--method").as_deref(), Some("nonce"));
        assert_eq!(parse_flag(&a, "--params"), None);
        assert!(has_flag(&a, "--log-json"));
    }

    #[test]
    fn params_must_be_an_array() {
        assert!(parse_params(None).unwrap().is_empty());
        assert_eq!(parse_params(Some(r#"["0xabc", 1]"#)).unwrap().len(), 2);
        assert!(parse_params(Some(r#"{"a": 1}"#)).is_err());
        assert!(parse_params(Some("[")).is_err());
    }

    #[test]
    fn calls_become_batch_elements() {
        let batch =
            parse_calls(r#"[{"method": "blockHeight"}, {"method": "nonce", "params": ["0xabc"]}]"#)
                .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].method, "blockHeight");
        assert!(batch[0].params.is_empty());
        assert_eq!(batch[1].params, vec![Value::from("0xabc")]);

        assert!(parse_calls(r#"[{"params": []}]"#).is_err());
        assert!(parse_calls(r#"[{"method": "x", "params": 3}]"#).is_err());
    }

    #[test]
    fn config_file_fills_in_defaults() {
        let path = env::temp_dir().join(format!("gzvrpc-cli-{}.json", process::id()));
        fs::write(&path, r#"{"namespace": "Explorer", "dial_timeout_ms": 250}"#).unwrap();

        let config = load_config(&path.display().to_string()).unwrap();
        assert_eq!(config.namespace.as_deref(), Some("Explorer"));
        assert_eq!(config.dial_timeout_ms, 250);
        assert_eq!(config.subscription_buffer, ClientConfig::default().subscription_buffer);

        fs::remove_file(&path).unwrap();
        assert!(load_config("/nonexistent/gzvrpc.json").is_err());
    }
}

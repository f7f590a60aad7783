//! Ledger server binary
//!
//! Reads newline-delimited JSON requests on stdin and answers each with one
//! JSON line on stdout:
//!
//! ```text
//! {"method":"submit_signed","signed":{"transaction":{..},"nonce":0,"public_key":"0x..","signature":"0x.."}}
//! {"ok":true,"result":{..receipt..}}
//!
//! {"method":"get_course_by_hash","hash":"0x.."}
//! {"ok":false,"error":{"reason":"Parse","message":".."}}
//! ```
//!
//! State-changing calls must be signed: the caller's identity comes from
//! the Ed25519 key, never from a claimed `from` field.
//!
//! Usage: `ledger-server [config.toml]`. Without a file the configuration is
//! read from `LEDGER_*` environment variables.

use anyhow::Context;
use marketplace_ledger::{
    course_hash, purchase_proof, Address, CourseHash, CourseId, Config, Error, Ledger,
    SignedTransaction,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// One request line
#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
enum Request {
    /// Signed call
    SubmitSigned { signed: SignedTransaction },
    GetCourseByHash { hash: CourseHash },
    GetCourseHashAtIndex { index: u64 },
    GetContractOwner,
    GetCourseCount,
    GetBalance,
    GetBreakerState,
    GetStatus,
    GetNonce { address: Address },
    GetReceipt { sequence: u64 },
    /// Identity hash helper for front-ends
    CourseHash { course_id: CourseId, buyer: Address },
    /// Proof helper for front-ends
    PurchaseProof { email: String, hash: CourseHash },
    /// Prometheus text exposition
    Metrics,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    reason: &'static str,
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (stderr, stdout carries responses)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Course Marketplace Ledger");

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?
            .with_env_overrides()?,
        None => Config::from_env()?,
    };

    // Open ledger
    let ledger = Ledger::open(config).await.context("opening ledger")?;
    tracing::info!("Ledger opened successfully");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let response = handle_line(&ledger, &line).await;
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                stdout.write_all(out.as_bytes()).await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break;
            }
        }
    }

    tracing::info!("Shutting down ledger server");
    ledger.shutdown().await?;
    Ok(())
}

async fn handle_line(ledger: &Ledger, line: &str) -> Value {
    let result = match serde_json::from_str::<Request>(line) {
        Ok(request) => dispatch(ledger, request).await,
        Err(e) => Err(Error::Parse(e.to_string())),
    };

    match result {
        Ok(result) => json!({ "ok": true, "result": result }),
        Err(e) => {
            if !e.is_rejection() {
                tracing::error!("Request failed: {}", e);
            }
            json!({
                "ok": false,
                "error": ErrorBody { reason: e.reason(), message: e.to_string() },
            })
        }
    }
}

async fn dispatch(ledger: &Ledger, request: Request) -> marketplace_ledger::Result<Value> {
    match request {
        Request::SubmitSigned { signed } => to_value(&ledger.submit_signed(signed).await?),
        Request::GetCourseByHash { hash } => to_value(&ledger.get_course_by_hash(hash).await?),
        Request::GetCourseHashAtIndex { index } => {
            to_value(&ledger.get_course_hash_at_index(index).await?)
        }
        Request::GetContractOwner => to_value(&ledger.get_contract_owner().await?),
        Request::GetCourseCount => to_value(&ledger.get_course_count().await?),
        Request::GetBalance => Ok(Value::String(ledger.get_balance().await?.to_string())),
        Request::GetBreakerState => to_value(&ledger.get_breaker_state().await?),
        Request::GetStatus => to_value(&ledger.get_status().await?),
        Request::GetNonce { address } => to_value(&ledger.get_nonce(address).await?),
        Request::GetReceipt { sequence } => to_value(&ledger.get_receipt(sequence)?),
        Request::CourseHash { course_id, buyer } => to_value(&course_hash(&course_id, &buyer)),
        Request::PurchaseProof { email, hash } => to_value(&purchase_proof(&email, &hash)),
        Request::Metrics => {
            let mut buffer = Vec::new();
            TextEncoder::new()
                .encode(&ledger.metrics().registry().gather(), &mut buffer)
                .map_err(|e| Error::Other(format!("metrics encoding: {}", e)))?;
            String::from_utf8(buffer)
                .map(Value::String)
                .map_err(|e| Error::Other(e.to_string()))
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> marketplace_ledger::Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Other(format!("encoding response: {}", e)))
}

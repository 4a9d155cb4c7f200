use std::panic;

use anyhow::Context;
use backtrace::Backtrace;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use xchain_provers::chains::ChainRegistry;
use xchain_provers::ProofEngine;

use crate::commands::Command;
use crate::config::Config;

mod commands;
mod config;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Clone, Debug)]
struct Cli {
    /// Path to the configuration file.
    #[clap(short, long)]
    config: Option<String>,

    /// If set, output logs in JSON format.
    #[clap(short, long, action)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

fn setup_logging(json: bool) -> anyhow::Result<()> {
    // Logs go to stderr, stdout carries the command's JSON output.
    if json {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .finish();
        tracing::subscriber::set_global_default(subscriber).context("setting up logging")
    } else {
        let subscriber = tracing_subscriber::fmt()
            .pretty()
            .compact()
            .with_writer(std::io::stderr)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .finish();
        tracing::subscriber::set_global_default(subscriber).context("setting up logging")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.json)?;

    panic::set_hook(Box::new(|panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => {
                match panic_info.payload().downcast_ref::<String>() {
                    Some(s) => &s[..],
                    None => "Box<dyn Any>",
                }
            },
        };
        let (file, lineno, col) = match panic_info.location() {
            Some(l) => (l.file(), l.line(), l.column()),
            None => ("<unknown>", 0, 0),
        };

        error!(
            msg,
            file,
            lineno,
            col,
            "Panic occurred: {:?}",
            Backtrace::new(),
        );
    }));

    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config).context("loading configuration")?;
    config.validate().context("validating configuration")?;
    debug!("Loaded configuration: {:?}", config);

    if let Some(port) = config.prometheus.port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("setting up Prometheus")?;
        info!(port, "Prometheus exporter listening");
    }

    let registry = ChainRegistry::builtin()
        .with_rpc_overrides(config.rpc.chain_urls()?)
        .context("applying RPC overrides")?;
    let engine = ProofEngine::new(registry);

    let output = cli.command.execute(&engine).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prove_command() {
        let cli = Cli::try_parse_from([
            "xchain",
            "--json",
            "prove",
            "--chain",
            "Ethereum Mainnet",
            "--contract",
            "0x5A98FcBEA516Cf06857215779Fd812CA3beF1B32",
            "--holder",
            "0x3e40D73EB977Dc6a537aF587D48316feE66E9C8c",
        ])
        .unwrap();

        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Command::Prove {
                block_hash: None,
                ..
            }
        ));
    }

    #[test]
    fn rejects_conflicting_block_arguments() {
        let parsed = Cli::try_parse_from([
            "xchain",
            "header",
            "--chain",
            "1",
            "--block-number",
            "5",
            "--block-hash",
            "0xd4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3",
        ]);
        assert!(parsed.is_err());
    }
}

use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(name = "fcgx", about = "Send one HTTP request to a FastCGI application")]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// FastCGI application address ("host:port", "fastcgi://host:port" or "unix://path").
    /// Overrides the config file's `address` field when provided.
    #[arg(short, long)]
    address: Option<String>,

    /// Script to run, relative to the document root. Overrides config.
    #[arg(short, long)]
    script: Option<String>,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header in "Name: value" form; may be repeated.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body.
    #[arg(short, long)]
    data: Option<String>,

    /// Request URL or path, e.g. "http://example.com/index.php?id=1".
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = fcgx::config::load_config(&cli.config)?;
    if let Some(address) = cli.address {
        cfg.address = address;
    }
    if let Some(script) = cli.script {
        cfg.script = script;
    }
    cfg.validate()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let req = fcgx::forward::build_request(&cli.method, &cli.url, &cli.headers, cli.data)?;
    let resp = fcgx::forward::run(&cfg, &req).await?;
    if resp.status_code().is_none() {
        warn!(status = resp.status, "application returned a non-standard status code");
    }

    let head = fcgx::forward::render_head(&resp);
    let body = resp.body.collect_bytes()?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(head.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.write_all(&body)?;
    stdout.flush()?;
    Ok(())
}

//! `ladon-fetch`: run one request through the pipeline and print its metadata.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use console::style;

use ladon_net::config::CONFIG_PATH_ENV;
use ladon_net::{HttpClient, HttpClientConfig, Meta, Method, RequestSpec};

#[derive(Parser)]
#[command(name = "ladon-fetch")]
#[command(about = "Fetch a URL through the polite request pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Save the response body to this file instead of printing it to stderr
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Send a HEAD request and skip the body
    #[arg(long, conflicts_with_all = ["output", "method"])]
    head: bool,

    /// Correlation id recorded in the metadata
    #[arg(long)]
    trace_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// URL to fetch
    url: String,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("header {:?} is not in `Name: value` form", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("header {:?} has an empty name", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Cli {
    fn request(&self) -> anyhow::Result<RequestSpec> {
        let method = if self.head {
            Method::HEAD
        } else {
            Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid method {:?}", self.method))?
        };

        let mut spec = RequestSpec::new(method, self.url.clone());
        for raw in &self.headers {
            let (name, value) = parse_header(raw)?;
            spec = spec.header(name, value);
        }
        if let Some(trace_id) = &self.trace_id {
            spec = spec.trace_id(trace_id.clone());
        }
        Ok(spec)
    }
}

fn print_meta(meta: &Meta) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(meta)?);
    Ok(())
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HttpClientConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => HttpClientConfig::default(),
    };
    let client = HttpClient::new(config)?;
    let spec = cli.request()?;

    let result = if cli.head {
        client.execute_head(spec).await.map(|fetched| {
            eprintln!(
                "{} {} {}",
                style("HEAD").bold(),
                fetched.value.status,
                fetched.value.url
            );
            fetched.meta
        })
    } else if let Some(output) = &cli.output {
        client.download(spec, output).await.map(|fetched| {
            eprintln!(
                "{} Saved {} bytes to {} (sha256 {})",
                style("✓").green(),
                fetched.value.size,
                fetched.value.path.display(),
                fetched.value.sha256
            );
            fetched.meta
        })
    } else {
        client.execute(spec).await.map(|fetched| {
            eprintln!(
                "{} {} {}",
                style("✓").green(),
                fetched.value.status,
                fetched.value.url
            );
            eprintln!("{}", fetched.value.text());
            fetched.meta
        })
    };

    match result {
        Ok(meta) => print_meta(&meta),
        Err(error) => {
            print_meta(&error.meta)?;
            Err(anyhow!(error.kind)).context(format!("{} {}", style("✗").red(), cli.url))
        }
    }
}

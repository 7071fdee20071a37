//! Thin CLI front-end. Resolves a single share URL per invocation and
//! prints the resulting [`teraforge::MediaInfo`] as JSON.
//!
//! `anyhow` is used here, and only here — library code returns typed
//! [`teraforge::ExtractError`] throughout; this binary is the one boundary
//! where turning any failure into a formatted exit message is appropriate.

use tracing::info;

use teraforge::Core;

fn usage() -> ! {
    eprintln!("usage: teraforge <share-url>");
    std::process::exit(2)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let url = std::env::args().nth(1).unwrap_or_else(|| usage());

    let core = Core::from_env()?;
    info!(url, "extracting");

    let media = core.extract(&url).await?;
    println!("{}", serde_json::to_string_pretty(&media)?);

    core.close();
    Ok(())
}

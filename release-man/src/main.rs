use anyhow::Result;
use clap::Parser;
use gsutil_run::{Gsutil, GsutilConfig, project_root};
use release_man::{
    Error, Platform, ReleaseManager, ReleaseRequest,
    defaults::{default_target, deps_chrome_version},
};
use std::path::PathBuf;

/// Download a specific Chrome release build.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Chrome version string (e.g., 85.0.4183.83) [default: the version pinned in DEPS]
    #[clap(long = "version_number", alias = "version-number")]
    version_number: Option<String>,
    /// Platform (e.g., win64, linux64, mac64, mac-arm) [default: the host platform]
    #[clap(long)]
    platform: Option<String>,
    /// Target directory [default: third_party/branded_chrome]
    #[clap(long)]
    target: Option<PathBuf>,
}

fn main() -> Result<()> {
    use tracing_subscriber::EnvFilter;
    tracing_log::LogTracer::init().ok();
    let env = std::env::var("RELEASE_MAN_LOG").unwrap_or_else(|_| "warn".into());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let args = Args::parse();
    let root = project_root();

    let version = match args.version_number {
        Some(version) => version,
        None => deps_chrome_version(&root).ok_or_else(|| {
            Error::Configuration(
                "could not read the Chrome version from DEPS, pass --version_number".into(),
            )
        })?,
    };
    let platform = args
        .platform
        .or_else(|| Platform::host().map(|platform| platform.to_string()))
        .unwrap_or_default();
    let target = args.target.unwrap_or_else(|| default_target(&root));

    let manager = ReleaseManager::new(Gsutil::new(GsutilConfig::from_env(&root)));
    let binary = manager.materialize(&ReleaseRequest::new(version, platform, target))?;

    println!("Branded Chrome binary downloaded to: {}", binary.display());
    Ok(())
}

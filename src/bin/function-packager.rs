use std::path::Path;

use anyhow::{bail, Context, Result};
use function_packager::artifact::codec::list_members;
use function_packager::artifact::{package_all, PackContext};
use function_packager::pipeline::load_build_config;
use function_packager::ArchiveFormat;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  function-packager pack <build.toml>\n  function-packager inspect <artifact.zip|artifact.tar.zst>"
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [pack, config] if pack == "pack" => pack_all(Path::new(config)).await,
        [inspect, archive] if inspect == "inspect" => inspect_archive(Path::new(archive)),
        _ => bail!(usage()),
    }
}

async fn pack_all(config_path: &Path) -> Result<()> {
    let config = load_build_config(config_path)?;

    let mut ctx = PackContext::new();
    if let Some(workers) = config.concurrency {
        ctx = ctx.with_concurrency(workers);
    }
    if let Some(module) = &config.bootstrap_module {
        ctx = ctx.with_bootstrap_module(module);
    }
    info!(
        functions = config.requests.len(),
        output_dir = %config.output_dir.display(),
        concurrency = ctx.concurrency(),
        "packaging build"
    );

    let total = config.requests.len();
    let results = package_all(config.requests, config.mode, &ctx).await;

    let mut failed = 0usize;
    for result in results {
        match result {
            Ok(packaged) => {
                let digest = packaged
                    .digest
                    .as_ref()
                    .map(|d| format!("  sha256:{} ({} bytes)", d.sha256, d.size_bytes))
                    .unwrap_or_default();
                println!(
                    "{}  {}  entry={}{}",
                    packaged.name,
                    packaged.path.display(),
                    packaged.entry_filename,
                    digest
                );
            }
            Err(e) => {
                failed += 1;
                error!("{e}");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {total} functions failed to package");
    }
    Ok(())
}

fn inspect_archive(path: &Path) -> Result<()> {
    let name = path.to_string_lossy();
    let format = if name.ends_with(".tar.zst") {
        ArchiveFormat::TarZst
    } else if name.ends_with(".zip") {
        ArchiveFormat::Zip
    } else {
        bail!(
            "cannot tell archive format of '{}' (expected .zip or .tar.zst)",
            path.display()
        );
    };

    let members = list_members(format, path)
        .with_context(|| format!("listing members of '{}'", path.display()))?;
    for member in members {
        println!("{member}");
    }
    Ok(())
}

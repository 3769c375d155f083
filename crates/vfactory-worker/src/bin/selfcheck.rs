use std::path::Path;

use vfactory_media::check_tool;
use vfactory_storage::{LocalStorage, S3Config, S3Storage};
use vfactory_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "vfactory-selfcheck: starting with temp_folder={}",
        config.temp_folder.display()
    );
    config.validate()?;
    ensure_writable(&config.temp_folder).await?;
    println!("vfactory-selfcheck: temp folder: ok");
    ensure_tools(&[
        config.auto_editor_binary.as_str(),
        config.whisper_binary.as_str(),
        config.ffmpeg_binary.as_str(),
        "ffprobe",
    ])?;
    ensure_storage(&config.output_folder).await?;

    println!("vfactory-selfcheck: ok");
    Ok(())
}

async fn ensure_writable(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_tools(tools: &[&str]) -> anyhow::Result<()> {
    for tool in tools {
        let path = check_tool(tool)?;
        println!("vfactory-selfcheck: {} at {}: ok", tool, path.display());
    }
    Ok(())
}

async fn ensure_storage(local_root: &Path) -> anyhow::Result<()> {
    match S3Config::from_env()? {
        Some(config) => {
            let bucket = config.bucket.clone();
            S3Storage::new(config)
                .await?
                .check_connectivity()
                .await
                .map_err(|e| anyhow::anyhow!("bucket {} not reachable: {}", bucket, e))?;
            println!("vfactory-selfcheck: bucket {}: ok", bucket);
        }
        None => {
            let storage = LocalStorage::new(local_root)?;
            ensure_writable(storage.root()).await?;
            println!("vfactory-selfcheck: local storage at {}: ok", storage.root().display());
        }
    }
    Ok(())
}

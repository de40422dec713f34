//! `otadl delete` – cancel all work and erase the artifact's files and offset.

use anyhow::Result;
use otadl_core::config::OtaConfig;
use otadl_core::Engine;

pub async fn run_delete(cfg: OtaConfig) -> Result<()> {
    let engine = Engine::open(cfg).await?;
    match engine.recover(false).await? {
        Some(descriptor) => {
            engine.delete().await?;
            println!("Deleted {}", descriptor.filename());
        }
        None => println!("Nothing to delete."),
    }
    Ok(())
}

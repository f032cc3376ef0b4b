//! `genq artifacts list|delete` – browse the artifact store.

use anyhow::Result;
use genq_core::artifact::{ArtifactPage, ArtifactStore, FsArtifactStore};
use genq_core::config::GenqConfig;

fn print_page(page: &ArtifactPage) {
    if page.items.is_empty() {
        println!("No artifacts.");
        return;
    }
    println!("{:>10}  {}", "SIZE", "KEY");
    for item in &page.items {
        println!("{:>10}  {}", item.size, item.key);
    }
    if let (true, Some(cursor)) = (page.truncated, page.next_cursor.as_deref()) {
        println!("more: --cursor {cursor}");
    }
}

pub async fn run_artifacts_list(
    cfg: &GenqConfig,
    prefix: &str,
    page_size: usize,
    cursor: Option<&str>,
) -> Result<()> {
    let store = FsArtifactStore::open(cfg.artifacts_root()?)?;
    let page = store.list(prefix, page_size.max(1), cursor).await?;
    print_page(&page);
    Ok(())
}

pub async fn run_artifacts_delete(cfg: &GenqConfig, key: &str) -> Result<()> {
    let store = FsArtifactStore::open(cfg.artifacts_root()?)?;
    store.delete(key).await?;
    println!("Deleted {key}");
    Ok(())
}

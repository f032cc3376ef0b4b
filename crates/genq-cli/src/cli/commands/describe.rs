//! `genq describe <FILE>` – ask the provider for a prompt that matches an image.

use anyhow::{Context, Result};
use genq_core::config::GenqConfig;
use genq_core::provider::{http_client, DescribeClient, DescribeOptions};
use std::path::Path;

use super::enqueue::data_url_from_file;

pub async fn run_describe(
    cfg: &GenqConfig,
    image: &Path,
    bot_type: Option<String>,
    provider: Option<String>,
) -> Result<()> {
    let endpoint = cfg
        .providers_config()
        .resolve(provider.as_deref())
        .context("no provider credentials configured")?;
    let data_url = data_url_from_file(image).await?;

    let mut opts = DescribeOptions::default();
    if let Some(bot_type) = bot_type {
        opts.bot_type = bot_type;
    }
    println!("Describing {} ...", image.display());
    let prompt = DescribeClient::new(http_client()?)
        .describe(&endpoint, &data_url, &opts)
        .await
        .context("describe")?;
    if prompt.is_empty() {
        println!("The provider returned no prompt.");
    } else {
        println!("{prompt}");
    }
    Ok(())
}

use std::time::Instant;

use anyhow::Result;
use tracing::info;

use tgab_fetch::utils::display_elapsed_time;
use tgab_fetch::{Config, TgabCrawler, logger};

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    info!("开始运行");

    let start = Instant::now();
    let config = Config::load()?;
    let crawler = TgabCrawler::new(config)?;

    let epub_path = crawler.generate_epub().await?;
    info!("电子书已保存到: {}", epub_path.display());

    display_elapsed_time(start.elapsed());
    Ok(())
}

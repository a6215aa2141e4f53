// snaprelay - process entry point

use std::sync::Arc;

use anyhow::Context;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use snaprelay::relay::{HttpFetcher, RelayConfig, RunController};
use snaprelay::telegram::{Bot, TelegramApi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("initializing logger")?;

    let token = std::env::var("TELEGRAM_BOT_TOKEN")
        .context("TELEGRAM_BOT_TOKEN is not set; get a token from @BotFather")?;

    let mut config = RelayConfig::default();
    if let Ok(proxy) = std::env::var("SNAPRELAY_PROXY") {
        log::info!("using proxy {}", proxy);
        config = config.with_proxy(Some(proxy));
    }

    let api = TelegramApi::new(&token).context("building Telegram client")?;
    let fetcher = HttpFetcher::new(&config).context("building fetch client")?;
    let controller = Arc::new(RunController::new(
        Arc::new(api.clone()),
        Arc::new(fetcher),
        config,
    ));

    log::info!("snaprelay is running");
    Bot::new(api, controller).run().await;
    Ok(())
}

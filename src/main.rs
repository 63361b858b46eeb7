use std::sync::Arc;

use spot_history::store::{HistoryStore, StoreOptions};
use spot_history::{import, service, CONFIG, LOG};

const USAGE: &str = "usage: spot-history [serve | import <file-or-dir>... | clear | stats]";

async fn run_import(store: &HistoryStore, paths: &[String]) -> anyhow::Result<()> {
    if paths.is_empty() {
        anyhow::bail!(USAGE);
    }
    for path in paths {
        let records = import::load_export(path).await?;
        slog::info!(LOG, "loaded export"; "path" => path, "records" => records.len());
        let summary = store.import_history(&records).await?;
        println!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    CONFIG.initialize()?;

    let store = Arc::new(HistoryStore::open(StoreOptions::from_config(&CONFIG)).await?);
    let args: Vec<String> = std::env::args().skip(1).collect();
    let res = match args.first().map(String::as_str) {
        None | Some("serve") => service::start(store.clone()).await.map_err(anyhow::Error::from),
        Some("import") => run_import(&store, &args[1..]).await,
        Some("clear") => store.clear_history().await.map_err(anyhow::Error::from),
        Some("stats") => match store.stats().await {
            Ok(stats) => {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Some(other) => Err(anyhow::anyhow!("unknown command {:?}\n{}", other, USAGE)),
    };
    store.close().await;
    res
}

mod args;

use anyhow::{Context, Result};
use confsync_client::{ConfClient, Environment, Source, SyncError};
use confsync_helpers::{logging, shutdown};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use args::WatchArgs;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    logging::init(
        "confsync_watch=info,confsync_client=info",
        "CONFSYNC_LOG",
    );

    let args = WatchArgs::parse(std::env::args().skip(1))?;
    let env = Environment::from_env()
        .context("failed to resolve configuration environment")?;

    info!(
        "watching configuration: name={}, source={:?}, profile={}",
        args.name,
        args.source,
        env.profile()
    );

    let client = ConfClient::new(env);
    client.set_change_callback(|name, object| {
        info!(
            "configuration refreshed: name={}, entries={}",
            name,
            object.len()
        );
    });

    let handle = match client.subscribe(&args.name, args.source).await {
        Ok(handle) => handle,
        Err(SyncError::DialFailed(err))
            if args.source == Source::CenterTcp =>
        {
            warn!(
                "center unreachable, falling back to snapshot: error={err}"
            );
            client
                .subscribe(&args.name, Source::Snapshot)
                .await
                .context("snapshot fallback failed")?
        }
        Err(err) => {
            return Err(err).context("subscribe failed");
        }
    };

    for (key, value) in handle.all() {
        println!("{key} = {value}");
    }

    // Only the TCP source keeps delivering; everything else is done.
    if args.source == Source::CenterTcp {
        let token = CancellationToken::new();
        tokio::spawn(shutdown::listen(token.clone()));
        token.cancelled().await;
    }

    client.shutdown();
    Ok(())
}

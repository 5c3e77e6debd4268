//! `khidma watch` -- live notification feed for the signed-in user.
//!
//! Connects with the changefeed enabled, spawns a [`UserFeed`], and
//! prints every toast until Ctrl-C (or `--count` notifications).

use std::sync::Arc;

use owo_colors::OwoColorize;

use khidma_core::{Marketplace, NullNotifier, Presenter, UserFeed};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output::should_color;

pub async fn handle(
    args: WatchArgs,
    marketplace: &Marketplace,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    marketplace.connect().await.map_err(CliError::from)?;

    let presenter = Presenter::new(Arc::new(NullNotifier));
    let mut toasts = presenter.toasts();

    let feed = UserFeed::spawn(marketplace, presenter)
        .await
        .map_err(CliError::from)?;

    if feed.is_degraded() && !global.quiet {
        eprintln!("warning: some live channels are unavailable, coverage is partial");
    }

    if !global.quiet {
        eprintln!("watching for notifications (Ctrl-C to stop)...");
    }

    let mut seen: u64 = 0;
    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => break,

            toast = toasts.recv() => {
                let Ok(toast) = toast else { break };
                print_toast(&toast.title, &toast.body);

                seen += 1;
                if args.count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }
    }

    feed.shutdown().await;
    marketplace.disconnect().await;
    Ok(())
}

fn print_toast(title: &str, body: &str) {
    if should_color() {
        println!("{}  {}", title.bold().cyan(), body);
    } else {
        println!("{title}  {body}");
    }
}

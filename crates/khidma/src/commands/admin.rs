//! `khidma admin` -- the admin alert feed.
//!
//! One-shot mode prints the current counts and alerts once the feed is
//! ready; `--follow` keeps the feed open and prints every update.

use std::sync::Arc;

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::Tabled;

use khidma_core::{AdminFeed, AdminSnapshot, FeedPhase, Marketplace, NullNotifier, Presenter};

use crate::cli::{AdminArgs, GlobalOpts};
use crate::error::CliError;
use crate::output::{print_output, render_list, should_color};

#[derive(Serialize)]
struct AlertOut {
    id: String,
    category: String,
    title: String,
    message: String,
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "CATEGORY")]
    category: String,
    #[tabled(rename = "TITLE")]
    title: String,
    #[tabled(rename = "MESSAGE")]
    message: String,
}

pub async fn handle(
    args: AdminArgs,
    marketplace: &Marketplace,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    marketplace.connect().await.map_err(CliError::from)?;

    let identity = marketplace.identity().await.map_err(CliError::from)?;
    if !identity.is_admin() {
        marketplace.disconnect().await;
        return Err(CliError::Permission {
            reason: "the admin feed requires the admin role".into(),
        });
    }

    let presenter = Presenter::new(Arc::new(NullNotifier));
    let mut toasts = presenter.toasts();

    let feed = AdminFeed::spawn(marketplace, presenter)
        .await
        .map_err(CliError::from)?;

    // Wait for the initial count fetch (Loading -> Ready).
    let mut snapshots = feed.watch();
    while snapshots.borrow().phase == FeedPhase::Loading {
        if snapshots.changed().await.is_err() {
            break;
        }
    }

    print_snapshot(&feed.snapshot(), global);

    if args.follow {
        if !global.quiet {
            eprintln!("following admin alerts (Ctrl-C to stop)...");
        }
        loop {
            tokio::select! {
                biased;

                _ = tokio::signal::ctrl_c() => break,

                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    if snapshot.phase == FeedPhase::Disposed {
                        break;
                    }
                    print_snapshot(&snapshot, global);
                }

                toast = toasts.recv() => {
                    if let Ok(toast) = toast {
                        if should_color() {
                            println!("{}  {}", toast.title.bold().yellow(), toast.body);
                        } else {
                            println!("{}  {}", toast.title, toast.body);
                        }
                    }
                }
            }
        }
    }

    feed.dispose().await;
    marketplace.disconnect().await;
    Ok(())
}

fn print_snapshot(snapshot: &AdminSnapshot, global: &GlobalOpts) {
    if !global.quiet {
        let badge = format!(
            "{} pending documents, {} pending requests, {} new users (badge total: {})",
            snapshot.counts.documents,
            snapshot.counts.requests,
            snapshot.counts.new_users,
            snapshot.total_alerts(),
        );
        if snapshot.degraded {
            eprintln!("{badge} [degraded: live updates unavailable]");
        } else {
            eprintln!("{badge}");
        }
    }

    let alerts: Vec<AlertOut> = snapshot
        .alerts
        .iter()
        .map(|a| AlertOut {
            id: a.id.clone(),
            category: format!("{:?}", a.category).to_lowercase(),
            title: a.title.clone(),
            message: a.message.clone(),
        })
        .collect();

    let rendered = render_list(
        &global.output,
        &alerts,
        |a| AlertRow {
            category: a.category.clone(),
            title: a.title.clone(),
            message: a.message.clone(),
        },
        |a| a.id.clone(),
    );
    print_output(&rendered, global.quiet);
}

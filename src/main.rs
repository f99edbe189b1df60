#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::if_not_else, clippy::non_ascii_literal)]

use netsweep::budget::{infer_budget_or_default, raise_nofile_limit, ConcurrencyBudget};
use netsweep::input::{Config, Opts};
use netsweep::scanner::Scanner;
use netsweep::{detail, output, warning};

use anyhow::Context;
use colored::Colorize;
use log::debug;
use std::time::Instant;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts: Opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    if opts.addresses.is_empty() {
        warning!(
            "No addresses given. Pass a range, CIDR block or host with -a.",
            opts.greppable,
            opts.accessible
        );
        std::process::exit(1);
    }

    let scan_config = opts
        .to_scan_config()
        .context("building scan configuration")?;

    if let Some(limit) = opts.ulimit {
        let soft = raise_nofile_limit(limit)?;
        detail!(
            format!("The open file limit is now {soft}."),
            opts.greppable,
            opts.accessible
        );
    }

    let budget = opts
        .budget
        .map_or_else(infer_budget_or_default, ConcurrencyBudget::new);

    let scanner = Scanner::new(scan_config, budget);
    detail!(
        format!(
            "Probing {} port(s) over {} with up to {budget} connections in flight, {}ms timeout.",
            scanner.config().ports().len(),
            scanner.config().protocol().as_str(),
            scanner.config().timeout().as_millis()
        ),
        opts.greppable,
        opts.accessible
    );
    let cancel = scanner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let scan_start = Instant::now();
    let devices = scanner.run(&opts.addresses).await?;
    let elapsed = scan_start.elapsed();
    debug!("Scan finished in {elapsed:?}");

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    for device in devices.iter().filter(|d| d.open) {
        let line = format!("Open {}:{}", device.address, device.port);
        if opts.accessible || opts.greppable {
            output!(line, opts.greppable, opts.accessible);
        } else {
            output!(line.purple());
        }
    }

    let open = devices.iter().filter(|d| d.open).count();
    detail!(
        format!(
            "{open} of {} devices open, scanned in {:.2}s.",
            devices.len(),
            elapsed.as_secs_f64()
        ),
        opts.greppable,
        opts.accessible
    );

    Ok(())
}

use std::io::Write;

use crate::notifications::NotificationLevel;

mod aggregator;
mod args;
mod consts;
mod converter;
mod crds;
mod ctx;
mod emitters;
mod err;
mod ir;
mod notifications;
mod output;
mod pipeline;
mod providers;
mod reader;
mod utils;
mod value_filters;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let ctx = ctx::Context::new();
    tracing_subscriber::fmt()
        .with_max_level(ctx.args.log_level)
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!("CLI arguments: {:?}", ctx.args);

    let input = ctx.read_input().await?;
    tracing::info!(
        ingresses = input.ingresses.len(),
        services = input.services.len(),
        "Loaded input resources"
    );

    let mut notes = notifications::Notifications::new();
    let rendered = pipeline::run(&ctx.args, &input, &mut notes)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.flush()?;

    if !notes.is_empty() {
        eprintln!("{notes}");
        tracing::info!(
            errors = notes.count(NotificationLevel::Error),
            warnings = notes.count(NotificationLevel::Warning),
            infos = notes.count(NotificationLevel::Info),
            "Conversion report"
        );
    }
    Ok(())
}

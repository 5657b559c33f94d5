use std::process;

use edgecache::{
    config::{self, Command, DecideArgs, PurgeTagsArgs},
    infra::{error::InfraError, telemetry},
    scenario::{DecisionReport, Scenario},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Decide(args) => run_decide(&settings, args),
        Command::PurgeTags(args) => run_purge_tags(&settings, args),
    }
}

fn run_decide(settings: &config::Settings, args: DecideArgs) -> Result<(), InfraError> {
    let scenario = Scenario::from_path(&args.file)?;
    info!(
        target = "edgecache::decide",
        path = %args.file.display(),
        events = scenario.events.len(),
        "Running scenario"
    );

    let emission = scenario.decide(&settings.cache);
    let report = DecisionReport::from(&emission);

    if args.json {
        let rendered = serde_json::to_string_pretty(&report).map_err(|err| {
            InfraError::configuration(format!("failed to render report: {err}"))
        })?;
        println!("{rendered}");
    } else {
        println!("{}", report.to_text());
    }
    Ok(())
}

fn run_purge_tags(settings: &config::Settings, args: PurgeTagsArgs) -> Result<(), InfraError> {
    let scenario = Scenario::from_path(&args.file)?;
    let tags = scenario.purge_tags(&settings.cache, args.content_id);
    info!(
        target = "edgecache::purge_tags",
        content_id = args.content_id,
        tag_count = tags.len(),
        "Computed purge tags"
    );

    for tag in tags.iter() {
        println!("{tag}");
    }
    Ok(())
}

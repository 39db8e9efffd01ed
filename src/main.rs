mod cli;
mod logging;

use crate::cli::Cli;
use clap::Parser;
use lectern_assemble::EpubOptions;
use lectern_config::{Config, Loader};
use lectern_manifest::Manifest;
use lectern_package::{FetchOptions, Fetcher};
use lectern_pipeline::{Janitor, OutputNamer, Pipeline, Settings};
use lectern_render::{ChromeOptions, ChromeRenderer, Processes, StyleConfig, XhtmlConverter};
use std::fmt::Debug;
use std::process::ExitCode;
use std::time::Duration;

/// Unknown or empty subject, bad configuration, unusable template.
const USAGE: u8 = 2;
const FAILURE: u8 = 1;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut loader = Loader::new().with_overrides(cli.overrides());
    if let Some(file) = &cli.config {
        loader = loader.with_file(file);
    }
    let config = match loader.load() {
        Ok(config) => config,
        Err(err) => return report(USAGE, &err),
    };
    logging::init(&config.log, cli.verbosity());
    tracing::debug!(?config, "Configuration loaded");

    let manifest = match Manifest::load(&config.manifest) {
        Ok(manifest) => manifest,
        Err(err) => return report(USAGE, &err),
    };
    let Some(name) = cli.subject.as_deref().filter(|_| !cli.list) else {
        for name in manifest.names() {
            println!("{name}");
        }
        return ExitCode::SUCCESS;
    };
    let subject = match manifest.subject(name) {
        Ok(subject) => subject,
        Err(err) => return report(if err.is_usage() { USAGE } else { FAILURE }, &err),
    };
    let namer: OutputNamer = match config.output.template.parse() {
        Ok(namer) => namer,
        Err(err) => return report(USAGE, &err),
    };
    let processes = Processes::new();
    let renderer = match renderer(&config) {
        Ok(renderer) => renderer.with_processes(processes.clone()),
        Err(err) => return report(FAILURE, &err),
    };

    let janitor = Janitor::new().with_processes(processes);
    if let Err(err) = janitor.install_signal_handler() {
        tracing::warn!(error = ?err, "Interrupts will not clean up the scratch directory");
    }
    let fetcher = Fetcher::new(&FetchOptions {
        max_bytes: config.fetch.max_package_bytes,
        user_agent: config.fetch.user_agent.clone(),
        referer: config.fetch.referer.clone(),
        timeout: Duration::from_secs(config.fetch.timeout_secs),
    });
    let settings = Settings {
        output_dir: config.output_dir.clone(),
        scratch_root: config.scratch_root.clone(),
        namer,
        max_entry_bytes: config.fetch.max_package_bytes,
        epub: EpubOptions { language: config.epub.language.clone(), modified: config.epub.modified.clone() },
    };
    let pipeline = Pipeline::new(settings, fetcher, renderer, XhtmlConverter).with_janitor(janitor);
    match pipeline.run(subject) {
        Ok(summary) => {
            print!("{summary}");
            ExitCode::SUCCESS
        },
        Err(err) => report(FAILURE, &err),
    }
}

fn renderer(config: &Config) -> lectern_render::error::Result<ChromeRenderer> {
    let render = &config.render;
    let styles = StyleConfig::from_names_and_files(render.styles.as_slice(), render.stylesheets.as_slice())?;
    let options = ChromeOptions {
        executable: render.chrome.clone(),
        virtual_time_budget_ms: render.virtual_time_budget_ms,
        offline: render.offline,
        extra_args: render.extra_args.clone(),
    };
    ChromeRenderer::new(options, styles)
}

/// Prints the whole error tree, so the failing stage and its cause are both
/// visible without turning on debug logs.
fn report(code: u8, err: &impl Debug) -> ExitCode {
    eprintln!("error: {err:?}");
    ExitCode::from(code)
}

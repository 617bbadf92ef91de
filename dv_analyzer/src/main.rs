//! Command-line driver: discover typed-tree artifacts, run the
//! dead-value analysis, render the warnings.

use std::{collections::BTreeMap, fs, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use dv_analysis::{report, AnalysisConfig};
use dv_ast::CompUnit;
use dv_files::{FileId, Sources};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "dv_analyzer",
    about = "Whole-program dead-value analysis over typed-tree artifacts"
)]
struct Opts {
    /// Directory scanned recursively for `*.dvt.json` artifacts.
    artifacts: PathBuf,
    /// Dump intermediate tables to stderr.
    #[arg(long)]
    debug: bool,
    /// Back-annotate source files with dead-value markers.
    #[arg(long)]
    write: bool,
    /// Suppress warnings whose source file starts with this prefix.
    #[arg(long = "suppress", value_name = "PREFIX")]
    suppress: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opts = Opts::parse();

    let mut artifact_paths: Vec<PathBuf> = WalkDir::new(&opts.artifacts)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.ends_with(".dvt.json"))
        })
        .collect();
    artifact_paths.sort();
    if artifact_paths.is_empty() {
        bail!("no `*.dvt.json` artifacts under {}", opts.artifacts.display());
    }

    let mut sources = Sources::new();
    let mut units = vec![];
    for path in &artifact_paths {
        let data = fs::read(path)
            .with_context(|| format!("failed to read artifact {}", path.display()))?;
        let unit: CompUnit = serde_json::from_slice(&data)
            .with_context(|| format!("failed to decode artifact {}", path.display()))?;
        let text = fs::read(&unit.source)
            .with_context(|| format!("failed to read source {}", unit.source.display()))?;
        let file = sources
            .add_file(unit.name.to_string(), &text, unit.source.clone())
            .map_err(|e| anyhow!("source {} is not valid UTF-8: {e}", unit.source.display()))?;
        units.push((unit, file));
    }
    tracing::info!(artifacts = units.len(), "loaded typed-tree artifacts");

    let config = AnalysisConfig {
        debug: opts.debug,
        write: opts.write,
        suppress: opts.suppress,
    };
    let warnings = dv_analysis::run(&units, &sources, &config).context("analysis failed")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for warning in &warnings {
        sources.emit(&report::to_report(warning), &mut out)?;
    }
    drop(out);

    if config.write {
        annotate(&sources, &warnings)?;
    }
    Ok(())
}

/// Insert a `(* dv:dead *)` marker ahead of each dead range, processed
/// per file with the highest offset first so earlier insertions do not
/// shift later offsets.
fn annotate(sources: &Sources, warnings: &[report::Warning]) -> Result<()> {
    let mut per_file: BTreeMap<FileId, Vec<&report::Warning>> = BTreeMap::new();
    for warning in warnings {
        per_file.entry(warning.span.file).or_default().push(warning);
    }
    for (file, mut file_warnings) in per_file {
        file_warnings.sort_by_key(|w| std::cmp::Reverse(w.span.start));
        file_warnings.dedup_by_key(|w| w.span.start);
        let mut text = sources.text(file).to_owned();
        for warning in file_warnings {
            let at = warning.span.start as usize;
            if at <= text.len() && text.is_char_boundary(at) {
                text.insert_str(at, "(* dv:dead *) ");
            }
        }
        fs::write(sources.path(file), text)
            .with_context(|| format!("failed to write {}", sources.path(file).display()))?;
    }
    Ok(())
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use epub_translator::{
    chapter_previews, translate_book, CancelFlag, ChapterOutcome, Document, GeminiTranslator,
    PromptContext, TranslateOptions, TranslatorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "epub-translator")]
#[command(about = "App to translate or show chapters of a book.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Translate a book
    Translate(TranslateArgs),
    /// Show the list of chapters
    ShowChapters {
        /// Input .epub
        #[arg(long, value_name = "EPUB")]
        input: PathBuf,
    },
    /// Write an example config file, then exit
    InitConfig {
        #[arg(long, value_name = "TOML", default_value = "epub-translator.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct TranslateArgs {
    /// Input .epub
    #[arg(long, value_name = "EPUB")]
    input: PathBuf,

    /// Output .epub
    #[arg(long, value_name = "EPUB")]
    output: PathBuf,

    /// Config file path (default: search for epub-translator.toml in the current directory)
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Starting chapter for translation
    #[arg(long)]
    from_chapter: Option<usize>,

    /// Ending chapter for translation
    #[arg(long)]
    to_chapter: Option<usize>,

    /// Source language (default from config: EN)
    #[arg(long)]
    from_lang: Option<String>,

    /// Target language (default from config: PL)
    #[arg(long)]
    to_lang: Option<String>,

    /// Number of workers for parallel processing (default from config: 5)
    #[arg(long)]
    n_worker: Option<usize>,

    /// Maximum chunk size in characters (default from config: 10000)
    #[arg(long)]
    max_chunk_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().mode {
        Mode::Translate(args) => translate(args).await,
        Mode::ShowChapters { input } => show_chapters(&input),
        Mode::InitConfig { path, force } => init_config(&path, force),
    }
}

fn options_for(args: &TranslateArgs, config: &TranslatorConfig) -> TranslateOptions {
    let mut options = TranslateOptions::from_config(config);
    // 0 与未指定等价
    if let Some(from) = args.from_chapter.filter(|&n| n > 0) {
        options.from_chapter = from;
    }
    if let Some(to) = args.to_chapter.filter(|&n| n > 0) {
        options.to_chapter = to;
    }
    options.ctx = PromptContext::new(
        args.from_lang.clone().unwrap_or_else(|| options.ctx.source_lang.clone()),
        args.to_lang.clone().unwrap_or_else(|| options.ctx.target_lang.clone()),
    );
    if let Some(workers) = args.n_worker {
        options.workers = workers;
    }
    if let Some(size) = args.max_chunk_size {
        options.max_chunk_size = size;
    }
    options
}

async fn translate(args: TranslateArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => TranslatorConfig::from_file(path)
            .with_context(|| format!("load config: {}", path.display()))?,
        None => TranslatorConfig::load_from_default_locations(),
    };
    let options = options_for(&args, &config);
    let api_key = config.api_key()?;
    let translator = Arc::new(
        GeminiTranslator::new(config.gemini.clone(), api_key).context("create Gemini client")?,
    );

    info!(
        "Translating {} ({} -> {}, chapters {}..={}, {} workers)",
        args.input.display(),
        options.ctx.source_lang,
        options.ctx.target_lang,
        options.from_chapter,
        options.to_chapter,
        options.workers
    );

    let cancel = CancelFlag::new();
    let run = translate_book(&args.input, &args.output, translator, &options, cancel.clone());

    tokio::select! {
        summary = run => {
            let summary = summary
                .with_context(|| format!("translate {}", args.input.display()))?;
            let untranslated = summary
                .outcomes
                .iter()
                .filter(|(_, outcome)| *outcome == ChapterOutcome::Untranslated)
                .count();
            info!(
                "Wrote {}: {} chapters, {}/{} chunks failed, {} chapters left untranslated",
                args.output.display(),
                summary.chapters_selected,
                summary.jobs_failed,
                summary.jobs_total,
                untranslated
            );
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            warn!("You pressed Ctrl+C! Shutting down without writing {}.", args.output.display());
            std::process::exit(130);
        }
    }
}

fn show_chapters(input: &Path) -> anyhow::Result<()> {
    let document = Document::read_epub(input)
        .with_context(|| format!("read epub: {}", input.display()))?;
    for preview in chapter_previews(&document).context("extract chapter text")? {
        print!("{}", preview);
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    TranslatorConfig::generate_example_config(path)
        .with_context(|| format!("write config: {}", path.display()))?;
    println!("Wrote example config to {}", path.display());
    Ok(())
}

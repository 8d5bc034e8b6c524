use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::pipeline::RunOptions;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl and translate a book, resuming where the last run stopped.
    Pipeline(PipelineArgs),
    /// Show chapter status counts for a book.
    Status(StatusArgs),
    /// List books with untranslated chapters.
    Resumable(ResumableArgs),
    Glossary {
        #[command(subcommand)]
        command: GlossaryCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmEngine {
    /// OpenAI-compatible chat completions (`OPENAI_*` env vars).
    Openai,
    /// Identity translation, no glossary generation. For dry runs.
    Noop,
}

#[derive(Debug, Args)]
pub struct PipelineArgs {
    /// Book directory. Derived from `--url` under the books dir when omitted.
    #[arg(long)]
    pub book_dir: Option<PathBuf>,

    /// Book index page. Required the first time a book is processed.
    #[arg(long)]
    pub url: Option<String>,

    /// Chapter range, e.g. `1-5,10,15-20`.
    #[arg(long)]
    pub chapters: Option<String>,

    /// Translation style (tien_hiep, kiem_hiep, huyen_huyen, do_thi).
    #[arg(long, default_value = crate::style::DEFAULT_STYLE)]
    pub style: String,

    /// Number of concurrent chapter translators.
    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long, conflicts_with = "translate_only")]
    pub crawl_only: bool,

    #[arg(long)]
    pub translate_only: bool,

    /// Skip initial glossary generation.
    #[arg(long)]
    pub no_glossary: bool,

    /// Reset chapters in range so they are processed again.
    #[arg(long)]
    pub force: bool,

    /// Glossary CSV to merge in before the run.
    #[arg(long)]
    pub glossary_csv: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LlmEngine::Openai)]
    pub engine: LlmEngine,
}

impl PipelineArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            url: self.url.clone(),
            chapters: self.chapters.clone(),
            style: self.style.clone(),
            workers: self.workers,
            crawl_only: self.crawl_only,
            translate_only: self.translate_only,
            auto_glossary: !self.no_glossary,
            force: self.force,
        }
    }
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long)]
    pub book_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct ResumableArgs {
    /// Directory holding one sub-directory per book.
    #[arg(long)]
    pub books_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum GlossaryCommand {
    List(GlossaryListArgs),
    Add(GlossaryAddArgs),
    Remove(GlossaryRemoveArgs),
    Import(GlossaryImportArgs),
    Export(GlossaryExportArgs),
}

#[derive(Debug, Args)]
pub struct GlossaryListArgs {
    #[arg(long)]
    pub book_dir: PathBuf,

    /// Only this category.
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Debug, Args)]
pub struct GlossaryAddArgs {
    #[arg(long)]
    pub book_dir: PathBuf,

    pub source: String,

    pub target: String,

    #[arg(long, default_value = "general")]
    pub category: String,

    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Debug, Args)]
pub struct GlossaryRemoveArgs {
    #[arg(long)]
    pub book_dir: PathBuf,

    pub source: String,
}

#[derive(Debug, Args)]
pub struct GlossaryImportArgs {
    #[arg(long)]
    pub book_dir: PathBuf,

    pub csv: PathBuf,
}

#[derive(Debug, Args)]
pub struct GlossaryExportArgs {
    #[arg(long)]
    pub book_dir: PathBuf,

    pub out: PathBuf,
}

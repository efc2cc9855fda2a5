//! The `process` subcommand.

use anyhow::bail;
use clap::Args;
use tokio::io::{AsyncWriteExt as _, BufWriter};

use crate::{
    async_utils::create_writer,
    config::ProcessOptions,
    engine::tesseract::TesseractEngine,
    pipeline::Pipeline,
    prelude::*,
    result::DocumentStatus,
    ui::{ProgressConfig, Ui},
};

/// Process command line arguments.
#[derive(Args, Debug)]
pub struct ProcessOpts {
    /// The documents to process.
    #[clap(value_name = "FILES", required = true)]
    pub input_paths: Vec<PathBuf>,

    /// The output path, written as one JSON result per line. Defaults to
    /// standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub options: ProcessOptions,
}

/// The `process` subcommand.
///
/// Documents are handled one at a time; the pages within each document are
/// processed concurrently. Exits with an error unless every document comes
/// back fully successful.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_process(ui: Ui, opts: &ProcessOpts) -> Result<()> {
    let engine = TesseractEngine::new().await?;
    let pipeline = Pipeline::new(engine);

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Processing documents",
            done_msg: "Processed documents",
        },
        opts.input_paths.len() as u64,
    );

    let mut writer = BufWriter::new(create_writer(opts.output_path.as_deref()).await?);
    let mut failure_count = 0usize;
    for path in &opts.input_paths {
        let payload = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let declared_type = mime_guess::from_path(path).first_raw().unwrap_or("");
        match pipeline.process(payload, declared_type, &opts.options).await {
            Ok(result) => {
                if result.status != DocumentStatus::Success {
                    failure_count += 1;
                }
                let json =
                    serde_json::to_string(&result).context("failed to serialize result")?;
                writer
                    .write_all(json.as_bytes())
                    .await
                    .context("failed to write result")?;
                writer
                    .write_all(b"\n")
                    .await
                    .context("failed to write result")?;
            }
            Err(err) => {
                failure_count += 1;
                error!(path = %path.display(), "could not process document: {err}");
            }
        }
        pb.inc(1);
    }
    writer.flush().await.context("failed to flush output")?;
    pb.finish_using_style();

    if failure_count > 0 {
        bail!(
            "{failure_count}/{} documents failed or came back incomplete",
            opts.input_paths.len()
        );
    }
    Ok(())
}

//! The `schema` subcommand.

use clap::Args;
use schemars::schema_for;
use tokio::io::AsyncWriteExt as _;

use crate::{async_utils::create_writer, prelude::*, result::DocumentResult};

/// Schema command line arguments.
#[derive(Args, Debug)]
pub struct SchemaOpts {
    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand, which prints the JSON Schema for the result
/// records written by `process`.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = schema_for!(DocumentResult);

    // Write out our schema.
    let mut wtr = create_writer(schema_opts.output_path.as_deref()).await?;
    let schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    wtr.write_all(schema_str.as_bytes())
        .await
        .context("failed to write schema")?;
    wtr.flush().await.context("failed to flush schema")?;
    Ok(())
}

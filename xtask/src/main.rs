//! Build automation tasks for the listing migration workspace
//!
//! - `generate-cli-docs`: render the `listing-migrate` CLI reference as markdown

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for the listing migration workspace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<listing_migrate::Cli>();

    let content = format!(
        r#"# listing-migrate CLI Reference

Auto-generated from the CLI source code. Last updated: {}.

## Modes

| Mode | Store | Object storage | Effect |
|---|---|---|---|
| `validate` | no | no | Dry run; writes `validation-report.json` |
| `test` | yes | no | Fresh import of the first `MIGRATION_TEST_LIMIT` rows |
| `images` | yes | yes | Migrates images of records without a primary image |
| `full` | yes | yes | Resets the checkpoint, imports every row, then images |
| `resume` | yes | if images were interrupted | Imports rows after the checkpoint's last processed row, then finishes an interrupted image phase |
| `verify` | yes | no | Reconciles store counts; writes `verification-report.json` |
| `status` | no | no | Prints the checkpoint |

A `full` run waits `MIGRATION_PREFLIGHT_SECS` before touching anything; press Ctrl+C to cancel.

## Commands

{}

## Environment Variables

- `DATABASE_URL` - Property store connection string (required by store modes)
- `S3_BUCKET`, `S3_ENDPOINT`, `S3_REGION`, `S3_ACCESS_KEY`, `S3_SECRET_KEY` - Object storage
- `MIGRATION_BATCH_SIZE`, `MIGRATION_IMAGE_CONCURRENCY`, `MIGRATION_CHECKPOINT_PATH` - Tuning
- `LOG_LEVEL`, `LOG_DIR` - Logging (run log and error-only log)

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());
    Ok(())
}

//! Text-to-wire translation for the `client` mode.

use queuekv_core::{Command, CommandError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// Counts from one translation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Translated {
    /// Lines turned into wire commands.
    pub sent: usize,
    /// Lines rejected with a usage error.
    pub rejected: usize,
}

/// Reads text commands from `input` and writes one JSON command per line to
/// `output`. Stops at EOF or a line reading `exit`. Blank lines are ignored;
/// malformed ones are reported and skipped.
///
/// # Errors
///
/// Returns an error if reading `input` or writing `output` fails.
pub async fn translate<R, W>(input: R, mut output: W) -> anyhow::Result<Translated>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut counts = Translated::default();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" {
            break;
        }
        match Command::parse_text(line) {
            Ok(command) => {
                let mut body = command.encode()?;
                body.push('\n');
                output.write_all(body.as_bytes()).await?;
                output.flush().await?;
                counts.sent += 1;
            }
            Err(CommandError::Empty) => {}
            Err(err) => {
                warn!(%line, "{err}");
                counts.rejected += 1;
            }
        }
    }

    Ok(counts)
}

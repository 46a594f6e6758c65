//! Test peer: acknowledges every chat message and answers with its text.
//!
//! Speaks framed envelopes on stdin/stdout, so it can be configured as a
//! peer command of the bridge.

use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{stdin, stdout};

use nakadachi::logging;
use nakadachi::protocol::{
    ChatAcknowledgement, ChatMessage, Envelope, FrameReader, FrameWriter, FramingError, MessageId,
};

/// Echo peer for exercising the nakadachi bridge
#[derive(Parser)]
#[command(name = "nakadachi-echo")]
#[command(version)]
struct Cli {
    /// Text placed before the echoed query
    #[arg(long, default_value = "Echo")]
    prefix: String,

    /// Wait this long before replying
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Acknowledge but never reply
    #[arg(long)]
    silent: bool,

    /// Omit the reply reference, like peers whose protocol has none
    #[arg(long)]
    no_reference: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(None);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!(target: "nakadachi::echo", "{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), FramingError> {
    let mut reader = FrameReader::new(stdin());
    let mut writer = FrameWriter::new(stdout());

    loop {
        let envelope = match reader.read_json::<Envelope>().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                log::warn!(target: "nakadachi::echo", "Skipping bad frame: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let message = match envelope {
            Envelope::Message(message) => message,
            Envelope::Acknowledgement(ack) => {
                log::debug!(
                    target: "nakadachi::echo",
                    "Bridge acknowledged {}",
                    ack.acknowledged_msg_id
                );
                continue;
            }
        };

        log::info!(
            target: "nakadachi::echo",
            "Received {}: {}",
            message.msg_id,
            message.text_content()
        );
        writer
            .write_json(&Envelope::Acknowledgement(ChatAcknowledgement::new(
                message.msg_id.clone(),
            )))
            .await?;

        if cli.silent {
            continue;
        }
        if cli.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cli.delay_ms)).await;
        }

        let text = format!("{}: {}", cli.prefix, message.text_content());
        let reply = if cli.no_reference {
            ChatMessage::text(MessageId::generate(), text)
        } else {
            ChatMessage::reply(MessageId::generate(), message.msg_id, text)
        };
        writer.write_json(&Envelope::Message(reply)).await?;
    }
}

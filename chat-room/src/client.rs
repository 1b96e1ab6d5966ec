//! Terminal client for the TCP front end.
//!
//! Uses the same line framing as the server side, so multi-line messages
//! from browser members print intact.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout},
    net::TcpStream,
    select,
};
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    hub::Message,
    transport::{self, DEFAULT_MAX_MESSAGE_SIZE},
};

/// What a line typed at the prompt asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Say(&'a str),
    Quit,
    Blank,
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        match line.trim_end() {
            "" => Input::Blank,
            text if text.eq_ignore_ascii_case("/quit") => Input::Quit,
            text => Input::Say(text),
        }
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let (reader, writer) = stream.into_split();
    let (mut room, mut outgoing) = transport::lines(reader, writer, DEFAULT_MAX_MESSAGE_SIZE);

    let mut stdout = io::stdout();
    let mut prompt = BufReader::new(io::stdin()).lines();
    print(&mut stdout, &format!("*** connected to {}", args.server)).await?;

    // Both `next` futures keep partial lines across cancellation.
    loop {
        select! {
            incoming = room.next() => {
                let Some(message) = incoming else {
                    print(&mut stdout, "*** server closed the connection").await?;
                    break;
                };
                let message = message.context("failed to read from the room")?;
                print(&mut stdout, &String::from_utf8_lossy(&message)).await?;
            }
            typed = prompt.next_line() => {
                let Some(line) = typed.context("failed to read stdin")? else {
                    break;
                };
                match Input::parse(&line) {
                    Input::Blank => {}
                    Input::Quit => {
                        print(&mut stdout, "*** leaving chat").await?;
                        break;
                    }
                    Input::Say(text) => outgoing
                        .send(Message::copy_from_slice(text.as_bytes()))
                        .await
                        .context("failed to send message")?,
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = ?err, "failed to listen for ctrl-c");
                }
                break;
            }
        }
    }

    if let Err(err) = outgoing.close().await {
        debug!(error = ?err, "connection did not close cleanly");
    }
    Ok(())
}

async fn print(stdout: &mut Stdout, line: &str) -> io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

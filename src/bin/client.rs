//! A console for the control panel.
//!
//! Connects to the panel at the WebSocket URL given as the only argument, sends each line read on
//! stdin as a request (e.g. `ports`, `connect 0`, `motor 0.5 0`), and prints every response.

use std::{env, process, error::Error};

use futures::{FutureExt, pin_mut, SinkExt, StreamExt, TryStreamExt, select};
use futures::channel::mpsc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let connect_addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:5000".to_string());

    let url = Url::parse(&connect_addr)?;

    let (stdin_tx, stdin_rx) = mpsc::unbounded();
    tokio::spawn(read_stdin(stdin_tx));

    let (ws_stream, _) = connect_async(url).await?;
    println!("Connected to {}", connect_addr);

    let (mut write, read) = ws_stream.split();

    let stdin_to_ws = stdin_rx.map(|r| Ok(Message::text(r))).forward(&mut write);
    let ws_to_stdout = {
        read.try_for_each(|message| async move {
            match message {
                Message::Text(t) => println!("{}", t),
                m => println!("{:?}", m),
            }
            Ok(())
        }).fuse()
    };

    pin_mut!(stdin_to_ws, ws_to_stdout);
    select!(
        _ = stdin_to_ws => {},
        _ = ws_to_stdout => {},
        // Watch for ctrl-c
        res = signal::ctrl_c().fuse() => if let Err(e) = res {
            eprintln!("Failed to wait for ctrl-c signal: {}", e);
        },
    );

    if let Err(e) = write.close().await {
        eprintln!("Failed to close WebSocket connection: {}", e);
    }
    println!("disconnected");
    process::exit(0);
}

// Reads requests from stdin and sends them along the sender provided.
async fn read_stdin(tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(request) = parse_input(&line) {
            if tx.unbounded_send(request).is_err() {
                break;
            }
        }
    }
}

// Normalizes a line of user input into a request, collapsing whitespace. Blank lines and comments
// starting with `#` are skipped.
fn parse_input(s: &str) -> Option<String> {
    let s = s.split('#').next().unwrap_or("");
    let words = s.split_whitespace().collect::<Vec<_>>();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use crate::parse_input;

    #[test]
    fn test_parse_input() {
        assert_eq!(None, parse_input(""));
        assert_eq!(None, parse_input("   "));
        assert_eq!(None, parse_input("# just a comment"));
        assert_eq!(Some("ports".to_string()), parse_input("ports"));
        assert_eq!(Some("motor 0.5 -1".to_string()), parse_input("  motor   0.5\t-1 "));
        assert_eq!(Some("connect 0".to_string()), parse_input("connect 0 # arduino"));
    }
}

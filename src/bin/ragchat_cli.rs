use anyhow::{Context, Result};
use colored::*;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use ragchat::client::{ChatClient, ChatSession, ClientError, Transcript};
use ragchat::config::Config;

/// Terminal rendering state for one answer
#[derive(Default)]
struct Renderer {
    indicators_shown: usize,
    shown: String,
    show_citations: bool,
}

impl Renderer {
    fn update(&mut self, transcript: &Transcript) {
        for indicator in transcript.indicators().iter().skip(self.indicators_shown) {
            if !transcript.is_failed() {
                eprintln!("  {}", indicator.status.dimmed());
            }
        }
        self.indicators_shown = transcript.indicators().len();

        let content = if self.show_citations {
            transcript.content().to_string()
        } else {
            transcript.content_without_citations()
        };
        // Content is cumulative, so only the new tail needs printing
        if let Some(tail) = content.strip_prefix(self.shown.as_str()) {
            if !tail.is_empty() {
                print!("{tail}");
                let _ = std::io::stdout().flush();
                self.shown = content;
            }
        }
    }

    fn finish(&self, transcript: &Transcript) {
        println!();
        if transcript.is_failed() {
            if let Some(error) = transcript.indicators().last() {
                eprintln!("{}", error.status.red());
            }
            return;
        }
        for (i, citation) in transcript.citations().iter().enumerate() {
            println!(
                "  {} {} {}",
                format!("[{}]", i + 1).cyan(),
                citation.label(),
                citation.source_url.dimmed()
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let config_path =
        std::env::var("RAGCHAT_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading {config_path}"))?;
    let url = std::env::var("RAGCHAT_URL")
        .unwrap_or_else(|_| format!("http://{}", config.server.bind));
    let token = std::env::var("RAGCHAT_BEARER_TOKEN").ok();
    let show_citations = !std::env::args().any(|a| a == "--no-citations");

    let mut session = ChatSession::new(ChatClient::new(&url, token), &config.chat);
    println!("{}", config.chat.initial_message.green());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".bold());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        let mut renderer = Renderer {
            show_citations,
            ..Renderer::default()
        };
        match session.ask(question, |t| renderer.update(t)).await {
            Ok(transcript) => renderer.finish(&transcript),
            Err(ClientError::WordLimit { message, .. }) => {
                println!("{}", message.yellow());
                break;
            }
            Err(e) => eprintln!("\n{} {e}", "error:".red().bold()),
        }
    }
    Ok(())
}

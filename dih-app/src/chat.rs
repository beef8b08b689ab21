//! Interactive streaming chat (`dih chat`).

use anyhow::Result;
use dih_llm::{
    CancellationToken, ChatCompletion, ChatMessage, CompletionResponse, GenerateOptions,
    StreamHandler, estimate_cost, estimate_token_count,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    New,
    Usage,
    Exit,
    Skip,
    Unknown(String),
}

pub fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    match line {
        "" => ReplCommand::Skip,
        "/new" => ReplCommand::New,
        "/usage" => ReplCommand::Usage,
        "/exit" | "/quit" => ReplCommand::Exit,
        cmd if cmd.starts_with('/') => ReplCommand::Unknown(cmd.to_string()),
        text => ReplCommand::Send(text.to_string()),
    }
}

/// Writes only the new suffix of each cumulative update.
pub struct TerminalPrinter<W: Write> {
    out: W,
    printed: usize,
}

impl<W: Write> TerminalPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }
}

impl<W: Write> StreamHandler for TerminalPrinter<W> {
    fn on_text_update(&mut self, text: &str) {
        if let Some(delta) = text.get(self.printed..) {
            let _ = self.out.write_all(delta.as_bytes());
            let _ = self.out.flush();
        }
        self.printed = text.len();
    }

    fn on_complete(&mut self, _response: &CompletionResponse) {
        let _ = writeln!(self.out);
    }

    fn on_error(&mut self, error: &dih_llm::LlmError) {
        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "[error] {error}");
    }
}

pub struct ChatRepl {
    chat: ChatCompletion,
    model: String,
    preamble: Option<ChatMessage>,
    history: Vec<ChatMessage>,
}

impl ChatRepl {
    pub fn new(chat: ChatCompletion, system: Option<String>) -> Self {
        let model = chat.client().model_name().to_string();
        let preamble = system
            .filter(|s| !s.trim().is_empty())
            .map(ChatMessage::system);
        Self {
            chat,
            model,
            preamble,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    fn conversation(&self) -> Vec<ChatMessage> {
        self.preamble
            .iter()
            .chain(self.history.iter())
            .cloned()
            .collect()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn usage_report(&self) -> String {
        let prompt: usize = self
            .conversation()
            .iter()
            .filter(|m| m.role != dih_llm::Role::Assistant)
            .map(|m| estimate_token_count(&m.content))
            .sum();
        let completion: usize = self
            .history
            .iter()
            .filter(|m| m.role == dih_llm::Role::Assistant)
            .map(|m| estimate_token_count(&m.content))
            .sum();
        let cost = estimate_cost(prompt as u32, completion as u32, &self.model);
        format!(
            "~{prompt} prompt tokens, ~{completion} completion tokens, ~${cost:.5} on {}",
            self.model
        )
    }

    /// One user turn. The assistant reply joins the history only on success.
    pub async fn send<H: StreamHandler>(
        &mut self,
        text: &str,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<CompletionResponse> {
        self.history.push(ChatMessage::user(text));
        let result = self
            .chat
            .generate_stream_with_cancel(self.conversation(), GenerateOptions::default(), handler, cancel)
            .await;
        match result {
            Ok(response) => {
                self.history.push(response.to_message());
                Ok(response)
            }
            Err(e) => {
                self.history.pop();
                Err(e.into())
            }
        }
    }
}

async fn send_interruptible(repl: &mut ChatRepl, text: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let result = repl
        .send(text, TerminalPrinter::new(std::io::stdout()), cancel)
        .await;
    watcher.abort();
    if let Err(e) = result {
        tracing::debug!(error = %e, "chat turn failed");
    }
    Ok(())
}

pub async fn run(chat: ChatCompletion, system: Option<String>, once: Option<String>) -> Result<()> {
    let mut repl = ChatRepl::new(chat, system);

    if let Some(prompt) = once {
        let response = repl
            .send(&prompt, TerminalPrinter::new(std::io::stdout()), CancellationToken::new())
            .await?;
        tracing::debug!(finish_reason = %response.finish_reason, "one-shot chat finished");
        return Ok(());
    }

    println!("dih chat with {} (/new, /usage, /exit)", repl.model);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_line(&line) {
            ReplCommand::Send(text) => send_interruptible(&mut repl, &text).await?,
            ReplCommand::New => {
                repl.reset();
                println!("started a new conversation");
            }
            ReplCommand::Usage => println!("{}", repl.usage_report()),
            ReplCommand::Exit => break,
            ReplCommand::Skip => {}
            ReplCommand::Unknown(cmd) => println!("unknown command {cmd}"),
        }
    }
    Ok(())
}

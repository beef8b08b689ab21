use dih_llm::{ChatCompletion, ChatMessage, ClientConfig, GenerateOptions, LlmClient, StreamCallbacks};
use std::io::Write;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let model = std::env::var("DIH_MODEL_NAME").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
    let mut config = ClientConfig::new(model);
    config.api_key = std::env::var("DIH_API_KEY").ok();
    let chat = ChatCompletion::new(Arc::new(LlmClient::new(&config)?));

    let mut printed = 0;
    let handler = StreamCallbacks::new()
        .on_text_update(move |text| {
            print!("{}", &text[printed..]);
            let _ = std::io::stdout().flush();
            printed = text.len();
        })
        .on_error(|e| eprintln!("\nstream failed: {e}"));

    let response = chat
        .generate_stream(
            vec![ChatMessage::user("Write a haiku about Rust.")],
            GenerateOptions::default(),
            handler,
        )
        .await?;

    println!("\n[finish: {}]", response.finish_reason);
    Ok(())
}

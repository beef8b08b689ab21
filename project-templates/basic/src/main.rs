use dih_llm::{ChatCompletion, ChatMessage, ClientConfig, GenerateOptions, LlmClient};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let model = std::env::var("DIH_MODEL_NAME").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
    let mut config = ClientConfig::new(model);
    config.api_key = std::env::var("DIH_API_KEY").ok();
    let chat = ChatCompletion::new(Arc::new(LlmClient::new(&config)?));

    let response = chat
        .generate(
            vec![
                ChatMessage::system("You are a helpful assistant."),
                ChatMessage::user("Say hello to {{project_name}}!"),
            ],
            GenerateOptions::default(),
        )
        .await?;

    println!("{}", response.text);
    Ok(())
}

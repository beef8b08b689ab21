use dih_llm::{
    ChatCompletion, ChatMessage, ClientConfig, GenerateOptions, LlmClient, ToolChoice,
    ToolDefinition,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let model = std::env::var("DIH_MODEL_NAME").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
    let mut config = ClientConfig::new(model);
    config.api_key = std::env::var("DIH_API_KEY").ok();
    let chat = ChatCompletion::new(Arc::new(LlmClient::new(&config)?));

    let weather = ToolDefinition {
        name: "get_weather".to_string(),
        description: "Get the current weather for a location".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": { "location": { "type": "string" } },
            "required": ["location"]
        }),
    };
    let mut messages = vec![ChatMessage::user("What's the weather in Paris?")];
    let options = GenerateOptions {
        tools: vec![weather],
        tool_choice: Some(ToolChoice::Auto),
        ..GenerateOptions::default()
    };

    let response = chat.generate(messages.clone(), options.clone()).await?;
    if !response.has_tool_calls() {
        println!("{}", response.text);
        return Ok(());
    }

    messages.push(response.to_message());
    for call in response.tool_calls() {
        let args = call.parse_arguments()?;
        println!("{} {}", call.function.name, args);
        let result = serde_json::json!({ "location": args["location"], "conditions": "sunny" });
        messages.push(ChatMessage::tool_result(&call.id, result.to_string()));
    }

    let answer = chat.generate(messages, options).await?;
    println!("{}", answer.text);
    Ok(())
}

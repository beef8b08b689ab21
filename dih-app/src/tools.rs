//! Built-in demo tools for `dih tools` and `/api/process-query`.

use anyhow::Result;
use dih_llm::{ChatCompletion, ChatMessage, GenerateOptions, ToolCall, ToolChoice, ToolDefinition};
use serde::Deserialize;

pub const TOOLS_SYSTEM_PROMPT: &str = "You are a helpful assistant that can use tools.";

const CONDITIONS: [&str; 4] = ["sunny", "cloudy", "rainy", "windy"];

pub fn demo_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_weather".to_string(),
            description: "Get the current weather for a location".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and state, e.g., San Francisco, CA"
                    },
                    "unit": {
                        "type": "string",
                        "enum": ["celsius", "fahrenheit"],
                        "description": "The unit of temperature"
                    }
                },
                "required": ["location"]
            }),
        },
        ToolDefinition {
            name: "calculate".to_string(),
            description: "Apply an arithmetic operation to two numbers".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["add", "subtract", "multiply", "divide"]
                    },
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["operation", "a", "b"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    location: String,
    #[serde(default = "default_unit")]
    unit: String,
}

fn default_unit() -> String {
    "celsius".to_string()
}

#[derive(Debug, Deserialize)]
struct CalculateArgs {
    operation: String,
    a: f64,
    b: f64,
}

/// Run one requested call locally.
pub fn execute(call: &ToolCall) -> Result<serde_json::Value> {
    let args = call.parse_arguments()?;
    match call.function.name.as_str() {
        "get_weather" => {
            let args: WeatherArgs = serde_json::from_value(args)?;
            Ok(mock_weather(&args.location, &args.unit))
        }
        "calculate" => {
            let args: CalculateArgs = serde_json::from_value(args)?;
            calculate(&args.operation, args.a, args.b)
        }
        other => Err(anyhow::anyhow!("unknown tool {other:?}")),
    }
}

/// Stable per-location mock so repeated demo runs agree with each other.
fn mock_weather(location: &str, unit: &str) -> serde_json::Value {
    let seed = location
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let celsius = (seed % 30) as f64;
    let temperature = if unit == "fahrenheit" {
        celsius * 9.0 / 5.0 + 32.0
    } else {
        celsius
    };
    serde_json::json!({
        "location": location,
        "temperature": temperature,
        "unit": unit,
        "conditions": CONDITIONS[(seed as usize / 30) % CONDITIONS.len()],
        "humidity": seed % 100,
        "forecast": "This is a mock weather forecast.",
        "timestamp": chrono::Utc::now(),
    })
}

fn calculate(operation: &str, a: f64, b: f64) -> Result<serde_json::Value> {
    let result = match operation {
        "add" => a + b,
        "subtract" => a - b,
        "multiply" => a * b,
        "divide" => {
            if b == 0.0 {
                return Err(anyhow::anyhow!("division by zero"));
            }
            a / b
        }
        other => return Err(anyhow::anyhow!("unsupported operation {other:?}")),
    };
    Ok(serde_json::json!({ "operation": operation, "a": a, "b": b, "result": result }))
}

#[derive(Debug)]
pub struct ToolRun {
    pub call: ToolCall,
    pub output: std::result::Result<serde_json::Value, String>,
}

#[derive(Debug)]
pub enum QueryOutcome {
    Content(String),
    ToolRuns(Vec<ToolRun>),
}

/// Send `query` with the demo tools and execute whatever calls come back.
#[tracing::instrument(level = "info", skip_all)]
pub async fn run_query(chat: &ChatCompletion, query: &str) -> Result<QueryOutcome> {
    let messages = vec![
        ChatMessage::system(TOOLS_SYSTEM_PROMPT),
        ChatMessage::user(query),
    ];
    let options = GenerateOptions {
        tools: demo_tools(),
        tool_choice: Some(ToolChoice::Auto),
        ..GenerateOptions::default()
    };
    let response = chat.generate(messages, options).await?;
    if !response.has_tool_calls() {
        return Ok(QueryOutcome::Content(response.text));
    }

    let runs = response
        .tool_calls()
        .iter()
        .map(|call| {
            let output = execute(call).map_err(|e| e.to_string());
            if let Err(e) = &output {
                tracing::warn!(tool = %call.function.name, error = %e, "demo tool failed");
            }
            ToolRun {
                call: call.clone(),
                output,
            }
        })
        .collect();
    Ok(QueryOutcome::ToolRuns(runs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClient;

    #[test]
    fn weather_is_stable_per_location() {
        let call = ToolCall::new("c1", "get_weather", r#"{"location":"Paris"}"#);
        let a = execute(&call).expect("weather");
        let b = execute(&call).expect("weather");
        assert_eq!(a["temperature"], b["temperature"]);
        assert_eq!(a["unit"], "celsius");
        assert_eq!(a["location"], "Paris");
    }

    #[test]
    fn fahrenheit_converts() {
        let c = execute(&ToolCall::new("c", "get_weather", r#"{"location":"Oslo"}"#)).expect("c");
        let f = execute(&ToolCall::new(
            "f",
            "get_weather",
            r#"{"location":"Oslo","unit":"fahrenheit"}"#,
        ))
        .expect("f");
        let celsius = c["temperature"].as_f64().expect("number");
        assert_eq!(f["temperature"].as_f64().expect("number"), celsius * 9.0 / 5.0 + 32.0);
    }

    #[test]
    fn calculate_operations() {
        let call = ToolCall::new("c", "calculate", r#"{"operation":"multiply","a":6,"b":7}"#);
        assert_eq!(execute(&call).expect("calc")["result"], 42.0);

        let call = ToolCall::new("c", "calculate", r#"{"operation":"divide","a":1,"b":0}"#);
        assert!(execute(&call).is_err());
    }

    #[test]
    fn bad_arguments_and_unknown_tools_are_errors() {
        assert!(execute(&ToolCall::new("c", "get_weather", r#"{"loc":"#)).is_err());
        assert!(execute(&ToolCall::new("c", "get_weather", "{}")).is_err());
        assert!(execute(&ToolCall::new("c", "search", "{}")).is_err());
    }

    #[tokio::test]
    async fn run_query_executes_returned_calls() {
        let mut fake = FakeClient::replying("");
        fake.response.tool_calls = Some(vec![
            ToolCall::new("c1", "calculate", r#"{"operation":"add","a":2,"b":3}"#),
            ToolCall::new("c2", "calculate", r#"{"operation":"divide","a":2,"b":0}"#),
        ]);
        let (chat, client) = fake.into_chat();

        let outcome = run_query(&chat, "what is 2 + 3?").await.expect("query");
        let QueryOutcome::ToolRuns(runs) = outcome else {
            panic!("expected tool runs");
        };
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].output.as_ref().expect("sum")["result"], 5.0);
        assert!(runs[1].output.as_ref().expect_err("div by zero").contains("division by zero"));

        let sent = client.last_request().expect("request");
        assert_eq!(sent.tools.len(), 2);
        assert_eq!(sent.tool_choice, Some(ToolChoice::Auto));
    }

    #[tokio::test]
    async fn run_query_passes_plain_answers_through() {
        let (chat, _) = FakeClient::replying("No tools needed.").into_chat();
        match run_query(&chat, "hello").await.expect("query") {
            QueryOutcome::Content(text) => assert_eq!(text, "No tools needed."),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn demo_tool_names() {
        let names: Vec<String> = demo_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["get_weather", "calculate"]);
    }
}

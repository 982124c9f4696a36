// crates/hailgate-rpc/src/handlers/greeter.rs
//
// Greeter handler: SayHello.

use serde::{Deserialize, Serialize};

/// Request for a greeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SayHelloRequest {
    /// Name to greet.
    pub name: String,
}

/// Response carrying the greeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SayHelloResponse {
    /// The greeting message.
    pub message: String,
}

/// Handle a SayHello request.
///
/// Pure string formatting; admission control has already run by the time
/// a request reaches this handler.
pub async fn handle_say_hello(request: SayHelloRequest) -> Result<SayHelloResponse, String> {
    tracing::info!("sending hello response for {}", request.name);
    Ok(SayHelloResponse {
        message: format!("Hello {}", request.name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_say_hello_formats_greeting() {
        let response = handle_say_hello(SayHelloRequest {
            name: "world".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(response.message, "Hello world");
    }

    #[tokio::test]
    async fn test_say_hello_empty_name() {
        let response = handle_say_hello(SayHelloRequest {
            name: String::new(),
        })
        .await
        .unwrap();
        assert_eq!(response.message, "Hello ");
    }
}
